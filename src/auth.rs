// auth.rs
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};

/// 管理API用の認証ミドルウェア (`Authorization: Bearer <ADMIN_TOKEN>`)
pub async fn auth_middleware(
    State(state): State<crate::state::AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let Some(expected) = state.admin_token.as_deref() else {
        tracing::warn!("Auth failed: ADMIN_TOKEN is not configured");
        return Err((
            StatusCode::UNAUTHORIZED,
            "Admin API is disabled".to_string(),
        ));
    };

    let Some(TypedHeader(auth_header)) = bearer else {
        tracing::warn!("Auth failed (missing bearer token)");
        return Err((StatusCode::UNAUTHORIZED, "Missing bearer token".to_string()));
    };

    if !tokens_match(auth_header.token(), expected) {
        tracing::warn!("Auth failed (invalid token)");
        return Err((StatusCode::UNAUTHORIZED, "Invalid token".to_string()));
    }

    Ok(next.run(request).await)
}

/// 一致するまでの比較時間がトークンの内容に依存しない比較
fn tokens_match(given: &str, expected: &str) -> bool {
    given.len() == expected.len()
        && given
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
