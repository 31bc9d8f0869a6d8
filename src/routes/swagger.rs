// src/routes/swagger.rs
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::models::{
    CatalogStats, CrawlKind, CrawlPayload, CrawlResponse, JobStats, JobStatusCount,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::admin::trigger_crawl,
        crate::routes::admin::get_job_stats,
        crate::routes::admin::get_catalog_stats,
    ),
    components(
        schemas(CrawlKind, CrawlPayload, CrawlResponse, JobStats, JobStatusCount, CatalogStats)
    ),
    tags(
        (name = "Admin", description = "タブ譜クロールの起動と進捗確認")
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

// ADMIN_TOKEN による Bearer 認証
struct SecurityAddon;
impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// Swagger UI をホストするルーターを返します。
/// ( /api-docs にUI、 /api-docs/openapi.json に仕様JSON)
pub fn create_swagger_routes() -> SwaggerUi {
    SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
