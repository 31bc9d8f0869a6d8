// src/crawler/selector.rs
//! 同じ曲に対する重複投稿の中から、(曲名, 種別, バージョン) ごとに1件を選ぶ

use super::{ListingCandidate, match_key};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// 重み付けスコアの減衰定数 (m)
pub const DAMPING: f64 = 50.0;
/// 事前平均 (c)
pub const PRIOR_MEAN: f64 = 3.5;

/// 取り込まない種別 (公式 / 有料 / Power / 動画)
const EXCLUDED_TYPES: &[&str] = &["official", "pro", "power", "video"];

/// 対象外ページのURLパターン
const NON_TARGET_URL_PATTERNS: &[&str] = &[
    "/pro/",
    "-guitar-pro-",
    "-power-",
    "-official-",
    "-video-",
    "/lessons/",
];

// "(ver 2)" のような番号付きの重複表記は曲名から落とすだけ
static RE_NUMBERED_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*\(\s*ver(?:sion)?\.?\s*\d+\s*\)").expect("Failed to compile numbered version regex")
});

static RE_NAMED_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(.*?)\s*[\(\[]\s*(acoustic|live|simplified|easy|intro|solo|unplugged|demo|remix|simplificada|ao vivo|ac[uú]stico)\s*[\)\]]\s*$")
        .expect("Failed to compile named version regex")
});

/// ベイズ縮小推定: (n/(n+m))·r + (m/(n+m))·c
pub fn weighted_score(rating: f64, rating_count: u32) -> f64 {
    let n = f64::from(rating_count);
    (n / (n + DAMPING)) * rating + (DAMPING / (n + DAMPING)) * PRIOR_MEAN
}

/// サイトの種別ラベルを正規化する ("Bass Tabs" → "bass", "Ukulele Chords" → "ukulele")
pub fn normalize_type(label: &str) -> String {
    let label = label.trim().to_lowercase();
    let normalized = if label.contains("official") {
        "official"
    } else if label.contains("power") {
        "power"
    } else if label.contains("video") {
        "video"
    } else if label == "pro" || label.contains("guitar pro") {
        "pro"
    } else if label.contains("bass") || label.contains("baixo") {
        "bass"
    } else if label.contains("ukulele") {
        "ukulele"
    } else if label.contains("drum") || label.contains("bateria") {
        "drums"
    } else if label.contains("cavaco") || label.contains("cavaquinho") {
        "cavaquinho"
    } else if label.contains("chord") || label.contains("cifra") {
        "chords"
    } else if label.contains("tab") {
        "tab"
    } else if label.contains("lyric") || label.contains("letra") {
        "lyrics"
    } else {
        return label;
    };
    normalized.to_string()
}

/// 曲名末尾のバージョン表記を分離する: "Wonderwall (Acoustic)" → ("Wonderwall", Some("Acoustic"))
pub fn split_version(title: &str) -> (String, Option<String>) {
    let title = RE_NUMBERED_VERSION.replace_all(title, "");
    let title = title.trim();
    match RE_NAMED_VERSION.captures(title) {
        Some(caps) => {
            let base = caps.get(1).map_or("", |m| m.as_str()).trim().to_string();
            let label = caps.get(2).map_or("", |m| m.as_str());
            (base, Some(canonical_version(label)))
        }
        None => (title.to_string(), None),
    }
}

fn canonical_version(label: &str) -> String {
    match match_key(label).as_str() {
        "easy" | "simplified" | "simplificada" => "Simplified".to_string(),
        "ao vivo" | "live" => "Live".to_string(),
        "acustico" | "acoustic" => "Acoustic".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

/// 種別またはURLが対象外か
pub fn is_excluded(candidate: &ListingCandidate) -> bool {
    EXCLUDED_TYPES.contains(&normalize_type(&candidate.kind).as_str())
        || NON_TARGET_URL_PATTERNS
            .iter()
            .any(|pattern| candidate.tab_url.contains(pattern))
}

fn group_key(candidate: &ListingCandidate) -> (String, String, String) {
    let (base_title, title_version) = split_version(&candidate.song_title);
    let version = candidate
        .version_name
        .clone()
        .or(title_version)
        .map(|v| match_key(&v))
        .unwrap_or_default();
    (
        match_key(&base_title),
        normalize_type(&candidate.kind),
        version,
    )
}

/// グループごとに重み付けスコア最大の候補を選ぶ。
/// 1件だけのグループと、誰も評価されていないグループは評価に関係なく残す。
/// それ以外の2件以上のグループは勝者に最低評価を課す
pub fn select(candidates: Vec<ListingCandidate>, min_rating: f64) -> Vec<ListingCandidate> {
    let mut groups: BTreeMap<(String, String, String), Vec<ListingCandidate>> = BTreeMap::new();
    for candidate in candidates {
        if is_excluded(&candidate) {
            tracing::debug!("Excluding {} ({})", candidate.tab_url, candidate.kind);
            continue;
        }
        groups.entry(group_key(&candidate)).or_default().push(candidate);
    }

    let mut selected = Vec::with_capacity(groups.len());
    for (key, group) in groups {
        let group_size = group.len();
        // 評価を持たないサイト (Cifra Club) の一覧は同点のまま先頭が勝つ
        let unrated = group.iter().all(|c| c.rating_count == 0);
        let Some(winner) = group.into_iter().reduce(|best, next| {
            let best_score = weighted_score(best.rating, best.rating_count);
            let next_score = weighted_score(next.rating, next.rating_count);
            if next_score > best_score
                || (next_score == best_score && next.rating_count > best.rating_count)
            {
                next
            } else {
                best
            }
        }) else {
            continue;
        };

        if group_size >= 2 && !unrated && winner.rating < min_rating {
            tracing::debug!(
                "Dropping group {:?}: best rating {:.2} is below {:.2}",
                key,
                winner.rating,
                min_rating
            );
            continue;
        }
        selected.push(winner);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(title: &str, url: &str, rating: f64, votes: u32) -> ListingCandidate {
        ListingCandidate {
            song_title: title.to_string(),
            tab_url: url.to_string(),
            kind: "chords".to_string(),
            rating,
            rating_count: votes,
            version_name: None,
        }
    }

    #[test]
    fn score_matches_reference_values() {
        assert!((weighted_score(4.5, 200) - 4.3).abs() < 1e-9);
        assert!((weighted_score(4.0, 50) - 3.75).abs() < 1e-9);
        assert!((weighted_score(4.9, 5) - 3.627).abs() < 1e-3);
        assert_eq!(weighted_score(1.0, 0), PRIOR_MEAN);
    }

    #[test]
    fn score_is_monotonic() {
        for votes in [1u32, 10, 100, 10_000] {
            assert!(weighted_score(4.0, votes) < weighted_score(4.1, votes));
        }
        let mut previous = weighted_score(4.8, 0);
        for votes in [1u32, 2, 10, 100, 1_000, 100_000] {
            let score = weighted_score(4.8, votes);
            assert!(score > previous);
            previous = score;
        }
        assert!((weighted_score(4.8, u32::MAX) - 4.8).abs() < 1e-6);
    }

    #[test]
    fn thin_votes_lose_to_broad_support() {
        let picked = select(
            vec![
                candidate("Wonderwall", "https://t/1", 4.0, 50),
                candidate("Wonderwall", "https://t/2", 4.9, 5),
                candidate("Wonderwall (ver 3)", "https://t/3", 4.5, 200),
            ],
            3.0,
        );
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].tab_url, "https://t/3");
    }

    #[test]
    fn sole_candidate_is_kept_regardless_of_rating() {
        let picked = select(vec![candidate("Obscure", "https://t/9", 0.0, 0)], 4.5);
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn contested_group_applies_minimum_rating() {
        let picked = select(
            vec![
                candidate("Song", "https://t/1", 2.0, 10),
                candidate("Song", "https://t/2", 2.5, 10),
            ],
            3.0,
        );
        assert!(picked.is_empty());
    }

    #[test]
    fn unrated_group_keeps_first_listing() {
        let picked = select(
            vec![
                candidate("Tempo Perdido", "https://www.cifraclub.com.br/legiao-urbana/tempo-perdido/", 0.0, 0),
                candidate("Tempo Perdido", "https://www.cifraclub.com.br/legiao-urbana/tempo-perdido-2/", 0.0, 0),
            ],
            3.0,
        );
        assert_eq!(picked.len(), 1);
        assert_eq!(
            picked[0].tab_url,
            "https://www.cifraclub.com.br/legiao-urbana/tempo-perdido/"
        );

        // 1件でも評価があれば最低評価は効く
        let mixed = select(
            vec![
                candidate("Song", "https://t/1", 0.0, 0),
                candidate("Song", "https://t/2", 2.0, 3),
            ],
            3.0,
        );
        assert!(mixed.is_empty());
    }

    #[test]
    fn groups_by_type_and_version() {
        let mut bass = candidate("Song", "https://t/bass", 4.0, 10);
        bass.kind = "Bass Tabs".into();
        let picked = select(
            vec![
                candidate("Song", "https://t/1", 4.0, 10),
                candidate("Song (Acoustic)", "https://t/2", 4.0, 10),
                bass,
            ],
            3.0,
        );
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn excluded_types_and_urls_never_selected() {
        let mut official = candidate("Song", "https://t/official", 5.0, 1000);
        official.kind = "Official".into();
        let pro = candidate("Song", "https://tabs.example.com/tab/a/song-guitar-pro-1", 5.0, 1000);
        let picked = select(vec![official, pro], 0.0);
        assert!(picked.is_empty());
    }

    #[test]
    fn version_suffixes() {
        assert_eq!(
            split_version("Wonderwall (acoustic)"),
            ("Wonderwall".to_string(), Some("Acoustic".to_string()))
        );
        assert_eq!(
            split_version("Tempo Perdido (simplificada)"),
            ("Tempo Perdido".to_string(), Some("Simplified".to_string()))
        );
        assert_eq!(split_version("Creep (ver 2)"), ("Creep".to_string(), None));
        assert_eq!(
            split_version("Hallelujah (live) (ver 2)"),
            ("Hallelujah".to_string(), Some("Live".to_string()))
        );
    }

    #[test]
    fn type_labels() {
        assert_eq!(normalize_type("Bass Tabs"), "bass");
        assert_eq!(normalize_type("Ukulele Chords"), "ukulele");
        assert_eq!(normalize_type("Drum Tabs"), "drums");
        assert_eq!(normalize_type("Tabs"), "tab");
        assert_eq!(normalize_type("Guitar Pro"), "pro");
        assert_eq!(normalize_type(" Chords "), "chords");
    }
}
