//! Instance and group ID generation
//!
//! IDs use the format `{6-char-hex}-{kind}-{slug}`, e.g.
//! `019430-inst-fix-login-flow`. The hex prefix comes from a UUIDv7 so IDs
//! sort roughly by creation time.

/// Generate an ID from a kind tag and a human title
pub fn generate_id(kind: &str, title: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.to_string()[..6];
    format!("{}-{}-{}", hex_prefix, kind, slugify(title))
}

/// Slugify a title for use in IDs
///
/// Lowercases, strips apostrophes, collapses runs of non-alphanumerics into
/// single hyphens, and caps the slug at 40 characters.
fn slugify(title: &str) -> String {
    let slug = title
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    if slug.is_empty() {
        "untitled".to_string()
    } else if slug.len() > 40 {
        // Cut at a hyphen boundary where possible
        match slug[..40].rfind('-') {
            Some(pos) if pos > 0 => slug[..pos].to_string(),
            _ => slug[..40].to_string(),
        }
    } else {
        slug
    }
}
