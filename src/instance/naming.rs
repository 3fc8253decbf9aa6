use rand::RngExt as _;

/// Reduce an instance type name to `[a-z0-9-]`.
fn sanitize_kind(kind: &str) -> String {
    let cleaned: String = kind
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "instance".into()
    } else {
        trimmed.to_string()
    }
}

/// Generate a random 4-char alphanumeric suffix.
fn random_suffix() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..4)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Generate an instance name.
/// Format: `{kind}-{unix_millis}-{random4}`. Used as the workspace directory
/// name and the log file stem.
pub fn generate_name(kind: &str) -> String {
    format!(
        "{}-{}-{}",
        sanitize_kind(kind),
        chrono::Utc::now().timestamp_millis(),
        random_suffix()
    )
}
