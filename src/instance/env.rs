use crate::config::EnvConfig;

/// Parse an operator-supplied `KEY=VALUE,KEY=VALUE` list.
///
/// Entries without `=` or with an empty or non-identifier key are skipped
/// and logged. Values keep everything after the first `=`.
pub fn parse_env_list(raw: &str) -> Vec<(String, String)> {
    let mut vars = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((key, value)) = entry.split_once('=') else {
            tracing::warn!("skipping env entry without '=': {entry:?}");
            continue;
        };
        let key = key.trim();
        if !is_valid_key(key) {
            tracing::warn!("skipping env entry with invalid key: {key:?}");
            continue;
        }
        vars.push((key.to_string(), value.trim().to_string()));
    }
    vars
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Full environment for an instance: token variable (when there is a token),
/// production marker, then operator extras.
pub fn compose(
    settings: &EnvConfig,
    token: Option<&str>,
    extras: &[(String, String)],
) -> Vec<(String, String)> {
    let mut vars = Vec::with_capacity(extras.len() + 2);
    if let Some(token) = token {
        vars.push((settings.token_var.clone(), token.to_string()));
    }
    vars.push((
        settings.production_key.clone(),
        settings.production_value.clone(),
    ));
    vars.extend(extras.iter().cloned());
    vars
}
