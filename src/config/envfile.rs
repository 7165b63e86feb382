use std::collections::BTreeMap;
use std::path::Path;

use tracing::warn;

// ---------------------------------------------------------------------------
// .env file parser
// ---------------------------------------------------------------------------

/// Parse a service `.env` file into ordered `(key, value)` pairs.
///
/// Supports `KEY=VALUE`, `KEY="VALUE"`, `KEY='VALUE'`, `# comments` and blank
/// lines. Lines without `=` are skipped with a warning. A missing file yields
/// no pairs.
pub fn parse_env_file(path: &Path) -> Vec<(String, String)> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_env_content(&content),
        Err(_) => Vec::new(),
    }
}

pub fn parse_env_content(content: &str) -> Vec<(String, String)> {
    let mut vars = Vec::new();

    for (line_num, line) in content.lines().enumerate() {
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some((key, value)) = trimmed.split_once('=') else {
            warn!(line = line_num + 1, "ignoring .env line without '='");
            continue;
        };

        let key = key.trim();
        if key.is_empty() {
            warn!(line = line_num + 1, "ignoring .env line with empty key");
            continue;
        }

        let value = value.trim();
        let value = if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            &value[1..value.len() - 1]
        } else {
            value
        };

        vars.push((key.to_string(), value.to_string()));
    }

    vars
}

/// Layer `overrides` on top of `base`; later pairs win over earlier ones with
/// the same key. Key comparison is case-insensitive on Windows.
pub fn merge_env(
    base: impl IntoIterator<Item = (String, String)>,
    overrides: impl IntoIterator<Item = (String, String)>,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for (k, v) in base.into_iter().chain(overrides) {
        if cfg!(windows) {
            let existing = env
                .keys()
                .find(|existing: &&String| existing.eq_ignore_ascii_case(&k))
                .cloned();
            if let Some(existing) = existing {
                env.remove(&existing);
            }
        }
        env.insert(k, v);
    }
    env
}
