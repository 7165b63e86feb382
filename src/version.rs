//! Release version comparison.
//!
//! Services publish either semantic versions (`v1.2.3`) or, for releases that
//! predate semver adoption, a date stamp (`YYYYMMDD.HHMM`). A date stamp is
//! recognised by a leading numeric component longer than four digits and is
//! always older than any semantic version.

use semver::Version;

/// Version reported while running an unreleased build.
pub const DEV_VERSION: &str = "dev";

/// True when `v` uses the legacy `YYYYMMDD.HHMM` stamp format.
pub fn is_legacy(v: &str) -> bool {
    let v = v.trim().trim_start_matches('v');
    v.split('.')
        .next()
        .is_some_and(|major| major.len() > 4 && major.bytes().all(|b| b.is_ascii_digit()))
}

/// Parse a possibly-abbreviated semantic version, tolerating a leading `v`
/// and missing minor/patch components (`v1.2` → `1.2.0`).
pub fn parse(v: &str) -> Option<Version> {
    let v = v.trim().trim_start_matches('v');
    if let Ok(parsed) = Version::parse(v) {
        return Some(parsed);
    }
    let (core, rest) = match v.find(['-', '+']) {
        Some(idx) => v.split_at(idx),
        None => (v, ""),
    };
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    Version::parse(&format!("{padded}{rest}")).ok()
}

fn legacy_stamp(v: &str) -> Option<(u64, u64)> {
    let v = v.trim().trim_start_matches('v');
    let (date, time) = v.split_once('.').unwrap_or((v, "0"));
    Some((date.parse().ok()?, time.parse().ok()?))
}

/// Whether `candidate` should replace `installed`.
///
/// * installed legacy, candidate semantic → always newer
/// * candidate legacy, installed semantic → never newer
/// * both legacy → the later stamp wins
/// * otherwise semver ordering; unparsable versions are never newer
pub fn is_newer(candidate: &str, installed: &str) -> bool {
    match (is_legacy(candidate), is_legacy(installed)) {
        (false, true) => true,
        (true, false) => false,
        (true, true) => match (legacy_stamp(candidate), legacy_stamp(installed)) {
            (Some(c), Some(i)) => c > i,
            _ => false,
        },
        (false, false) => match (parse(candidate), parse(installed)) {
            (Some(c), Some(i)) => c > i,
            _ => false,
        },
    }
}

/// Extract the version token from `--version` output such as
/// `my-service v1.2.3`.
pub fn from_version_output(output: &str) -> Option<String> {
    let mut fields = output.split_whitespace();
    fields.next()?;
    fields.next().map(str::to_string)
}

/// Extract the version from a release title such as `my-service 1.4.0`.
pub fn from_release_name(name: &str) -> String {
    name.split(' ')
        .filter(|part| !part.is_empty())
        .next_back()
        .unwrap_or(name)
        .to_string()
}
