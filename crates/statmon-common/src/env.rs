//! Environment-variable overrides layered on top of file configuration.

use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for environment variable {name}")]
pub struct EnvError {
    pub name: String,
    pub value: String,
}

/// Returns the variable's value when it is set and non-empty.
pub fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn parse<T: FromStr>(name: &str) -> Result<Option<T>, EnvError> {
    match var(name) {
        None => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|_| EnvError {
            name: name.to_string(),
            value,
        }),
    }
}

/// Reads an interval in whole seconds, accepting `10` as well as `10s`.
pub fn seconds(name: &str) -> Result<Option<u64>, EnvError> {
    match var(name) {
        None => Ok(None),
        Some(value) => parse_seconds(&value).map(Some).ok_or(EnvError {
            name: name.to_string(),
            value,
        }),
    }
}

pub fn parse_seconds(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    raw.strip_suffix('s').unwrap_or(raw).trim().parse().ok()
}

/// Overwrites `slot` when the variable is set.
pub fn override_string(slot: &mut String, name: &str) {
    if let Some(v) = var(name) {
        *slot = v;
    }
}

pub fn override_optional(slot: &mut Option<String>, name: &str) {
    if let Some(v) = var(name) {
        *slot = Some(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("10"), Some(10));
        assert_eq!(parse_seconds(" 300s "), Some(300));
        assert_eq!(parse_seconds("0"), Some(0));
        assert_eq!(parse_seconds("1m"), None);
        assert_eq!(parse_seconds("-1"), None);
    }

    #[test]
    fn test_parse_reports_bad_value() {
        std::env::set_var("STATMON_TEST_BAD_BOOL", "maybe");
        let err = parse::<bool>("STATMON_TEST_BAD_BOOL").unwrap_err();
        assert_eq!(err.name, "STATMON_TEST_BAD_BOOL");
        std::env::remove_var("STATMON_TEST_BAD_BOOL");
        assert!(parse::<bool>("STATMON_TEST_BAD_BOOL").unwrap().is_none());
    }
}
