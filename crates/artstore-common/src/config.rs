//! Config file + environment variable layering, shared shape across services.
//!
//! Each service defines its own settings struct and calls [`load`] with its
//! env prefix; the YAML file (if present) is applied first, then
//! environment variables of the form `{PREFIX}__FIELD__SUBFIELD` override
//! it, matching the teacher's file-then-env layering in `cmd/config.rs`.

use serde::de::DeserializeOwned;
use std::path::Path;

/// Load a typed config from an optional YAML file plus env vars under `prefix`.
pub fn load<T: DeserializeOwned>(path: &Path, prefix: &str) -> anyhow::Result<T> {
    let mut builder = config::Config::builder();

    if path.exists() {
        builder = builder.add_source(config::File::from(path));
    }

    builder = builder.add_source(
        config::Environment::with_prefix(prefix)
            .separator("__")
            .try_parsing(true),
    );

    let cfg = builder.build()?;
    Ok(cfg.try_deserialize()?)
}

/// Parse a strict `on|off` boolean, as required for env vars per the wire
/// contract (spec §6 - boolean form is strictly `on|off`).
pub fn parse_on_off(value: &str) -> Option<bool> {
    match value {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_off_parses_strictly() {
        assert_eq!(parse_on_off("on"), Some(true));
        assert_eq!(parse_on_off("off"), Some(false));
        assert_eq!(parse_on_off("true"), None);
        assert_eq!(parse_on_off("1"), None);
    }
}
