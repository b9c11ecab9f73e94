//! Command handlers

pub mod config;
pub mod doc;
pub mod race;
pub mod status;

use anyhow::{bail, Result};
use serde_json::Value;

use docver_core::Patch;

/// Parse a `key=value` pair; the value is JSON, or a plain string
pub fn parse_assignment(input: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = input.split_once('=') else {
        bail!("Expected key=value, got '{}'", input);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Missing field name in '{}'", input);
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Build a patch from `--set`, `--unset` and `--inc` arguments
pub fn build_patch(set: &[String], unset: &[String], inc: &[String]) -> Result<Patch> {
    let mut patch = Patch::new();

    for item in set {
        let (field, value) = parse_assignment(item)?;
        patch = patch.set(field, value);
    }
    for field in unset {
        patch = patch.unset(field.clone());
    }
    for item in inc {
        let (field, value) = parse_assignment(item)?;
        let Value::Number(by) = value else {
            bail!("Increment for '{}' must be a number", field);
        };
        patch = patch.inc(field, by);
    }

    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docver_core::PatchOp;
    use serde_json::json;

    #[test]
    fn test_parse_assignment_json_and_string() {
        assert_eq!(parse_assignment("n=5").unwrap(), ("n".to_string(), json!(5)));
        assert_eq!(
            parse_assignment("tags=[\"a\"]").unwrap(),
            ("tags".to_string(), json!(["a"]))
        );
        assert_eq!(
            parse_assignment("name=kim").unwrap(),
            ("name".to_string(), json!("kim"))
        );
        assert_eq!(
            parse_assignment("expr=a=b").unwrap(),
            ("expr".to_string(), json!("a=b"))
        );
    }

    #[test]
    fn test_parse_assignment_errors() {
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=5").is_err());
    }

    #[test]
    fn test_build_patch() {
        let patch = build_patch(
            &["name=kim".to_string()],
            &["old".to_string()],
            &["hits=2".to_string()],
        )
        .unwrap();

        let fields: Vec<_> = patch.ops().iter().map(PatchOp::field).collect();
        assert_eq!(fields, vec!["name", "old", "hits"]);
    }

    #[test]
    fn test_build_patch_rejects_non_numeric_inc() {
        assert!(build_patch(&[], &[], &["hits=lots".to_string()]).is_err());
    }
}
