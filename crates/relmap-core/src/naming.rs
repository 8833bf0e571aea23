//! SQL identifier validation for table, column, index and key names.

use std::sync::OnceLock;

use regex::Regex;

use crate::Result;
use crate::error::{ConfigErrorKind, Error};

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_$]*$";

fn identifier_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| match Regex::new(IDENTIFIER_PATTERN) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!(pattern = IDENTIFIER_PATTERN, error = %e, "Invalid identifier pattern");
                None
            }
        })
        .as_ref()
}

/// Check if a name is a plain SQL identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_regex().is_some_and(|regex| regex.is_match(name))
}

/// Validate a name, returning a configuration error naming `what` on failure.
pub fn validate_identifier(what: &str, name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(Error::config(
            ConfigErrorKind::InvalidIdentifier,
            format!("{} name '{}' is not a valid SQL identifier", what, name),
        ))
    }
}
