/* -------------------------------------------------------------------------- *\
 *                |   █████╗ ██╗   ██╗██████╗  █████╗ ███████╗ |              *
 *                |  ██╔══██╗██║   ██║██╔══██╗██╔══██╗██╔════╝ |              *
 *                |  ███████║██║   ██║██████╔╝███████║█████╗   |              *
 *                |  ██╔══██║██║   ██║██╔══██╗██╔══██║██╔══╝   |              *
 *                |  ██║  ██║╚██████╔╝██║  ██║██║  ██║███████╗ |              *
 *                |  ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝ |              *
 *                +--------------------------------------------+              *
 *                                                                            *
 *                         Distributed Systems Runtime                        *
 * -------------------------------------------------------------------------- *
 * Copyright 2022 - 2024, the aurae contributors                              *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */
#![warn(future_incompatible, nonstandard_style, unused)]
#![warn(clippy::unwrap_used)]

//! Field validation for configuration values handed to the session manager.
//!
//! Validated newtypes implement [`ValidatedField`] and use the free functions
//! of this crate to check bounds and patterns, reporting failures with the
//! dotted path of the offending field.

#[cfg(feature = "regex")]
pub use self::allow_regex::allow_regex;
pub use self::bounds::{maximum_value, minimum_value, within_range};
pub use self::required::{required, required_not_empty};
#[cfg(feature = "regex")]
use fancy_regex::Regex;
#[cfg(feature = "regex")]
use lazy_static::lazy_static;

#[cfg(feature = "regex")]
mod allow_regex;
mod bounds;
mod required;

pub const UNIT_BYTES: &str = "bytes";
pub const UNIT_TASKS: &str = "tasks";
pub const UNIT_WEIGHT: &str = "weight";

#[cfg(feature = "regex")]
lazy_static! {
    /// Unit identifiers: printable, no path separators, at most 255 bytes.
    /// `-.slice` names the root slice.
    pub static ref UNIT_NAME_REGEX: Regex =
        Regex::new(r"^(?=.{1,255}$)[a-zA-Z0-9:_.\\@-]+$")
            .expect("failed to parse 'UNIT_NAME_REGEX'");
    /// Device allow-list entries: a `/dev/` node or a `block-`/`char-`
    /// major pattern.
    pub static ref DEVICE_RULE_REGEX: Regex =
        Regex::new(r"^(/dev/.+|(block|char)-.+)$")
            .expect("failed to parse 'DEVICE_RULE_REGEX'");
}

pub trait ValidatedField<T>
where
    Self: Sized,
{
    fn validate(
        input: Option<T>,
        field_name: &str,
        parent_name: Option<&str>,
    ) -> Result<Self, ValidationError>;

    /// Returns `Ok(None)` when there is no input, otherwise defers to
    /// `Self::validate`. Unset configuration stays unset.
    fn validate_optional(
        input: Option<T>,
        field_name: &str,
        parent_name: Option<&str>,
    ) -> Result<Option<Self>, ValidationError> {
        if input.is_none() {
            return Ok(None);
        }

        Ok(Some(Self::validate(input, field_name, parent_name)?))
    }
}

pub fn field_name(field_name: &str, parent_name: Option<&str>) -> String {
    match parent_name {
        None => field_name.to_string(),
        Some(parent_name) => format!("{parent_name}.{field_name}"),
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("Field = {field}; Required")]
    Required { field: String },
    #[error("Field = {field}; Minimum = {minimum} {units}")]
    Minimum { field: String, minimum: String, units: String },
    #[error("Field = {field}; Maximum = {maximum} {units}")]
    Maximum { field: String, maximum: String, units: String },
    #[cfg(feature = "regex")]
    #[error("Field = {field};  Regex = {pattern}")]
    AllowRegexViolation { field: String, pattern: String },
    #[error("Field = {field}; Invalid")]
    Invalid { field: String },
}

impl ValidationError {
    pub fn get_field(&self) -> &str {
        match self {
            Self::Required { field }
            | Self::Minimum { field, .. }
            | Self::Maximum { field, .. }
            | Self::Invalid { field, .. } => field,
            #[cfg(feature = "regex")]
            Self::AllowRegexViolation { field, .. } => field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_name_is_dotted_below_a_parent() {
        assert_eq!(field_name("tasks_max", None), "tasks_max");
        assert_eq!(
            field_name("tasks_max", Some("session-1.scope")),
            "session-1.scope.tasks_max"
        );
    }

    #[cfg(feature = "regex")]
    #[test]
    fn unit_name_regex_accepts_the_root_slice() {
        assert!(matches!(UNIT_NAME_REGEX.is_match("-.slice"), Ok(true)));
        assert!(matches!(UNIT_NAME_REGEX.is_match("a/b.slice"), Ok(false)));
    }
}
