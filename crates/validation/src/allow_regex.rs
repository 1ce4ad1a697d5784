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
use super::ValidationError;
use fancy_regex::Regex;

pub fn allow_regex(
    value: &str,
    pattern: &Regex,
    field_name: &str,
    parent_name: Option<&str>,
) -> Result<(), ValidationError> {
    match pattern.is_match(value) {
        Ok(true) => Ok(()),
        Ok(false) | Err(_) => Err(ValidationError::AllowRegexViolation {
            field: super::field_name(field_name, parent_name),
            pattern: pattern.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DEVICE_RULE_REGEX, UNIT_NAME_REGEX};

    #[test]
    fn test_unit_names() {
        assert!(matches!(
            allow_regex("user-1000.slice", &UNIT_NAME_REGEX, "name", None),
            Ok(..)
        ));

        assert!(matches!(
            allow_regex("../etc", &UNIT_NAME_REGEX, "name", None),
            Err(ValidationError::AllowRegexViolation { .. })
        ));
    }

    #[test]
    fn test_device_rules() {
        for (rule, expected) in [
            ("/dev/null", true),
            ("char-pts", true),
            ("block-sd*", true),
            ("/run/foo", false),
            ("pts", false),
        ] {
            assert_eq!(
                allow_regex(rule, &DEVICE_RULE_REGEX, "device", None).is_ok(),
                expected,
                "{rule}"
            );
        }
    }
}
