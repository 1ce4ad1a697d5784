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
use std::fmt::Display;

pub fn minimum_value<T: PartialOrd + Display + Copy>(
    value: T,
    minimum: T,
    units: &str,
    field_name: &str,
    parent_name: Option<&str>,
) -> Result<(), ValidationError> {
    if value >= minimum {
        return Ok(());
    }

    Err(ValidationError::Minimum {
        field: super::field_name(field_name, parent_name),
        minimum: minimum.to_string(),
        units: units.to_string(),
    })
}

pub fn maximum_value<T: PartialOrd + Display + Copy>(
    value: T,
    maximum: T,
    units: &str,
    field_name: &str,
    parent_name: Option<&str>,
) -> Result<(), ValidationError> {
    if value <= maximum {
        return Ok(());
    }

    Err(ValidationError::Maximum {
        field: super::field_name(field_name, parent_name),
        maximum: maximum.to_string(),
        units: units.to_string(),
    })
}

/// Checks `minimum <= value <= maximum`, reporting the violated side.
pub fn within_range<T: PartialOrd + Display + Copy>(
    value: T,
    minimum: T,
    maximum: T,
    units: &str,
    field_name: &str,
    parent_name: Option<&str>,
) -> Result<(), ValidationError> {
    minimum_value(value, minimum, units, field_name, parent_name)?;
    maximum_value(value, maximum, units, field_name, parent_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case(1, true; "at the minimum")]
    #[test_case(10000, true; "at the maximum")]
    #[test_case(0, false; "below the minimum")]
    #[test_case(10001, false; "above the maximum")]
    #[test]
    fn test_within_range(value: u64, ok: bool) {
        let result = within_range(value, 1, 10000, "weight", "w", None);
        assert_eq!(result.is_ok(), ok);
    }

    #[test]
    fn test_reports_the_violated_side() {
        assert!(matches!(
            within_range(0u64, 1, 10, "weight", "w", None),
            Err(ValidationError::Minimum { .. })
        ));
        assert!(matches!(
            within_range(11u64, 1, 10, "weight", "w", None),
            Err(ValidationError::Maximum { .. })
        ));
    }
}
