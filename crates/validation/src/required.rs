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

pub fn required<T>(
    value: Option<T>,
    field_name: &str,
    parent_name: Option<&str>,
) -> Result<T, ValidationError> {
    value.ok_or_else(|| ValidationError::Required {
        field: super::field_name(field_name, parent_name),
    })
}

pub fn required_not_empty(
    value: Option<String>,
    field_name: &str,
    parent_name: Option<&str>,
) -> Result<String, ValidationError> {
    match required(value, field_name, parent_name)? {
        value if value.is_empty() => Err(ValidationError::Required {
            field: super::field_name(field_name, parent_name),
        }),
        value => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required() {
        assert!(matches!(required(Some(64u64), "tasks_max", None), Ok(64)));

        assert!(matches!(
            required(None::<u64>, "tasks_max", None),
            Err(ValidationError::Required { .. })
        ));
    }

    #[test]
    fn test_required_not_empty() {
        assert!(matches!(
            required_not_empty(Some(String::new()), "name", None),
            Err(ValidationError::Required { .. })
        ));

        assert!(matches!(
            required_not_empty(Some("user.slice".into()), "name", None),
            Ok(x) if x == "user.slice"
        ));
    }
}
