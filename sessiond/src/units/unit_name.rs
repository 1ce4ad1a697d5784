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
use std::borrow::Borrow;
use std::fmt::{Display, Formatter};
use validation::{ValidatedField, ValidationError};

/// Name of the slice at the top of the tree. Its cgroup is the manager's
/// cgroup root.
pub const ROOT_SLICE: &str = "-.slice";

#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct UnitName(String);

impl UnitName {
    pub fn root_slice() -> Self {
        Self(ROOT_SLICE.to_string())
    }

    pub fn is_root_slice(&self) -> bool {
        self.0 == ROOT_SLICE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl ValidatedField<String> for UnitName {
    fn validate(
        input: Option<String>,
        field_name: &str,
        parent_name: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let input =
            validation::required_not_empty(input, field_name, parent_name)?;

        validation::allow_regex(
            &input,
            &validation::UNIT_NAME_REGEX,
            field_name,
            parent_name,
        )?;

        // "." and ".." pass the character set but are never unit names.
        if input.chars().all(|c| c == '.') {
            return Err(ValidationError::Invalid {
                field: validation::field_name(field_name, parent_name),
            });
        }

        Ok(Self(input))
    }
}

impl Borrow<str> for UnitName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for UnitName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
impl From<&str> for UnitName {
    fn from(x: &str) -> Self {
        UnitName(x.into())
    }
}
