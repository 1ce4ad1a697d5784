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
use std::{
    fmt::{Display, Formatter},
    ops::Deref,
};

use validation::{ValidatedField, ValidationError};

pub const CGROUP_WEIGHT_MIN: u64 = 1;
pub const CGROUP_WEIGHT_DEFAULT: u64 = 100;
pub const CGROUP_WEIGHT_MAX: u64 = 10000;

pub const CGROUP_CPU_SHARES_MIN: u64 = 2;
pub const CGROUP_CPU_SHARES_DEFAULT: u64 = 1024;
pub const CGROUP_CPU_SHARES_MAX: u64 = 262144;

pub const CGROUP_BLKIO_WEIGHT_MIN: u64 = 10;
pub const CGROUP_BLKIO_WEIGHT_DEFAULT: u64 = 500;
pub const CGROUP_BLKIO_WEIGHT_MAX: u64 = 1000;

macro_rules! bounded_weight {
    ($(#[$meta:meta])* $name:ident, $min:expr, $default:expr, $max:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash)]
        pub struct $name(u64);

        impl $name {
            pub const MIN: $name = $name($min);
            pub const DEFAULT: $name = $name($default);
            pub const MAX: $name = $name($max);

            /// Clamps into the valid range instead of rejecting.
            pub fn saturating(value: u64) -> Self {
                Self(value.clamp($min, $max))
            }

            pub fn into_inner(self) -> u64 {
                self.0
            }
        }

        impl ValidatedField<u64> for $name {
            fn validate(
                input: Option<u64>,
                field_name: &str,
                parent_name: Option<&str>,
            ) -> Result<Self, ValidationError> {
                let input = validation::required(input, field_name, parent_name)?;

                validation::within_range(
                    input,
                    $min,
                    $max,
                    validation::UNIT_WEIGHT,
                    field_name,
                    parent_name,
                )?;

                Ok(Self(input))
            }
        }

        impl Deref for $name {
            type Target = u64;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

bounded_weight!(
    /// `cpu.weight` on the unified hierarchy.
    CpuWeight,
    CGROUP_WEIGHT_MIN,
    CGROUP_WEIGHT_DEFAULT,
    CGROUP_WEIGHT_MAX
);

bounded_weight!(
    /// `cpu.shares` on the legacy hierarchy.
    CpuShares,
    CGROUP_CPU_SHARES_MIN,
    CGROUP_CPU_SHARES_DEFAULT,
    CGROUP_CPU_SHARES_MAX
);

bounded_weight!(
    /// `io.weight` on the unified hierarchy.
    IoWeight,
    CGROUP_WEIGHT_MIN,
    CGROUP_WEIGHT_DEFAULT,
    CGROUP_WEIGHT_MAX
);

bounded_weight!(
    /// `blkio.weight` on the legacy hierarchy.
    BlkioWeight,
    CGROUP_BLKIO_WEIGHT_MIN,
    CGROUP_BLKIO_WEIGHT_DEFAULT,
    CGROUP_BLKIO_WEIGHT_MAX
);

impl CpuShares {
    pub fn to_weight(self) -> CpuWeight {
        CpuWeight::saturating(
            self.0 * CGROUP_WEIGHT_DEFAULT / CGROUP_CPU_SHARES_DEFAULT,
        )
    }
}

impl CpuWeight {
    pub fn to_shares(self) -> CpuShares {
        CpuShares::saturating(
            self.0 * CGROUP_CPU_SHARES_DEFAULT / CGROUP_WEIGHT_DEFAULT,
        )
    }
}

impl BlkioWeight {
    pub fn to_io_weight(self) -> IoWeight {
        IoWeight::saturating(
            self.0 * CGROUP_WEIGHT_DEFAULT / CGROUP_BLKIO_WEIGHT_DEFAULT,
        )
    }
}

impl IoWeight {
    pub fn to_blkio_weight(self) -> BlkioWeight {
        BlkioWeight::saturating(
            self.0 * CGROUP_BLKIO_WEIGHT_DEFAULT / CGROUP_WEIGHT_DEFAULT,
        )
    }
}
