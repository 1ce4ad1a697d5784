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
use super::{UnitId, UnitName};
use thiserror::Error;
use validation::ValidationError;

pub type Result<T> = std::result::Result<T, UnitsError>;

#[derive(Error, Debug)]
pub enum UnitsError {
    #[error("unit {id} not found")]
    NotFound { id: UnitId },
    #[error("unit '{name}' not found")]
    UnknownName { name: String },
    #[error("unit '{name}' already exists")]
    DuplicateName { name: UnitName },
    #[error("unit '{name}' is not a slice")]
    NotASlice { name: UnitName },
    #[error("slice '{name}' still has members")]
    HasMembers { name: UnitName },
    #[error(transparent)]
    InvalidName(#[from] ValidationError),
}
