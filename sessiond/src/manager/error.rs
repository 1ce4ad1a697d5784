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
use crate::cgroups::BackendError;
use crate::units::{UnitName, UnitsError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CgroupsError>;

#[derive(Error, Debug)]
pub enum CgroupsError {
    #[error("cgroup support unavailable below '{root}': {source}")]
    NoCgroupSupport { root: String, source: BackendError },
    #[error("cgroup path '{path}' of unit '{name}' is already owned by '{owner}'")]
    PathCollision { name: UnitName, path: String, owner: UnitName },
    #[error(
        "unit '{name}' already uses cgroup '{current}', refusing to move it to '{path}'"
    )]
    PathReassigned { name: UnitName, current: String, path: String },
    #[error("failed to create cgroup of unit '{name}': {source}")]
    CreateCgroup { name: UnitName, source: BackendError },
    #[error("no {what} data available for unit '{name}'")]
    NoData { name: UnitName, what: &'static str },
    #[error("unexpected value '{value}' in {attribute} of unit '{name}'")]
    InvalidAttribute { name: UnitName, attribute: &'static str, value: String },
    #[error("failed to {action} state file '{}': {source}", path.display())]
    State { action: &'static str, path: PathBuf, source: io::Error },
    #[error("invalid state file '{}': {source}", path.display())]
    StateFormat { path: PathBuf, source: serde_json::Error },
    #[error(transparent)]
    Units(#[from] UnitsError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
