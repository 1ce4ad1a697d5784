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
//! What the manager knows about realized cgroups, kept across restarts.
//!
//! The snapshot is only a cache. Anything that does not fit the current
//! unit tree is dropped and the cgroup is realized again from scratch.

use super::{CgroupsError, Manager, Result};
use crate::cgroups::{CgroupBackend, ControllerMask};
use crate::units::BpfState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCgroupState {
    pub path: Option<String>,
    pub realized: bool,
    pub realized_mask: ControllerMask,
    pub enabled_mask: ControllerMask,
    pub bpf_state: BpfState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Keyed by unit name.
    pub units: BTreeMap<String, UnitCgroupState>,
}

impl StateSnapshot {
    /// Reads a snapshot, `None` when none was saved yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let json = match fs::read(path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CgroupsError::State {
                    action: "read",
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_slice(&json).map(Some).map_err(|source| {
            CgroupsError::StateFormat { path: path.to_path_buf(), source }
        })
    }

    /// Writes the snapshot next to `path` and renames it into place, so a
    /// reader never sees half a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let state_error = |action: &'static str| {
            move |source: io::Error| CgroupsError::State {
                action,
                path: path.to_path_buf(),
                source,
            }
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(state_error("create"))?;
        }

        let json = serde_json::to_vec_pretty(self).map_err(|source| {
            CgroupsError::StateFormat { path: path.to_path_buf(), source }
        })?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).map_err(state_error("write"))?;
        fs::rename(&tmp, path).map_err(state_error("replace"))?;
        Ok(())
    }
}

impl<B: CgroupBackend> Manager<B> {
    /// The cgroup state of every unit that has a cgroup path.
    pub fn snapshot(&self) -> StateSnapshot {
        let units = self
            .units
            .iter()
            .filter(|unit| unit.cgroup.path.is_some())
            .map(|unit| {
                let state = UnitCgroupState {
                    path: unit.cgroup.path.clone(),
                    realized: unit.cgroup.realized,
                    realized_mask: unit.cgroup.realized_mask,
                    enabled_mask: unit.cgroup.enabled_mask,
                    bpf_state: unit.cgroup.bpf_state,
                };
                (unit.name().to_string(), state)
            })
            .collect();
        StateSnapshot { units }
    }

    /// Puts saved cgroup state back onto the units that still exist.
    /// Returns how many units were restored.
    pub fn restore(&mut self, snapshot: &StateSnapshot) -> usize {
        let mut restored = 0;
        for (name, state) in &snapshot.units {
            let Some(id) = self.units.lookup(name) else {
                debug!("dropping saved cgroup state of unknown unit {name}");
                continue;
            };
            if let Err(e) = self.set_cgroup_path(id, state.path.clone()) {
                warn!("not restoring cgroup state of {name}: {e}");
                continue;
            }

            if let Some(unit) = self.units.get_mut(id) {
                unit.cgroup.realized = state.realized;
                unit.cgroup.realized_mask = state.realized_mask;
                unit.cgroup.enabled_mask = state.enabled_mask;
                unit.cgroup.bpf_state = state.bpf_state;
            }
            self.watch_cgroup(id);
            restored += 1;
        }

        info!("restored cgroup state of {restored} units");
        restored
    }
}
