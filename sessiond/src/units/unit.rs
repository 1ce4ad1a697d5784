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
use super::UnitName;
use crate::cgroups::{ControllerMask, ResourceSpec, WatchToken};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Stable handle of a unit in the [super::UnitTree]. Handles are never
/// reused, so a handle kept across a removal simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub(super) u64);

impl Display for UnitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Groups other units; never holds processes of its own.
    Slice,
    /// Externally created processes, e.g. a login session.
    Scope,
    Service,
    /// Synchronisation point without processes or a cgroup.
    Target,
}

impl UnitKind {
    pub fn supports_cgroups(self) -> bool {
        !matches!(self, UnitKind::Target)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActiveState {
    #[default]
    Activating,
    Active,
    Deactivating,
    Inactive,
    Failed,
}

impl ActiveState {
    pub fn is_inactive_or_failed(self) -> bool {
        matches!(self, ActiveState::Inactive | ActiveState::Failed)
    }
}

/// What is known about how the unit's processes run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecContext {
    /// The processes switch to an unprivileged user.
    pub drops_privileges: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BpfState {
    #[default]
    Off,
    On,
    /// A filter must be recompiled on the next realization.
    Invalidated,
}

/// The unit's cgroup as last realized, plus cached masks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CgroupState {
    pub path: Option<String>,
    pub realized: bool,
    pub realized_mask: ControllerMask,
    pub enabled_mask: ControllerMask,
    /// Subtree mask as last propagated to the slice above.
    pub subtree_mask: Option<ControllerMask>,
    /// Union of the members' subtree masks; `None` until computed.
    pub members_mask: Option<ControllerMask>,
    pub bpf_state: BpfState,
    pub in_realize_queue: bool,
    pub in_empty_queue: bool,
    pub watch: Option<WatchToken>,
    /// Raw `cpu` usage at the last reset, subtracted from readings.
    pub cpu_usage_base: u64,
    pub cpu_usage_last: Option<u64>,
}

#[derive(Debug)]
pub struct Unit {
    id: UnitId,
    name: UnitName,
    kind: UnitKind,
    pub(super) slice: Option<UnitId>,
    /// `None` for unit kinds that never get a cgroup.
    pub resources: Option<ResourceSpec>,
    pub exec_context: Option<ExecContext>,
    pub active_state: ActiveState,
    pub cgroup: CgroupState,
}

impl Unit {
    pub(super) fn new(
        id: UnitId,
        name: UnitName,
        kind: UnitKind,
        slice: Option<UnitId>,
        resources: Option<ResourceSpec>,
    ) -> Self {
        let resources = if kind.supports_cgroups() {
            Some(resources.unwrap_or_default())
        } else {
            None
        };

        Self {
            id,
            name,
            kind,
            slice,
            resources,
            exec_context: None,
            active_state: ActiveState::default(),
            cgroup: CgroupState::default(),
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &UnitName {
        &self.name
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn slice(&self) -> Option<UnitId> {
        self.slice
    }

    pub fn is_slice(&self) -> bool {
        self.kind == UnitKind::Slice
    }

    pub fn is_root_slice(&self) -> bool {
        self.name.is_root_slice()
    }

    /// Whether the unit hands its subtree to a nested manager.
    pub fn delegates(&self) -> bool {
        self.resources.as_ref().map_or(false, |r| r.delegate)
    }
}
