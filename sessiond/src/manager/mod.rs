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
//! The cgroup side of the session manager.
//!
//! [Manager] owns the unit tree, the path table and the backend. Masks are
//! resolved in `resolver`, cgroups are created and populated in `realize`
//! and `apply`, deferred work lives in `queue` and `empty`.

pub use self::error::{CgroupsError, Result};
pub use self::state::{StateSnapshot, UnitCgroupState};

use crate::cgroups::{CgroupBackend, ControllerMask, ResourceSpec, WatchToken};
use crate::units::{
    ExecContext, UnitId, UnitKind, UnitName, UnitTree, UnitsError,
};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};
use validation::ValidatedField;

mod accounting;
mod apply;
mod empty;
mod error;
mod queue;
mod realize;
mod resolver;
mod state;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ManagerState {
    /// Startup weights are in effect.
    #[default]
    Starting,
    Running,
    Stopping,
}

#[derive(Debug)]
pub struct Manager<B> {
    backend: B,
    units: UnitTree,
    state: ManagerState,
    cgroup_root: String,
    supported: ControllerMask,
    /// Owner of every assigned cgroup path.
    paths: HashMap<String, UnitId>,
    watches: HashMap<WatchToken, UnitId>,
    realize_queue: VecDeque<UnitId>,
    empty_queue: VecDeque<UnitId>,
    members_mask_recomputes: u64,
    compat_warned: bool,
}

impl<B: CgroupBackend> Manager<B> {
    /// Creates a manager whose tree lives below `cgroup_root`, e.g.
    /// `/system.slice/sessiond.service`, or `""` for the top of the
    /// hierarchy. Supported controllers are queried once, here.
    pub fn new(backend: B, cgroup_root: &str) -> Result<Self> {
        let cgroup_root = cgroup_root.trim_end_matches('/').to_string();
        let root = if cgroup_root.is_empty() { "/" } else { &cgroup_root };
        let supported =
            backend.supported_controllers(root).map_err(|source| {
                CgroupsError::NoCgroupSupport {
                    root: root.to_string(),
                    source,
                }
            })?;

        info!(
            "cgroup root '{root}', {:?} hierarchy, supported controllers: {supported}",
            backend.hierarchy()
        );

        Ok(Self {
            backend,
            units: UnitTree::new(),
            state: ManagerState::default(),
            cgroup_root,
            supported,
            paths: HashMap::new(),
            watches: HashMap::new(),
            realize_queue: VecDeque::new(),
            empty_queue: VecDeque::new(),
            members_mask_recomputes: 0,
            compat_warned: false,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn units(&self) -> &UnitTree {
        &self.units
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn cgroup_root(&self) -> &str {
        &self.cgroup_root
    }

    pub fn supported_controllers(&self) -> ControllerMask {
        self.supported
    }

    /// Registers a unit. `slice` names the slice it is placed in.
    pub fn add_unit(
        &mut self,
        name: &str,
        kind: UnitKind,
        slice: Option<&str>,
        resources: Option<ResourceSpec>,
    ) -> Result<UnitId> {
        let name = UnitName::validate(Some(name.to_string()), "name", None)
            .map_err(UnitsError::from)?;
        let slice = match slice {
            Some(slice) => Some(self.lookup(slice)?),
            None => None,
        };

        let id = self.units.insert(name, kind, slice, resources)?;
        self.update_members_masks(id);
        Ok(id)
    }

    /// Forgets a unit, releasing its cgroup path. The cgroup itself is
    /// left to [Manager::prune_cgroup].
    pub fn remove_unit(&mut self, id: UnitId) -> Result<()> {
        let unit = self.units.get(id).ok_or(UnitsError::NotFound { id })?;
        if !self.units.members(id).is_empty() {
            return Err(
                UnitsError::HasMembers { name: unit.name().clone() }.into()
            );
        }

        let parent = unit.slice();
        self.release_cgroup(id);
        let unit = self.units.remove(id)?;
        self.realize_queue.retain(|queued| *queued != id);
        self.empty_queue.retain(|queued| *queued != id);
        debug!("removed unit '{}'", unit.name());

        if let Some(parent) = parent {
            if let Some(parent) = self.units.get_mut(parent) {
                parent.cgroup.members_mask = None;
            }
            self.update_members_masks(parent);
        }
        Ok(())
    }

    /// Replaces the resource configuration of a unit and schedules the
    /// affected controllers for re-application.
    pub fn set_resources(
        &mut self,
        id: UnitId,
        resources: ResourceSpec,
    ) -> Result<()> {
        let unit = self
            .units
            .get_mut(id)
            .ok_or(UnitsError::NotFound { id })?;
        if unit.resources.is_none() {
            debug!("unit '{}' has no cgroup, ignoring resources", unit.name());
            return Ok(());
        }
        let Some(current) = unit.resources.as_mut() else {
            return Ok(());
        };

        let previous = std::mem::replace(current, resources);
        let changed = previous.mask() | current.mask();
        let ip_changed = previous.ip_accounting != current.ip_accounting
            || previous.ip_address_allow != current.ip_address_allow
            || previous.ip_address_deny != current.ip_address_deny;

        self.update_members_masks(id);
        self.invalidate(id, changed);
        if ip_changed {
            self.invalidate_bpf(id);
        }
        self.enqueue_realize(id);
        Ok(())
    }

    pub fn set_exec_context(
        &mut self,
        id: UnitId,
        exec_context: Option<ExecContext>,
    ) -> Result<()> {
        let unit = self
            .units
            .get_mut(id)
            .ok_or(UnitsError::NotFound { id })?;
        unit.exec_context = exec_context;
        self.update_members_masks(id);
        self.enqueue_realize(id);
        Ok(())
    }

    pub fn set_active_state(
        &mut self,
        id: UnitId,
        active_state: crate::units::ActiveState,
    ) -> Result<()> {
        self.units
            .get_mut(id)
            .ok_or(UnitsError::NotFound { id })?
            .active_state = active_state;
        Ok(())
    }

    /// Leaving [ManagerState::Starting] re-applies every unit that has a
    /// startup-only value configured.
    pub fn set_state(&mut self, state: ManagerState) {
        let previous = std::mem::replace(&mut self.state, state);
        if previous == ManagerState::Starting && state != previous {
            self.invalidate_startup_units();
        }
    }

    pub fn lookup(&self, name: &str) -> Result<UnitId> {
        self.units.lookup(name).ok_or_else(|| {
            UnitsError::UnknownName { name: name.to_string() }.into()
        })
    }

    /// How often a memoized members mask had to be recomputed from scratch.
    pub fn members_mask_recomputes(&self) -> u64 {
        self.members_mask_recomputes
    }

    fn name_of(&self, id: UnitId) -> Option<UnitName> {
        self.units.get(id).map(|u| u.name().clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cgroups::backend::recording::RecordingBackend;
    use crate::units::ROOT_SLICE;

    /// A manager on an in-memory backend with the root slice registered.
    pub(crate) fn manager(
        backend: RecordingBackend,
    ) -> (Manager<RecordingBackend>, UnitId) {
        let mut manager =
            Manager::new(backend, "").expect("failed to create manager");
        let root = manager
            .add_unit(ROOT_SLICE, UnitKind::Slice, None, None)
            .expect("failed to add root slice");
        (manager, root)
    }

    pub(crate) fn tasks(max: u64) -> ResourceSpec {
        ResourceSpec { tasks_max: Some(max), ..Default::default() }
    }

    #[test]
    fn unknown_slices_are_rejected() {
        let (mut manager, _) = manager(RecordingBackend::unified());
        let err = manager
            .add_unit("session-1.scope", UnitKind::Scope, Some("nope.slice"), None)
            .expect_err("unknown slice");
        assert!(matches!(
            err,
            CgroupsError::Units(UnitsError::UnknownName { .. })
        ));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let (mut manager, _) = manager(RecordingBackend::unified());
        let err = manager
            .add_unit("../escape", UnitKind::Scope, None, None)
            .expect_err("invalid name");
        assert!(matches!(
            err,
            CgroupsError::Units(UnitsError::InvalidName(..))
        ));
    }

    #[test]
    fn removing_a_unit_shrinks_the_slice_mask() {
        let (mut manager, root) = manager(RecordingBackend::unified());
        let a = manager
            .add_unit("a.scope", UnitKind::Scope, Some(ROOT_SLICE), Some(tasks(10)))
            .expect("a");
        assert_eq!(manager.members_mask(root), ControllerMask::PIDS);

        manager.remove_unit(a).expect("remove");
        assert_eq!(manager.members_mask(root), ControllerMask::empty());
        assert!(manager.lookup("a.scope").is_err());
    }

    #[test]
    fn slices_with_members_stay() {
        let (mut manager, root) = manager(RecordingBackend::unified());
        let _ = manager
            .add_unit("a.scope", UnitKind::Scope, Some(ROOT_SLICE), None)
            .expect("a");
        assert!(matches!(
            manager.remove_unit(root),
            Err(CgroupsError::Units(UnitsError::HasMembers { .. }))
        ));
        assert!(manager.units().contains(root));
    }

    #[test]
    fn exec_context_changes_are_realized() {
        let (mut manager, _) = manager(RecordingBackend::legacy());
        let spec = ResourceSpec {
            delegate: true,
            delegate_controllers: ControllerMask::MEMORY | ControllerMask::PIDS,
            ..Default::default()
        };
        let a = manager
            .add_unit("user@1000.service", UnitKind::Service, Some(ROOT_SLICE), Some(spec))
            .expect("a");
        manager.realize(a).expect("realize");
        assert_eq!(manager.realize_queue_len(), 0);

        manager
            .set_exec_context(a, Some(ExecContext { drops_privileges: false }))
            .expect("exec");
        assert_eq!(manager.realize_queue_len(), 1);

        let _ = manager.drain_realize_queue();
        let realized = manager.units().get(a).expect("a").cgroup.realized_mask;
        assert!(realized.contains(ControllerMask::MEMORY | ControllerMask::PIDS));
    }

    #[test]
    fn leaving_startup_reapplies_startup_weights() {
        use crate::cgroups::weight::CpuWeight;

        let (mut manager, _) = manager(RecordingBackend::unified());
        let spec = ResourceSpec {
            cpu_weight: Some(CpuWeight::saturating(100)),
            startup_cpu_weight: Some(CpuWeight::saturating(1000)),
            ..Default::default()
        };
        let a = manager
            .add_unit("a.service", UnitKind::Service, Some(ROOT_SLICE), Some(spec))
            .expect("a");
        manager.realize(a).expect("realize");
        assert_eq!(
            manager.backend().written("/a.service", "cpu.weight"),
            vec!["1000"]
        );

        manager.set_state(ManagerState::Running);
        let _ = manager.drain_realize_queue();
        assert_eq!(
            manager.backend().written("/a.service", "cpu.weight"),
            vec!["1000", "100"]
        );
    }

    #[test]
    fn changing_resources_reapplies_values() {
        let (mut manager, _) = manager(RecordingBackend::unified());
        let a = manager
            .add_unit("a.scope", UnitKind::Scope, Some(ROOT_SLICE), Some(tasks(10)))
            .expect("a");
        manager.realize(a).expect("realize");

        manager.set_resources(a, tasks(20)).expect("set");
        let _ = manager.drain_realize_queue();
        assert_eq!(
            manager.backend().written("/a.scope", "pids.max"),
            vec!["10", "20"]
        );
    }
}
