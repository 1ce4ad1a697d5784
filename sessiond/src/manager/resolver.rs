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
use super::Manager;
use crate::cgroups::{CgroupBackend, ControllerMask};
use crate::units::UnitId;

impl<B: CgroupBackend> Manager<B> {
    /// Controllers the unit's own configuration asks for, delegation
    /// included.
    pub fn own_mask(&self, id: UnitId) -> ControllerMask {
        let Some(resources) =
            self.units.get(id).and_then(|u| u.resources.as_ref())
        else {
            return ControllerMask::empty();
        };
        (resources.mask() | self.delegate_mask(id)).normalize()
    }

    /// Controllers handed to a nested manager. The legacy hierarchy only
    /// delegates to processes that keep their privileges, since nobody
    /// else could write to the delegated cgroups.
    pub fn delegate_mask(&self, id: UnitId) -> ControllerMask {
        let Some(unit) = self.units.get(id) else {
            return ControllerMask::empty();
        };
        let Some(resources) = unit.resources.as_ref() else {
            return ControllerMask::empty();
        };
        if !resources.delegate {
            return ControllerMask::empty();
        }

        if !self.backend.hierarchy().is_unified() {
            match unit.exec_context {
                Some(exec) if !exec.drops_privileges => {}
                _ => return ControllerMask::empty(),
            }
        }
        resources.delegate_controllers
    }

    /// Union of the subtree masks of the units in slice `id`, memoized on
    /// the unit.
    pub fn members_mask(&mut self, id: UnitId) -> ControllerMask {
        let Some(unit) = self.units.get(id) else {
            return ControllerMask::empty();
        };
        if let Some(mask) = unit.cgroup.members_mask {
            return mask;
        }

        self.members_mask_recomputes += 1;
        let mut mask = ControllerMask::empty();
        for member in self.units.members(id) {
            mask |= self.subtree_mask(member);
        }

        if let Some(unit) = self.units.get_mut(id) {
            unit.cgroup.members_mask = Some(mask);
        }
        mask
    }

    pub fn subtree_mask(&mut self, id: UnitId) -> ControllerMask {
        self.own_mask(id) | self.members_mask(id)
    }

    /// What the other units in the same slice need. A unit outside any
    /// slice is its own sibling group.
    pub fn siblings_mask(&mut self, id: UnitId) -> ControllerMask {
        match self.units.parent(id) {
            Some(slice) => self.members_mask(slice),
            None => self.subtree_mask(id),
        }
    }

    /// Controllers the unit's cgroup must exist in.
    pub fn target_mask(&mut self, id: UnitId) -> ControllerMask {
        let mask = self.own_mask(id)
            | self.members_mask(id)
            | self.siblings_mask(id);
        mask & self.supported
    }

    /// Controllers to turn on for the children of the unit's cgroup.
    pub fn enable_mask(&mut self, id: UnitId) -> ControllerMask {
        self.members_mask(id) & self.supported
    }

    /// Whether an IP filter applies to the unit: its own accounting or
    /// lists, or the lists of any slice above it.
    pub fn needs_bpf(&self, id: UnitId) -> bool {
        let own = self
            .units
            .get(id)
            .and_then(|u| u.resources.as_ref())
            .map_or(false, |r| r.ip_accounting || r.has_ip_filter());

        own || self.units.ancestors(id).into_iter().any(|slice| {
            self.units
                .get(slice)
                .and_then(|u| u.resources.as_ref())
                .map_or(false, |r| r.has_ip_filter())
        })
    }

    /// Pushes a change of the unit's subtree mask up the slice chain.
    ///
    /// When a level only gained controllers, the new bits are merged into
    /// the memoized members mask of the slice above. Anything else drops
    /// that memo so it is recomputed on the next read.
    pub(crate) fn update_members_masks(&mut self, id: UnitId) {
        let mut current = id;
        loop {
            let mask = self.subtree_mask(current);
            let Some(unit) = self.units.get_mut(current) else {
                return;
            };

            let previous = unit.cgroup.subtree_mask.replace(mask);
            if previous == Some(mask) {
                return;
            }
            let more = previous.map_or(false, |old| mask.contains(old));

            let Some(slice) = unit.slice() else {
                return;
            };
            let Some(slice_unit) = self.units.get_mut(slice) else {
                return;
            };
            if more {
                if let Some(members) = slice_unit.cgroup.members_mask.as_mut() {
                    *members |= mask;
                }
            } else {
                slice_unit.cgroup.members_mask = None;
            }

            current = slice;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{manager, tasks};
    use crate::cgroups::backend::recording::RecordingBackend;
    use crate::cgroups::weight::CpuWeight;
    use crate::cgroups::{ControllerMask, ResourceSpec};
    use crate::units::{ExecContext, UnitKind, ROOT_SLICE};
    use pretty_assertions::assert_eq;

    fn cpu() -> ResourceSpec {
        ResourceSpec {
            cpu_weight: Some(CpuWeight::saturating(200)),
            ..Default::default()
        }
    }

    fn delegating() -> ResourceSpec {
        ResourceSpec {
            delegate: true,
            delegate_controllers: ControllerMask::MEMORY | ControllerMask::PIDS,
            ..Default::default()
        }
    }

    #[test]
    fn siblings_inherit_each_others_controllers() {
        let (mut manager, _) = manager(RecordingBackend::legacy());
        let _ = manager
            .add_unit("s.slice", UnitKind::Slice, Some(ROOT_SLICE), None)
            .expect("s");
        let a = manager
            .add_unit("a.scope", UnitKind::Scope, Some("s.slice"), Some(cpu()))
            .expect("a");
        let b = manager
            .add_unit("b.scope", UnitKind::Scope, Some("s.slice"), None)
            .expect("b");

        assert!(manager.own_mask(a).contains(ControllerMask::CPU));
        assert_eq!(manager.own_mask(b), ControllerMask::empty());
        assert_eq!(
            manager.target_mask(b),
            ControllerMask::CPU | ControllerMask::CPUACCT
        );
    }

    #[test]
    fn basic_session_needs_pids_only() {
        let (mut manager, root) = manager(RecordingBackend::unified());
        let session = manager
            .add_unit("session-1", UnitKind::Scope, Some(ROOT_SLICE), Some(tasks(64)))
            .expect("session");

        assert_eq!(manager.own_mask(root), ControllerMask::empty());
        assert_eq!(manager.target_mask(session), ControllerMask::PIDS);
        assert_eq!(manager.enable_mask(root), ControllerMask::PIDS);
        assert_eq!(manager.enable_mask(session), ControllerMask::empty());
    }

    #[test]
    fn unsupported_controllers_are_masked_out() {
        let backend = RecordingBackend::new(
            crate::cgroups::Hierarchy::Unified,
            ControllerMask::MEMORY,
        );
        let (mut manager, _) = manager(backend);
        let a = manager
            .add_unit("a.scope", UnitKind::Scope, Some(ROOT_SLICE), Some(tasks(1)))
            .expect("a");
        assert_eq!(manager.target_mask(a), ControllerMask::empty());
    }

    #[test]
    fn pure_additions_merge_without_recomputing() {
        let (mut manager, root) = manager(RecordingBackend::unified());
        let _ = manager
            .add_unit("s.slice", UnitKind::Slice, Some(ROOT_SLICE), None)
            .expect("s");
        let a = manager
            .add_unit("a.scope", UnitKind::Scope, Some("s.slice"), Some(tasks(5)))
            .expect("a");
        let s = manager.lookup("s.slice").expect("s");

        // Settle every memo first.
        let _ = manager.target_mask(a);
        let _ = manager.target_mask(root);
        let recomputes = manager.members_mask_recomputes();

        let mut spec = tasks(5);
        spec.memory_max = Some(1 << 30);
        manager.set_resources(a, spec).expect("grow");

        assert_eq!(manager.members_mask_recomputes(), recomputes);
        assert_eq!(
            manager.members_mask(s),
            ControllerMask::PIDS | ControllerMask::MEMORY
        );
        assert_eq!(
            manager.members_mask(root),
            ControllerMask::PIDS | ControllerMask::MEMORY
        );
        assert_eq!(manager.members_mask_recomputes(), recomputes);
    }

    #[test]
    fn removals_invalidate_the_slice() {
        let (mut manager, _) = manager(RecordingBackend::unified());
        let _ = manager
            .add_unit("s.slice", UnitKind::Slice, Some(ROOT_SLICE), None)
            .expect("s");
        let a = manager
            .add_unit("a.scope", UnitKind::Scope, Some("s.slice"), Some(tasks(5)))
            .expect("a");
        let s = manager.lookup("s.slice").expect("s");
        assert_eq!(manager.members_mask(s), ControllerMask::PIDS);

        let recomputes = manager.members_mask_recomputes();
        manager.set_resources(a, ResourceSpec::default()).expect("shrink");
        assert_eq!(manager.members_mask(s), ControllerMask::empty());
        assert!(manager.members_mask_recomputes() > recomputes);
    }

    #[test]
    fn unified_delegation_hands_out_configured_controllers() {
        let (mut manager, _) = manager(RecordingBackend::unified());
        let a = manager
            .add_unit("user@1000.service", UnitKind::Service, Some(ROOT_SLICE), Some(delegating()))
            .expect("a");
        manager
            .set_exec_context(a, Some(ExecContext { drops_privileges: true }))
            .expect("exec");
        assert_eq!(
            manager.delegate_mask(a),
            ControllerMask::MEMORY | ControllerMask::PIDS
        );
    }

    #[test]
    fn legacy_delegation_requires_privileges() {
        let (mut manager, _) = manager(RecordingBackend::legacy());
        let a = manager
            .add_unit("user@1000.service", UnitKind::Service, Some(ROOT_SLICE), Some(delegating()))
            .expect("a");

        assert_eq!(manager.delegate_mask(a), ControllerMask::empty());

        manager
            .set_exec_context(a, Some(ExecContext { drops_privileges: true }))
            .expect("exec");
        assert_eq!(manager.delegate_mask(a), ControllerMask::empty());
        assert_eq!(manager.own_mask(a), ControllerMask::empty());

        manager
            .set_exec_context(a, Some(ExecContext { drops_privileges: false }))
            .expect("exec");
        assert_eq!(
            manager.delegate_mask(a),
            ControllerMask::MEMORY | ControllerMask::PIDS
        );
    }

    #[test]
    fn ip_lists_of_slices_reach_their_members() {
        let (mut manager, _) = manager(RecordingBackend::unified());
        let spec = ResourceSpec {
            ip_address_deny: vec!["0.0.0.0/0".parse().expect("net")],
            ..Default::default()
        };
        let _ = manager
            .add_unit("s.slice", UnitKind::Slice, Some(ROOT_SLICE), Some(spec))
            .expect("s");
        let a = manager
            .add_unit("a.scope", UnitKind::Scope, Some("s.slice"), None)
            .expect("a");
        let b = manager
            .add_unit("b.scope", UnitKind::Scope, Some(ROOT_SLICE), None)
            .expect("b");

        assert!(manager.needs_bpf(a));
        assert!(!manager.needs_bpf(b));
    }
}
