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
use super::{CgroupsError, Manager, Result};
use crate::cgroups::escape::escape;
use crate::cgroups::{BackendError, CgroupBackend, Controller, ControllerMask};
use crate::units::{BpfState, UnitId, UnitsError};
use nix::unistd::Pid;
use tracing::{debug, trace, warn};

impl<B: CgroupBackend> Manager<B> {
    /// Brings the unit's cgroup in line with its configuration, creating
    /// slices above it first. Siblings are queued rather than realized so
    /// that weights are compared against a complete set of peers once the
    /// queue is drained.
    pub fn realize(&mut self, id: UnitId) -> Result<()> {
        let unit = self.units.get(id).ok_or(UnitsError::NotFound { id })?;
        if unit.resources.is_none() {
            return Ok(());
        }

        self.queue_siblings(id);
        self.realize_now(id)
    }

    /// Whether the cgroup already matches the wanted masks and filter state.
    pub fn has_mask_realized(&mut self, id: UnitId) -> bool {
        let target = self.target_mask(id);
        let enable = self.enable_mask(id);
        let needs_bpf = self.needs_bpf(id);
        self.is_realized_as(id, target, enable, needs_bpf)
    }

    fn is_realized_as(
        &self,
        id: UnitId,
        target: ControllerMask,
        enable: ControllerMask,
        needs_bpf: bool,
    ) -> bool {
        let Some(unit) = self.units.get(id) else {
            return false;
        };
        let bpf = match unit.cgroup.bpf_state {
            BpfState::On => needs_bpf,
            BpfState::Off => !needs_bpf,
            BpfState::Invalidated => false,
        };

        unit.cgroup.realized
            && unit.cgroup.realized_mask == target
            && unit.cgroup.enabled_mask == enable
            && bpf
    }

    fn queue_siblings(&mut self, id: UnitId) {
        let mut current = id;
        while let Some(slice) = self.units.parent(current) {
            for member in self.units.members(slice) {
                if member == current {
                    continue;
                }
                let Some(unit) = self.units.get(member) else {
                    continue;
                };
                if unit.active_state.is_inactive_or_failed()
                    || unit.resources.is_none()
                {
                    continue;
                }
                if self.has_mask_realized(member) {
                    continue;
                }
                self.enqueue_realize(member);
            }
            current = slice;
        }
    }

    pub(super) fn realize_now(&mut self, id: UnitId) -> Result<()> {
        let unit = self.units.get_mut(id).ok_or(UnitsError::NotFound { id })?;
        if unit.cgroup.in_realize_queue {
            unit.cgroup.in_realize_queue = false;
            self.realize_queue.retain(|queued| *queued != id);
        }

        let unit = self.units.get(id).ok_or(UnitsError::NotFound { id })?;
        if unit.resources.is_none() {
            return Ok(());
        }
        let bpf_state = unit.cgroup.bpf_state;
        let slice = unit.slice();

        let target = self.target_mask(id);
        let enable = self.enable_mask(id);
        let needs_bpf = self.needs_bpf(id);
        if self.is_realized_as(id, target, enable, needs_bpf) {
            return Ok(());
        }

        // A filter that is no longer needed still has to be removed.
        let apply_bpf = needs_bpf || bpf_state != BpfState::Off;

        if let Some(slice) = slice {
            self.realize_now(slice)?;
        }

        self.create_cgroup(id, target, enable, needs_bpf)?;
        self.apply(id, target, apply_bpf);
        Ok(())
    }

    fn create_cgroup(
        &mut self,
        id: UnitId,
        target: ControllerMask,
        enable: ControllerMask,
        needs_bpf: bool,
    ) -> Result<()> {
        let path = self.pick_cgroup_path(id)?;

        if let Err(source) = self.backend.create(&path, target, self.supported)
        {
            let name = self.units.get(id).map(|u| u.name().clone());
            return Err(match name {
                Some(name) => CgroupsError::CreateCgroup { name, source },
                None => UnitsError::NotFound { id }.into(),
            });
        }

        self.watch_cgroup(id);

        if let Err(e) = self.backend.enable(&path, enable, self.supported) {
            warn!("failed to enable controllers '{enable}' on cgroup {path}: {e}");
        }

        let Some(unit) = self.units.get_mut(id) else {
            return Err(UnitsError::NotFound { id }.into());
        };
        unit.cgroup.realized = true;
        unit.cgroup.realized_mask = target;
        unit.cgroup.enabled_mask = enable;
        unit.cgroup.bpf_state =
            if needs_bpf { BpfState::On } else { BpfState::Off };
        trace!("realized '{}' at {path} with '{target}'", unit.name());

        // Slices and delegated subtrees place their own processes.
        if !unit.is_slice() && !unit.delegates() {
            self.migrate(id, &path);
        }
        Ok(())
    }

    /// The cgroup path of a unit, assigning the default one on first use.
    pub fn pick_cgroup_path(&mut self, id: UnitId) -> Result<String> {
        let unit = self.units.get(id).ok_or(UnitsError::NotFound { id })?;
        if let Some(path) = &unit.cgroup.path {
            return Ok(path.clone());
        }

        let path = self.default_cgroup_path(id)?;
        self.set_cgroup_path(id, Some(path.clone()))?;
        Ok(path)
    }

    /// The cgroup root followed by one escaped directory per slice above
    /// the unit and one for the unit itself. The root slice maps onto the
    /// cgroup root.
    pub fn default_cgroup_path(&self, id: UnitId) -> Result<String> {
        let unit = self.units.get(id).ok_or(UnitsError::NotFound { id })?;
        if unit.is_root_slice() {
            return Ok(match self.cgroup_root.as_str() {
                "" => "/".to_string(),
                root => root.to_string(),
            });
        }

        let mut path = self.cgroup_root.clone();
        for slice in self.units.ancestors(id).into_iter().rev() {
            let Some(slice) = self.units.get(slice) else {
                continue;
            };
            if slice.is_root_slice() {
                continue;
            }
            path.push('/');
            path.push_str(&escape(slice.name().as_str()));
        }
        path.push('/');
        path.push_str(&escape(unit.name().as_str()));
        Ok(path)
    }

    /// Assigns or, with `None`, releases the cgroup path of a unit. A path
    /// belongs to at most one unit, and an assigned path only changes by
    /// being released first.
    pub fn set_cgroup_path(
        &mut self,
        id: UnitId,
        path: Option<String>,
    ) -> Result<()> {
        let unit = self.units.get(id).ok_or(UnitsError::NotFound { id })?;
        if unit.cgroup.path == path {
            return Ok(());
        }

        match path {
            Some(path) => {
                if let Some(owner) = self.paths.get(&path) {
                    let owner = self
                        .name_of(*owner)
                        .unwrap_or_else(|| unit.name().clone());
                    return Err(CgroupsError::PathCollision {
                        name: unit.name().clone(),
                        path,
                        owner,
                    });
                }
                if let Some(current) = &unit.cgroup.path {
                    return Err(CgroupsError::PathReassigned {
                        name: unit.name().clone(),
                        current: current.clone(),
                        path,
                    });
                }

                let _ = self.paths.insert(path.clone(), id);
                if let Some(unit) = self.units.get_mut(id) {
                    unit.cgroup.path = Some(path);
                }
            }
            None => {
                if let Some(unit) = self.units.get_mut(id) {
                    if let Some(current) = unit.cgroup.path.take() {
                        let _ = self.paths.remove(&current);
                    }
                }
            }
        }
        Ok(())
    }

    /// Starts watching the unit's cgroup for becoming empty. Failures only
    /// cost the notification, the unit is still collected when it stops.
    pub(super) fn watch_cgroup(&mut self, id: UnitId) {
        if !self.backend.hierarchy().has_events() {
            return;
        }
        let Some(unit) = self.units.get(id) else {
            return;
        };
        // The root cgroup has no cgroup.events.
        if unit.is_root_slice() || unit.cgroup.watch.is_some() {
            return;
        }
        let Some(path) = unit.cgroup.path.clone() else {
            return;
        };

        match self.backend.watch(&path) {
            Ok(token) => {
                let _ = self.watches.insert(token, id);
                if let Some(unit) = self.units.get_mut(id) {
                    unit.cgroup.watch = Some(token);
                }
            }
            Err(e) => debug!("failed to watch cgroup {path}: {e}"),
        }
    }

    /// Drops the path table entry and the empty watch of a unit.
    pub fn release_cgroup(&mut self, id: UnitId) {
        let Some(unit) = self.units.get_mut(id) else {
            return;
        };
        let watch = unit.cgroup.watch.take();
        if let Some(path) = unit.cgroup.path.take() {
            let _ = self.paths.remove(&path);
        }

        if let Some(token) = watch {
            let _ = self.watches.remove(&token);
            if let Err(e) = self.backend.unwatch(token) {
                debug!("failed to remove cgroup watch: {e}");
            }
        }
    }

    /// Removes the unit's cgroup and everything below it. The root slice
    /// keeps its directory and stays realized.
    pub fn prune_cgroup(&mut self, id: UnitId) {
        let Some(unit) = self.units.get(id) else {
            return;
        };
        let Some(path) = unit.cgroup.path.clone() else {
            return;
        };
        let is_root_slice = unit.is_root_slice();

        // Keep the last reading; the counters vanish with the cgroup.
        let _ = self.cpu_usage_nsec(id);

        if let Err(e) = self.backend.trim(&path, self.supported, !is_root_slice)
        {
            debug!("failed to remove cgroup {path}, ignoring: {e}");
            return;
        }
        if is_root_slice {
            return;
        }

        self.release_cgroup(id);
        if let Some(unit) = self.units.get_mut(id) {
            unit.cgroup.realized = false;
            unit.cgroup.realized_mask = ControllerMask::empty();
            unit.cgroup.enabled_mask = ControllerMask::empty();
        }
    }

    /// Path of the nearest unit, the unit itself or a slice above it, whose
    /// cgroup is realized with every controller in `mask`.
    pub fn realized_cgroup_path(
        &self,
        id: UnitId,
        mask: ControllerMask,
    ) -> Option<String> {
        std::iter::once(id)
            .chain(self.units.ancestors(id))
            .filter_map(|id| self.units.get(id))
            .find(|unit| unit.cgroup.realized_mask.contains(mask))
            .and_then(|unit| unit.cgroup.path.clone())
    }

    /// Moves processes into the unit's cgroup, below `suffix` when given.
    ///
    /// On per-controller hierarchies each process also joins the requested
    /// cgroup of every delegated and realized controller, and the nearest
    /// realized cgroup for all others. Every pid is attempted; the first
    /// failure is returned.
    pub fn attach_pids(
        &mut self,
        id: UnitId,
        pids: &[Pid],
        suffix: Option<&str>,
    ) -> Result<()> {
        self.realize(id)?;

        let unit = self.units.get(id).ok_or(UnitsError::NotFound { id })?;
        let Some(path) = unit.cgroup.path.clone() else {
            return Ok(());
        };
        let realized_mask = unit.cgroup.realized_mask;
        let path = match suffix {
            Some(suffix) => {
                format!("{}/{}", path.trim_end_matches('/'), suffix)
            }
            None => path,
        };
        let delegated = self.delegate_mask(id) & realized_mask;

        let mut first_error: Option<BackendError> = None;
        for pid in pids.iter().copied() {
            if let Err(e) = self.backend.attach(None, &path, pid) {
                debug!("failed to move process {pid} to cgroup {path}: {e}");
                let _ = first_error.get_or_insert(e);
                continue;
            }

            if self.backend.hierarchy().is_unified() {
                continue;
            }

            for controller in self.supported.controllers() {
                if delegated.contains(controller.mask()) {
                    match self.backend.attach(Some(controller), &path, pid) {
                        Ok(()) => continue,
                        Err(e) => debug!(
                            "failed to move process {pid} to {controller} cgroup {path}: {e}"
                        ),
                    }
                }

                let Some(realized) =
                    self.realized_cgroup_path(id, controller.mask())
                else {
                    continue;
                };
                if let Err(e) =
                    self.backend.attach(Some(controller), &realized, pid)
                {
                    debug!(
                        "failed to move process {pid} to {controller} cgroup {realized}: {e}"
                    );
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// On per-controller hierarchies, makes every controller tree follow
    /// the process-tracking tree for the processes below `path`.
    fn migrate(&mut self, id: UnitId, path: &str) {
        if self.backend.hierarchy().is_unified() {
            return;
        }

        let pids = match self.backend.pids(None, path, true) {
            Ok(pids) => pids,
            Err(e) if e.is_not_found() => return,
            Err(e) => {
                warn!("failed to enumerate processes of cgroup {path}: {e}");
                return;
            }
        };
        if pids.is_empty() {
            return;
        }

        for controller in self.supported.controllers() {
            let destination = self
                .realized_cgroup_path(id, controller.mask())
                .unwrap_or_else(|| path.to_string());
            for pid in &pids {
                self.attach_with_fallback(controller, &destination, *pid);
            }
        }
    }

    /// Attaches to `path`, or to the closest existing cgroup above it.
    fn attach_with_fallback(
        &mut self,
        controller: Controller,
        path: &str,
        pid: Pid,
    ) {
        let mut candidate = path;
        loop {
            match self.backend.attach(Some(controller), candidate, pid) {
                Ok(()) => return,
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(
                        "failed to migrate process {pid} to {controller} cgroup {candidate}: {e}"
                    );
                    return;
                }
            }

            candidate = match candidate.rsplit_once('/') {
                Some(("", _)) if candidate != "/" => "/",
                Some((parent, _)) if !parent.is_empty() => parent,
                _ => {
                    debug!("no {controller} cgroup left to move process {pid} into");
                    return;
                }
            };
        }
    }
}
