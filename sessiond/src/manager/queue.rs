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
use crate::units::{BpfState, UnitId, UnitKind};
use tracing::{trace, warn};

impl<B: CgroupBackend> Manager<B> {
    /// Schedules the unit for realization on the next drain. A unit is
    /// queued at most once.
    pub fn enqueue_realize(&mut self, id: UnitId) {
        let Some(unit) = self.units.get_mut(id) else {
            return;
        };
        if unit.cgroup.in_realize_queue {
            return;
        }
        unit.cgroup.in_realize_queue = true;
        self.realize_queue.push_front(id);
    }

    pub fn realize_queue_len(&self) -> usize {
        self.realize_queue.len()
    }

    /// Realizes every queued unit, including units queued while draining.
    /// Units that went away or stopped in the meantime are skipped, and a
    /// failing unit does not stop the others. Siblings are not queued from
    /// here. Returns how many units were realized.
    pub fn drain_realize_queue(&mut self) -> usize {
        let mut realized = 0;
        while let Some(id) = self.realize_queue.pop_front() {
            let Some(unit) = self.units.get_mut(id) else {
                continue;
            };
            unit.cgroup.in_realize_queue = false;
            if unit.active_state.is_inactive_or_failed() {
                trace!("skipping realization of stopped unit '{}'", unit.name());
                continue;
            }

            let name = unit.name().clone();
            match self.realize_now(id) {
                Ok(()) => realized += 1,
                Err(e) => warn!("failed to realize cgroup of '{name}': {e}"),
            }
        }
        realized
    }

    /// Forgets that the controllers in `mask` are realized on the unit and
    /// queues it, so their values are written again.
    pub fn invalidate(&mut self, id: UnitId, mask: ControllerMask) {
        let Some(unit) = self.units.get_mut(id) else {
            return;
        };
        if unit.resources.is_none() || mask.is_empty() {
            return;
        }

        let mask = mask.normalize();
        if !unit.cgroup.realized_mask.intersects(mask) {
            return;
        }
        unit.cgroup.realized_mask.remove(mask);
        self.enqueue_realize(id);
    }

    /// Forces the IP filter of the unit to be rebuilt. Filters of units in a
    /// slice include the slice's lists, so members follow.
    pub fn invalidate_bpf(&mut self, id: UnitId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(unit) = self.units.get_mut(id) else {
                continue;
            };
            if unit.resources.is_none()
                || unit.cgroup.bpf_state == BpfState::Invalidated
            {
                continue;
            }

            unit.cgroup.bpf_state = BpfState::Invalidated;
            let is_slice = unit.kind() == UnitKind::Slice;
            self.enqueue_realize(id);

            if is_slice {
                pending.extend(self.units.members(id));
            }
        }
    }

    pub(super) fn invalidate_startup_units(&mut self) {
        let startup: Vec<UnitId> = self
            .units
            .iter()
            .filter(|u| {
                u.resources.as_ref().map_or(false, |r| r.has_startup_config())
            })
            .map(|u| u.id())
            .collect();

        for id in startup {
            self.invalidate(
                id,
                ControllerMask::CPU | ControllerMask::IO | ControllerMask::BLKIO,
            );
        }
    }
}
