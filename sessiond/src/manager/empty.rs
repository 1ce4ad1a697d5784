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
use crate::cgroups::{CgroupBackend, WatchToken};
use crate::units::UnitId;
use tracing::debug;

impl<B: CgroupBackend> Manager<B> {
    /// The unit owning `path`, or the closest cgroup above it. Legacy
    /// release notifications name whatever level was removed last, which
    /// may be below any unit. `/` is the last candidate.
    pub fn unit_for_path(&self, path: &str) -> Option<UnitId> {
        let mut path = path.trim_end_matches('/');
        loop {
            let key = if path.is_empty() { "/" } else { path };
            if let Some(id) = self.paths.get(key) {
                return Some(*id);
            }
            if path.is_empty() {
                return None;
            }
            path = path.rsplit_once('/').map_or("", |(parent, _)| parent);
        }
    }

    /// Handles "cgroup became empty" for a cgroup path. Returns whether a
    /// unit was found and is now waiting in the empty queue.
    pub fn notify_empty(&mut self, path: &str) -> bool {
        let Some(id) = self.unit_for_path(path) else {
            debug!("no unit owns emptied cgroup {path}");
            return false;
        };
        self.add_to_empty_queue(id)
    }

    /// Handles a change reported by an empty watch.
    pub fn notify_watch(&mut self, token: WatchToken) -> bool {
        match self.watches.get(&token) {
            Some(id) => self.add_to_empty_queue(*id),
            None => false,
        }
    }

    /// Queues the unit if its cgroup really is empty. Notifications can be
    /// stale by the time they are handled.
    pub fn add_to_empty_queue(&mut self, id: UnitId) -> bool {
        let Some(unit) = self.units.get(id) else {
            return false;
        };
        if unit.cgroup.in_empty_queue {
            return true;
        }
        let Some(path) = unit.cgroup.path.clone() else {
            return false;
        };

        match self.backend.is_empty_recursive(&path) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                debug!("failed to check whether cgroup {path} is empty: {e}");
                return false;
            }
        }

        if let Some(unit) = self.units.get_mut(id) {
            unit.cgroup.in_empty_queue = true;
        }
        self.empty_queue.push_front(id);
        true
    }

    /// Next unit whose cgroup went empty.
    pub fn pop_empty(&mut self) -> Option<UnitId> {
        while let Some(id) = self.empty_queue.pop_front() {
            if let Some(unit) = self.units.get_mut(id) {
                unit.cgroup.in_empty_queue = false;
                return Some(id);
            }
        }
        None
    }
}
