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
use crate::cgroups::{CgroupBackend, Controller, ControllerMask, ResourceSpec};
use crate::units::{UnitId, UnitName, UnitsError};

const NSEC_PER_USEC: u64 = 1_000;

impl<B: CgroupBackend> Manager<B> {
    /// Bytes of memory charged to the unit's cgroup.
    pub fn memory_current(&self, id: UnitId) -> Result<u64> {
        let attribute = if self.backend.hierarchy().is_unified() {
            "memory.current"
        } else {
            "memory.usage_in_bytes"
        };
        let (name, path) = self.accounted_path(
            id,
            "memory",
            ControllerMask::MEMORY,
            |r| r.memory_accounting,
        )?;
        self.read_u64(&name, Some(Controller::Memory), &path, attribute)
    }

    /// Number of tasks in the unit's cgroup.
    pub fn tasks_current(&self, id: UnitId) -> Result<u64> {
        let (name, path) =
            self.accounted_path(id, "tasks", ControllerMask::PIDS, |r| {
                r.tasks_accounting
            })?;
        self.read_u64(&name, Some(Controller::Pids), &path, "pids.current")
    }

    /// CPU time used by the unit's cgroup since the last
    /// [Manager::reset_cpu_usage], in nanoseconds.
    ///
    /// The last good reading is kept, so a unit whose cgroup is already
    /// gone still reports it.
    pub fn cpu_usage_nsec(&mut self, id: UnitId) -> Result<u64> {
        let unit = self.units.get(id).ok_or(UnitsError::NotFound { id })?;
        let (base, last) = (unit.cgroup.cpu_usage_base, unit.cgroup.cpu_usage_last);

        match self.cpu_usage_raw(id) {
            Ok(raw) => {
                let usage = raw.saturating_sub(base);
                if let Some(unit) = self.units.get_mut(id) {
                    unit.cgroup.cpu_usage_last = Some(usage);
                }
                Ok(usage)
            }
            Err(e) => last.ok_or(e),
        }
    }

    /// Makes the current CPU usage the zero point of later readings.
    pub fn reset_cpu_usage(&mut self, id: UnitId) {
        let raw = self.cpu_usage_raw(id).unwrap_or(0);
        if let Some(unit) = self.units.get_mut(id) {
            unit.cgroup.cpu_usage_base = raw;
            unit.cgroup.cpu_usage_last = None;
        }
    }

    fn cpu_usage_raw(&self, id: UnitId) -> Result<u64> {
        if !self.backend.hierarchy().is_unified() {
            let (name, path) =
                self.accounted_path(id, "cpu", ControllerMask::CPUACCT, |r| {
                    r.cpu_accounting
                })?;
            return self.read_u64(
                &name,
                Some(Controller::Cpuacct),
                &path,
                "cpuacct.usage",
            );
        }

        // cpu.stat is a core file, present without the cpu controller.
        let (name, path) =
            self.accounted_path(id, "cpu", ControllerMask::empty(), |r| {
                r.cpu_accounting
            })?;
        let stat = self.backend.read_attribute(None, &path, "cpu.stat")?;
        let invalid = || CgroupsError::InvalidAttribute {
            name: name.clone(),
            attribute: "cpu.stat",
            value: stat.trim().to_string(),
        };
        let usec = stat
            .lines()
            .find_map(|line| line.strip_prefix("usage_usec "))
            .and_then(|usec| usec.trim().parse::<u64>().ok())
            .ok_or_else(invalid)?;
        Ok(usec.saturating_mul(NSEC_PER_USEC))
    }

    /// The unit's cgroup path, provided accounting is on and `mask` was
    /// realized there.
    fn accounted_path(
        &self,
        id: UnitId,
        what: &'static str,
        mask: ControllerMask,
        enabled: impl Fn(&ResourceSpec) -> bool,
    ) -> Result<(UnitName, String)> {
        let unit = self.units.get(id).ok_or(UnitsError::NotFound { id })?;
        let no_data = || CgroupsError::NoData { name: unit.name().clone(), what };

        if !unit.resources.as_ref().map_or(false, enabled)
            || !unit.cgroup.realized_mask.contains(mask)
        {
            return Err(no_data());
        }
        let path = unit.cgroup.path.clone().ok_or_else(no_data)?;
        Ok((unit.name().clone(), path))
    }

    fn read_u64(
        &self,
        name: &UnitName,
        controller: Option<Controller>,
        path: &str,
        attribute: &'static str,
    ) -> Result<u64> {
        let value = self.backend.read_attribute(controller, path, attribute)?;
        let value = value.trim();
        value.parse::<u64>().map_err(|_| CgroupsError::InvalidAttribute {
            name: name.clone(),
            attribute,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::manager;
    use crate::cgroups::backend::recording::RecordingBackend;
    use crate::cgroups::resource::ResourceSpec;
    use crate::manager::{CgroupsError, Manager};
    use crate::units::{UnitId, UnitKind, ROOT_SLICE};
    use pretty_assertions::assert_eq;

    fn accounted(
        backend: RecordingBackend,
    ) -> (Manager<RecordingBackend>, UnitId) {
        let (mut manager, _) = manager(backend);
        let spec = ResourceSpec {
            cpu_accounting: true,
            memory_accounting: true,
            tasks_accounting: true,
            ..Default::default()
        };
        let a = manager
            .add_unit("a.scope", UnitKind::Scope, Some(ROOT_SLICE), Some(spec))
            .expect("a");
        manager.realize(a).expect("realize");
        (manager, a)
    }

    fn set(manager: &mut Manager<RecordingBackend>, attribute: &str, value: &str) {
        let _ = manager.backend_mut().attributes.insert(
            ("/a.scope".to_string(), attribute.to_string()),
            value.to_string(),
        );
    }

    #[test]
    fn unified_readers() {
        let (mut manager, a) = accounted(RecordingBackend::unified());
        set(&mut manager, "memory.current", "4096\n");
        set(&mut manager, "pids.current", "3\n");
        set(
            &mut manager,
            "cpu.stat",
            "usage_usec 1500\nuser_usec 1000\nsystem_usec 500\n",
        );

        assert_eq!(manager.memory_current(a).expect("memory"), 4096);
        assert_eq!(manager.tasks_current(a).expect("tasks"), 3);
        assert_eq!(manager.cpu_usage_nsec(a).expect("cpu"), 1_500_000);
    }

    #[test]
    fn legacy_readers() {
        let (mut manager, a) = accounted(RecordingBackend::legacy());
        set(&mut manager, "memory.usage_in_bytes", "8192");
        set(&mut manager, "cpuacct.usage", "77");

        assert_eq!(manager.memory_current(a).expect("memory"), 8192);
        assert_eq!(manager.cpu_usage_nsec(a).expect("cpu"), 77);
    }

    #[test]
    fn no_data_without_accounting() {
        let (mut manager, _) = manager(RecordingBackend::unified());
        let a = manager
            .add_unit("a.scope", UnitKind::Scope, Some(ROOT_SLICE), None)
            .expect("a");
        manager.realize(a).expect("realize");

        assert!(matches!(
            manager.memory_current(a),
            Err(CgroupsError::NoData { what: "memory", .. })
        ));
        assert!(matches!(
            manager.cpu_usage_nsec(a),
            Err(CgroupsError::NoData { what: "cpu", .. })
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        let (mut manager, a) = accounted(RecordingBackend::unified());
        set(&mut manager, "pids.current", "lots");
        assert!(matches!(
            manager.tasks_current(a),
            Err(CgroupsError::InvalidAttribute { attribute: "pids.current", .. })
        ));
    }

    #[test]
    fn cpu_usage_survives_the_cgroup() {
        let (mut manager, a) = accounted(RecordingBackend::unified());
        set(&mut manager, "cpu.stat", "usage_usec 10\n");
        assert_eq!(manager.cpu_usage_nsec(a).expect("cpu"), 10_000);

        let _ = manager
            .backend_mut()
            .attributes
            .remove(&("/a.scope".to_string(), "cpu.stat".to_string()));
        manager.prune_cgroup(a);
        assert_eq!(manager.cpu_usage_nsec(a).expect("cached"), 10_000);
    }

    #[test]
    fn reset_moves_the_zero_point() {
        let (mut manager, a) = accounted(RecordingBackend::unified());
        set(&mut manager, "cpu.stat", "usage_usec 10\n");
        manager.reset_cpu_usage(a);
        set(&mut manager, "cpu.stat", "usage_usec 25\n");
        assert_eq!(manager.cpu_usage_nsec(a).expect("cpu"), 15_000);
    }
}
