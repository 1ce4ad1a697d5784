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
//! Writing resource values into a realized cgroup.
//!
//! Every controller has a unified and a legacy spelling. When a unit
//! configures the other spelling it is translated, and the unified one wins
//! when both are set.

use super::{Manager, ManagerState};
use crate::cgroups::devices::{matching_majors, DeviceKind, DeviceRule};
use crate::cgroups::firewall::IpFilter;
use crate::cgroups::resource::{DevicePolicy, IoDeviceLimit, ResourceSpec};
use crate::cgroups::weight::{BlkioWeight, CpuShares, CpuWeight, IoWeight};
use crate::cgroups::{BackendError, CgroupBackend, Controller, ControllerMask};
use crate::units::{UnitId, UnitName};
use std::fmt::Display;
use std::path::Path;
use tracing::{debug, warn};

const CPU_QUOTA_PERIOD_USEC: u64 = 100_000;
const USEC_PER_SEC: u64 = 1_000_000;

/// Devices every closed device policy allows. A leading `-` marks nodes
/// that may be missing.
const BUILTIN_DEVICES: [&str; 9] = [
    "/dev/null",
    "/dev/zero",
    "/dev/full",
    "/dev/random",
    "/dev/urandom",
    "/dev/tty",
    "/dev/ptmx",
    "-/run/systemd/inaccessible/chr",
    "-/run/systemd/inaccessible/blk",
];

impl<B: CgroupBackend> Manager<B> {
    /// Writes the unit's configuration for the controllers in `mask`. The
    /// root cgroup has no resource files, so only its IP filter is
    /// touched.
    pub(super) fn apply(
        &mut self,
        id: UnitId,
        mask: ControllerMask,
        apply_bpf: bool,
    ) {
        let Some(unit) = self.units.get(id) else {
            return;
        };
        let (Some(resources), Some(path)) =
            (unit.resources.clone(), unit.cgroup.path.clone())
        else {
            return;
        };
        let name = unit.name().clone();
        let is_root = path.is_empty() || path == "/";

        if !is_root {
            if mask.contains(ControllerMask::CPU) {
                self.apply_cpu(&name, &path, &resources);
            }
            if mask.contains(ControllerMask::IO) {
                let dropped = self.apply_io(&name, &path, &resources);
                self.drop_io_limits(id, &dropped);
            }
            if mask.contains(ControllerMask::BLKIO) {
                self.apply_blkio(&name, &path, &resources);
            }
            if mask.contains(ControllerMask::MEMORY) {
                self.apply_memory(&name, &path, &resources);
            }
            if mask.contains(ControllerMask::DEVICES) {
                self.apply_devices(&path, &resources);
            }
            if mask.contains(ControllerMask::PIDS) {
                let value = resources
                    .tasks_max
                    .map_or_else(|| "max".to_string(), |max| max.to_string());
                self.set_attribute(Controller::Pids, &path, "pids.max", &value);
            }
        }

        if apply_bpf {
            self.apply_ip_filter(id, &path);
        }
    }

    fn apply_cpu(&mut self, name: &UnitName, path: &str, r: &ResourceSpec) {
        let starting = self.state == ManagerState::Starting;

        if self.backend.hierarchy().is_unified() {
            let weight = if r.has_cpu_weight() {
                r.effective_cpu_weight(starting).unwrap_or(CpuWeight::DEFAULT)
            } else if r.has_cpu_shares() {
                let shares = r
                    .effective_cpu_shares(starting)
                    .unwrap_or(CpuShares::DEFAULT);
                let weight = shares.to_weight();
                self.log_compat(
                    name,
                    format_args!(
                        "applying [Startup]CPUShares {shares} as [Startup]CPUWeight {weight} on {path}"
                    ),
                );
                weight
            } else {
                CpuWeight::DEFAULT
            };

            let max = match r.cpu_quota_per_sec_usec {
                Some(quota) => format!(
                    "{} {CPU_QUOTA_PERIOD_USEC}",
                    period_quota(quota)
                ),
                None => format!("max {CPU_QUOTA_PERIOD_USEC}"),
            };

            self.set_attribute(Controller::Cpu, path, "cpu.weight", &weight.to_string());
            self.set_attribute(Controller::Cpu, path, "cpu.max", &max);
        } else {
            let shares = if r.has_cpu_weight() {
                let weight = r
                    .effective_cpu_weight(starting)
                    .unwrap_or(CpuWeight::DEFAULT);
                let shares = weight.to_shares();
                self.log_compat(
                    name,
                    format_args!(
                        "applying [Startup]CPUWeight {weight} as [Startup]CPUShares {shares} on {path}"
                    ),
                );
                shares
            } else {
                r.effective_cpu_shares(starting).unwrap_or(CpuShares::DEFAULT)
            };

            let quota = match r.cpu_quota_per_sec_usec {
                Some(quota) => period_quota(quota).to_string(),
                None => "-1".to_string(),
            };

            self.set_attribute(Controller::Cpu, path, "cpu.shares", &shares.to_string());
            self.set_attribute(
                Controller::Cpu,
                path,
                "cpu.cfs_period_us",
                &CPU_QUOTA_PERIOD_USEC.to_string(),
            );
            self.set_attribute(Controller::Cpu, path, "cpu.cfs_quota_us", &quota);
        }
    }

    /// Unified `io.*` files. Returns the limits that no longer need to be
    /// kept: unlimited ones, which were just reset, and ones whose device
    /// is gone.
    fn apply_io(
        &mut self,
        name: &UnitName,
        path: &str,
        r: &ResourceSpec,
    ) -> Vec<IoDeviceLimit> {
        let starting = self.state == ManagerState::Starting;
        let has_io = r.has_io_config();
        let has_blockio = r.has_blockio_config();

        let weight = if has_io {
            r.effective_io_weight(starting).unwrap_or(IoWeight::DEFAULT)
        } else if has_blockio {
            let blkio = r
                .effective_blockio_weight(starting)
                .unwrap_or(BlkioWeight::DEFAULT);
            let weight = blkio.to_io_weight();
            self.log_compat(
                name,
                format_args!(
                    "applying [Startup]BlockIOWeight {blkio} as [Startup]IOWeight {weight} on {path}"
                ),
            );
            weight
        } else {
            IoWeight::DEFAULT
        };
        self.set_attribute(Controller::Io, path, "io.weight", &format!("default {weight}"));

        if has_io {
            for device in &r.io_device_weights {
                self.apply_device_weight(Controller::Io, path, &device.path, device.weight);
            }
        } else if has_blockio {
            for device in &r.blockio_device_weights {
                let weight = device.weight.to_io_weight();
                self.log_compat(
                    name,
                    format_args!(
                        "applying BlockIODeviceWeight {} as IODeviceWeight {weight} for {}",
                        device.weight,
                        device.path.display()
                    ),
                );
                self.apply_device_weight(Controller::Io, path, &device.path, weight);
            }
        }

        let mut dropped = Vec::new();
        if has_io {
            for limit in &r.io_device_limits {
                if !self.apply_io_limit(path, limit) {
                    dropped.push(limit.clone());
                }
            }
        } else if has_blockio {
            for bandwidth in &r.blockio_device_bandwidths {
                let limit = IoDeviceLimit {
                    path: bandwidth.path.clone(),
                    rbps: bandwidth.rbps,
                    wbps: bandwidth.wbps,
                    ..Default::default()
                };
                self.log_compat(
                    name,
                    format_args!(
                        "applying BlockIO bandwidth of {} as IO{{Read,Write}}BandwidthMax",
                        limit.path.display()
                    ),
                );
                let _ = self.apply_io_limit(path, &limit);
            }
        }
        dropped
    }

    /// Legacy `blkio.*` files.
    fn apply_blkio(&mut self, name: &UnitName, path: &str, r: &ResourceSpec) {
        let starting = self.state == ManagerState::Starting;
        let has_io = r.has_io_config();
        let has_blockio = r.has_blockio_config();

        let weight = if has_io {
            let io = r.effective_io_weight(starting).unwrap_or(IoWeight::DEFAULT);
            let weight = io.to_blkio_weight();
            self.log_compat(
                name,
                format_args!(
                    "applying [Startup]IOWeight {io} as [Startup]BlockIOWeight {weight} on {path}"
                ),
            );
            weight
        } else if has_blockio {
            r.effective_blockio_weight(starting)
                .unwrap_or(BlkioWeight::DEFAULT)
        } else {
            BlkioWeight::DEFAULT
        };
        self.set_attribute(Controller::Blkio, path, "blkio.weight", &weight.to_string());

        if has_io {
            for device in &r.io_device_weights {
                let weight = device.weight.to_blkio_weight();
                self.log_compat(
                    name,
                    format_args!(
                        "applying IODeviceWeight {} as BlockIODeviceWeight {weight} for {}",
                        device.weight,
                        device.path.display()
                    ),
                );
                self.apply_device_weight(Controller::Blkio, path, &device.path, weight);
            }
        } else if has_blockio {
            for device in &r.blockio_device_weights {
                self.apply_device_weight(Controller::Blkio, path, &device.path, device.weight);
            }
        }

        let bandwidths: Vec<(&Path, Option<u64>, Option<u64>)> = if has_io {
            r.io_device_limits
                .iter()
                .map(|l| (l.path.as_path(), l.rbps, l.wbps))
                .collect()
        } else if has_blockio {
            r.blockio_device_bandwidths
                .iter()
                .map(|b| (b.path.as_path(), b.rbps, b.wbps))
                .collect()
        } else {
            Vec::new()
        };
        if has_io && !bandwidths.is_empty() {
            self.log_compat(
                name,
                format_args!(
                    "applying IO{{Read,Write}}BandwidthMax as BlockIO bandwidth on {path}"
                ),
            );
        }
        for (device, rbps, wbps) in bandwidths {
            let Some((major, minor)) = self.block_device(device) else {
                continue;
            };
            // Zero removes a throttle rule.
            for (attribute, value) in [
                ("blkio.throttle.read_bps_device", rbps),
                ("blkio.throttle.write_bps_device", wbps),
            ] {
                let value = format!("{major}:{minor} {}", value.unwrap_or(0));
                self.set_attribute(Controller::Blkio, path, attribute, &value);
            }
        }
    }

    fn apply_memory(&mut self, name: &UnitName, path: &str, r: &ResourceSpec) {
        let limit = |value: Option<u64>| {
            value.map_or_else(|| "max".to_string(), |v| v.to_string())
        };

        if self.backend.hierarchy().is_unified() {
            let (low, high, max, swap_max) = if r.has_unified_memory_config() {
                (r.memory_low, r.memory_high, r.memory_max, r.memory_swap_max)
            } else {
                if let Some(max) = r.memory_limit {
                    self.log_compat(
                        name,
                        format_args!(
                            "applying MemoryLimit {max} as MemoryMax on {path}"
                        ),
                    );
                }
                (None, None, r.memory_limit, None)
            };

            let low = low.unwrap_or(0).to_string();
            self.set_attribute(Controller::Memory, path, "memory.low", &low);
            self.set_attribute(Controller::Memory, path, "memory.high", &limit(high));
            self.set_attribute(Controller::Memory, path, "memory.max", &limit(max));
            self.set_attribute(
                Controller::Memory,
                path,
                "memory.swap.max",
                &limit(swap_max),
            );
        } else {
            let max = if r.has_unified_memory_config() {
                if let Some(max) = r.memory_max {
                    self.log_compat(
                        name,
                        format_args!(
                            "applying MemoryMax {max} as MemoryLimit on {path}"
                        ),
                    );
                }
                r.memory_max
            } else {
                r.memory_limit
            };

            let value = max.map_or_else(|| "-1".to_string(), |v| v.to_string());
            self.set_attribute(
                Controller::Memory,
                path,
                "memory.limit_in_bytes",
                &value,
            );
        }
    }

    fn apply_devices(&mut self, path: &str, r: &ResourceSpec) {
        let closed =
            !r.device_allow.is_empty() || r.device_policy != DevicePolicy::Auto;
        let (attribute, what) = if closed {
            ("devices.deny", "reset")
        } else {
            ("devices.allow", "open")
        };
        if let Err(e) = self.backend.write_attribute(
            Controller::Devices,
            path,
            attribute,
            "a",
        ) {
            log_write_error(
                Controller::Devices,
                &e,
                format_args!("failed to {what} devices.list on {path}"),
            );
        }

        let with_builtins = r.device_policy == DevicePolicy::Closed
            || (r.device_policy == DevicePolicy::Auto
                && !r.device_allow.is_empty());
        if with_builtins {
            for device in BUILTIN_DEVICES {
                self.allow_device_node(path, device, "rwm");
            }
            self.allow_device_major(path, DeviceKind::Char, "pts", "rw");
        }

        for allow in &r.device_allow {
            let Some(access) = allow.access() else {
                continue;
            };
            if allow.path.starts_with("/dev/") {
                self.allow_device_node(path, &allow.path, &access);
            } else if let Some(pattern) = allow.path.strip_prefix("block-") {
                self.allow_device_major(path, DeviceKind::Block, pattern, &access);
            } else if let Some(pattern) = allow.path.strip_prefix("char-") {
                self.allow_device_major(path, DeviceKind::Char, pattern, &access);
            } else {
                debug!("ignoring device rule {} for {path}", allow.path);
            }
        }
    }

    fn allow_device_node(&mut self, path: &str, node: &str, access: &str) {
        let (node, ignore_missing) = match node.strip_prefix('-') {
            Some(node) => (node, true),
            None => (node, false),
        };

        let device = match self.backend.lookup_device(Path::new(node)) {
            Ok(device) => device,
            Err(e) if ignore_missing && e.is_not_found() => return,
            Err(e) => {
                warn!("couldn't resolve device {node} for {path}: {e}");
                return;
            }
        };

        let rule = DeviceRule::node(device, access).to_string();
        self.set_attribute(Controller::Devices, path, "devices.allow", &rule);
    }

    fn allow_device_major(
        &mut self,
        path: &str,
        kind: DeviceKind,
        pattern: &str,
        access: &str,
    ) {
        let proc_devices = match self.backend.proc_devices() {
            Ok(proc_devices) => proc_devices,
            Err(e) => {
                warn!("cannot read the device driver list: {e}");
                return;
            }
        };

        for major in matching_majors(&proc_devices, kind, pattern) {
            let rule = DeviceRule::major(kind, major, access).to_string();
            self.set_attribute(Controller::Devices, path, "devices.allow", &rule);
        }
    }

    fn apply_device_weight<W: Display>(
        &mut self,
        controller: Controller,
        path: &str,
        device: &Path,
        weight: W,
    ) {
        let Some((major, minor)) = self.block_device(device) else {
            return;
        };
        let attribute = match controller {
            Controller::Io => "io.weight",
            _ => "blkio.weight_device",
        };
        self.set_attribute(controller, path, attribute, &format!("{major}:{minor} {weight}"));
    }

    /// Writes one `io.max` line. Returns whether the limit still restricts
    /// anything.
    fn apply_io_limit(&mut self, path: &str, limit: &IoDeviceLimit) -> bool {
        let Some((major, minor)) = self.block_device(&limit.path) else {
            return false;
        };
        let value = |v: Option<u64>| {
            v.map_or_else(|| "max".to_string(), |v| v.to_string())
        };

        let line = format!(
            "{major}:{minor} rbps={} wbps={} riops={} wiops={}",
            value(limit.rbps),
            value(limit.wbps),
            value(limit.riops),
            value(limit.wiops)
        );
        self.set_attribute(Controller::Io, path, "io.max", &line);
        !limit.is_unlimited()
    }

    fn drop_io_limits(&mut self, id: UnitId, dropped: &[IoDeviceLimit]) {
        if dropped.is_empty() {
            return;
        }
        if let Some(resources) =
            self.units.get_mut(id).and_then(|u| u.resources.as_mut())
        {
            resources.io_device_limits.retain(|l| !dropped.contains(l));
        }
    }

    fn block_device(&self, device: &Path) -> Option<(u64, u64)> {
        match self.backend.block_device_of(device) {
            Ok(device) => Some(device),
            Err(e) => {
                warn!("couldn't resolve block device {}: {e}", device.display());
                None
            }
        }
    }

    /// The filter for a unit: its own lists and accounting, plus the lists
    /// of every slice above it.
    pub fn compile_ip_filter(&self, id: UnitId) -> IpFilter {
        let mut filter = IpFilter::default();
        if let Some(r) = self.units.get(id).and_then(|u| u.resources.as_ref()) {
            filter.accounting = r.ip_accounting;
            filter.extend(&r.ip_address_allow, &r.ip_address_deny);
        }
        for slice in self.units.ancestors(id) {
            if let Some(r) =
                self.units.get(slice).and_then(|u| u.resources.as_ref())
            {
                filter.extend(&r.ip_address_allow, &r.ip_address_deny);
            }
        }
        filter
    }

    fn apply_ip_filter(&mut self, id: UnitId, path: &str) {
        let filter = self.compile_ip_filter(id);
        let filter = (!filter.is_empty()).then_some(filter);

        match self.backend.install_ip_filter(path, filter.as_ref()) {
            Ok(()) => {}
            Err(e @ BackendError::Unsupported { .. }) => {
                debug!("not applying ip filter to {path}: {e}")
            }
            Err(e) => warn!("failed to apply ip filter to {path}: {e}"),
        }
    }

    fn set_attribute(
        &mut self,
        controller: Controller,
        path: &str,
        attribute: &str,
        value: &str,
    ) {
        if let Err(e) =
            self.backend.write_attribute(controller, path, attribute, value)
        {
            log_write_error(
                controller,
                &e,
                format_args!("failed to set {attribute} on {path} to '{value}'"),
            );
        }
    }

    /// Translation between unified and legacy settings. The first one is
    /// worth a warning, the rest are noise.
    fn log_compat(&mut self, name: &UnitName, message: std::fmt::Arguments<'_>) {
        if self.compat_warned {
            debug!("{name}: cgroup-compat: {message}");
            return;
        }
        self.compat_warned = true;
        warn!("{name}: cgroup-compat: {message}");
        warn!(
            "{name}: cgroup-compat: legacy resource settings are being translated, \
             please use IO*= and CPU*= settings"
        );
    }
}

/// Per-second quota scaled to one scheduling period.
fn period_quota(quota_per_sec_usec: u64) -> u64 {
    quota_per_sec_usec.saturating_mul(CPU_QUOTA_PERIOD_USEC) / USEC_PER_SEC
}

fn log_write_error(
    controller: Controller,
    error: &BackendError,
    message: std::fmt::Arguments<'_>,
) {
    if error.is_ignorable(controller) {
        debug!("{message}: {error}");
    } else {
        warn!("{message}: {error}");
    }
}
