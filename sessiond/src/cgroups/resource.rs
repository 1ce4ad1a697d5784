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
//! Desired resource configuration of a unit.
//!
//! Every optional knob is an `Option`: `None` means "not configured", which
//! is never the same as a configured minimum.

use super::mask::ControllerMask;
use super::weight::{BlkioWeight, CpuShares, CpuWeight, IoWeight};
use ipnetwork::IpNetwork;
use std::path::PathBuf;
use validation::{ValidationError, DEVICE_RULE_REGEX};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DevicePolicy {
    /// Everything is allowed unless an allow-list is configured.
    #[default]
    Auto,
    /// Only the allow-list and a set of pseudo devices are accessible.
    Closed,
    /// Only the allow-list is accessible.
    Strict,
}

/// One entry of a unit's device allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAllow {
    /// A `/dev/` node, or `block-<pattern>`/`char-<pattern>` matched against
    /// the driver names of `/proc/devices`.
    pub path: String,
    pub read: bool,
    pub write: bool,
    pub mknod: bool,
}

impl DeviceAllow {
    /// Builds an entry from a rule and an access string such as `"rw"`.
    pub fn new(path: &str, access: &str) -> Result<Self, ValidationError> {
        validation::allow_regex(
            path,
            &DEVICE_RULE_REGEX,
            "path",
            Some("device_allow"),
        )?;

        let mut allow = Self {
            path: path.to_string(),
            read: false,
            write: false,
            mknod: false,
        };
        for c in access.chars() {
            match c {
                'r' => allow.read = true,
                'w' => allow.write = true,
                'm' => allow.mknod = true,
                _ => {
                    return Err(ValidationError::Invalid {
                        field: validation::field_name(
                            "access",
                            Some("device_allow"),
                        ),
                    })
                }
            }
        }
        Ok(allow)
    }

    /// The access string written to `devices.allow`, `None` when empty.
    pub fn access(&self) -> Option<String> {
        let access: String = [(self.read, 'r'), (self.write, 'w'), (self.mknod, 'm')]
            .into_iter()
            .filter_map(|(set, c)| set.then_some(c))
            .collect();
        (!access.is_empty()).then_some(access)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoDeviceWeight {
    pub path: PathBuf,
    pub weight: IoWeight,
}

/// Per-device throttling on the unified hierarchy. `None` is unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoDeviceLimit {
    pub path: PathBuf,
    pub rbps: Option<u64>,
    pub wbps: Option<u64>,
    pub riops: Option<u64>,
    pub wiops: Option<u64>,
}

impl IoDeviceLimit {
    pub fn is_unlimited(&self) -> bool {
        self.rbps.is_none()
            && self.wbps.is_none()
            && self.riops.is_none()
            && self.wiops.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlkioDeviceWeight {
    pub path: PathBuf,
    pub weight: BlkioWeight,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlkioDeviceBandwidth {
    pub path: PathBuf,
    pub rbps: Option<u64>,
    pub wbps: Option<u64>,
}

/// Per-unit resource configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSpec {
    pub cpu_accounting: bool,
    pub io_accounting: bool,
    pub blockio_accounting: bool,
    pub memory_accounting: bool,
    pub tasks_accounting: bool,
    pub ip_accounting: bool,

    pub cpu_weight: Option<CpuWeight>,
    pub startup_cpu_weight: Option<CpuWeight>,
    pub cpu_shares: Option<CpuShares>,
    pub startup_cpu_shares: Option<CpuShares>,
    /// CPU time allowed per second of wall clock, in microseconds.
    pub cpu_quota_per_sec_usec: Option<u64>,

    pub io_weight: Option<IoWeight>,
    pub startup_io_weight: Option<IoWeight>,
    pub io_device_weights: Vec<IoDeviceWeight>,
    pub io_device_limits: Vec<IoDeviceLimit>,

    pub blockio_weight: Option<BlkioWeight>,
    pub startup_blockio_weight: Option<BlkioWeight>,
    pub blockio_device_weights: Vec<BlkioDeviceWeight>,
    pub blockio_device_bandwidths: Vec<BlkioDeviceBandwidth>,

    pub memory_low: Option<u64>,
    pub memory_high: Option<u64>,
    pub memory_max: Option<u64>,
    pub memory_swap_max: Option<u64>,
    /// Legacy `memory.limit_in_bytes` style limit.
    pub memory_limit: Option<u64>,

    pub device_policy: DevicePolicy,
    pub device_allow: Vec<DeviceAllow>,

    pub tasks_max: Option<u64>,

    pub ip_address_allow: Vec<IpNetwork>,
    pub ip_address_deny: Vec<IpNetwork>,

    /// Hand the subtree to a nested manager.
    pub delegate: bool,
    pub delegate_controllers: ControllerMask,
}

impl ResourceSpec {
    pub fn has_cpu_weight(&self) -> bool {
        self.cpu_weight.is_some() || self.startup_cpu_weight.is_some()
    }

    pub fn has_cpu_shares(&self) -> bool {
        self.cpu_shares.is_some() || self.startup_cpu_shares.is_some()
    }

    pub fn has_io_config(&self) -> bool {
        self.io_weight.is_some()
            || self.startup_io_weight.is_some()
            || !self.io_device_weights.is_empty()
            || !self.io_device_limits.is_empty()
    }

    pub fn has_blockio_config(&self) -> bool {
        self.blockio_weight.is_some()
            || self.startup_blockio_weight.is_some()
            || !self.blockio_device_weights.is_empty()
            || !self.blockio_device_bandwidths.is_empty()
    }

    pub fn has_unified_memory_config(&self) -> bool {
        self.memory_low.is_some()
            || self.memory_high.is_some()
            || self.memory_max.is_some()
            || self.memory_swap_max.is_some()
    }

    pub fn has_ip_filter(&self) -> bool {
        !self.ip_address_allow.is_empty() || !self.ip_address_deny.is_empty()
    }

    /// Whether any startup-only value is configured.
    pub fn has_startup_config(&self) -> bool {
        self.startup_cpu_weight.is_some()
            || self.startup_cpu_shares.is_some()
            || self.startup_io_weight.is_some()
            || self.startup_blockio_weight.is_some()
    }

    /// The controllers this configuration needs on its own cgroup, not
    /// counting delegation.
    pub fn mask(&self) -> ControllerMask {
        let mut mask = ControllerMask::empty();

        if self.cpu_accounting
            || self.has_cpu_weight()
            || self.has_cpu_shares()
            || self.cpu_quota_per_sec_usec.is_some()
        {
            mask |= ControllerMask::CPU | ControllerMask::CPUACCT;
        }

        if self.io_accounting
            || self.blockio_accounting
            || self.has_io_config()
            || self.has_blockio_config()
        {
            mask |= ControllerMask::IO | ControllerMask::BLKIO;
        }

        if self.memory_accounting
            || self.memory_limit.is_some()
            || self.has_unified_memory_config()
        {
            mask |= ControllerMask::MEMORY;
        }

        if !self.device_allow.is_empty()
            || self.device_policy != DevicePolicy::Auto
        {
            mask |= ControllerMask::DEVICES;
        }

        if self.tasks_accounting || self.tasks_max.is_some() {
            mask |= ControllerMask::PIDS;
        }

        mask
    }

    pub fn effective_cpu_weight(&self, starting: bool) -> Option<CpuWeight> {
        startup_or(starting, self.startup_cpu_weight, self.cpu_weight)
    }

    pub fn effective_cpu_shares(&self, starting: bool) -> Option<CpuShares> {
        startup_or(starting, self.startup_cpu_shares, self.cpu_shares)
    }

    pub fn effective_io_weight(&self, starting: bool) -> Option<IoWeight> {
        startup_or(starting, self.startup_io_weight, self.io_weight)
    }

    pub fn effective_blockio_weight(
        &self,
        starting: bool,
    ) -> Option<BlkioWeight> {
        startup_or(starting, self.startup_blockio_weight, self.blockio_weight)
    }
}

fn startup_or<T>(starting: bool, startup: Option<T>, value: Option<T>) -> Option<T> {
    match startup {
        Some(startup) if starting => Some(startup),
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_spec_needs_nothing() {
        assert_eq!(ResourceSpec::default().mask(), ControllerMask::empty());
    }

    #[test]
    fn tasks_max_needs_pids() {
        let spec = ResourceSpec { tasks_max: Some(64), ..Default::default() };
        assert_eq!(spec.mask(), ControllerMask::PIDS);
    }

    #[test]
    fn zero_is_a_configured_value() {
        let spec = ResourceSpec { memory_low: Some(0), ..Default::default() };
        assert!(spec.has_unified_memory_config());
        assert_eq!(spec.mask(), ControllerMask::MEMORY);
    }

    #[test]
    fn weights_pull_in_both_halves_of_their_pair() {
        let spec = ResourceSpec {
            cpu_shares: Some(CpuShares::saturating(512)),
            blockio_weight: Some(BlkioWeight::saturating(100)),
            ..Default::default()
        };
        assert_eq!(
            spec.mask(),
            ControllerMask::CPU
                | ControllerMask::CPUACCT
                | ControllerMask::IO
                | ControllerMask::BLKIO
        );
    }

    #[test]
    fn closed_policy_needs_devices_without_rules() {
        let spec = ResourceSpec {
            device_policy: DevicePolicy::Closed,
            ..Default::default()
        };
        assert_eq!(spec.mask(), ControllerMask::DEVICES);
    }

    #[test]
    fn startup_values_only_apply_while_starting() {
        let spec = ResourceSpec {
            cpu_weight: Some(CpuWeight::saturating(50)),
            startup_cpu_weight: Some(CpuWeight::saturating(500)),
            ..Default::default()
        };
        assert_eq!(spec.effective_cpu_weight(true).map(|w| *w), Some(500));
        assert_eq!(spec.effective_cpu_weight(false).map(|w| *w), Some(50));
        assert!(spec.has_startup_config());
    }

    #[test]
    fn startup_only_value_falls_back_to_unset_when_running() {
        let spec = ResourceSpec {
            startup_io_weight: Some(IoWeight::saturating(300)),
            ..Default::default()
        };
        assert!(spec.has_io_config());
        assert_eq!(spec.effective_io_weight(false), None);
    }

    #[test]
    fn device_allow_parses_access() {
        let allow = DeviceAllow::new("/dev/null", "rw").expect("valid rule");
        assert_eq!(allow.access().as_deref(), Some("rw"));

        let none = DeviceAllow::new("char-pts", "").expect("valid rule");
        assert_eq!(none.access(), None);

        assert!(DeviceAllow::new("/dev/null", "rx").is_err());
        assert!(DeviceAllow::new("pts", "r").is_err());
    }
}
