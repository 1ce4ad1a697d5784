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
//! An in-memory backend that records every mutating call, for exercising
//! the manager without a cgroup filesystem.

use super::{BackendError, CgroupBackend, Result, WatchToken};
use crate::cgroups::devices::{DeviceKind, DeviceNode};
use crate::cgroups::firewall::IpFilter;
use crate::cgroups::hierarchy::Hierarchy;
use crate::cgroups::mask::{Controller, ControllerMask};
use nix::unistd::Pid;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Create { path: String, mask: ControllerMask },
    Enable { path: String, mask: ControllerMask },
    Trim { path: String, delete_root: bool },
    Attach { controller: Option<Controller>, path: String, pid: Pid },
    Write {
        controller: Controller,
        path: String,
        attribute: String,
        value: String,
    },
    Watch { path: String },
    Unwatch { token: WatchToken },
    IpFilter { path: String, filter: Option<IpFilter> },
}

#[derive(Debug)]
pub(crate) struct RecordingBackend {
    pub hierarchy: Hierarchy,
    pub supported: ControllerMask,
    pub calls: Vec<Call>,
    /// Paths whose creation fails with `EACCES`.
    pub fail_create: HashSet<String>,
    /// Attribute writes that fail, keyed by attribute name.
    pub fail_writes: HashMap<String, i32>,
    /// Cgroups that still hold processes.
    pub populated: HashSet<String>,
    /// Cgroups that do not exist in a controller's tree.
    pub absent: HashSet<(Option<Controller>, String)>,
    pub pids: HashMap<(Option<Controller>, String), Vec<Pid>>,
    pub attributes: HashMap<(String, String), String>,
    pub devices: HashMap<PathBuf, DeviceNode>,
    pub disks: HashMap<PathBuf, (u64, u64)>,
    pub proc_devices: String,
    pub ip_filter_supported: bool,
    next_token: u64,
}

impl RecordingBackend {
    pub fn new(hierarchy: Hierarchy, supported: ControllerMask) -> Self {
        Self {
            hierarchy,
            supported,
            calls: Vec::new(),
            fail_create: HashSet::new(),
            fail_writes: HashMap::new(),
            populated: HashSet::new(),
            absent: HashSet::new(),
            pids: HashMap::new(),
            attributes: HashMap::new(),
            devices: HashMap::new(),
            disks: HashMap::new(),
            proc_devices: String::new(),
            ip_filter_supported: true,
            next_token: 0,
        }
    }

    pub fn unified() -> Self {
        Self::new(Hierarchy::Unified, ControllerMask::UNIFIED)
    }

    /// Every v1 controller; `io` only exists on the unified hierarchy.
    pub fn legacy() -> Self {
        Self::new(
            Hierarchy::Legacy,
            ControllerMask::all() - ControllerMask::IO,
        )
    }

    pub fn with_device(
        mut self,
        path: &str,
        kind: DeviceKind,
        major: u64,
        minor: u64,
    ) -> Self {
        let _ = self
            .devices
            .insert(PathBuf::from(path), DeviceNode { kind, major, minor });
        self
    }

    pub fn writes(&self) -> Vec<(String, String, String)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Write { path, attribute, value, .. } => {
                    Some((path.clone(), attribute.clone(), value.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Every value written to `attribute` of `path`, oldest first.
    pub fn written(&self, path: &str, attribute: &str) -> Vec<String> {
        self.writes()
            .into_iter()
            .filter(|(p, a, _)| p == path && a == attribute)
            .map(|(_, _, value)| value)
            .collect()
    }

    pub fn created(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Create { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    fn not_found(path: &Path) -> BackendError {
        BackendError::Device {
            path: path.to_path_buf(),
            source: io::Error::from_raw_os_error(libc::ENOENT),
        }
    }
}

impl CgroupBackend for RecordingBackend {
    fn hierarchy(&self) -> Hierarchy {
        self.hierarchy
    }

    fn supported_controllers(&self, _root: &str) -> Result<ControllerMask> {
        Ok(self.supported)
    }

    fn create(
        &mut self,
        path: &str,
        mask: ControllerMask,
        _supported: ControllerMask,
    ) -> Result<()> {
        self.calls.push(Call::Create { path: path.to_string(), mask });
        if self.fail_create.contains(path) {
            return Err(BackendError::Create {
                path: path.to_string(),
                source: io::Error::from_raw_os_error(libc::EACCES),
            });
        }
        Ok(())
    }

    fn enable(
        &mut self,
        path: &str,
        mask: ControllerMask,
        _supported: ControllerMask,
    ) -> Result<()> {
        self.calls.push(Call::Enable { path: path.to_string(), mask });
        Ok(())
    }

    fn trim(
        &mut self,
        path: &str,
        _supported: ControllerMask,
        delete_root: bool,
    ) -> Result<()> {
        self.calls.push(Call::Trim { path: path.to_string(), delete_root });
        Ok(())
    }

    fn attach(
        &mut self,
        controller: Option<Controller>,
        path: &str,
        pid: Pid,
    ) -> Result<()> {
        self.calls.push(Call::Attach {
            controller,
            path: path.to_string(),
            pid,
        });
        if self.absent.contains(&(controller, path.to_string())) {
            return Err(BackendError::Attach {
                path: path.to_string(),
                pid,
                source: io::Error::from_raw_os_error(libc::ENOENT),
            });
        }
        self.pids
            .entry((controller, path.to_string()))
            .or_default()
            .push(pid);
        Ok(())
    }

    fn pids(
        &self,
        controller: Option<Controller>,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<Pid>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(self
            .pids
            .iter()
            .filter(|((c, p), _)| {
                *c == controller
                    && (p == path || (recursive && p.starts_with(&prefix)))
            })
            .flat_map(|(_, pids)| pids.iter().copied())
            .collect())
    }

    fn write_attribute(
        &mut self,
        controller: Controller,
        path: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()> {
        self.calls.push(Call::Write {
            controller,
            path: path.to_string(),
            attribute: attribute.to_string(),
            value: value.to_string(),
        });
        if let Some(errno) = self.fail_writes.get(attribute) {
            return Err(BackendError::Write {
                path: path.to_string(),
                attribute: attribute.to_string(),
                value: value.to_string(),
                source: io::Error::from_raw_os_error(*errno),
            });
        }
        Ok(())
    }

    fn read_attribute(
        &self,
        _controller: Option<Controller>,
        path: &str,
        attribute: &str,
    ) -> Result<String> {
        self.attributes
            .get(&(path.to_string(), attribute.to_string()))
            .cloned()
            .ok_or_else(|| BackendError::Read {
                path: path.to_string(),
                attribute: attribute.to_string(),
                source: io::Error::from_raw_os_error(libc::ENOENT),
            })
    }

    fn is_empty_recursive(&self, path: &str) -> Result<bool> {
        if path.is_empty() || path == "/" {
            return Ok(false);
        }
        let prefix = format!("{path}/");
        Ok(!self
            .populated
            .iter()
            .any(|p| p == path || p.starts_with(&prefix)))
    }

    fn watch(&mut self, path: &str) -> Result<WatchToken> {
        self.calls.push(Call::Watch { path: path.to_string() });
        let token = WatchToken(self.next_token);
        self.next_token += 1;
        Ok(token)
    }

    fn unwatch(&mut self, token: WatchToken) -> Result<()> {
        self.calls.push(Call::Unwatch { token });
        Ok(())
    }

    fn install_ip_filter(
        &mut self,
        path: &str,
        filter: Option<&IpFilter>,
    ) -> Result<()> {
        if !self.ip_filter_supported {
            return Err(BackendError::Unsupported { what: "ip filtering" });
        }
        self.calls.push(Call::IpFilter {
            path: path.to_string(),
            filter: filter.cloned(),
        });
        Ok(())
    }

    fn lookup_device(&self, path: &Path) -> Result<DeviceNode> {
        self.devices.get(path).copied().ok_or_else(|| Self::not_found(path))
    }

    fn block_device_of(&self, path: &Path) -> Result<(u64, u64)> {
        self.disks.get(path).copied().ok_or_else(|| Self::not_found(path))
    }

    fn proc_devices(&self) -> Result<String> {
        Ok(self.proc_devices.clone())
    }
}
