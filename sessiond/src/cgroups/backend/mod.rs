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
//! The operations the manager needs from the cgroup filesystem.
//!
//! Paths are cgroup paths (`/user.slice/session-1.scope`), never filesystem
//! paths. A backend maps them onto whatever hierarchy layout it manages.

pub use self::fs::FsBackend;
use super::devices::DeviceNode;
use super::firewall::IpFilter;
use super::hierarchy::Hierarchy;
use super::mask::{Controller, ControllerMask};
use nix::errno::Errno;
use nix::unistd::Pid;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod fs;
#[cfg(test)]
pub(crate) mod recording;

pub type Result<T> = std::result::Result<T, BackendError>;

/// Identifies an empty-notification watch handed out by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchToken(pub u64);

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to create cgroup '{path}': {source}")]
    Create { path: String, source: io::Error },
    #[error("failed to write '{value}' to {attribute} of cgroup '{path}': {source}")]
    Write { path: String, attribute: String, value: String, source: io::Error },
    #[error("failed to read {attribute} of cgroup '{path}': {source}")]
    Read { path: String, attribute: String, source: io::Error },
    #[error("failed to attach pid {pid} to cgroup '{path}': {source}")]
    Attach { path: String, pid: Pid, source: io::Error },
    #[error("failed to remove cgroup '{path}': {source}")]
    Trim { path: String, source: io::Error },
    #[error("failed to watch cgroup '{path}': {source}")]
    Watch { path: String, source: io::Error },
    #[error("failed to look up device '{}': {source}", path.display())]
    Device { path: PathBuf, source: io::Error },
    #[error("{what} is not supported on this system")]
    Unsupported { what: &'static str },
}

impl BackendError {
    fn io_error(&self) -> Option<&io::Error> {
        match self {
            BackendError::Create { source, .. }
            | BackendError::Write { source, .. }
            | BackendError::Read { source, .. }
            | BackendError::Attach { source, .. }
            | BackendError::Trim { source, .. }
            | BackendError::Watch { source, .. }
            | BackendError::Device { source, .. } => Some(source),
            BackendError::Unsupported { .. } => None,
        }
    }

    pub fn errno(&self) -> Option<Errno> {
        self.io_error().and_then(|e| e.raw_os_error()).map(Errno::from_i32)
    }

    /// Errors that routinely happen while containers come and go or on
    /// kernels that lack a knob: a vanished cgroup, a read-only mount, a
    /// permission problem, and for the devices controller a refused rule
    /// change on a populated cgroup.
    pub fn is_ignorable(&self, controller: Controller) -> bool {
        match self.errno() {
            Some(Errno::ENOENT | Errno::EROFS | Errno::EACCES) => true,
            Some(Errno::EINVAL) => controller == Controller::Devices,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.errno() == Some(Errno::ENOENT)
    }
}

pub trait CgroupBackend {
    fn hierarchy(&self) -> Hierarchy;

    /// Controllers that can be used below `root`.
    fn supported_controllers(&self, root: &str) -> Result<ControllerMask>;

    /// Creates `path` in the process-tracking tree and, on per-controller
    /// trees, in every hierarchy of `mask`. Hierarchies in `supported` but
    /// not in `mask` have the cgroup trimmed. Existing cgroups are fine.
    fn create(
        &mut self,
        path: &str,
        mask: ControllerMask,
        supported: ControllerMask,
    ) -> Result<()>;

    /// Turns the controllers of `mask` on, and all other supported ones off,
    /// for the children of `path`. Only meaningful on the unified hierarchy.
    fn enable(
        &mut self,
        path: &str,
        mask: ControllerMask,
        supported: ControllerMask,
    ) -> Result<()>;

    /// Removes the empty cgroups below `path`, and `path` itself when
    /// `delete_root` is set, in every hierarchy.
    fn trim(
        &mut self,
        path: &str,
        supported: ControllerMask,
        delete_root: bool,
    ) -> Result<()>;

    /// Moves `pid` into `path`. `None` addresses the process-tracking tree.
    fn attach(
        &mut self,
        controller: Option<Controller>,
        path: &str,
        pid: Pid,
    ) -> Result<()>;

    fn pids(
        &self,
        controller: Option<Controller>,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<Pid>>;

    fn write_attribute(
        &mut self,
        controller: Controller,
        path: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()>;

    fn read_attribute(
        &self,
        controller: Option<Controller>,
        path: &str,
        attribute: &str,
    ) -> Result<String>;

    /// Whether no process is left anywhere below `path`. The root cgroup is
    /// never empty; a cgroup that no longer exists is.
    fn is_empty_recursive(&self, path: &str) -> Result<bool>;

    fn watch(&mut self, path: &str) -> Result<WatchToken>;

    fn unwatch(&mut self, token: WatchToken) -> Result<()>;

    /// Installs `filter` on `path`, or removes a previously installed one
    /// when `filter` is `None`.
    fn install_ip_filter(
        &mut self,
        path: &str,
        filter: Option<&IpFilter>,
    ) -> Result<()>;

    fn lookup_device(&self, path: &Path) -> Result<DeviceNode>;

    /// The whole-disk block device backing `path`.
    fn block_device_of(&self, path: &Path) -> Result<(u64, u64)>;

    /// Contents of `/proc/devices`.
    fn proc_devices(&self) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    fn write_error(errno: i32) -> BackendError {
        BackendError::Write {
            path: "/session-1".into(),
            attribute: "pids.max".into(),
            value: "64".into(),
            source: io::Error::from_raw_os_error(errno),
        }
    }

    #[test_case(libc::ENOENT, Controller::Pids, true; "missing cgroup")]
    #[test_case(libc::EROFS, Controller::Memory, true; "read-only mount")]
    #[test_case(libc::EACCES, Controller::Cpu, true; "permission denied")]
    #[test_case(libc::EINVAL, Controller::Devices, true; "invalid device rule")]
    #[test_case(libc::EINVAL, Controller::Pids, false; "invalid value elsewhere")]
    #[test_case(libc::EBUSY, Controller::Devices, false; "busy")]
    #[test]
    fn test_is_ignorable(errno: i32, controller: Controller, expected: bool) {
        assert_eq!(write_error(errno).is_ignorable(controller), expected);
    }

    #[test]
    fn unsupported_is_never_ignorable() {
        let err = BackendError::Unsupported { what: "ip filtering" };
        assert_eq!(err.errno(), None);
        assert!(!err.is_ignorable(Controller::Devices));
    }
}
