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
use super::{BackendError, CgroupBackend, Result, WatchToken};
use crate::cgroups::devices::{DeviceKind, DeviceNode};
use crate::cgroups::firewall::IpFilter;
use crate::cgroups::hierarchy::Hierarchy;
use crate::cgroups::mask::{Controller, ControllerMask};
use nix::sys::inotify::{
    AddWatchFlags, InitFlags, Inotify, WatchDescriptor,
};
use nix::sys::stat::{major, minor, stat, SFlag};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const PROC_DEVICES: &str = "/proc/devices";
const SYS_DEV_BLOCK: &str = "/sys/dev/block";

/// Backend driving a mounted cgroup filesystem.
#[derive(Debug)]
pub struct FsBackend {
    mount: PathBuf,
    hierarchy: Hierarchy,
    proc_devices: PathBuf,
    inotify: Option<Inotify>,
    watches: HashMap<WatchToken, WatchDescriptor>,
    tokens: HashMap<WatchDescriptor, WatchToken>,
    next_token: u64,
}

impl FsBackend {
    /// Opens the cgroup filesystem at `mount`, detecting its layout.
    pub fn new(mount: impl Into<PathBuf>) -> Result<Self> {
        let mount = mount.into();
        let hierarchy = Hierarchy::detect(&mount).map_err(|e| {
            BackendError::Read {
                path: mount.display().to_string(),
                attribute: "statfs".into(),
                source: e.into(),
            }
        })?;
        Ok(Self::with_hierarchy(mount, hierarchy))
    }

    pub fn with_hierarchy(
        mount: impl Into<PathBuf>,
        hierarchy: Hierarchy,
    ) -> Self {
        Self {
            mount: mount.into(),
            hierarchy,
            proc_devices: PathBuf::from(PROC_DEVICES),
            inotify: None,
            watches: HashMap::new(),
            tokens: HashMap::new(),
            next_token: 0,
        }
    }

    pub fn with_proc_devices(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_devices = path.into();
        self
    }

    pub fn mount(&self) -> &Path {
        &self.mount
    }

    /// Sets up the inotify instance used for empty notifications and
    /// returns its descriptor. `None` on the legacy hierarchy, which has no
    /// `cgroup.events`.
    pub fn init_watches(&mut self) -> Result<Option<RawFd>> {
        if !self.hierarchy.has_events() {
            return Ok(None);
        }
        Ok(Some(self.inotify("/")?.as_raw_fd()))
    }

    /// Reads one batch of pending inotify events and maps them to the tokens
    /// they were registered under. `None` once nothing is pending.
    pub fn read_watch_events(&mut self) -> Result<Option<Vec<WatchToken>>> {
        let Some(inotify) = self.inotify else {
            return Ok(None);
        };

        let events = match inotify.read_events() {
            Ok(events) => events,
            Err(nix::errno::Errno::EAGAIN) => return Ok(None),
            Err(e) => {
                return Err(BackendError::Watch {
                    path: self.mount.display().to_string(),
                    source: e.into(),
                })
            }
        };

        let mut tokens = Vec::new();
        for event in events {
            let Some(token) = self.tokens.get(&event.wd).copied() else {
                continue;
            };
            if event.mask.contains(AddWatchFlags::IN_IGNORED) {
                let _ = self.tokens.remove(&event.wd);
                let _ = self.watches.remove(&token);
            }
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        Ok(Some(tokens))
    }

    /// Registers `agent` as the release agent of the named hierarchy so the
    /// kernel reports emptied cgroups. Legacy hierarchy only.
    pub fn install_release_agent(&mut self, agent: &Path) -> Result<()> {
        if self.hierarchy != Hierarchy::Legacy {
            return Ok(());
        }

        let current = self.read_attribute(None, "/", "release_agent")?;
        let current = current.trim();
        let agent = agent.display().to_string();
        if current.is_empty() {
            self.write_main("/", "release_agent", &agent)?;
        } else if current != agent {
            return Err(BackendError::Write {
                path: "/".into(),
                attribute: "release_agent".into(),
                value: agent,
                source: io::Error::from_raw_os_error(libc::EEXIST),
            });
        }

        let notify = self.read_attribute(None, "/", "notify_on_release")?;
        if notify.trim() != "1" {
            self.write_main("/", "notify_on_release", "1")?;
        }
        Ok(())
    }

    fn inotify(&mut self, path: &str) -> Result<Inotify> {
        if let Some(inotify) = self.inotify {
            return Ok(inotify);
        }
        let inotify =
            Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)
                .map_err(|e| BackendError::Watch {
                    path: path.to_string(),
                    source: e.into(),
                })?;
        self.inotify = Some(inotify);
        Ok(inotify)
    }

    /// Directory of `path` in the tree serving `controller`.
    fn cgroup_dir(&self, controller: Option<Controller>, path: &str) -> PathBuf {
        let base = match (self.hierarchy.main_dir(), controller) {
            (None, _) => self.mount.clone(),
            (Some(main), None) => self.mount.join(main),
            (Some(_), Some(controller)) => self.mount.join(controller.name()),
        };
        base.join(path.trim_start_matches('/'))
    }

    fn write_main(&self, path: &str, attribute: &str, value: &str) -> Result<()> {
        let file = self.cgroup_dir(None, path).join(attribute);
        write_file(&file, value).map_err(|source| BackendError::Write {
            path: path.to_string(),
            attribute: attribute.to_string(),
            value: value.to_string(),
            source,
        })
    }
}

impl CgroupBackend for FsBackend {
    fn hierarchy(&self) -> Hierarchy {
        self.hierarchy
    }

    fn supported_controllers(&self, root: &str) -> Result<ControllerMask> {
        if self.hierarchy.is_unified() {
            let controllers =
                self.read_attribute(None, root, "cgroup.controllers")?;
            return Ok(ControllerMask::from_names(&controllers)
                & ControllerMask::UNIFIED);
        }

        Ok(Controller::ALL
            .into_iter()
            .filter(|c| self.mount.join(c.name()).is_dir())
            .fold(ControllerMask::empty(), |mask, c| mask | c.mask()))
    }

    fn create(
        &mut self,
        path: &str,
        mask: ControllerMask,
        supported: ControllerMask,
    ) -> Result<()> {
        fs::create_dir_all(self.cgroup_dir(None, path)).map_err(|source| {
            BackendError::Create { path: path.to_string(), source }
        })?;

        if self.hierarchy.is_unified() {
            return Ok(());
        }

        // A hierarchy's root directory is its mount point.
        let delete_root = !(path.is_empty() || path == "/");
        for controller in supported.controllers() {
            let dir = self.cgroup_dir(Some(controller), path);
            if mask.contains(controller.mask()) {
                if let Err(e) = fs::create_dir_all(&dir) {
                    debug!("failed to create {controller} cgroup {path}: {e}");
                }
            } else if let Err(e) = trim_dir(&dir, delete_root) {
                debug!("failed to trim {controller} cgroup {path}: {e}");
            }
        }
        Ok(())
    }

    fn enable(
        &mut self,
        path: &str,
        mask: ControllerMask,
        supported: ControllerMask,
    ) -> Result<()> {
        if !self.hierarchy.is_unified() {
            return Ok(());
        }

        let mut first_error = None;
        for controller in supported.controllers().filter(|c| c.is_unified()) {
            let op = if mask.contains(controller.mask()) { '+' } else { '-' };
            let value = format!("{op}{controller}");
            if let Err(e) =
                self.write_main(path, "cgroup.subtree_control", &value)
            {
                debug!("failed to write {value} for {path}: {e}");
                let _ = first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn trim(
        &mut self,
        path: &str,
        supported: ControllerMask,
        delete_root: bool,
    ) -> Result<()> {
        let result = trim_dir(&self.cgroup_dir(None, path), delete_root)
            .map_err(|source| BackendError::Trim {
                path: path.to_string(),
                source,
            });

        if !self.hierarchy.is_unified() {
            for controller in supported.controllers() {
                let dir = self.cgroup_dir(Some(controller), path);
                if let Err(e) = trim_dir(&dir, delete_root) {
                    debug!("failed to trim {controller} cgroup {path}: {e}");
                }
            }
        }
        result
    }

    fn attach(
        &mut self,
        controller: Option<Controller>,
        path: &str,
        pid: Pid,
    ) -> Result<()> {
        let file = self.cgroup_dir(controller, path).join("cgroup.procs");
        write_file(&file, &pid.to_string()).map_err(|source| {
            BackendError::Attach { path: path.to_string(), pid, source }
        })
    }

    fn pids(
        &self,
        controller: Option<Controller>,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<Pid>> {
        let dir = self.cgroup_dir(controller, path);
        let read_error = |source: io::Error| BackendError::Read {
            path: path.to_string(),
            attribute: "cgroup.procs".into(),
            source,
        };

        if !recursive {
            return read_pids(&dir.join("cgroup.procs")).map_err(read_error);
        }

        let _ = fs::metadata(&dir).map_err(read_error)?;
        let mut pids = Vec::new();
        for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_dir() {
                continue;
            }
            match read_pids(&entry.path().join("cgroup.procs")) {
                Ok(found) => pids.extend(found),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(read_error(e)),
            }
        }
        Ok(pids)
    }

    fn write_attribute(
        &mut self,
        controller: Controller,
        path: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()> {
        let file = self.cgroup_dir(Some(controller), path).join(attribute);
        write_file(&file, value).map_err(|source| BackendError::Write {
            path: path.to_string(),
            attribute: attribute.to_string(),
            value: value.to_string(),
            source,
        })
    }

    fn read_attribute(
        &self,
        controller: Option<Controller>,
        path: &str,
        attribute: &str,
    ) -> Result<String> {
        let file = self.cgroup_dir(controller, path).join(attribute);
        fs::read_to_string(file).map_err(|source| BackendError::Read {
            path: path.to_string(),
            attribute: attribute.to_string(),
            source,
        })
    }

    fn is_empty_recursive(&self, path: &str) -> Result<bool> {
        if path.is_empty() || path == "/" {
            return Ok(false);
        }

        if self.hierarchy.has_events() {
            return match self.read_attribute(None, path, "cgroup.events") {
                Ok(events) => Ok(events
                    .lines()
                    .find_map(|line| line.strip_prefix("populated "))
                    .map_or(true, |populated| populated.trim() == "0")),
                Err(e) if e.is_not_found() => Ok(true),
                Err(e) => Err(e),
            };
        }

        match self.pids(None, path, true) {
            Ok(pids) => Ok(pids.is_empty()),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    }

    fn watch(&mut self, path: &str) -> Result<WatchToken> {
        if !self.hierarchy.has_events() {
            return Err(BackendError::Unsupported {
                what: "cgroup.events notifications",
            });
        }

        let inotify = self.inotify(path)?;
        let events = self.cgroup_dir(None, path).join("cgroup.events");
        let wd = inotify
            .add_watch(&events, AddWatchFlags::IN_MODIFY)
            .map_err(|e| BackendError::Watch {
                path: path.to_string(),
                source: e.into(),
            })?;

        if let Some(token) = self.tokens.get(&wd) {
            return Ok(*token);
        }

        let token = WatchToken(self.next_token);
        self.next_token += 1;
        let _ = self.watches.insert(token, wd);
        let _ = self.tokens.insert(wd, token);
        Ok(token)
    }

    fn unwatch(&mut self, token: WatchToken) -> Result<()> {
        let Some(wd) = self.watches.remove(&token) else {
            return Ok(());
        };
        let _ = self.tokens.remove(&wd);

        let Some(inotify) = self.inotify else {
            return Ok(());
        };
        match inotify.rm_watch(wd) {
            // The watch is gone already when the cgroup was removed.
            Ok(()) | Err(nix::errno::Errno::EINVAL) => Ok(()),
            Err(e) => Err(BackendError::Watch {
                path: format!("watch {}", token.0),
                source: e.into(),
            }),
        }
    }

    fn install_ip_filter(
        &mut self,
        _path: &str,
        _filter: Option<&IpFilter>,
    ) -> Result<()> {
        Err(BackendError::Unsupported { what: "ip filtering" })
    }

    fn lookup_device(&self, path: &Path) -> Result<DeviceNode> {
        let device_error = |source: io::Error| BackendError::Device {
            path: path.to_path_buf(),
            source,
        };

        let st = stat(path).map_err(|e| device_error(e.into()))?;
        let kind = match SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT
        {
            SFlag::S_IFCHR => DeviceKind::Char,
            SFlag::S_IFBLK => DeviceKind::Block,
            _ => {
                return Err(device_error(io::Error::from_raw_os_error(
                    libc::ENODEV,
                )))
            }
        };

        Ok(DeviceNode {
            kind,
            major: major(st.st_rdev),
            minor: minor(st.st_rdev),
        })
    }

    fn block_device_of(&self, path: &Path) -> Result<(u64, u64)> {
        let device_error = |source: io::Error| BackendError::Device {
            path: path.to_path_buf(),
            source,
        };

        let st = stat(path).map_err(|e| device_error(e.into()))?;
        let dev = if SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT
            == SFlag::S_IFBLK
        {
            st.st_rdev
        } else {
            st.st_dev
        };

        if major(dev) == 0 {
            return Err(device_error(io::Error::from_raw_os_error(
                libc::ENODEV,
            )));
        }

        Ok(whole_disk(major(dev), minor(dev)))
    }

    fn proc_devices(&self) -> Result<String> {
        fs::read_to_string(&self.proc_devices).map_err(|source| {
            BackendError::Device { path: self.proc_devices.clone(), source }
        })
    }
}

/// Maps a partition onto the disk holding it using sysfs. Devices without a
/// sysfs entry are returned unchanged.
fn whole_disk(major: u64, minor: u64) -> (u64, u64) {
    let sysfs = Path::new(SYS_DEV_BLOCK).join(format!("{major}:{minor}"));
    if !sysfs.join("partition").exists() {
        return (major, minor);
    }

    let parent = fs::read_to_string(sysfs.join("..").join("dev")).ok();
    parent
        .as_deref()
        .and_then(|dev| dev.trim().split_once(':'))
        .and_then(|(maj, min)| Some((maj.parse().ok()?, min.parse().ok()?)))
        .unwrap_or((major, minor))
}

fn write_file(file: &Path, value: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).truncate(true).open(file)?;
    file.write_all(value.as_bytes())
}

fn read_pids(file: &Path) -> io::Result<Vec<Pid>> {
    Ok(fs::read_to_string(file)?
        .lines()
        .filter_map(|line| line.trim().parse::<i32>().ok())
        .map(Pid::from_raw)
        .collect())
}

/// Removes the directories below `dir`, deepest first. Directories that are
/// already gone are fine; the first other failure is reported after the
/// walk finishes.
fn trim_dir(dir: &Path, delete_root: bool) -> io::Result<()> {
    let mut result = Ok(());
    for entry in WalkDir::new(dir).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                match e.into_io_error() {
                    Some(e) if e.kind() == ErrorKind::NotFound => {}
                    Some(e) if result.is_ok() => result = Err(e),
                    _ => {}
                }
                continue;
            }
        };
        if !entry.file_type().is_dir() || (entry.depth() == 0 && !delete_root)
        {
            continue;
        }
        match fs::remove_dir(entry.path()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!("failed to remove {}: {e}", entry.path().display());
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
    }
    result
}
