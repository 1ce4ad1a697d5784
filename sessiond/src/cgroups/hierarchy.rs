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
use nix::sys::statfs::{statfs, CGROUP2_SUPER_MAGIC, TMPFS_MAGIC};
use std::path::Path;

/// Layout of the cgroup filesystem the manager runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hierarchy {
    /// cgroup2 mounted at the top, one tree for everything.
    Unified,
    /// Per-controller v1 trees, with cgroup2 mounted at `unified/` for
    /// process tracking.
    Hybrid,
    /// Per-controller v1 trees, with the named `systemd` tree for process
    /// tracking.
    Legacy,
}

impl Hierarchy {
    /// Detects the layout of the filesystem mounted at `mount`.
    pub fn detect(mount: &Path) -> nix::Result<Self> {
        let fs = statfs(mount)?;
        if fs.filesystem_type() == CGROUP2_SUPER_MAGIC {
            return Ok(Hierarchy::Unified);
        }

        if fs.filesystem_type() == TMPFS_MAGIC {
            if let Ok(unified) = statfs(&mount.join("unified")) {
                if unified.filesystem_type() == CGROUP2_SUPER_MAGIC {
                    return Ok(Hierarchy::Hybrid);
                }
            }
        }

        Ok(Hierarchy::Legacy)
    }

    pub fn is_unified(self) -> bool {
        self == Hierarchy::Unified
    }

    /// Directory of the process-tracking tree relative to the mount point.
    pub fn main_dir(self) -> Option<&'static str> {
        match self {
            Hierarchy::Unified => None,
            Hierarchy::Hybrid => Some("unified"),
            Hierarchy::Legacy => Some("systemd"),
        }
    }

    /// Whether "empty" is signalled through `cgroup.events`.
    pub fn has_events(self) -> bool {
        self != Hierarchy::Legacy
    }

    /// Extracts the process-tracking cgroup from a `/proc/<pid>/cgroup`
    /// listing.
    ///
    /// ```text
    /// unified: 0::/init.scope
    /// legacy : 1:name=systemd:/init.scope
    /// ```
    pub fn tracking_cgroup(self, proc_cgroup: &str) -> Option<String> {
        proc_cgroup.lines().find_map(|line| {
            let mut fields = line.splitn(3, ':');
            let _id = fields.next()?;
            let controllers = fields.next()?;
            let path = fields.next()?;

            let tracking = match self {
                Hierarchy::Unified | Hierarchy::Hybrid => controllers.is_empty(),
                Hierarchy::Legacy => controllers == "name=systemd",
            };
            tracking.then(|| path.trim().to_string())
        })
    }
}

/// Strips the suffix the service manager adds for its own process so the
/// result names the root of the manager's tree.
pub fn manager_root(own_cgroup: &str) -> String {
    let root = own_cgroup.strip_suffix("/init.scope").unwrap_or(own_cgroup);
    match root.trim_end_matches('/') {
        "" => String::new(),
        root => root.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    const HYBRID: &str = "12:pids:/user.slice/user-1000.slice
11:memory:/user.slice/user-1000.slice
1:name=systemd:/user.slice/user-1000.slice/session-2.scope
0::/user.slice/user-1000.slice/session-2.scope
";

    #[test_case(Hierarchy::Unified, "0::/init.scope\n", Some("/init.scope"); "unified")]
    #[test_case(Hierarchy::Hybrid, HYBRID, Some("/user.slice/user-1000.slice/session-2.scope"); "hybrid uses the cgroup2 line")]
    #[test_case(Hierarchy::Legacy, HYBRID, Some("/user.slice/user-1000.slice/session-2.scope"); "legacy uses the named hierarchy")]
    #[test_case(Hierarchy::Legacy, "0::/\n", None; "legacy without a named hierarchy")]
    #[test]
    fn test_tracking_cgroup(
        hierarchy: Hierarchy,
        listing: &str,
        expected: Option<&str>,
    ) {
        assert_eq!(hierarchy.tracking_cgroup(listing).as_deref(), expected);
    }

    #[test_case("/init.scope", ""; "pid 1 at the top")]
    #[test_case("/", ""; "top")]
    #[test_case("/machine/container/init.scope", "/machine/container"; "nested")]
    #[test_case("/sessiond.service", "/sessiond.service"; "running as a service")]
    #[test]
    fn test_manager_root(own: &str, expected: &str) {
        assert_eq!(manager_root(own), expected);
    }

    #[test]
    fn detects_the_host_hierarchy() {
        test_helpers::skip_if_no_cgroupfs!("detects_the_host_hierarchy");

        let hierarchy = Hierarchy::detect(Path::new("/sys/fs/cgroup"))
            .expect("statfs on /sys/fs/cgroup");
        let listing = std::fs::read_to_string("/proc/self/cgroup")
            .expect("read /proc/self/cgroup");
        if hierarchy.is_unified() {
            assert!(hierarchy.tracking_cgroup(&listing).is_some());
        }
    }
}
