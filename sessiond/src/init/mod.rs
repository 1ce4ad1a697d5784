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
//! Start-up chores that run before the manager exists.

use crate::cgroups::Hierarchy;
use std::fs;
use std::io;
use std::path::Path;

mod logging;

#[derive(thiserror::Error, Debug)]
pub(crate) enum InitError {
    #[error(transparent)]
    Logging(#[from] logging::LoggingError),
    #[error("failed to read {file}: {source}")]
    ReadCgroup { file: &'static str, source: io::Error },
    #[error("no {hierarchy:?} cgroup membership in {file}")]
    NoCgroup { file: &'static str, hierarchy: Hierarchy },
}

const PID1_CGROUP: &str = "/proc/1/cgroup";

/// The systemd-style scope PID 1 moves itself into; the manager root is
/// the cgroup above it.
const INIT_SCOPE: &str = "/init.scope";

pub(crate) fn init(verbose: bool) -> Result<(), InitError> {
    logging::init(verbose)?;
    Ok(())
}

/// The cgroup root to manage when none is configured: the cgroup of PID 1
/// in the hierarchy that tracks processes.
pub(crate) fn default_cgroup_root(
    hierarchy: Hierarchy,
) -> Result<String, InitError> {
    let contents = fs::read_to_string(Path::new(PID1_CGROUP)).map_err(
        |source| InitError::ReadCgroup { file: PID1_CGROUP, source },
    )?;
    cgroup_of(&contents, hierarchy)
        .ok_or(InitError::NoCgroup { file: PID1_CGROUP, hierarchy })
}

// /proc/[pid]/cgroup has one "id:controllers:path" record per hierarchy.
//
// Unified : 0::/init.scope
// Legacy  : 1:name=systemd:/init.scope
//
// On hybrid systems both are present; the unified record is used.
fn cgroup_of(contents: &str, hierarchy: Hierarchy) -> Option<String> {
    let path = contents.lines().find_map(|line| {
        let mut fields = line.splitn(3, ':');
        let (_, controllers, path) = (fields.next()?, fields.next()?, fields.next()?);
        let wanted = match hierarchy {
            Hierarchy::Legacy => controllers == "name=systemd",
            Hierarchy::Unified | Hierarchy::Hybrid => controllers.is_empty(),
        };
        wanted.then_some(path)
    })?;

    let path = path.strip_suffix(INIT_SCOPE).unwrap_or(path);
    Some(if path == "/" { String::new() } else { path.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case("0::/init.scope\n", Hierarchy::Unified, Some(""); "unified init scope")]
    #[test_case("0::/\n", Hierarchy::Unified, Some(""); "unified root")]
    #[test_case("0::/elogind\n", Hierarchy::Unified, Some("/elogind"); "unified nested")]
    #[test_case("12:pids:/\n1:name=systemd:/init.scope\n0::/init.scope\n", Hierarchy::Hybrid, Some(""); "hybrid")]
    #[test_case("12:pids:/\n1:name=systemd:/system\n", Hierarchy::Legacy, Some("/system"); "legacy")]
    #[test_case("12:pids:/\n", Hierarchy::Legacy, None; "legacy without name=systemd")]
    #[test]
    fn pid1_cgroup(contents: &str, hierarchy: Hierarchy, expected: Option<&str>) {
        assert_eq!(
            cgroup_of(contents, hierarchy).as_deref(),
            expected
        );
    }
}
