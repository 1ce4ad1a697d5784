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

// Lint groups: https://doc.rust-lang.org/rustc/lints/groups.html
#![warn(future_incompatible, nonstandard_style, unused)]
#![warn(
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    unconditional_recursion,
    unused_comparisons,
    while_true
)]
#![warn(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
#![warn(clippy::unwrap_used)]

use std::fs;
use std::path::{Path, PathBuf};

// Nix has a collection of test helpers that are not exposed publicly by their crate
// The below skip helpers are here: https://github.com/nix-rust/nix/blob/master/test/common/mod.rs

#[macro_export]
macro_rules! skip {
    ($($reason: expr),+) => {
        use ::std::io::{self, Write};

        let stderr = io::stderr();
        let mut handle = stderr.lock();
        writeln!(handle, $($reason),+).unwrap();
        return;
    }
}

#[macro_export]
macro_rules! skip_if_not_root {
    ($name:expr) => {
        use nix::unistd::Uid;

        if !Uid::current().is_root() {
            $crate::skip!("{} requires root privileges. Skipping test.", $name);
        }
    };
}

#[macro_export]
macro_rules! skip_if_no_cgroupfs {
    ($name:expr) => {
        if !::std::path::Path::new("/sys/fs/cgroup").is_dir() {
            $crate::skip!("{} requires a mounted /sys/fs/cgroup. Skipping test.", $name);
        }
    };
}

/// A throw-away directory tree laid out like a cgroup filesystem.
///
/// Regular files stand in for cgroup attribute files, so anything the code
/// under test writes can be read back. The tree is removed on drop.
#[derive(Debug)]
pub struct ScratchCgroupFs {
    root: PathBuf,
}

impl ScratchCgroupFs {
    fn new() -> Self {
        let root = std::env::temp_dir()
            .join(format!("sessiond-cgroupfs-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&root).expect("failed to create scratch cgroupfs");
        Self { root }
    }

    /// A single hierarchy whose root advertises `controllers`.
    pub fn unified(controllers: &[&str]) -> Self {
        let scratch = Self::new();
        scratch.write("cgroup.controllers", &controllers.join(" "));
        scratch
    }

    /// One hierarchy per controller plus the named `systemd` hierarchy.
    pub fn legacy(controllers: &[&str]) -> Self {
        let scratch = Self::new();
        let _ = scratch.mkdir("systemd");
        for controller in controllers {
            let _ = scratch.mkdir(controller);
        }
        scratch
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolves a cgroup style path (leading `/` allowed) below the root.
    pub fn join(&self, relative: &str) -> PathBuf {
        self.root.join(relative.trim_start_matches('/'))
    }

    pub fn mkdir(&self, relative: &str) -> PathBuf {
        let path = self.join(relative);
        fs::create_dir_all(&path).expect("failed to create scratch cgroup");
        path
    }

    /// Creates the cgroup directory and empty attribute files inside it.
    pub fn touch(&self, relative: &str, attributes: &[&str]) -> PathBuf {
        let dir = self.mkdir(relative);
        for attribute in attributes {
            fs::write(dir.join(attribute), "")
                .expect("failed to create scratch attribute");
        }
        dir
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .expect("failed to create scratch cgroup");
        }
        fs::write(&path, contents).expect("failed to write scratch attribute");
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.join(relative))
            .expect("failed to read scratch attribute")
    }
}

impl Drop for ScratchCgroupFs {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_tree_is_removed_on_drop() {
        let scratch = ScratchCgroupFs::unified(&["cpu", "pids"]);
        let root = scratch.path().to_path_buf();
        assert_eq!(scratch.read("/cgroup.controllers"), "cpu pids");

        drop(scratch);
        assert!(!root.exists());
    }

    #[test]
    fn legacy_tree_has_one_directory_per_controller() {
        let scratch = ScratchCgroupFs::legacy(&["cpu", "memory"]);
        assert!(scratch.join("systemd").is_dir());
        assert!(scratch.join("cpu").is_dir());
        assert!(scratch.join("memory").is_dir());
        assert!(!scratch.join("pids").exists());
    }
}
