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

//! Session manager daemon: cgroup resource control for login sessions.
//!
//! Units (slices, scopes and services) are arranged in a tree mirroring the
//! cgroup hierarchy. The [manager::Manager] works out which controllers
//! every cgroup needs, creates the cgroups, writes resource limits into
//! them and collects them again once they run empty.
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

use anyhow::Context;
use cgroups::{CgroupBackend, FsBackend, Hierarchy};
use clap::Parser;
use event_loop::EventLoop;
use manager::{Manager, StateSnapshot};
use std::path::PathBuf;
use tracing::{error, info, warn};
use units::{UnitKind, ROOT_SLICE};

pub mod agent;
pub mod cgroups;
pub mod event_loop;
mod init;
pub mod manager;
pub mod units;

pub const EXIT_OKAY: i32 = 0;
pub const EXIT_ERROR: i32 = 1;

/// Command line options for sessiond.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct SessiondOptions {
    /// Mount point of the cgroup filesystem.
    #[clap(long, value_parser, default_value = "/sys/fs/cgroup")]
    cgroupfs: PathBuf,
    /// Cgroup below which units are placed. Defaults to the cgroup of
    /// PID 1.
    #[clap(long, value_parser)]
    cgroup_root: Option<String>,
    /// Where realized cgroup state is kept across restarts.
    #[clap(long, value_parser, default_value = "/run/sessiond/cgroups.json")]
    state_file: PathBuf,
    /// Socket the legacy hierarchy release agent reports to.
    #[clap(long, value_parser, default_value = agent::AGENT_SOCKET)]
    agent_socket: PathBuf,
    /// Release agent registered on the legacy hierarchy.
    #[clap(
        long,
        value_parser,
        default_value = "/usr/libexec/sessiond-cgroups-agent"
    )]
    release_agent: PathBuf,
    /// Toggle verbosity. Default false
    #[clap(short, long)]
    verbose: bool,
}

/// Parses the command line and runs the daemon until it is told to stop.
/// Returns the process exit code.
pub async fn daemon() -> i32 {
    let options = SessiondOptions::parse();

    if let Err(e) = init::init(options.verbose) {
        eprintln!("failed to initialize: {e}");
        return EXIT_ERROR;
    }

    info!("Starting sessiond");
    info!("Options: {options:#?}");

    match run(options).await {
        Ok(()) => EXIT_OKAY,
        Err(e) => {
            error!("{e:?}");
            EXIT_ERROR
        }
    }
}

async fn run(options: SessiondOptions) -> anyhow::Result<()> {
    let mut backend = FsBackend::new(&options.cgroupfs).with_context(|| {
        format!("no cgroup filesystem at {}", options.cgroupfs.display())
    })?;
    let hierarchy = backend.hierarchy();
    info!("cgroup hierarchy is {hierarchy:?}");

    if hierarchy == Hierarchy::Legacy {
        if let Err(e) = backend.install_release_agent(&options.release_agent) {
            warn!("failed to install release agent, empty cgroups will linger: {e}");
        }
    }

    let cgroup_root = match options.cgroup_root {
        Some(root) => root,
        None => init::default_cgroup_root(hierarchy)
            .context("failed to find the cgroup of PID 1")?,
    };
    let mut manager = Manager::new(backend, &cgroup_root)?;
    let root = manager.add_unit(ROOT_SLICE, UnitKind::Slice, None, None)?;

    match StateSnapshot::load(&options.state_file) {
        Ok(Some(snapshot)) => {
            let _ = manager.restore(&snapshot);
        }
        Ok(None) => {}
        Err(e) => warn!("ignoring saved cgroup state: {e}"),
    }
    manager.enqueue_realize(root);

    EventLoop::new(manager, options.agent_socket, options.state_file)
        .run()
        .await?;
    info!("sessiond exited successfully");
    Ok(())
}
