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
//! Controller masks, resource settings and the cgroup filesystem access
//! they are applied through.

pub use self::backend::{BackendError, CgroupBackend, FsBackend, WatchToken};
pub use self::hierarchy::Hierarchy;
pub use self::mask::{Controller, ControllerMask};
pub use self::resource::ResourceSpec;

pub mod backend;
pub mod devices;
pub mod escape;
pub mod firewall;
pub mod hierarchy;
pub mod mask;
pub mod resource;
pub mod weight;
