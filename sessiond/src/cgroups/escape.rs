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
//! Mapping of unit identifiers onto cgroup directory names.
//!
//! Directory names that the kernel reserves (`tasks`, `cgroup.*`, ...) or
//! that look like a controller attribute (`cpu.foo`) are prefixed with `_`.
//! Names that already start with `_` get one too, which keeps the mapping
//! reversible.

use super::mask::Controller;
use std::borrow::Cow;

const RESERVED: [&str; 3] = ["notify_on_release", "release_agent", "tasks"];

pub fn escape(name: &str) -> Cow<'_, str> {
    if needs_escape(name) {
        Cow::Owned(format!("_{name}"))
    } else {
        Cow::Borrowed(name)
    }
}

pub fn unescape(name: &str) -> &str {
    name.strip_prefix('_').unwrap_or(name)
}

fn needs_escape(name: &str) -> bool {
    if name.is_empty()
        || name.starts_with('_')
        || name.starts_with('.')
        || name.starts_with("cgroup.")
        || RESERVED.contains(&name)
    {
        return true;
    }

    // "cpu.slice" would shadow the cpu controller's attribute namespace.
    match name.rsplit_once('.') {
        Some((prefix, _)) => Controller::ALL.iter().any(|c| c.name() == prefix),
        None => false,
    }
}
