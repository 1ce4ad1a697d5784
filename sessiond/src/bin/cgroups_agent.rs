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

//! Release agent for the legacy cgroup hierarchy. The kernel runs it with
//! the path of an emptied cgroup; it hands the path to sessiond and exits.

#![warn(clippy::unwrap_used)]

use sessiond::agent::{self, AGENT_SOCKET};
use sessiond::{EXIT_ERROR, EXIT_OKAY};
use std::path::Path;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let [_, cgroup] = args.as_slice() else {
        eprintln!("Incorrect number of arguments.");
        std::process::exit(EXIT_ERROR);
    };

    // Nobody reads our stderr when the kernel runs us, and sessiond not
    // listening is not worth a message anyway.
    let code = match agent::send(Path::new(AGENT_SOCKET), cgroup) {
        Ok(()) => EXIT_OKAY,
        Err(_) => EXIT_ERROR,
    };
    std::process::exit(code);
}
