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
use fancy_regex::Regex;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Char,
    Block,
}

impl DeviceKind {
    pub fn letter(self) -> char {
        match self {
            DeviceKind::Char => 'c',
            DeviceKind::Block => 'b',
        }
    }

    fn section(self) -> &'static str {
        match self {
            DeviceKind::Char => "Character devices:",
            DeviceKind::Block => "Block devices:",
        }
    }
}

/// A resolved device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceNode {
    pub kind: DeviceKind,
    pub major: u64,
    pub minor: u64,
}

/// A line for `devices.allow`/`devices.deny`: `c 1:3 rwm`, `c 136:* rw`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRule {
    pub kind: DeviceKind,
    pub major: u64,
    pub minor: Option<u64>,
    pub access: String,
}

impl DeviceRule {
    pub fn node(node: DeviceNode, access: &str) -> Self {
        Self {
            kind: node.kind,
            major: node.major,
            minor: Some(node.minor),
            access: access.to_string(),
        }
    }

    pub fn major(kind: DeviceKind, major: u64, access: &str) -> Self {
        Self { kind, major, minor: None, access: access.to_string() }
    }
}

impl Display for DeviceRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.minor {
            Some(minor) => write!(
                f,
                "{} {}:{} {}",
                self.kind.letter(),
                self.major,
                minor,
                self.access
            ),
            None => {
                write!(f, "{} {}:* {}", self.kind.letter(), self.major, self.access)
            }
        }
    }
}

/// Major numbers of `kind` whose driver name matches the shell-style
/// `pattern`, read from a `/proc/devices` listing.
pub fn matching_majors(
    proc_devices: &str,
    kind: DeviceKind,
    pattern: &str,
) -> Vec<u64> {
    let Ok(pattern) = glob_to_regex(pattern) else {
        return Vec::new();
    };

    let mut in_section = false;
    let mut majors = Vec::new();
    for line in proc_devices.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.ends_with(':') {
            in_section = line == kind.section();
            continue;
        }
        if !in_section {
            continue;
        }

        let Some((major, name)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let Ok(major) = major.parse::<u64>() else {
            continue;
        };
        if matches!(pattern.is_match(name.trim()), Ok(true)) {
            majors.push(major);
        }
    }
    majors
}

/// Translates a shell glob (`*`, `?`, `[...]`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, fancy_regex::Error> {
    let mut regex = String::from("^");
    let mut in_class = false;
    for c in pattern.chars() {
        match c {
            '*' if !in_class => regex.push_str(".*"),
            '?' if !in_class => regex.push('.'),
            '[' if !in_class => {
                in_class = true;
                regex.push('[');
            }
            ']' if in_class => {
                in_class = false;
                regex.push(']');
            }
            '!' if in_class && regex.ends_with('[') => regex.push('^'),
            c if !in_class && "\\.+(){}|^$".contains(c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex.push('$');
    Regex::new(&regex)
}
