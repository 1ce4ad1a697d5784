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
use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

/// A kernel resource controller the manager knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Controller {
    Cpu,
    Cpuacct,
    Io,
    Blkio,
    Memory,
    Devices,
    Pids,
}

impl Controller {
    pub const ALL: [Controller; 7] = [
        Controller::Cpu,
        Controller::Cpuacct,
        Controller::Io,
        Controller::Blkio,
        Controller::Memory,
        Controller::Devices,
        Controller::Pids,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Controller::Cpu => "cpu",
            Controller::Cpuacct => "cpuacct",
            Controller::Io => "io",
            Controller::Blkio => "blkio",
            Controller::Memory => "memory",
            Controller::Devices => "devices",
            Controller::Pids => "pids",
        }
    }

    pub fn mask(self) -> ControllerMask {
        match self {
            Controller::Cpu => ControllerMask::CPU,
            Controller::Cpuacct => ControllerMask::CPUACCT,
            Controller::Io => ControllerMask::IO,
            Controller::Blkio => ControllerMask::BLKIO,
            Controller::Memory => ControllerMask::MEMORY,
            Controller::Devices => ControllerMask::DEVICES,
            Controller::Pids => ControllerMask::PIDS,
        }
    }

    /// Whether the controller exists on the unified hierarchy.
    pub fn is_unified(self) -> bool {
        ControllerMask::UNIFIED.contains(self.mask())
    }
}

impl Display for Controller {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown cgroup controller '{0}'")]
pub struct UnknownController(pub String);

impl FromStr for Controller {
    type Err = UnknownController;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Controller::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| UnknownController(s.to_string()))
    }
}

bitflags! {
    /// Set of controllers, as enabled or realized on a cgroup.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControllerMask: u32 {
        const CPU = 1 << 0;
        const CPUACCT = 1 << 1;
        const IO = 1 << 2;
        const BLKIO = 1 << 3;
        const MEMORY = 1 << 4;
        const DEVICES = 1 << 5;
        const PIDS = 1 << 6;
    }
}

impl ControllerMask {
    /// Controllers available on the unified hierarchy.
    pub const UNIFIED: ControllerMask = ControllerMask::from_bits_retain(
        ControllerMask::CPU.bits()
            | ControllerMask::IO.bits()
            | ControllerMask::MEMORY.bits()
            | ControllerMask::PIDS.bits(),
    );

    const CPU_PAIR: ControllerMask = ControllerMask::from_bits_retain(
        ControllerMask::CPU.bits() | ControllerMask::CPUACCT.bits(),
    );

    const IO_PAIR: ControllerMask = ControllerMask::from_bits_retain(
        ControllerMask::IO.bits() | ControllerMask::BLKIO.bits(),
    );

    /// Widens the mask so that cpu/cpuacct and io/blkio are always present
    /// together. The legacy hierarchy splits each pair into two controllers
    /// that the unified hierarchy serves as one.
    pub fn normalize(self) -> Self {
        let mut mask = self;
        if mask.intersects(Self::CPU_PAIR) {
            mask |= Self::CPU_PAIR;
        }
        if mask.intersects(Self::IO_PAIR) {
            mask |= Self::IO_PAIR;
        }
        mask
    }

    pub fn controllers(self) -> impl Iterator<Item = Controller> {
        Controller::ALL.into_iter().filter(move |c| self.contains(c.mask()))
    }

    /// Parses a whitespace separated controller list such as the contents of
    /// `cgroup.controllers`. Names the manager does not drive are skipped.
    pub fn from_names(names: &str) -> Self {
        names
            .split_whitespace()
            .filter_map(|name| name.parse::<Controller>().ok())
            .fold(Self::empty(), |mask, c| mask | c.mask())
    }
}

impl Default for ControllerMask {
    fn default() -> Self {
        Self::empty()
    }
}

impl Display for ControllerMask {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.controllers().map(|c| c.name()).collect();
        f.write_str(&names.join(" "))
    }
}

impl Serialize for ControllerMask {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ControllerMask {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let names = String::deserialize(deserializer)?;
        Ok(Self::from_names(&names))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case(ControllerMask::IO, ControllerMask::IO | ControllerMask::BLKIO; "io pulls in blkio")]
    #[test_case(ControllerMask::BLKIO, ControllerMask::IO | ControllerMask::BLKIO; "blkio pulls in io")]
    #[test_case(ControllerMask::CPU, ControllerMask::CPU | ControllerMask::CPUACCT; "cpu pulls in cpuacct")]
    #[test_case(ControllerMask::CPUACCT, ControllerMask::CPU | ControllerMask::CPUACCT; "cpuacct pulls in cpu")]
    #[test_case(ControllerMask::PIDS | ControllerMask::MEMORY, ControllerMask::PIDS | ControllerMask::MEMORY; "unpaired bits are left alone")]
    #[test_case(ControllerMask::empty(), ControllerMask::empty(); "empty stays empty")]
    #[test]
    fn normalize_toggles_compat_pairs_together(
        input: ControllerMask,
        expected: ControllerMask,
    ) {
        assert_eq!(input.normalize(), expected);
    }

    #[test]
    fn normalize_holds_for_every_mask() {
        for bits in 0..=ControllerMask::all().bits() {
            let mask = ControllerMask::from_bits_truncate(bits).normalize();
            assert_eq!(
                mask.contains(ControllerMask::IO),
                mask.contains(ControllerMask::BLKIO)
            );
            assert_eq!(
                mask.contains(ControllerMask::CPU),
                mask.contains(ControllerMask::CPUACCT)
            );
        }
    }

    #[test]
    fn names_skip_unknown_controllers() {
        let mask = ControllerMask::from_names("cpuset cpu io memory hugetlb\n");
        assert_eq!(
            mask,
            ControllerMask::CPU | ControllerMask::IO | ControllerMask::MEMORY
        );
        assert_eq!(mask.to_string(), "cpu io memory");
    }

    #[test]
    fn serializes_as_a_name_list() {
        let mask = ControllerMask::PIDS | ControllerMask::CPU;
        let json = serde_json::to_string(&mask).expect("serialize");
        assert_eq!(json, "\"cpu pids\"");

        let back: ControllerMask =
            serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, mask);
    }

    #[test]
    fn only_cpu_io_memory_and_pids_are_unified() {
        let unified: Vec<Controller> =
            Controller::ALL.into_iter().filter(|c| c.is_unified()).collect();
        assert_eq!(
            unified,
            vec![
                Controller::Cpu,
                Controller::Io,
                Controller::Memory,
                Controller::Pids
            ]
        );
    }
}
