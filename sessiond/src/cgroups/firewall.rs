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
use ipnetwork::IpNetwork;
use std::net::IpAddr;

/// The IP access policy in force for one cgroup, merged from the unit and
/// every slice above it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpFilter {
    pub accounting: bool,
    pub allow: Vec<IpNetwork>,
    pub deny: Vec<IpNetwork>,
}

impl IpFilter {
    /// Adds the lists of one unit. Accounting is only taken from the unit
    /// the filter is compiled for.
    pub fn extend(&mut self, allow: &[IpNetwork], deny: &[IpNetwork]) {
        for network in allow {
            if !self.allow.contains(network) {
                self.allow.push(*network);
            }
        }
        for network in deny {
            if !self.deny.contains(network) {
                self.deny.push(*network);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.accounting && self.allow.is_empty() && self.deny.is_empty()
    }

    /// An address on the allow list passes even when it is also denied.
    pub fn permits(&self, addr: IpAddr) -> bool {
        if self.allow.iter().any(|n| n.contains(addr)) {
            return true;
        }
        !self.deny.iter().any(|n| n.contains(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNetwork {
        s.parse().expect("valid network")
    }

    #[test]
    fn allow_list_takes_precedence_over_deny() {
        let filter = IpFilter {
            accounting: false,
            allow: vec![net("10.0.0.0/8")],
            deny: vec![net("0.0.0.0/0")],
        };
        assert!(filter.permits("10.1.2.3".parse().expect("addr")));
        assert!(!filter.permits("192.168.1.1".parse().expect("addr")));
    }

    #[test]
    fn extend_skips_duplicates() {
        let mut filter = IpFilter::default();
        filter.extend(&[net("::1/128")], &[]);
        filter.extend(&[net("::1/128")], &[net("fe80::/10")]);
        assert_eq!(filter.allow.len(), 1);
        assert_eq!(filter.deny.len(), 1);
        assert!(!filter.is_empty());
    }
}
