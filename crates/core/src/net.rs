// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Portvault Contributors

// Network utility functions

use std::net::{IpAddr, Ipv6Addr};

/// Check if a host address is a loopback address.
/// Supports IPv4 (127.x.x.x), IPv6 (::1), and the hostname "localhost".
pub fn is_loopback_address(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    // Unparseable hosts are assumed non-loopback for security
    host.parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// Render `host:port`, bracketing IPv6 literals.
pub fn format_host_port(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_loopback_address() {
        assert!(is_loopback_address("127.0.0.1"));
        assert!(is_loopback_address("127.0.0.2"));
        assert!(is_loopback_address("::1"));
        assert!(is_loopback_address("localhost"));
        assert!(is_loopback_address("LOCALHOST"));

        assert!(!is_loopback_address("0.0.0.0"));
        assert!(!is_loopback_address("192.168.1.1"));
        assert!(!is_loopback_address("example.com"));
        assert!(!is_loopback_address("::"));
    }

    #[test]
    fn test_format_host_port() {
        assert_eq!(format_host_port("127.0.0.1", 8080), "127.0.0.1:8080");
        assert_eq!(format_host_port("bastion.example.com", 22), "bastion.example.com:22");
        assert_eq!(format_host_port("::1", 5432), "[::1]:5432");
    }
}
