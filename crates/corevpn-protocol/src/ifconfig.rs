//! IfConfig Parsing
//!
//! Parses the pushed `ifconfig` (IPv4) and `ifconfig-ipv6` directives into
//! typed address/prefix pairs. Route installation itself is an external
//! collaborator.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::{ProtocolError, Result};

/// A parsed IPv4 `ifconfig` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfConfigV4 {
    /// Tunnel-local address.
    pub address: Ipv4Addr,
    /// Prefix length derived from the netmask.
    pub prefix_len: u8,
}

/// A parsed IPv6 `ifconfig-ipv6` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfConfigV6 {
    /// Tunnel-local address.
    pub address: Ipv6Addr,
    /// Prefix length.
    pub prefix_len: u8,
    /// Gateway address.
    pub gateway: Ipv6Addr,
}

const VALID_MASK_BYTES: [u8; 9] = [0, 128, 192, 224, 240, 248, 252, 254, 255];

/// Parse `"<addr> <netmask>"`. The netmask must be a contiguous run of
/// 1-bits from the MSB, non-increasing across bytes.
pub fn parse_ifconfig_v4(s: &str) -> Result<IfConfigV4> {
    let mut parts = s.split_whitespace();
    let addr = parts
        .next()
        .ok_or_else(|| ProtocolError::InvalidPacket("missing ifconfig address".into()))?;
    let mask = parts
        .next()
        .ok_or_else(|| ProtocolError::InvalidPacket("missing ifconfig netmask".into()))?;

    let address: Ipv4Addr = addr
        .parse()
        .map_err(|_| ProtocolError::InvalidPacket(format!("invalid ifconfig address {addr}")))?;
    let mask: Ipv4Addr = mask
        .parse()
        .map_err(|_| ProtocolError::InvalidPacket(format!("invalid ifconfig netmask {mask}")))?;

    Ok(IfConfigV4 {
        address,
        prefix_len: netmask_to_prefix(mask)?,
    })
}

fn netmask_to_prefix(mask: Ipv4Addr) -> Result<u8> {
    let mut seen_partial = false;
    let mut prefix = 0u32;
    for &b in &mask.octets() {
        if !VALID_MASK_BYTES.contains(&b) {
            return Err(ProtocolError::InvalidPacket(format!(
                "invalid netmask byte {b}"
            )));
        }
        if seen_partial && b != 0 {
            return Err(ProtocolError::InvalidPacket(
                "netmask bytes must be non-increasing".into(),
            ));
        }
        if b != 255 {
            seen_partial = true;
        }
        prefix += b.count_ones();
    }
    Ok(prefix as u8)
}

/// Parse `"<addr>/<prefix> <gateway>"`.
pub fn parse_ifconfig_v6(s: &str) -> Result<IfConfigV6> {
    let mut parts = s.split_whitespace();
    let addr_prefix = parts
        .next()
        .ok_or_else(|| ProtocolError::InvalidPacket("missing ifconfig-ipv6 address".into()))?;
    let gateway = parts
        .next()
        .ok_or_else(|| ProtocolError::InvalidPacket("missing ifconfig-ipv6 gateway".into()))?;

    let (addr, prefix) = addr_prefix
        .split_once('/')
        .ok_or_else(|| ProtocolError::InvalidPacket("ifconfig-ipv6 missing /prefix".into()))?;

    let address: Ipv6Addr = addr
        .parse()
        .map_err(|_| ProtocolError::InvalidPacket(format!("invalid ifconfig-ipv6 address {addr}")))?;
    let prefix_len: u8 = prefix
        .parse()
        .map_err(|_| ProtocolError::InvalidPacket(format!("invalid ifconfig-ipv6 prefix {prefix}")))?;
    let gateway: Ipv6Addr = gateway
        .parse()
        .map_err(|_| ProtocolError::InvalidPacket(format!("invalid ifconfig-ipv6 gateway {gateway}")))?;

    Ok(IfConfigV6 {
        address,
        prefix_len,
        gateway,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_subnet() {
        let cfg = parse_ifconfig_v4("192.168.1.100 255.255.255.0").unwrap();
        assert_eq!(cfg.address, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(cfg.prefix_len, 24);
    }

    #[test]
    fn rejects_non_contiguous_mask() {
        assert!(parse_ifconfig_v4("192.168.1.100 128.255.255.255").is_err());
    }

    #[test]
    fn parses_ipv6() {
        let cfg = parse_ifconfig_v6("fe80::2/64 fe80::1").unwrap();
        assert_eq!(cfg.prefix_len, 64);
        assert_eq!(cfg.gateway, "fe80::1".parse::<Ipv6Addr>().unwrap());
    }
}
