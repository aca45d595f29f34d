//! Control Channel Message Types

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{ProtocolError, Result};

/// The literal byte string a client sends to request its `PushReply`, per
/// the OpenVPN control-channel protocol.
pub const PUSH_REQUEST: &[u8] = b"PUSH_REQUEST\0";

/// The literal byte string the server sends back on a fatal authentication
/// failure. Always terminates the connection.
pub const AUTH_FAILED: &str = "AUTH_FAILED";

/// Control channel message types
#[derive(Debug, Clone)]
pub enum ControlMessage {
    /// TLS data (wrapped in control channel)
    TlsData(Bytes),
    /// Push request from client
    PushRequest,
    /// Push reply from server
    PushReply(PushReply),
    /// Authentication data
    Auth(AuthMessage),
    /// Fatal authentication failure signalled by the server
    AuthFailed(String),
    /// Info message (version, etc.)
    Info(String),
    /// Exit/shutdown
    Exit,
}

/// Control packet for the reliable transport layer
#[derive(Debug, Clone)]
pub struct ControlPacket {
    /// Packet ID for reliability
    pub packet_id: u32,
    /// Message content
    pub message: ControlMessage,
}

impl ControlPacket {
    /// Create a new control packet
    pub fn new(packet_id: u32, message: ControlMessage) -> Self {
        Self { packet_id, message }
    }
}

/// Push reply containing VPN configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushReply {
    /// Routes to push
    pub routes: Vec<PushRoute>,
    /// IPv4 address and netmask
    pub ifconfig: Option<(String, String)>,
    /// IPv6 address
    pub ifconfig_ipv6: Option<String>,
    /// DNS servers
    pub dns: Vec<String>,
    /// Search domains
    pub dns_search: Vec<String>,
    /// Redirect gateway (full tunnel)
    pub redirect_gateway: bool,
    /// Topology type
    pub topology: Topology,
    /// Ping interval
    pub ping: u32,
    /// Ping restart timeout
    pub ping_restart: u32,
    /// 24-bit peer ID to stamp `P_DATA_V2` packets with (REQUIRED by the
    /// server in a standards-compliant push reply).
    pub peer_id: Option<u32>,
    /// `protocol-flags` space-list, e.g. `["tls-ekm"]`.
    pub protocol_flags: Vec<String>,
    /// Additional options
    pub options: Vec<String>,
}

impl Default for PushReply {
    fn default() -> Self {
        Self {
            routes: vec![],
            ifconfig: None,
            ifconfig_ipv6: None,
            dns: vec![],
            dns_search: vec![],
            redirect_gateway: false,
            topology: Topology::Subnet,
            ping: 10,
            ping_restart: 60,
            peer_id: None,
            protocol_flags: vec![],
            options: vec![],
        }
    }
}

impl PushReply {
    /// Encode as OpenVPN push reply string
    pub fn encode(&self) -> String {
        let mut parts = vec!["PUSH_REPLY".to_string()];

        // Topology
        parts.push(format!("topology {}", self.topology.as_str()));

        // ifconfig
        if let Some((ip, mask)) = &self.ifconfig {
            parts.push(format!("ifconfig {} {}", ip, mask));
        }

        // ifconfig-ipv6
        if let Some(ipv6) = &self.ifconfig_ipv6 {
            parts.push(format!("ifconfig-ipv6 {}", ipv6));
        }

        // Routes
        for route in &self.routes {
            parts.push(route.encode());
        }

        // Redirect gateway
        if self.redirect_gateway {
            parts.push("redirect-gateway def1".to_string());
        }

        // DNS
        for (i, dns) in self.dns.iter().enumerate() {
            parts.push(format!("dhcp-option DNS {}", dns));
        }

        // DNS search domains
        for domain in &self.dns_search {
            parts.push(format!("dhcp-option DOMAIN {}", domain));
        }

        // Ping settings
        parts.push(format!("ping {}", self.ping));
        parts.push(format!("ping-restart {}", self.ping_restart));

        if let Some(peer_id) = self.peer_id {
            parts.push(format!("peer-id {}", peer_id));
        }

        if !self.protocol_flags.is_empty() {
            parts.push(format!("protocol-flags {}", self.protocol_flags.join(" ")));
        }

        // Additional options
        for opt in &self.options {
            parts.push(opt.clone());
        }

        parts.join(",")
    }

    /// Parse from OpenVPN push reply string
    pub fn parse(s: &str) -> Result<Self> {
        let mut reply = Self::default();

        // Remove PUSH_REPLY prefix if present
        let s = s.strip_prefix("PUSH_REPLY,").unwrap_or(s);

        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let mut tokens = part.split_whitespace();
            match tokens.next() {
                Some("topology") => {
                    if let Some(topo) = tokens.next() {
                        reply.topology = Topology::from_str(topo);
                    }
                }
                Some("ifconfig") => {
                    let ip = tokens.next().unwrap_or("").to_string();
                    let mask = tokens.next().unwrap_or("").to_string();
                    reply.ifconfig = Some((ip, mask));
                }
                Some("ifconfig-ipv6") => {
                    if let Some(addr) = tokens.next() {
                        let rest: Vec<&str> = tokens.collect();
                        reply.ifconfig_ipv6 = Some(if rest.is_empty() {
                            addr.to_string()
                        } else {
                            format!("{addr} {}", rest.join(" "))
                        });
                    }
                }
                Some("route") => {
                    if let Ok(route) = PushRoute::parse(part) {
                        reply.routes.push(route);
                    }
                }
                Some("redirect-gateway") => {
                    reply.redirect_gateway = true;
                }
                Some("dhcp-option") => {
                    match tokens.next() {
                        Some("DNS") => {
                            if let Some(dns) = tokens.next() {
                                reply.dns.push(dns.to_string());
                            }
                        }
                        Some("DOMAIN") => {
                            if let Some(domain) = tokens.next() {
                                reply.dns_search.push(domain.to_string());
                            }
                        }
                        _ => {}
                    }
                }
                Some("ping") => {
                    if let Some(Ok(p)) = tokens.next().map(|s| s.parse()) {
                        reply.ping = p;
                    }
                }
                Some("ping-restart") => {
                    if let Some(Ok(p)) = tokens.next().map(|s| s.parse()) {
                        reply.ping_restart = p;
                    }
                }
                Some("peer-id") => {
                    if let Some(Ok(id)) = tokens.next().map(|s| s.parse()) {
                        reply.peer_id = Some(id);
                    }
                }
                Some("protocol-flags") => {
                    reply.protocol_flags = tokens.map(str::to_string).collect();
                }
                _ => {
                    reply.options.push(part.to_string());
                }
            }
        }

        Ok(reply)
    }

    /// Whether the server negotiated the TLS keying-material exporter path
    /// for data-channel key derivation.
    pub fn has_tls_ekm(&self) -> bool {
        self.protocol_flags.iter().any(|f| f == "tls-ekm")
    }
}

/// Route to push to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRoute {
    /// Network address
    pub network: String,
    /// Netmask
    pub netmask: String,
    /// Gateway (optional, vpn_gateway used if not set)
    pub gateway: Option<String>,
    /// Metric
    pub metric: Option<u32>,
}

impl PushRoute {
    /// Create a new route
    pub fn new(network: &str, netmask: &str) -> Self {
        Self {
            network: network.to_string(),
            netmask: netmask.to_string(),
            gateway: None,
            metric: None,
        }
    }

    /// Encode as OpenVPN route directive
    pub fn encode(&self) -> String {
        let mut s = format!("route {} {}", self.network, self.netmask);
        if let Some(gw) = &self.gateway {
            s.push_str(&format!(" {}", gw));
        } else {
            s.push_str(" vpn_gateway");
        }
        if let Some(metric) = self.metric {
            s.push_str(&format!(" {}", metric));
        }
        s
    }

    /// Parse from OpenVPN route directive
    pub fn parse(s: &str) -> Result<Self> {
        let mut tokens = s.split_whitespace();
        tokens.next(); // skip "route"

        let network = tokens
            .next()
            .ok_or_else(|| ProtocolError::InvalidPacket("missing network in route".into()))?
            .to_string();

        let netmask = tokens
            .next()
            .ok_or_else(|| ProtocolError::InvalidPacket("missing netmask in route".into()))?
            .to_string();

        let gateway = tokens.next().and_then(|g| {
            if g == "vpn_gateway" {
                None
            } else {
                Some(g.to_string())
            }
        });

        let metric = tokens.next().and_then(|m| m.parse().ok());

        Ok(Self {
            network,
            netmask,
            gateway,
            metric,
        })
    }
}

/// Network topology type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Topology {
    /// Point-to-point (net30)
    Net30,
    /// Point-to-point (p2p)
    P2P,
    /// Subnet mode (recommended)
    #[default]
    Subnet,
}

impl Topology {
    /// Parse from string
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "net30" => Topology::Net30,
            "p2p" => Topology::P2P,
            "subnet" => Topology::Subnet,
            _ => Topology::Subnet,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::Net30 => "net30",
            Topology::P2P => "p2p",
            Topology::Subnet => "subnet",
        }
    }
}

/// Authentication message from client
#[derive(Debug, Clone)]
pub struct AuthMessage {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl AuthMessage {
    /// Parse from OpenVPN auth data
    pub fn parse(data: &[u8]) -> Result<Self> {
        // Format: username\0password\0
        let s = std::str::from_utf8(data)
            .map_err(|_| ProtocolError::InvalidPacket("invalid UTF-8 in auth".into()))?;

        let parts: Vec<&str> = s.split('\0').collect();
        if parts.len() < 2 {
            return Err(ProtocolError::InvalidPacket("missing auth fields".into()));
        }

        Ok(Self {
            username: parts[0].to_string(),
            password: parts[1].to_string(),
        })
    }

    /// Encode to OpenVPN auth format
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(self.username.as_bytes());
        data.push(0);
        data.extend_from_slice(self.password.as_bytes());
        data.push(0);
        data
    }
}

/// Key method v2 data, carried as TLS application data once the handshake
/// completes. The client side always sends a [`corevpn_crypto::KeySource`]
/// (pre_master + both randoms); the server's reply source omits pre_master,
/// so it is parsed separately by the caller via `KeySource::from_bytes`.
#[derive(Debug, Clone)]
pub struct KeyMethodV2 {
    /// Options string describing the negotiated cipher/auth/compression.
    pub options: String,
    /// Username (if using auth-user-pass)
    pub username: Option<String>,
    /// Password (if using auth-user-pass)
    pub password: Option<String>,
    /// Peer info (`IV_*` key/value block)
    pub peer_info: Option<String>,
}

impl KeyMethodV2 {
    /// Encode to bytes, given the already-serialized key source
    /// (`KeySource::to_bytes()`).
    pub fn encode(&self, key_source: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();

        // Literal 0 (uid_gid_len predecessor, unused by modern OpenVPN)
        buf.extend_from_slice(&[0u8; 4]);

        // Key method (2)
        buf.push(2);

        buf.extend_from_slice(key_source);

        // Options string length + string
        let opts_bytes = self.options.as_bytes();
        buf.extend_from_slice(&(opts_bytes.len() as u16).to_be_bytes());
        buf.extend_from_slice(opts_bytes);

        // Username (optional)
        if let Some(username) = &self.username {
            let username_bytes = username.as_bytes();
            buf.extend_from_slice(&(username_bytes.len() as u16).to_be_bytes());
            buf.extend_from_slice(username_bytes);
        } else {
            buf.extend_from_slice(&0u16.to_be_bytes());
        }

        // Password (optional)
        if let Some(password) = &self.password {
            let password_bytes = password.as_bytes();
            buf.extend_from_slice(&(password_bytes.len() as u16).to_be_bytes());
            buf.extend_from_slice(password_bytes);
        } else {
            buf.extend_from_slice(&0u16.to_be_bytes());
        }

        // Peer info (optional)
        if let Some(peer_info) = &self.peer_info {
            let peer_info_bytes = peer_info.as_bytes();
            buf.extend_from_slice(&(peer_info_bytes.len() as u16).to_be_bytes());
            buf.extend_from_slice(peer_info_bytes);
        }

        buf
    }

    /// Decode the non-key-source tail of a `KeyMethodV2` message: `options`,
    /// username/password and peer-info. `key_source_len` is 112 for the
    /// client's message (pre_master + two randoms) or 64 for the server's.
    pub fn decode(data: &[u8], key_source_len: usize) -> Result<(Self, Vec<u8>)> {
        let mut reader = crate::codec::PacketReader::new(data);
        reader
            .take_bytes(4)
            .map_err(|_| ProtocolError::InvalidPacket("truncated key method v2 header".into()))?;
        let method = reader
            .read_u8()
            .map_err(|_| ProtocolError::InvalidPacket("truncated key method".into()))?;
        if method != 2 {
            return Err(ProtocolError::InvalidPacket(format!(
                "unsupported key method {method}"
            )));
        }
        let key_source = reader
            .take_bytes(key_source_len)
            .map_err(|_| ProtocolError::InvalidPacket("truncated key source".into()))?
            .to_vec();

        let options = read_len_prefixed_string(&mut reader)?;
        let username = read_len_prefixed_opt_string(&mut reader)?;
        let password = read_len_prefixed_opt_string(&mut reader)?;
        let peer_info = read_len_prefixed_opt_string(&mut reader)?;

        Ok((
            Self {
                options,
                username,
                password,
                peer_info,
            },
            key_source,
        ))
    }
}

fn read_len_prefixed_string(reader: &mut crate::codec::PacketReader<'_>) -> Result<String> {
    let len = reader
        .read_u16(2)
        .map_err(|_| ProtocolError::InvalidPacket("truncated length prefix".into()))? as usize;
    let bytes = reader
        .take_bytes(len)
        .map_err(|_| ProtocolError::InvalidPacket("truncated length-prefixed string".into()))?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ProtocolError::InvalidPacket("invalid UTF-8 in control message".into()))
}

fn read_len_prefixed_opt_string(reader: &mut crate::codec::PacketReader<'_>) -> Result<Option<String>> {
    if reader.remaining() < 2 {
        return Ok(None);
    }
    let s = read_len_prefixed_string(reader)?;
    Ok(if s.is_empty() { None } else { Some(s) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use corevpn_crypto::KeySource;

    #[test]
    fn key_method_v2_roundtrip() {
        let source = KeySource::generate_client();
        let msg = KeyMethodV2 {
            options: "V4,dev-type tun,link-mtu 1542".to_string(),
            username: Some("alice".to_string()),
            password: None,
            peer_info: Some("IV_VER=2.6.0\nIV_PLAT=linux\n".to_string()),
        };

        let encoded = msg.encode(&source.to_bytes());
        let (decoded, key_source_bytes) = KeyMethodV2::decode(&encoded, 112).unwrap();

        assert_eq!(decoded.options, msg.options);
        assert_eq!(decoded.username, msg.username);
        assert_eq!(decoded.password, None);
        assert_eq!(decoded.peer_info, msg.peer_info);
        assert_eq!(key_source_bytes, source.to_bytes());
    }

    #[test]
    fn test_push_reply_roundtrip() {
        let mut reply = PushReply::default();
        reply.ifconfig = Some(("10.8.0.2".to_string(), "255.255.255.0".to_string()));
        reply.dns.push("1.1.1.1".to_string());
        reply.routes.push(PushRoute::new("192.168.1.0", "255.255.255.0"));
        reply.redirect_gateway = true;

        let encoded = reply.encode();
        let parsed = PushReply::parse(&encoded).unwrap();

        assert_eq!(parsed.ifconfig, reply.ifconfig);
        assert_eq!(parsed.dns, reply.dns);
        assert!(parsed.redirect_gateway);
    }

    #[test]
    fn push_reply_protocol_flags_roundtrip() {
        let mut reply = PushReply::default();
        reply.peer_id = Some(7);
        reply.protocol_flags = vec!["tls-ekm".to_string(), "dyn-tls-crypt".to_string()];

        let encoded = reply.encode();
        let parsed = PushReply::parse(&encoded).unwrap();

        assert_eq!(parsed.peer_id, Some(7));
        assert!(parsed.has_tls_ekm());
        assert_eq!(parsed.protocol_flags, reply.protocol_flags);
    }

    #[test]
    fn test_auth_message() {
        let auth = AuthMessage {
            username: "user".to_string(),
            password: "pass".to_string(),
        };

        let encoded = auth.encode();
        let parsed = AuthMessage::parse(&encoded).unwrap();

        assert_eq!(parsed.username, "user");
        assert_eq!(parsed.password, "pass");
    }
}
