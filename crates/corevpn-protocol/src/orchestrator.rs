//! Protocol Orchestrator
//!
//! The top-level client state machine: owns the control channel, the TLS
//! handshake, key-method exchange, push-request/push-reply, and the data
//! channel once keys are installed. Distinct from [`crate::session`]'s
//! control-channel-local state machine; this one tracks overall connection
//! progress from first byte to tunneled traffic.

use bytes::Bytes;

use corevpn_crypto::{derive_prf_keys, keys_from_ekm, CipherSuite, DataChannelKey, KeySource};

use crate::control::{AuthMessage, KeyMethodV2, PushReply, PUSH_REQUEST};
use crate::data::{DataChannel, DataFrame};
use crate::ifconfig::{parse_ifconfig_v4, parse_ifconfig_v6, IfConfigV4, IfConfigV6};
use crate::packet::{ControlPacketData, Packet};
use crate::session::{ProcessedPacket, ProtocolSession};
use crate::tls::TlsHandler;
use crate::{KeyId, OpCode, ProtocolError, Result};

/// Top-level connection progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Nothing sent yet.
    Connecting,
    /// Hard-reset sent; session established once the server responds.
    SessionReady,
    /// TLS handshake and `KeyMethodV2` exchange in progress.
    HandshakePending,
    /// Data-channel keys derived and installed.
    KeysExchanged,
    /// `PUSH_REQUEST` sent, waiting on `PUSH_REPLY`.
    PushRequested,
    /// Push reply applied; the data channel carries IP traffic.
    Tunneled,
    /// Fatal error or explicit close.
    ConnectionClosed,
}

/// The kind of virtual interface this client negotiated with the server.
/// Selects how inbound raw data-channel frames get wrapped for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// Routed IP tunnel (`dev tun`).
    Tun,
    /// Bridged Ethernet tunnel (`dev tap`).
    Tap,
}

impl DeviceType {
    fn as_str(self) -> &'static str {
        match self {
            DeviceType::Tun => "tun",
            DeviceType::Tap => "tap",
        }
    }
}

/// Negotiation inputs the orchestrator needs before connecting.
pub struct OrchestratorConfig {
    /// Data-channel cipher name (e.g. `"AES-256-GCM"`).
    pub cipher: String,
    /// Explicit auth digest for non-AEAD ciphers, if any.
    pub auth_digest: Option<String>,
    /// Whether this client advertises exporter support (`IV_PROTO`'s
    /// `TlsKeyMaterialExport` bit) in its own peer-info. Informational only:
    /// the server alone decides whether the connection actually uses EKM,
    /// signaled back via the pushed `protocol-flags`.
    pub prefer_tls_ekm: bool,
    /// `auth-user-pass` credentials, if configured.
    pub username: Option<String>,
    /// `auth-user-pass` credentials, if configured.
    pub password: Option<String>,
    /// The client's own `IV_*` peer-info block, pre-rendered.
    pub peer_info: String,
    /// Virtual interface type this client requests (`dev-type` in the
    /// `KeyMethodV2` options string).
    pub device_type: DeviceType,
}

/// A decrypted inbound data-channel frame, wrapped by the negotiated
/// device type once the tunnel is established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelFrame {
    /// Raw IP packet (TUN device).
    Ip(Bytes),
    /// Raw Ethernet frame (TAP device).
    Ethernet(Bytes),
}

/// Emitted exactly once, on the transition to [`OrchestratorState::Tunneled`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    /// The negotiated virtual interface type.
    pub device_type: DeviceType,
    /// Parsed pushed `ifconfig`, if present.
    pub ifconfig_v4: Option<IfConfigV4>,
    /// Parsed pushed `ifconfig-ipv6`, if present.
    pub ifconfig_v6: Option<IfConfigV6>,
}

/// Output of processing a batch of incoming wire bytes.
#[derive(Debug, Default)]
pub struct OrchestratorOutput {
    /// Decrypted frames ready to be written to the tunnel device, wrapped by
    /// negotiated device type.
    pub tunnel_packets: Vec<TunnelFrame>,
    /// Wire bytes the caller must now send back out.
    pub outgoing: Vec<Bytes>,
    /// Emitted exactly once, on the transition to `Tunneled`.
    pub connect_packet: Option<ConnectPacket>,
}

/// Client-role top-level OpenVPN protocol state machine.
pub struct ProtocolOrchestrator {
    state: OrchestratorState,
    control: ProtocolSession,
    tls: TlsHandler,
    config: OrchestratorConfig,
    cipher_suite: CipherSuite,
    client_key_source: Option<KeySource>,
    server_key_source: Option<KeySource>,
    data_channel: Option<DataChannel>,
    push_reply: Option<PushReply>,
}

impl ProtocolOrchestrator {
    /// Create a new orchestrator. `tls` must already be configured for the
    /// target server name.
    pub fn new(tls: TlsHandler, config: OrchestratorConfig) -> Result<Self> {
        let cipher_suite = CipherSuite::from_name(&config.cipher, None)?;
        Ok(Self {
            state: OrchestratorState::Connecting,
            control: ProtocolSession::new(),
            tls,
            config,
            cipher_suite,
            client_key_source: None,
            server_key_source: None,
            data_channel: None,
            push_reply: None,
        })
    }

    /// Current top-level state.
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// The negotiated `PushReply`, once received.
    pub fn push_reply(&self) -> Option<&PushReply> {
        self.push_reply.as_ref()
    }

    /// Begin the connection: returns the initial hard-reset wire packet.
    pub fn connect(&mut self) -> Bytes {
        let packet = self.control.create_hard_reset();
        self.state = OrchestratorState::SessionReady;
        packet
    }

    /// Feed one fully-framed wire packet (post [`crate::framing::SessionFramer`],
    /// pre-demux — this orchestrator only speaks to a single peer) and drain
    /// whatever progress results.
    pub fn receive(&mut self, wire_packet: &[u8], has_tls_auth: bool) -> Result<OrchestratorOutput> {
        let mut out = OrchestratorOutput::default();

        let packet = Packet::parse(wire_packet, has_tls_auth)?;

        match packet {
            Packet::Control(ctrl) => self.handle_control(ctrl, &mut out)?,
            Packet::Data(data) => {
                if self.state != OrchestratorState::Tunneled {
                    return Err(ProtocolError::InvalidPacket(
                        "data packet received before tunnel established".into(),
                    ));
                }
                let channel = self
                    .data_channel
                    .as_mut()
                    .ok_or(ProtocolError::KeyNotAvailable(0))?;
                let parsed = crate::data::DataPacket {
                    key_id: data.header.key_id,
                    peer_id: data.peer_id,
                    payload: data.payload,
                };
                let session_header = [OpCode::DataV2.to_byte(data.header.key_id)];
                match channel.decrypt(&session_header, &parsed) {
                    Ok(DataFrame::Ping) => {
                        let echo = channel.encrypt_ping(&session_header)?;
                        out.outgoing.push(echo.serialize().freeze());
                    }
                    Ok(DataFrame::Raw(bytes)) => {
                        out.tunnel_packets.push(match self.config.device_type {
                            DeviceType::Tun => TunnelFrame::Ip(bytes),
                            DeviceType::Tap => TunnelFrame::Ethernet(bytes),
                        });
                    }
                    Err(ProtocolError::ReplayDetected) => {
                        // Drop silently; replay is recoverable, not fatal.
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if let Some(ack) = self.control.create_ack_packet() {
            out.outgoing.push(ack);
        }

        Ok(out)
    }

    fn handle_control(&mut self, ctrl: ControlPacketData, out: &mut OrchestratorOutput) -> Result<()> {
        let processed = self.control.process_control_packet(ctrl)?;

        match processed {
            ProcessedPacket::HardResetAck => {
                self.state = OrchestratorState::HandshakePending;
            }
            ProcessedPacket::TlsData(chunks) => {
                for chunk in chunks {
                    self.tls.process_incoming(&chunk)?;
                }

                if self.tls.is_handshake_complete() && self.client_key_source.is_none() {
                    self.send_key_method_v2()?;
                }

                let mut buf = [0u8; 4096];
                loop {
                    let n = self.tls.read_plaintext(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    self.handle_application_data(&buf[..n], out)?;
                }

                while let Some(tls_out) = self.tls.get_outgoing()? {
                    out.outgoing.push(self.control.create_control_packet(tls_out)?);
                }
            }
            ProcessedPacket::SoftReset | ProcessedPacket::None => {}
        }

        Ok(())
    }

    fn send_key_method_v2(&mut self) -> Result<()> {
        let source = KeySource::generate_client();
        let msg = KeyMethodV2 {
            options: format!(
                "V4,dev-type {},link-mtu 1542,tun-mtu 1500,proto UDPv4,cipher {}",
                self.config.device_type.as_str(),
                self.config.cipher
            ),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
            peer_info: Some(self.config.peer_info.clone()),
        };
        let encoded = msg.encode(&source.to_bytes());
        self.tls.write_plaintext(&encoded)?;
        self.client_key_source = Some(source);
        Ok(())
    }

    fn handle_application_data(&mut self, data: &[u8], out: &mut OrchestratorOutput) -> Result<()> {
        if self.server_key_source.is_none() {
            self.handle_key_method_v2_reply(data)?;
            return self.send_push_request(out);
        }

        let text = String::from_utf8_lossy(data);
        if text.starts_with("AUTH_FAILED") {
            self.state = OrchestratorState::ConnectionClosed;
            return Err(ProtocolError::Auth("AUTH_FAILED".into()));
        }
        if text.starts_with("PUSH_REPLY") {
            let reply = PushReply::parse(&text)?;
            self.install_data_channel(&reply)?;

            let ifconfig_v4 = reply
                .ifconfig
                .as_ref()
                .map(|(ip, mask)| parse_ifconfig_v4(&format!("{ip} {mask}")))
                .transpose()?;
            let ifconfig_v6 = reply
                .ifconfig_ipv6
                .as_deref()
                .map(parse_ifconfig_v6)
                .transpose()?;

            out.connect_packet = Some(ConnectPacket {
                device_type: self.config.device_type,
                ifconfig_v4,
                ifconfig_v6,
            });

            self.push_reply = Some(reply);
            self.state = OrchestratorState::Tunneled;
        }
        Ok(())
    }

    /// Parse the server's `KeyMethodV2` reply (its key source plus negotiated
    /// options); actual data-channel key derivation waits for `PushReply`,
    /// since whether to use the PRF or EKM path is only known once
    /// `protocol-flags` arrives.
    fn handle_key_method_v2_reply(&mut self, data: &[u8]) -> Result<()> {
        let (_reply, server_key_bytes) = KeyMethodV2::decode(data, 64)?;
        let server_source = KeySource::from_bytes(&server_key_bytes, false)?;
        if self.client_key_source.is_none() {
            return Err(ProtocolError::HandshakeFailed(
                "client key source not sent yet".into(),
            ));
        }
        self.server_key_source = Some(server_source);
        self.state = OrchestratorState::KeysExchanged;
        Ok(())
    }

    /// Derive data-channel keys (PRF or EKM, per the push reply's
    /// `protocol-flags`) and install the data channel. Clears both key
    /// sources afterward; they are single-use.
    fn install_data_channel(&mut self, reply: &PushReply) -> Result<()> {
        // The server alone decides the key-derivation path; it announces the
        // choice via the pushed `protocol-flags`, not the client's own
        // capability (that capability is advertised separately, in the
        // client's own `IV_PROTO` peer-info bit).
        let use_ekm = reply.has_tls_ekm();

        let material = if use_ekm {
            keys_from_ekm(self.tls.export_keying_material()?)
        } else {
            let client_source = self.client_key_source.as_ref().ok_or_else(|| {
                ProtocolError::HandshakeFailed("client key source missing at push reply".into())
            })?;
            let server_source = self.server_key_source.as_ref().ok_or_else(|| {
                ProtocolError::HandshakeFailed("server key source missing at push reply".into())
            })?;
            let client_sid = u64::from_be_bytes(*self.control.local_session_id());
            let server_sid = self
                .control
                .remote_session_id()
                .map(|sid| u64::from_be_bytes(*sid))
                .unwrap_or(0);
            derive_prf_keys(client_source, server_source, client_sid, server_sid)?
        };

        let encrypt_key = DataChannelKey::new(&material.client_key, self.cipher_suite);
        let decrypt_key = DataChannelKey::new(&material.server_key, self.cipher_suite);
        let mut channel = DataChannel::new(KeyId::new(0), encrypt_key, decrypt_key, false, None);
        if let Some(peer_id) = reply.peer_id {
            channel.set_peer_id(peer_id);
        }
        self.data_channel = Some(channel);

        self.client_key_source = None;
        self.server_key_source = None;
        Ok(())
    }

    fn send_push_request(&mut self, out: &mut OrchestratorOutput) -> Result<()> {
        self.tls.write_plaintext(PUSH_REQUEST)?;
        while let Some(tls_out) = self.tls.get_outgoing()? {
            out.outgoing.push(self.control.create_control_packet(tls_out)?);
        }
        self.state = OrchestratorState::PushRequested;
        Ok(())
    }

    /// Encrypt and frame an outbound IP packet for the tunnel.
    pub fn send_tunnel_packet(&mut self, ip_packet: &[u8]) -> Result<Bytes> {
        if self.state != OrchestratorState::Tunneled {
            return Err(ProtocolError::InvalidPacket("tunnel not yet established".into()));
        }
        let channel = self
            .data_channel
            .as_mut()
            .ok_or(ProtocolError::KeyNotAvailable(0))?;
        let session_header = [OpCode::DataV2.to_byte(channel.key_id())];
        let packet = channel.encrypt(&session_header, ip_packet)?;
        Ok(packet.serialize().freeze())
    }

    /// Retransmit any control packets whose timer has elapsed.
    pub fn poll_retransmits(&mut self) -> Vec<Bytes> {
        self.control.get_retransmits()
    }
}

/// An authenticated username/password pair ready to embed in `KeyMethodV2`.
pub fn auth_message_from(username: &str, password: &str) -> AuthMessage {
    AuthMessage {
        username: username.to_string(),
        password: password.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::{build_client_config, ClientTlsConfig};

    fn orchestrator() -> ProtocolOrchestrator {
        let tls_config = build_client_config(ClientTlsConfig {
            client_cert: None,
            insecure_skip_verify: true,
        })
        .unwrap();
        let tls = TlsHandler::new(tls_config, "vpn.example.com").unwrap();
        ProtocolOrchestrator::new(
            tls,
            OrchestratorConfig {
                cipher: "AES-256-GCM".to_string(),
                auth_digest: None,
                prefer_tls_ekm: false,
                username: None,
                password: None,
                peer_info: "IV_VER=2.6.0\nIV_PLAT=linux\n".to_string(),
                device_type: DeviceType::Tun,
            },
        )
        .unwrap()
    }

    #[test]
    fn connect_sends_hard_reset_and_advances_state() {
        let mut orch = orchestrator();
        assert_eq!(orch.state(), OrchestratorState::Connecting);
        let packet = orch.connect();
        assert!(!packet.is_empty());
        assert_eq!(orch.state(), OrchestratorState::SessionReady);
    }

    #[test]
    fn hard_reset_server_response_advances_to_handshake() {
        let mut orch = orchestrator();
        orch.connect();

        let server_reset = ControlPacketData {
            header: crate::packet::PacketHeader {
                opcode: OpCode::HardResetServerV2,
                key_id: KeyId::default(),
                session_id: Some([0xAB; 8]),
                hmac: None,
                packet_id: None,
                timestamp: None,
            },
            remote_session_id: None,
            acks: vec![],
            message_packet_id: None,
            payload: Bytes::new(),
        };
        let wire = Packet::Control(server_reset).serialize().freeze();

        let output = orch.receive(&wire, false).unwrap();
        assert_eq!(orch.state(), OrchestratorState::HandshakePending);
        let _ = output;
    }

    #[test]
    fn tunneled_data_ping_is_echoed_and_raw_frame_is_wrapped() {
        let mut orch = orchestrator();

        let client_source = KeySource::new(Some([0x10u8; 48]), [0x20u8; 32], [0x30u8; 32]);
        let server_source = KeySource::new(None, [0x40u8; 32], [0x50u8; 32]);
        let material = derive_prf_keys(&client_source, &server_source, 1, 2).unwrap();
        let suite = CipherSuite::from_name("AES-256-GCM", None).unwrap();

        let client_encrypt = DataChannelKey::new(&material.client_key, suite);
        let client_decrypt = DataChannelKey::new(&material.server_key, suite);
        let server_encrypt = DataChannelKey::new(&material.server_key, suite);
        let server_decrypt = DataChannelKey::new(&material.client_key, suite);

        orch.state = OrchestratorState::Tunneled;
        orch.data_channel = Some(DataChannel::new(KeyId::new(0), client_encrypt, client_decrypt, false, None));

        let mut server_side = DataChannel::new(KeyId::new(0), server_encrypt, server_decrypt, false, None);
        let session_header = [OpCode::DataV2.to_byte(KeyId::new(0))];

        let ping_packet = server_side.encrypt_ping(&session_header).unwrap();
        let wire = ping_packet.serialize().freeze();
        let output = orch.receive(&wire, false).unwrap();
        assert!(output.tunnel_packets.is_empty());
        assert_eq!(output.outgoing.len(), 1);

        let raw_packet = server_side.encrypt(&session_header, b"hello-ip").unwrap();
        let wire = raw_packet.serialize().freeze();
        let output = orch.receive(&wire, false).unwrap();
        assert_eq!(
            output.tunnel_packets,
            vec![TunnelFrame::Ip(Bytes::from_static(b"hello-ip"))]
        );
    }

    #[test]
    fn push_reply_emits_connect_packet_once() {
        let mut orch = orchestrator();

        orch.client_key_source = Some(KeySource::generate_client());
        orch.server_key_source = Some(KeySource::new(None, [0x40u8; 32], [0x50u8; 32]));

        let mut out = OrchestratorOutput::default();
        orch.handle_application_data(
            b"PUSH_REPLY,ifconfig 10.8.0.2 255.255.255.0,peer-id 5",
            &mut out,
        )
        .unwrap();

        assert_eq!(orch.state(), OrchestratorState::Tunneled);
        let connect_packet = out.connect_packet.expect("connect packet must be emitted");
        assert_eq!(connect_packet.device_type, DeviceType::Tun);
        assert_eq!(
            connect_packet.ifconfig_v4,
            Some(IfConfigV4 {
                address: "10.8.0.2".parse().unwrap(),
                prefix_len: 24,
            })
        );
        assert_eq!(connect_packet.ifconfig_v6, None);
    }
}
