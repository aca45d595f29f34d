//! OpenVPN Protocol Implementation
//!
//! This crate implements the OpenVPN protocol for compatibility with
//! standard OpenVPN clients.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod bytepipe;
pub mod codec;
pub mod control;
pub mod data;
pub mod demux;
pub mod error;
pub mod framing;
pub mod ifconfig;
pub mod ooo;
pub mod opcode;
pub mod options;
pub mod orchestrator;
pub mod packet;
pub mod reliable;
pub mod session;
pub mod tls;
pub mod tlscrypt;

pub use bytepipe::BytePipe;
pub use codec::{PacketReader, PacketWriter};
pub use control::{AuthMessage, ControlMessage, ControlPacket, KeyMethodV2, PushReply, Topology};
pub use data::{DataChannel, DataFrame, DataPacket, PING_IDENTIFIER};
pub use demux::{ChannelId, Demultiplexer};
pub use error::{ProtocolError, Result};
pub use framing::{pack_opcode_key_id, unpack_opcode_key_id, SessionFramer, Transport};
pub use ifconfig::{parse_ifconfig_v4, parse_ifconfig_v6, IfConfigV4, IfConfigV6};
pub use opcode::{KeyId, OpCode};
pub use options::OptionMap;
pub use ooo::OutOfOrderQueue;
pub use orchestrator::{
    ConnectPacket, DeviceType, OrchestratorConfig, OrchestratorOutput, OrchestratorState,
    ProtocolOrchestrator, TunnelFrame,
};
pub use packet::{Packet, PacketHeader};
pub use reliable::{ReliableConfig, ReliableQueue, ReliableTransport, TlsRecordReassembler};
pub use session::{ProcessedPacket, ProtocolSession, ProtocolState};
pub use tls::{
    build_client_config, load_certs_from_pem, load_key_from_pem, load_root_store, ClientTlsConfig,
    TlsHandler,
};
pub use tlscrypt::TlsCryptWrapper;
