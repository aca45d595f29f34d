//! CoreVPN CLI
//!
//! Command-line interface that drives a [`corevpn_protocol::ProtocolOrchestrator`]
//! to connect to an OpenVPN 2.6-compatible server and carry IP traffic over
//! the resulting tunnel.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use corevpn_config::ClientConfig;
use corevpn_protocol::{
    build_client_config, load_certs_from_pem, load_key_from_pem, ClientTlsConfig, DeviceType,
    OrchestratorConfig, OrchestratorState, ProtocolOrchestrator, TlsHandler, TunnelFrame,
};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "corevpn")]
#[command(about = "CoreVPN - OpenVPN 2.6-compatible client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a server using a TOML client config.
    Connect {
        /// Path to a TOML `ClientConfig` file.
        config: PathBuf,
    },

    /// Validate a client config file without connecting.
    Check {
        /// Path to a TOML `ClientConfig` file.
        config: PathBuf,
    },

    /// Parse an existing `.ovpn` file and print the directives found.
    Inspect {
        /// Path to an `.ovpn` file.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Connect { config } => {
            let config = ClientConfig::load(&config).context("loading client config")?;
            run_connect(config).await
        }
        Commands::Check { config } => {
            let config = ClientConfig::load(&config).context("loading client config")?;
            println!("config ok: {} -> {}:{}", config.name, config.remote_host, config.remote_port);
            println!("primary cipher: {}", config.primary_cipher()?);
            Ok(())
        }
        Commands::Inspect { path } => {
            let text = std::fs::read_to_string(&path).context("reading .ovpn file")?;
            let parsed = corevpn_config::parse_ovpn_directives(&text)?;
            for key in parsed.directives.keys() {
                let value = parsed.directives.get(key).unwrap();
                match corevpn_protocol::options::as_string(value) {
                    Some(v) => println!("{key} = {v}"),
                    None => println!("{key}"),
                }
            }
            for tag in parsed.inline_blocks.keys() {
                println!("<{tag}> block present");
            }
            Ok(())
        }
    }
}

async fn run_connect(config: ClientConfig) -> Result<()> {
    if config.protocol != "udp" {
        return Err(anyhow!("only the udp transport is implemented by this client"));
    }

    let tls_config = build_tls_config(&config)?;
    let tls = TlsHandler::new(tls_config, &config.remote_host)?;

    let orchestrator_config = OrchestratorConfig {
        cipher: config.primary_cipher()?.to_string(),
        auth_digest: None,
        prefer_tls_ekm: config.use_key_material_exporters,
        username: config.username.clone(),
        password: config.password.clone(),
        peer_info: render_peer_info(&config),
        device_type: DeviceType::Tun,
    };

    let mut orchestrator = ProtocolOrchestrator::new(tls, orchestrator_config)?;

    let socket = UdpSocket::bind("0.0.0.0:0").await.context("binding local UDP socket")?;
    socket
        .connect((config.remote_host.as_str(), config.remote_port))
        .await
        .context("connecting UDP socket")?;

    let hard_reset = orchestrator.connect();
    socket.send(&hard_reset).await?;
    info!(state = ?orchestrator.state(), "sent hard reset");

    let mut buf = [0u8; 2048];
    loop {
        let retransmits = orchestrator.poll_retransmits();
        for packet in retransmits {
            socket.send(&packet).await?;
        }

        let n = tokio::time::timeout(std::time::Duration::from_secs(5), socket.recv(&mut buf))
            .await
            .context("timed out waiting for server response")??;

        let output = match orchestrator.receive(&buf[..n], config.tls_crypt_key.is_some()) {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "dropping unreadable packet");
                continue;
            }
        };

        for packet in output.outgoing {
            socket.send(&packet).await?;
        }

        for frame in output.tunnel_packets {
            match frame {
                TunnelFrame::Ip(bytes) => debug!(bytes = bytes.len(), "received IP packet"),
                TunnelFrame::Ethernet(bytes) => debug!(bytes = bytes.len(), "received Ethernet frame"),
            }
        }

        if let Some(connect_packet) = output.connect_packet {
            info!(
                device_type = ?connect_packet.device_type,
                ifconfig_v4 = ?connect_packet.ifconfig_v4,
                ifconfig_v6 = ?connect_packet.ifconfig_v6,
                "tunnel interface configured"
            );
        }

        if orchestrator.state() == OrchestratorState::Tunneled {
            info!("tunnel established");
            break;
        }
    }

    Ok(())
}

fn build_tls_config(config: &ClientConfig) -> Result<Arc<rustls::ClientConfig>> {
    let client_cert = match (&config.client_cert, &config.client_key) {
        (Some(cert_pem), Some(key_pem)) => {
            let certs = load_certs_from_pem(cert_pem)?;
            let key = load_key_from_pem(key_pem)?;
            Some((certs, key))
        }
        (None, None) => None,
        _ => return Err(anyhow!("client_cert and client_key must be set together")),
    };

    let tls = ClientTlsConfig {
        client_cert,
        insecure_skip_verify: config.insecure_skip_verify,
    };

    Ok(build_client_config(tls)?)
}

fn render_peer_info(config: &ClientConfig) -> String {
    let mut info = String::new();
    info.push_str("IV_VER=2.6.0\n");
    info.push_str("IV_PLAT=linux\n");
    info.push_str(&format!("IV_GUI_VER=corevpn_{}\n", config.name));
    info.push_str("IV_PROTO=2\n");
    if config.use_key_material_exporters {
        info.push_str("IV_TLS_EKM=1\n");
    }
    info
}
