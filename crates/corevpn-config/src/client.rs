//! Client Runtime Configuration
//!
//! The settings a CoreVPN client needs before it can call
//! `ProtocolOrchestrator::new`/`connect`: remote endpoint, protocol,
//! certificates, data-cipher preference, and the handful of peer-info
//! fields advertised to the server. Loadable from TOML, or ingested from
//! an existing `.ovpn` file via [`parse_ovpn_directives`].

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Client runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// GUI-identifier string sent as part of peer-info.
    pub name: String,
    /// Server hostname or IP.
    pub remote_host: String,
    /// Server port.
    #[serde(default = "default_port")]
    pub remote_port: u16,
    /// Transport protocol (`udp` or `tcp`).
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// CA certificate, PEM.
    pub ca_cert: String,
    /// Client certificate, PEM (mutual TLS).
    #[serde(default)]
    pub client_cert: Option<String>,
    /// Client private key, PEM (mutual TLS).
    #[serde(default)]
    pub client_key: Option<String>,
    /// `tls-crypt` static key, if the server requires one.
    #[serde(default)]
    pub tls_crypt_key: Option<String>,
    /// Ordered data-cipher preference list (`data_ciphers`).
    #[serde(default = "default_data_ciphers")]
    pub data_ciphers: Vec<String>,
    /// Use the TLS keying-material exporter path when the server offers it.
    #[serde(default)]
    pub use_key_material_exporters: bool,
    /// `auth-user-pass` username.
    #[serde(default)]
    pub username: Option<String>,
    /// `auth-user-pass` password.
    #[serde(default)]
    pub password: Option<String>,
    /// Skip server certificate verification. Never set this outside of
    /// development against a self-signed test server.
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

fn default_port() -> u16 {
    1194
}

fn default_protocol() -> String {
    "udp".to_string()
}

fn default_data_ciphers() -> Vec<String> {
    vec!["AES-256-GCM".to_string(), "CHACHA20-POLY1305".to_string()]
}

impl ClientConfig {
    /// Load a [`ClientConfig`] from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parse a [`ClientConfig`] from a TOML string.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The client's primary data cipher, i.e. the head of `data_ciphers`.
    pub fn primary_cipher(&self) -> Result<&str> {
        self.data_ciphers
            .first()
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingField("data_ciphers".into()))
    }
}

/// One `.ovpn` inline block (`<ca>...</ca>`, `<cert>...</cert>`, etc.),
/// keyed by tag name.
pub type InlineBlocks = HashMap<String, String>;

/// The result of ingesting an `.ovpn`-style config: simple directives plus
/// any inline PEM blocks.
#[derive(Debug, Clone)]
pub struct ParsedOvpn {
    /// Directive name to its argument string, e.g. `"cipher" -> "AES-256-GCM"`.
    pub directives: corevpn_protocol::OptionMap,
    /// Inline `<tag>...</tag>` block contents.
    pub inline_blocks: InlineBlocks,
}

/// Parse an OpenVPN client `.ovpn` file into directives and inline blocks.
///
/// OpenVPN's client config format is directive-per-line
/// (`"cipher AES-256-GCM"`, `"route 10.0.0.0 255.0.0.0"`, bare flags like
/// `"nobind"`), not the `key=value` shape the Options Codec handles
/// elsewhere in this project — so this strips comments and inline blocks
/// first, then feeds the remaining lines through the same codec with `'\n'`
/// as the entry separator and `' '` as the key/value separator, reusing its
/// null-vs-value and repeated-key semantics as-is.
pub fn parse_ovpn_directives(text: &str) -> Result<ParsedOvpn> {
    let mut inline_blocks = InlineBlocks::new();
    let mut plain_lines = Vec::new();
    let mut current_block: Option<(String, Vec<String>)> = None;

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some((tag, body)) = current_block.as_mut() {
            if trimmed == format!("</{tag}>") {
                let (tag, body) = current_block.take().unwrap();
                inline_blocks.insert(tag, body.join("\n"));
            } else {
                body.push(line.to_string());
            }
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix('<') {
            if let Some(tag) = rest.strip_suffix('>') {
                if let Some(name) = tag.strip_prefix('/') {
                    return Err(ConfigError::ValidationError(format!(
                        "unmatched closing block </{name}>"
                    )));
                }
                current_block = Some((tag.to_string(), Vec::new()));
                continue;
            }
        }

        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        plain_lines.push(trimmed.to_string());
    }

    if current_block.is_some() {
        return Err(ConfigError::ValidationError("unterminated inline block".into()));
    }

    let directives = corevpn_protocol::options::parse(&plain_lines.join("\n"), '\n', ' ')
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    Ok(ParsedOvpn {
        directives,
        inline_blocks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TOML: &str = r#"
name = "laptop"
remote_host = "vpn.example.com"
ca_cert = "-----BEGIN CERTIFICATE-----\nCA\n-----END CERTIFICATE-----"
"#;

    #[test]
    fn loads_with_defaults() {
        let config = ClientConfig::from_toml(SAMPLE_TOML).unwrap();
        assert_eq!(config.remote_port, 1194);
        assert_eq!(config.protocol, "udp");
        assert_eq!(config.primary_cipher().unwrap(), "AES-256-GCM");
    }

    #[test]
    fn toml_roundtrip() {
        let config = ClientConfig::from_toml(SAMPLE_TOML).unwrap();
        let text = config.to_toml().unwrap();
        let reparsed = ClientConfig::from_toml(&text).unwrap();
        assert_eq!(reparsed.remote_host, config.remote_host);
    }

    #[test]
    fn parses_directives_and_inline_blocks() {
        let ovpn = "client\ndev tun\nremote vpn.example.com 1194\ncipher AES-256-GCM\n# comment\n<ca>\nLINE1\nLINE2\n</ca>\n";
        let parsed = parse_ovpn_directives(ovpn).unwrap();

        assert_eq!(
            corevpn_protocol::options::as_string(parsed.directives.get("remote").unwrap()),
            Some("vpn.example.com 1194".to_string())
        );
        assert_eq!(
            corevpn_protocol::options::as_string(parsed.directives.get("cipher").unwrap()),
            Some("AES-256-GCM".to_string())
        );
        assert_eq!(parsed.directives.get("client"), Some(&corevpn_protocol::options::OptionValue::Null));
        assert_eq!(parsed.inline_blocks.get("ca"), Some(&"LINE1\nLINE2".to_string()));
    }

    #[test]
    fn rejects_unterminated_block() {
        let ovpn = "<ca>\nLINE1\n";
        assert!(parse_ovpn_directives(ovpn).is_err());
    }
}
