//! TLS Integration for OpenVPN Control Channel
//!
//! Bridges rustls' client-role state machine with the control channel:
//! feeds it raw TLS record bytes pulled off the wire, drains bytes it
//! wants to send, and once the handshake completes, carries
//! `KeyMethodV2`/`PushRequest`/`PushReply` as TLS application data. Also
//! exports the EKM-path key material (§4.9) when `tls-ekm` is negotiated.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::{ProtocolError, Result};

/// Client-role TLS handler for the OpenVPN control channel.
pub struct TlsHandler {
    conn: ClientConnection,
    incoming: BytesMut,
    outgoing: BytesMut,
    handshake_complete: bool,
}

impl TlsHandler {
    /// Create a new client-side TLS handler for the given server name.
    pub fn new(config: Arc<ClientConfig>, server_name: &str) -> Result<Self> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| ProtocolError::TlsError(format!("invalid server name {server_name}")))?;
        let conn = ClientConnection::new(config, name)
            .map_err(|e| ProtocolError::TlsError(e.to_string()))?;

        Ok(Self {
            conn,
            incoming: BytesMut::with_capacity(16384),
            outgoing: BytesMut::with_capacity(16384),
            handshake_complete: false,
        })
    }

    /// Process incoming TLS data from the control channel.
    pub fn process_incoming(&mut self, data: &[u8]) -> Result<()> {
        self.incoming.extend_from_slice(data);
        self.process_tls()
    }

    /// Process incoming TLS records already reassembled out of control
    /// channel payloads.
    pub fn process_tls_records(&mut self, records: Vec<Bytes>) -> Result<()> {
        for record in records {
            self.incoming.extend_from_slice(&record);
        }
        self.process_tls()
    }

    fn process_tls(&mut self) -> Result<()> {
        let mut reader = &self.incoming[..];

        match self.conn.read_tls(&mut reader) {
            Ok(0) => {}
            Ok(n) => {
                let _ = self.incoming.split_to(n);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(ProtocolError::TlsError(e.to_string())),
        }

        match self.conn.process_new_packets() {
            Ok(_state) => {
                if !self.handshake_complete && !self.conn.is_handshaking() {
                    self.handshake_complete = true;
                }
            }
            Err(e) => return Err(ProtocolError::TlsError(e.to_string())),
        }

        Ok(())
    }

    /// Bytes the client should send next on the control channel, if any.
    pub fn get_outgoing(&mut self) -> Result<Option<Bytes>> {
        self.outgoing.clear();

        match self.conn.write_tls(&mut VecWriter(&mut self.outgoing)) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(self.outgoing.clone().freeze())),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(ProtocolError::TlsError(e.to_string())),
        }
    }

    /// Whether the handshake has finished.
    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    /// Whether the handshake is still in progress.
    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    /// Whether rustls has data queued to write.
    pub fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    /// Read decrypted TLS application data.
    pub fn read_plaintext(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut reader = self.conn.reader();
        match reader.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(ProtocolError::TlsError(e.to_string())),
        }
    }

    /// Queue plaintext data to be encrypted and sent.
    pub fn write_plaintext(&mut self, data: &[u8]) -> Result<usize> {
        let mut writer = self.conn.writer();
        match writer.write(data) {
            Ok(n) => Ok(n),
            Err(e) => Err(ProtocolError::TlsError(e.to_string())),
        }
    }

    /// The server's certificate chain, once received.
    pub fn peer_certificates(&self) -> Option<Vec<CertificateDer<'static>>> {
        self.conn
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect())
    }

    /// The negotiated cipher suite's name.
    pub fn cipher_suite(&self) -> Option<&'static str> {
        self.conn
            .negotiated_cipher_suite()
            .map(|cs| cs.suite().as_str().unwrap_or("unknown"))
    }

    /// Export keying material for the `tls-ekm` data-channel key derivation
    /// path (§4.9). `None` until the handshake has completed.
    pub fn export_keying_material(&self) -> Result<[u8; 256]> {
        let mut out = [0u8; 256];
        self.conn
            .export_keying_material(&mut out, corevpn_crypto::kdf::ekm_label().as_bytes(), None)
            .map_err(|e| ProtocolError::TlsError(e.to_string()))?;
        Ok(out)
    }
}

struct VecWriter<'a>(&'a mut BytesMut);

impl<'a> Write for VecWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Client TLS configuration: webpki-roots trust anchors plus an optional
/// client certificate for mutual-auth deployments (`cert`/`key` directives).
pub struct ClientTlsConfig {
    /// Present a client certificate (mutual TLS).
    pub client_cert: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
    /// Skip server certificate verification. Only ever set when the user
    /// explicitly configured `--insecure`; never the default.
    pub insecure_skip_verify: bool,
}

/// Build a `rustls::ClientConfig` from a [`ClientTlsConfig`] plus the
/// webpki-roots trust anchors.
pub fn build_client_config(tls: ClientTlsConfig) -> Result<Arc<ClientConfig>> {
    let builder = ClientConfig::builder();

    let builder = if tls.insecure_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
    } else {
        let roots = load_root_store();
        builder.with_root_certificates(roots)
    };

    let config = match tls.client_cert {
        Some((certs, key)) => builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| ProtocolError::TlsError(e.to_string()))?,
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

/// The standard webpki-roots trust anchor set.
pub fn load_root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

/// Load a certificate chain from PEM.
pub fn load_certs_from_pem(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut certs = Vec::new();
    for cert in rustls_pemfile::certs(&mut pem.as_bytes()) {
        match cert {
            Ok(c) => certs.push(c),
            Err(e) => return Err(ProtocolError::TlsError(format!("failed to parse cert: {e}"))),
        }
    }
    Ok(certs)
}

/// Load a private key from PEM, trying PKCS8, then RSA, then EC.
pub fn load_key_from_pem(pem: &str) -> Result<PrivateKeyDer<'static>> {
    for item in rustls_pemfile::read_all(&mut pem.as_bytes()) {
        match item {
            Ok(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(PrivateKeyDer::Pkcs8(key)),
            Ok(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(PrivateKeyDer::Pkcs1(key)),
            Ok(rustls_pemfile::Item::Sec1Key(key)) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => continue,
        }
    }
    Err(ProtocolError::TlsError("no private key found in PEM".into()))
}

/// A verifier that accepts any server certificate. Only wired up when the
/// caller explicitly opts into `--insecure`.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builds_with_default_roots() {
        let config = build_client_config(ClientTlsConfig {
            client_cert: None,
            insecure_skip_verify: false,
        });
        assert!(config.is_ok());
    }

    #[test]
    fn tls_handler_starts_handshaking() {
        let config = build_client_config(ClientTlsConfig {
            client_cert: None,
            insecure_skip_verify: true,
        })
        .unwrap();
        let handler = TlsHandler::new(config, "vpn.example.com").unwrap();
        assert!(handler.is_handshaking());
        assert!(!handler.is_handshake_complete());
    }
}
