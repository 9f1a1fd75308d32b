//! QUIC transport built on quinn.
//!
//! Every listener generates its own self-signed certificate at bind time.
//! Dialers accept any server certificate: the TLS layer provides an
//! encrypted, multiplexed channel and node identity is established by the
//! Ping/Pong handshake that runs on top of it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{ClientConfig, Connection, Endpoint, RecvStream, SendStream, ServerConfig, TransportConfig, VarInt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tracing::debug;

use super::{IncomingRequest, Link, Listener, Reply, Transport};
use crate::error::LinkError;
use crate::message::{Message, MAX_MESSAGE_SIZE};

/// Name placed in every generated certificate and used as the SNI value.
const SERVER_NAME: &str = "localhost";

/// Keeps quiet peer links from hitting quinn's idle timeout.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);

pub struct QuicTransport {
    endpoint: Endpoint,
}

impl QuicTransport {
    /// Creates the client endpoint used for every outbound dial.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Result<Self, LinkError> {
        let bind = SocketAddr::from(([0, 0, 0, 0], 0));
        let mut endpoint = Endpoint::client(bind).map_err(|err| LinkError::Bind {
            address: bind.to_string(),
            reason: err.to_string(),
        })?;
        endpoint.set_default_client_config(client_config()?);
        Ok(Self { endpoint })
    }

    /// Waits until every outbound connection has been closed cleanly.
    pub async fn wait_idle(&self) {
        self.endpoint.wait_idle().await;
    }
}

#[async_trait]
impl Transport for QuicTransport {
    type Link = QuicLink;
    type Listener = QuicListener;

    async fn dial(&self, address: &str) -> Result<QuicLink, LinkError> {
        let dial_error = |reason: String| LinkError::Dial {
            address: address.to_string(),
            reason,
        };

        let remote = tokio::net::lookup_host(address)
            .await
            .map_err(|err| dial_error(err.to_string()))?
            .next()
            .ok_or_else(|| dial_error("address did not resolve".to_string()))?;
        let connecting = self
            .endpoint
            .connect(remote, SERVER_NAME)
            .map_err(|err| dial_error(err.to_string()))?;
        let connection = connecting.await.map_err(|err| dial_error(err.to_string()))?;

        debug!(%remote, "quic connection established");
        Ok(QuicLink { connection })
    }

    async fn listen(&self, address: &str) -> Result<QuicListener, LinkError> {
        let bind_error = |reason: String| LinkError::Bind {
            address: address.to_string(),
            reason,
        };

        let bind: SocketAddr = address
            .parse()
            .map_err(|err: std::net::AddrParseError| bind_error(err.to_string()))?;
        let endpoint = Endpoint::server(server_config().map_err(|err| bind_error(err.to_string()))?, bind)
            .map_err(|err| bind_error(err.to_string()))?;
        Ok(QuicListener {
            address: address.to_string(),
            endpoint,
        })
    }
}

pub struct QuicListener {
    address: String,
    endpoint: Endpoint,
}

#[async_trait]
impl Listener for QuicListener {
    type Link = QuicLink;

    async fn accept(&self) -> Result<QuicLink, LinkError> {
        loop {
            let incoming = self.endpoint.accept().await.ok_or(LinkError::Closed)?;
            match incoming.await {
                Ok(connection) => return Ok(QuicLink { connection }),
                // A failed handshake from one client must not stop the listener.
                Err(err) => debug!(error = %err, "inbound quic handshake failed"),
            }
        }
    }

    fn local_addr(&self) -> String {
        self.endpoint
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| self.address.clone())
    }

    async fn close(&self) {
        self.endpoint.close(VarInt::from_u32(0), b"listener closed");
    }
}

#[derive(Clone)]
pub struct QuicLink {
    connection: Connection,
}

#[async_trait]
impl Link for QuicLink {
    type Reply = QuicReply;

    fn id(&self) -> u64 {
        self.connection.stable_id() as u64
    }

    fn remote(&self) -> String {
        self.connection.remote_address().to_string()
    }

    async fn send_one_shot(&self, message: &Message) -> Result<(), LinkError> {
        let bytes = message.encode()?;
        let mut send = self.connection.open_uni().await.map_err(lost)?;
        write_and_finish(&mut send, &bytes).await?;
        debug!(remote = %self.remote(), kind = message.kind(), "sent one-shot");
        Ok(())
    }

    async fn receive_one_shot(&self) -> Result<Message, LinkError> {
        let mut recv = self.connection.accept_uni().await.map_err(lost)?;
        let message = read_message(&mut recv).await?;
        debug!(remote = %self.remote(), kind = message.kind(), "received one-shot");
        Ok(message)
    }

    async fn request(&self, message: &Message) -> Result<Message, LinkError> {
        let bytes = message.encode()?;
        let (mut send, mut recv) = self.connection.open_bi().await.map_err(lost)?;
        write_and_finish(&mut send, &bytes).await?;
        read_message(&mut recv).await
    }

    async fn accept_request(&self) -> Result<IncomingRequest<QuicReply>, LinkError> {
        let (send, mut recv) = self.connection.accept_bi().await.map_err(lost)?;
        let payload = read_message(&mut recv).await;
        Ok(IncomingRequest {
            payload,
            reply: QuicReply { send },
        })
    }

    fn close(&self) {
        self.connection.close(VarInt::from_u32(0), b"closed");
    }
}

pub struct QuicReply {
    send: SendStream,
}

#[async_trait]
impl Reply for QuicReply {
    async fn respond(mut self, message: &Message) -> Result<(), LinkError> {
        let bytes = message.encode()?;
        write_and_finish(&mut self.send, &bytes).await
    }
}

async fn write_and_finish(send: &mut SendStream, bytes: &[u8]) -> Result<(), LinkError> {
    send.write_all(bytes).await.map_err(lost)?;
    send.finish().map_err(lost)?;
    Ok(())
}

async fn read_message(recv: &mut RecvStream) -> Result<Message, LinkError> {
    let bytes = recv.read_to_end(MAX_MESSAGE_SIZE).await.map_err(|err| match err {
        quinn::ReadToEndError::TooLong => LinkError::TooLarge {
            size: MAX_MESSAGE_SIZE + 1,
            limit: MAX_MESSAGE_SIZE,
        },
        other => lost(other),
    })?;
    Message::decode(&bytes)
}

fn lost(err: impl std::fmt::Display) -> LinkError {
    LinkError::Lost(err.to_string())
}

fn transport_config() -> Arc<TransportConfig> {
    let mut transport = TransportConfig::default();
    transport.keep_alive_interval(Some(KEEP_ALIVE_INTERVAL));
    Arc::new(transport)
}

fn server_config() -> anyhow::Result<ServerConfig> {
    let certified = rcgen::generate_simple_self_signed(vec![SERVER_NAME.to_string()])?;
    let cert = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let crypto = rustls::ServerConfig::builder_with_provider(ring_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)?;
    let crypto = QuicServerConfig::try_from(crypto)?;

    let mut config = ServerConfig::with_crypto(Arc::new(crypto));
    config.transport_config(transport_config());
    Ok(config)
}

fn client_config() -> Result<ClientConfig, LinkError> {
    let config_error = |reason: String| LinkError::Bind {
        address: "client endpoint".to_string(),
        reason,
    };

    let provider = ring_provider();
    let crypto = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|err| config_error(err.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
        .with_no_client_auth();
    let crypto = QuicClientConfig::try_from(crypto).map_err(|err| config_error(err.to_string()))?;

    let mut config = ClientConfig::new(Arc::new(crypto));
    config.transport_config(transport_config());
    Ok(config)
}

fn ring_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Accepts whatever certificate the server presents, but still checks that
/// the handshake signatures are valid for it.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
