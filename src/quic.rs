//! 선호 전송: QUIC (quinn)
//!
//! 페이로드마다 연결 하나, 단방향 스트림 하나를 연다. 마지막 청크 뒤
//! 스트림을 finish하고, 피어가 모든 스트림 데이터를 ACK할 때까지
//! 완료 대기를 한다. "보냄"과 "확인됨"은 다르다.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{Connection, Endpoint, IdleTimeout, SendStream, TransportConfig, VarInt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace};

use crate::message::Payload;
use crate::transport::{write_payload, Transport, TransportKind};
use crate::{Config, Error, Result, ALPN};

/// 수신측 인증서 출처
#[derive(Debug, Clone, Default)]
pub enum ServerIdentity {
    /// 실행 시 자체 서명 인증서 생성
    #[default]
    SelfSigned,

    /// PEM 인증서 체인 + 개인키
    Pem { cert: PathBuf, key: PathBuf },
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn quic_transport_config(config: &Config, idle: Duration) -> Result<TransportConfig> {
    let mut transport = TransportConfig::default();
    transport.max_idle_timeout(Some(IdleTimeout::try_from(idle).map_err(Error::tls)?));
    transport.receive_window(VarInt::from_u64(config.receive_window).map_err(Error::tls)?);
    transport.stream_receive_window(
        VarInt::from_u64(config.stream_receive_window).map_err(Error::tls)?,
    );
    Ok(transport)
}

/// 수신측 QUIC 설정
pub fn server_config(config: &Config, identity: &ServerIdentity) -> Result<quinn::ServerConfig> {
    let (certs, key) = load_identity(identity)?;

    let mut tls = rustls::ServerConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(Error::tls)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(Error::tls)?;
    tls.alpn_protocols = vec![ALPN.to_vec()];

    let crypto = QuicServerConfig::try_from(tls).map_err(Error::tls)?;
    let mut server = quinn::ServerConfig::with_crypto(Arc::new(crypto));
    server.transport_config(Arc::new(quic_transport_config(
        config,
        config.server_idle_timeout(),
    )?));
    Ok(server)
}

fn load_identity(
    identity: &ServerIdentity,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    match identity {
        ServerIdentity::SelfSigned => {
            let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
                .map_err(Error::tls)?;
            let cert = generated.cert.der().clone();
            let key = PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der());
            debug!("자체 서명 인증서 생성");
            Ok((vec![cert], key.into()))
        }
        ServerIdentity::Pem { cert, key } => {
            let certs = CertificateDer::pem_file_iter(cert)
                .map_err(Error::tls)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(Error::tls)?;
            let key = PrivateKeyDer::from_pem_file(key).map_err(Error::tls)?;
            Ok((certs, key))
        }
    }
}

/// 송신측 QUIC 설정 (인증서 검증 없음)
pub fn client_config(config: &Config) -> Result<quinn::ClientConfig> {
    let provider = crypto_provider();
    let mut tls = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(Error::tls)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
        .with_no_client_auth();
    tls.alpn_protocols = vec![ALPN.to_vec()];

    let crypto = QuicClientConfig::try_from(tls).map_err(Error::tls)?;
    let mut client = quinn::ClientConfig::new(Arc::new(crypto));
    client.transport_config(Arc::new(quic_transport_config(
        config,
        config.client_idle_timeout(),
    )?));
    Ok(client)
}

/// 서명은 검증하고 인증서 신뢰 체인은 검사하지 않음
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
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
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
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

/// 피어 주소 해석 (IPv4 우선)
pub(crate) async fn resolve(peer: &str, port: u16) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((peer, port))
        .await
        .map_err(|e| Error::transport(format!("{peer}: 주소 해석 실패: {e}")))?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| Error::transport(format!("{peer}: 주소 없음")))
}

/// QUIC 송신 전송
pub struct QuicTransport {
    endpoint: Endpoint,
    config: Config,
}

impl QuicTransport {
    /// 클라이언트 엔드포인트 생성 (모든 세션이 공유)
    pub fn new(config: Config) -> Result<Self> {
        let bind: SocketAddr = SocketAddr::from(([0, 0, 0, 0], 0));
        let mut endpoint = Endpoint::client(bind)?;
        endpoint.set_default_client_config(client_config(&config)?);
        Ok(Self { endpoint, config })
    }

    async fn connect(&self, peer: &str) -> Result<Connection> {
        let addr = resolve(peer, self.config.port).await?;
        let connecting = self
            .endpoint
            .connect(addr, peer)
            .map_err(Error::transport)?;

        timeout(self.config.connect_timeout(), connecting)
            .await
            .map_err(|_| Error::Timeout { stage: "connect" })?
            .map_err(Error::transport)
    }

    async fn send_on(&self, connection: &Connection, peer: &str, payload: &Payload) -> Result<u64> {
        let mut stream = connection.open_uni().await.map_err(Error::transport)?;
        debug!("{} 스트림 {} 열림", peer, stream.id());

        let stats = write_payload(
            &mut stream,
            payload,
            &self.config,
            peer,
            TransportKind::Preferred,
        )
        .await?;

        stream.finish().map_err(Error::transport)?;
        info!("[i] {} 최종 확인 대기 중: '{}'", peer, payload.label());
        self.await_completion(connection, &mut stream).await?;
        Ok(stats.total_bytes)
    }

    /// 완료 대기
    ///
    /// 스트림이 끝까지 ACK되면 성공. 피어의 STOP_SENDING, 연결 종료,
    /// `completion_timeout` 초과는 모두 실패.
    async fn await_completion(&self, connection: &Connection, stream: &mut SendStream) -> Result<()> {
        let deadline = Instant::now() + self.config.completion_timeout();
        let mut ticker = tokio::time::interval(self.config.completion_poll_interval());
        let stopped = stream.stopped();
        tokio::pin!(stopped);

        loop {
            tokio::select! {
                result = &mut stopped => {
                    return match result {
                        Ok(None) => Ok(()),
                        Ok(Some(code)) => Err(Error::transport(format!("피어가 스트림 중단: code={code}"))),
                        Err(e) => Err(Error::transport(e)),
                    };
                }
                _ = ticker.tick() => {
                    if let Some(reason) = connection.close_reason() {
                        return Err(Error::transport(reason));
                    }
                    if Instant::now() >= deadline {
                        return Err(Error::Timeout { stage: "completion" });
                    }
                    let stats = connection.stats();
                    trace!(
                        "완료 대기: rtt={:?} cwnd={} lost={}",
                        stats.path.rtt,
                        stats.path.cwnd,
                        stats.path.lost_packets
                    );
                }
            }
        }
    }
}

impl Transport for QuicTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Preferred
    }

    async fn send(&self, peer: &str, payload: &Payload) -> Result<u64> {
        info!("[*] QUIC 시도: {}:{}", peer, self.config.port);
        let connection = self.connect(peer).await?;
        debug!("[✓] QUIC 연결: {}", connection.remote_address());

        let result = self.send_on(&connection, peer, payload).await;
        match &result {
            Ok(_) => connection.close(VarInt::from_u32(0), b"done"),
            Err(_) => connection.close(VarInt::from_u32(1), b"error"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_configs_build() {
        let config = Config::default();
        server_config(&config, &ServerIdentity::SelfSigned).unwrap();
        client_config(&config).unwrap();
    }

    #[test]
    fn test_missing_pem_is_tls_error() {
        let identity = ServerIdentity::Pem {
            cert: "/nonexistent/cert.pem".into(),
            key: "/nonexistent/key.pem".into(),
        };
        assert!(matches!(
            server_config(&Config::default(), &identity),
            Err(Error::Tls(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_literal() {
        let addr = resolve("127.0.0.1", 9999).await.unwrap();
        assert_eq!(addr, SocketAddr::from(([127, 0, 0, 1], 9999)));
    }
}
