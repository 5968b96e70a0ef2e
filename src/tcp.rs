//! 대체 전송: 단일 스트림 TCP
//!
//! 페이로드마다 새 연결을 열고, 헤더 + 본문을 쓴 뒤 쓰기 방향을 닫는다.
//! 쓰기 종료(EOF)가 곧 완료 표시다. 다중화는 하지 않는다.

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::message::Payload;
use crate::quic::resolve;
use crate::transport::{write_payload, Transport, TransportKind};
use crate::{Config, Error, Result};

/// TCP 송신 전송
#[derive(Debug, Clone)]
pub struct TcpTransport {
    config: Config,
}

impl TcpTransport {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    async fn connect(&self, peer: &str) -> Result<TcpStream> {
        let addr = resolve(peer, self.config.port).await?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_send_buffer_size(self.config.tcp_send_buffer)?;

        let stream = timeout(self.config.connect_timeout(), socket.connect(addr))
            .await
            .map_err(|_| Error::Timeout { stage: "connect" })?
            .map_err(Error::transport)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Fallback
    }

    async fn send(&self, peer: &str, payload: &Payload) -> Result<u64> {
        info!("[*] TCP 시도: {}:{}", peer, self.config.port);
        let mut stream = self.connect(peer).await?;
        debug!("[✓] TCP 연결: {}", peer);

        let stats = write_payload(
            &mut stream,
            payload,
            &self.config,
            peer,
            TransportKind::Fallback,
        )
        .await?;

        stream.shutdown().await.map_err(Error::transport)?;
        Ok(stats.total_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Artifact;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_single_stream_ends_with_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let reader = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let transport = TcpTransport::new(Config {
            port,
            ..Config::default()
        });
        let payload = Payload::Artifact(Artifact::from_bytes("notes.md", &b"# title"[..]));
        let sent = transport.send("127.0.0.1", &payload).await.unwrap();

        assert_eq!(sent, 7);
        assert_eq!(reader.await.unwrap(), b"notes.md\0# title");
    }

    #[tokio::test]
    async fn test_refused_is_transport_error() {
        // 바인드 후 바로 닫아서 사용 중이지 않은 포트 확보
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let transport = TcpTransport::new(Config {
            port,
            ..Config::default()
        });
        let payload = Payload::Artifact(Artifact::from_bytes("x", &b"1"[..]));
        let err = transport.send("127.0.0.1", &payload).await.unwrap_err();
        assert_eq!(err.kind(), crate::FailureKind::Transport);
    }
}
