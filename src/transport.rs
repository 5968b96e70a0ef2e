//! 전송 추상화
//!
//! - 송신측: `Transport` (선호 QUIC / 대체 TCP 공통 인터페이스)
//! - 수신측: `TransportEvent` (연결 하나의 단일 디스패치 지점으로 전달)

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::chunk::Artifact;
use crate::frame;
use crate::message::Payload;
use crate::stats::TransferStats;
use crate::{Config, Error, Result, StreamId};

/// 전송 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// 다중 스트림 QUIC
    Preferred,

    /// 단일 스트림 TCP
    Fallback,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Preferred => write!(f, "QUIC"),
            TransportKind::Fallback => write!(f, "TCP fallback"),
        }
    }
}

/// 송신 전송 인터페이스
///
/// `send`는 페이로드 하나를 피어 하나에 끝까지 전달하고 페이로드 바이트 수를
/// 돌려준다. 반환된 future를 drop하면 하부 연결도 닫혀야 한다.
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn send(
        &self,
        peer: &str,
        payload: &Payload,
    ) -> impl Future<Output = Result<u64>> + Send;
}

/// 수신측 연결 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// 스트림 데이터 (`is_final`이면 이후 바이트 없음)
    DataArrived {
        stream_id: StreamId,
        bytes: Bytes,
        is_final: bool,
    },

    /// 스트림이 완료 전에 끊김
    StreamReset { stream_id: StreamId, reason: String },

    /// 정상 종료
    ConnectionClosed,

    /// 비정상 종료
    ConnectionError(String),
}

impl TransportEvent {
    /// 이후 이벤트가 없는지
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransportEvent::ConnectionClosed | TransportEvent::ConnectionError(_)
        )
    }
}

/// 페이로드를 헤더 + 청크로 기록
///
/// 컨트롤 메시지는 한 번에, 아티팩트는 `chunk_size` 단위로 쓰고
/// `yield_interval_bytes`마다 양보한다. 쓰기 에러는 전송 실패, 읽기 에러는
/// 저장소 실패로 분류된다.
pub(crate) async fn write_payload<W>(
    writer: &mut W,
    payload: &Payload,
    config: &Config,
    peer: &str,
    kind: TransportKind,
) -> Result<TransferStats>
where
    W: AsyncWrite + Unpin + Send,
{
    match payload {
        Payload::Control(message) => {
            let unit = frame::encode_control_header(message)?;
            writer.write_all(&unit).await.map_err(Error::transport)?;
            Ok(TransferStats::new())
        }
        Payload::Artifact(artifact) => write_artifact(writer, artifact, config, peer, kind).await,
    }
}

async fn write_artifact<W>(
    writer: &mut W,
    artifact: &Artifact,
    config: &Config,
    peer: &str,
    kind: TransportKind,
) -> Result<TransferStats>
where
    W: AsyncWrite + Unpin + Send,
{
    let header = frame::encode_artifact_header(artifact.name())?;
    let mut reader = artifact.open(config.chunk_size).await?;
    writer.write_all(&header).await.map_err(Error::transport)?;

    let mut stats = TransferStats::new();
    let mut since_yield = 0u64;
    let mut next_report = config.progress_interval_bytes;

    while let Some(chunk) = reader.next_chunk().await? {
        writer.write_all(&chunk).await.map_err(Error::transport)?;
        stats.record_chunk(chunk.len());
        since_yield += chunk.len() as u64;

        if since_yield >= config.yield_interval_bytes {
            since_yield = 0;
            stats.yields += 1;
            tokio::task::yield_now().await;
        }

        if config.progress_interval_bytes > 0 && stats.total_bytes >= next_report {
            info!(
                "[=] {} :: {:.1} MB 전송 ({})",
                peer,
                stats.total_bytes as f64 / 1024.0 / 1024.0,
                kind
            );
            next_report += config.progress_interval_bytes;
        }
    }

    writer.flush().await.map_err(Error::transport)?;
    debug!("{} -> {} ({}): {}", artifact.name(), peer, kind, stats.summary());
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ControlMessage;

    #[tokio::test]
    async fn test_write_artifact_framing() {
        let config = Config {
            chunk_size: 4,
            yield_interval_bytes: 4,
            ..Config::default()
        };
        let payload = Payload::Artifact(Artifact::from_bytes("a.txt", &b"0123456789"[..]));

        let mut out: Vec<u8> = Vec::new();
        let stats = write_payload(&mut out, &payload, &config, "peer", TransportKind::Fallback)
            .await
            .unwrap();

        assert_eq!(out, b"a.txt\x000123456789");
        assert_eq!(stats.total_bytes, 10);
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.yields, 2);
    }

    #[tokio::test]
    async fn test_write_control_unit() {
        let payload = Payload::Control(ControlMessage::new("drill", 2).unwrap());
        let mut out: Vec<u8> = Vec::new();
        let stats = write_payload(&mut out, &payload, &Config::default(), "peer", TransportKind::Preferred)
            .await
            .unwrap();

        assert_eq!(out, b"MSG:2|drill\x00");
        assert_eq!(stats.total_bytes, 0);
    }

    #[test]
    fn test_terminal_events() {
        assert!(TransportEvent::ConnectionClosed.is_terminal());
        assert!(TransportEvent::ConnectionError("reset".into()).is_terminal());
        assert!(!TransportEvent::DataArrived {
            stream_id: 0,
            bytes: Bytes::new(),
            is_final: true
        }
        .is_terminal());
    }
}
