//! # QFT (QUIC File Transfer)
//!
//! 파일과 짧은 경보 메시지를 여러 피어에 동시에 보내는 다중화 전송
//!
//! ## 핵심 특징
//! - **공용 프레이밍**: `헤더 + NUL + 페이로드`, 길이 필드 없이 스트림 종료가 완료 표시
//! - **다중 스트림**: 한 연결의 여러 스트림을 수신측에서 독립 아티팩트로 복원
//! - **완료 대기**: "보냄"이 아니라 피어가 ACK한 시점을 성공으로 본다
//! - **자동 대체**: QUIC 실패 시 같은 포트의 단일 스트림 TCP로 한 번 재시도
//! - **팬아웃**: 피어마다 독립 세션, 한 피어의 실패가 다른 피어를 막지 않음
//! - **내구성**: fsync 후 권한 적용, 그 다음에야 완료 신호

pub mod chunk;
pub mod config;
pub mod demux;
pub mod directory;
pub mod error;
pub mod fanout;
pub mod frame;
pub mod message;
pub mod quic;
pub mod receiver;
pub mod sender;
pub mod sink;
pub mod stats;
pub mod tcp;
pub mod transport;

pub use chunk::{Artifact, ArtifactSource, ChunkReader};
pub use config::Config;
pub use demux::{ConnectionContext, Delivery, StreamState};
pub use error::{Error, FailureKind, Result};
pub use fanout::{BroadcastHandle, FanoutCoordinator, FanoutReport};
pub use frame::{Decoded, FrameHeader};
pub use message::{ControlMessage, Payload};
pub use quic::{QuicTransport, ServerIdentity};
pub use receiver::{ConnectionInfo, Receiver, ReceiverEvent};
pub use sender::{Outcome, TransferAttempt, TransferSession};
pub use sink::{ArtifactStore, CompletedArtifact, SinkHandle};
pub use stats::{ReceiveStats, TransferStats};
pub use tcp::TcpTransport;
pub use transport::{Transport, TransportEvent, TransportKind};

/// 연결 안에서만 유일한 스트림 식별자
pub type StreamId = u64;

/// 피어 주소 (호스트명 또는 IP)
pub type PeerAddress = String;

/// 기본 포트 (QUIC/UDP, TCP 공용)
pub const DEFAULT_PORT: u16 = 9999;

/// QUIC ALPN
pub const ALPN: &[u8] = b"quic-file";

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 65536; // 64KB

/// 최대 청크 크기 (바이트)
pub const MAX_CHUNK_SIZE: usize = 65536;

/// 컨트롤 헤더 태그
pub const CONTROL_TAG: &str = "MSG:";

/// 컨트롤 메시지 최대 길이 (문자)
pub const MAX_CONTROL_TEXT: usize = 500;

/// 컨트롤 메시지 최대 반복 횟수
pub const MAX_REPEAT_COUNT: u8 = 10;
