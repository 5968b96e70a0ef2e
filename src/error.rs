//! 에러 타입 정의

use std::fmt::Display;
use std::path::PathBuf;

use thiserror::Error;

use crate::StreamId;

/// QFT 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("전송 실패: {0}")]
    Transport(String),

    #[error("타임아웃: {stage}")]
    Timeout { stage: &'static str },

    #[error("헤더 크기 초과: 최대 {max_size} bytes")]
    HeaderTooLarge { max_size: usize },

    #[error("헤더 구분자 전에 스트림 종료")]
    TruncatedHeader,

    #[error("잘못된 컨트롤 메시지: {0}")]
    MalformedControl(String),

    #[error("이미 종료된 스트림 재사용: stream_id={stream_id}")]
    StreamReused { stream_id: StreamId },

    #[error("유효하지 않은 아티팩트 이름: {0:?}")]
    InvalidName(String),

    #[error("저장소 에러 ({path}): {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("이미 완료된 아티팩트: {name}")]
    AlreadyFinalized { name: String },

    #[error("TLS 설정 에러: {0}")]
    Tls(String),

    #[error("피어 디렉터리 파싱 에러: {0}")]
    Directory(#[from] serde_json::Error),

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("연결 종료")]
    ConnectionClosed,
}

/// 실패 분류 (전송 결과 보고용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Framing,
    Storage,
    Timeout,
    Other,
}

impl Error {
    pub(crate) fn transport(reason: impl Display) -> Self {
        Error::Transport(reason.to_string())
    }

    pub(crate) fn tls(reason: impl Display) -> Self {
        Error::Tls(reason.to_string())
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    /// 에러 분류
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Transport(_) | Error::ConnectionClosed | Error::Tls(_) => FailureKind::Transport,
            Error::Timeout { .. } => FailureKind::Timeout,
            Error::HeaderTooLarge { .. }
            | Error::TruncatedHeader
            | Error::MalformedControl(_)
            | Error::StreamReused { .. }
            | Error::InvalidName(_) => FailureKind::Framing,
            Error::Storage { .. } | Error::AlreadyFinalized { .. } => FailureKind::Storage,
            Error::Io(_) | Error::Directory(_) | Error::InvalidConfig(_) => FailureKind::Other,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
