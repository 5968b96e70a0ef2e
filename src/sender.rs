//! 전송 세션 (송신측)
//!
//! 페이로드 하나를 피어 하나에 전달한다. 선호 전송을 먼저 시도하고,
//! 실패하거나 시간 초과되면 대체 전송을 정확히 한 번 시도한다.
//! 두 시도는 절대 동시에 진행되지 않는다.

use std::fmt;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::FailureKind;
use crate::message::Payload;
use crate::quic::QuicTransport;
use crate::tcp::TcpTransport;
use crate::transport::{Transport, TransportKind};
use crate::{Config, Error, Result};

/// 시도 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Success { transport: TransportKind },
    Failed { reason: String, kind: FailureKind },
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pending => write!(f, "대기 중"),
            Outcome::Success { transport } => write!(f, "성공 ({})", transport),
            Outcome::Failed { reason, .. } => write!(f, "실패: {}", reason),
        }
    }
}

/// (페이로드, 피어) 하나의 전송 기록
#[derive(Debug, Clone)]
pub struct TransferAttempt {
    /// 페이로드 라벨 (아티팩트 이름 또는 `MSG:<n>x`)
    pub payload: String,

    pub peer: String,

    /// 마지막으로 시도한 전송 종류
    pub transport_kind: TransportKind,

    /// 성공한 시도에서 피어가 확인한 페이로드 바이트
    ///
    /// 실패한 시도는 피어가 어디까지 받았는지 알 수 없으므로 0으로 남는다.
    pub bytes_sent: u64,

    pub outcome: Outcome,

    /// 세션 시작부터 종료까지
    pub elapsed: Duration,
}

impl TransferAttempt {
    pub fn new(payload: impl Into<String>, peer: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            peer: peer.into(),
            transport_kind: TransportKind::Preferred,
            bytes_sent: 0,
            outcome: Outcome::Pending,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }

    /// 종료 결과 기록 (처음 한 번만 유효)
    fn conclude(&mut self, outcome: Outcome) -> bool {
        if self.is_terminal() {
            debug!("{} -> {}: 이미 종료된 시도", self.payload, self.peer);
            return false;
        }
        self.outcome = outcome;
        true
    }

    fn succeed(&mut self, transport: TransportKind, bytes: u64) {
        if self.conclude(Outcome::Success { transport }) {
            self.transport_kind = transport;
            self.bytes_sent = bytes;
        }
    }

    fn fail(&mut self, transport: TransportKind, error: &Error) {
        let outcome = Outcome::Failed {
            reason: error.to_string(),
            kind: error.kind(),
        };
        if self.conclude(outcome) {
            self.transport_kind = transport;
        }
    }
}

/// 전송 세션
///
/// 여러 피어가 하나의 세션을 공유할 수 있다 (`run`은 `&self`).
pub struct TransferSession<P, F> {
    preferred: P,
    fallback: F,
    attempt_timeout: Option<Duration>,
}

impl TransferSession<QuicTransport, TcpTransport> {
    /// QUIC + TCP 기본 구성
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let attempt_timeout = config.attempt_timeout();
        let preferred = QuicTransport::new(config.clone())?;
        let fallback = TcpTransport::new(config);
        Ok(Self::new(preferred, fallback).with_attempt_timeout(attempt_timeout))
    }
}

impl<P, F> TransferSession<P, F>
where
    P: Transport,
    F: Transport,
{
    pub fn new(preferred: P, fallback: F) -> Self {
        Self {
            preferred,
            fallback,
            attempt_timeout: None,
        }
    }

    /// 전송 시도 하나의 상한 (초과 시 future drop으로 연결 정리)
    pub fn with_attempt_timeout(mut self, limit: Option<Duration>) -> Self {
        self.attempt_timeout = limit;
        self
    }

    pub fn preferred(&self) -> &P {
        &self.preferred
    }

    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    /// 피어 하나에 페이로드 전달
    pub async fn run(&self, peer: &str, payload: &Payload) -> TransferAttempt {
        let started = Instant::now();
        let mut attempt = TransferAttempt::new(payload.label(), peer);

        match self.try_send(&self.preferred, peer, payload).await {
            Ok(bytes) => {
                attempt.succeed(self.preferred.kind(), bytes);
            }
            Err(e) => {
                warn!(
                    "[!] {} {} 실패: {} → {} 전환",
                    peer,
                    self.preferred.kind(),
                    e,
                    self.fallback.kind()
                );
                attempt.transport_kind = self.fallback.kind();

                match self.try_send(&self.fallback, peer, payload).await {
                    Ok(bytes) => attempt.succeed(self.fallback.kind(), bytes),
                    Err(e) => {
                        warn!("[✗] {} {} 실패: {}", peer, self.fallback.kind(), e);
                        attempt.fail(self.fallback.kind(), &e);
                    }
                }
            }
        }

        attempt.elapsed = started.elapsed();
        if attempt.outcome.is_success() {
            info!(
                "[✓] {} -> {}: {} bytes ({}, {:.2}s)",
                attempt.payload,
                peer,
                attempt.bytes_sent,
                attempt.transport_kind,
                attempt.elapsed.as_secs_f64()
            );
        }
        attempt
    }

    async fn try_send<T: Transport>(&self, transport: &T, peer: &str, payload: &Payload) -> Result<u64> {
        let send = transport.send(peer, payload);
        match self.attempt_timeout {
            Some(limit) => timeout(limit, send)
                .await
                .map_err(|_| Error::Timeout { stage: "attempt" })?,
            None => send.await,
        }
    }
}
