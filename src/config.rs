//! 프로토콜 설정

use std::time::Duration;

use crate::{Error, Result, DEFAULT_CHUNK_SIZE, DEFAULT_PORT, MAX_CHUNK_SIZE};

/// 양보 간격 상한 (바이트)
pub const MAX_YIELD_INTERVAL: u64 = 1024 * 1024; // 1MB

/// QFT 전송 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// QUIC(UDP) / TCP 공용 포트
    pub port: u16,

    /// 송신 청크 크기 (바이트, 최대 64KB)
    pub chunk_size: usize,

    /// 이 바이트 수만큼 쓸 때마다 한 번 양보 (흐름 제어 신호 전파용, 최대 1MB)
    pub yield_interval_bytes: u64,

    /// 송신 진행 로그 간격 (바이트)
    pub progress_interval_bytes: u64,

    /// 수신측 내구성 체크포인트 간격 (바이트)
    pub checkpoint_interval_bytes: u64,

    /// 헤더 최대 크기 (NUL 제외)
    pub max_header_size: usize,

    /// 연결 수립 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,

    /// 완료 대기 타임아웃 (밀리초)
    pub completion_timeout_ms: u64,

    /// 완료 대기 폴링 주기 (밀리초)
    pub completion_poll_ms: u64,

    /// 전송 시도 하나의 전체 타임아웃 (밀리초)
    /// 0이면 제한 없음
    pub attempt_timeout_ms: u64,

    /// 송신측 QUIC idle 타임아웃 (밀리초)
    pub client_idle_timeout_ms: u64,

    /// 수신측 QUIC idle 타임아웃 (밀리초)
    pub server_idle_timeout_ms: u64,

    /// 연결 단위 수신 윈도우 (바이트)
    pub receive_window: u64,

    /// 스트림 단위 수신 윈도우 (바이트)
    pub stream_receive_window: u64,

    /// TCP 송신 버퍼 크기
    pub tcp_send_buffer: u32,

    /// 연결당 이벤트 큐 크기
    pub event_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            yield_interval_bytes: MAX_YIELD_INTERVAL,
            progress_interval_bytes: 10 * 1024 * 1024,  // 10MB
            checkpoint_interval_bytes: 100 * 1024 * 1024, // 100MB
            max_header_size: 4096,
            connect_timeout_ms: 30_000,                 // 30초
            completion_timeout_ms: 600_000,             // 10분
            completion_poll_ms: 100,
            attempt_timeout_ms: 0,
            client_idle_timeout_ms: 600_000,            // 10분
            server_idle_timeout_ms: 1_800_000,          // 30분
            receive_window: 1024 * 1024 * 1024,         // 1GB
            stream_receive_window: 256 * 1024 * 1024,   // 256MB
            tcp_send_buffer: 256 * 1024,                // 256KB
            event_queue: 256,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn completion_poll_interval(&self) -> Duration {
        Duration::from_millis(self.completion_poll_ms)
    }

    /// 호출자 지정 시도 타임아웃 (0이면 None)
    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_ms > 0).then(|| Duration::from_millis(self.attempt_timeout_ms))
    }

    pub fn client_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.client_idle_timeout_ms)
    }

    pub fn server_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.server_idle_timeout_ms)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "chunk_size는 1..={} 범위여야 함: {}",
                MAX_CHUNK_SIZE, self.chunk_size
            )));
        }
        if self.yield_interval_bytes == 0 || self.yield_interval_bytes > MAX_YIELD_INTERVAL {
            return Err(Error::InvalidConfig(format!(
                "yield_interval_bytes는 1..={} 범위여야 함: {}",
                MAX_YIELD_INTERVAL, self.yield_interval_bytes
            )));
        }
        if self.max_header_size == 0 {
            return Err(Error::InvalidConfig("max_header_size는 0일 수 없음".into()));
        }
        if self.completion_poll_ms == 0 {
            return Err(Error::InvalidConfig("completion_poll_ms는 0일 수 없음".into()));
        }
        if self.event_queue == 0 {
            return Err(Error::InvalidConfig("event_queue는 0일 수 없음".into()));
        }
        Ok(())
    }

    /// 저사양 기기용 설정
    pub fn low_spec() -> Self {
        Self {
            chunk_size: 16 * 1024,                      // 16KB
            yield_interval_bytes: 256 * 1024,           // 자주 양보
            connect_timeout_ms: 60_000,
            completion_timeout_ms: 1_200_000,           // 20분
            completion_poll_ms: 250,
            receive_window: 64 * 1024 * 1024,           // 64MB
            stream_receive_window: 16 * 1024 * 1024,    // 16MB
            tcp_send_buffer: 64 * 1024,
            event_queue: 64,
            ..Self::default()
        }
    }

    /// 고성능 기기용 설정
    pub fn high_performance() -> Self {
        Self {
            chunk_size: MAX_CHUNK_SIZE,
            yield_interval_bytes: MAX_YIELD_INTERVAL,
            completion_poll_ms: 50,
            receive_window: 4 * 1024 * 1024 * 1024,     // 4GB
            stream_receive_window: 1024 * 1024 * 1024,  // 1GB
            tcp_send_buffer: 1024 * 1024,
            event_queue: 1024,
            ..Self::default()
        }
    }
}
