//! 전송 통계

use std::time::{Duration, Instant};

/// 송신 통계 (아티팩트 하나, 시도 하나)
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 전송한 페이로드 바이트 (헤더 제외)
    pub total_bytes: u64,

    /// 전송한 청크 수
    pub total_chunks: u64,

    /// 흐름 제어 양보 횟수
    pub yields: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_bytes: 0,
            total_chunks: 0,
            yields: 0,
        }
    }

    /// 청크 기록
    pub fn record_chunk(&mut self, size: usize) {
        self.total_chunks += 1;
        self.total_bytes += size as u64;
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 전체 처리율 (bytes/sec)
    pub fn overall_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Bytes: {} | Chunks: {} | Yields: {} | Throughput: {:.2} MB/s",
            self.elapsed().as_secs_f64(),
            self.total_bytes,
            self.total_chunks,
            self.yields,
            self.overall_throughput() / 1_000_000.0,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 수신 통계 (연결 하나)
#[derive(Debug, Clone, Default)]
pub struct ReceiveStats {
    /// 완료된 아티팩트 수
    pub artifacts_completed: u64,

    /// 수신한 컨트롤 메시지 수
    pub control_messages: u64,

    /// 싱크로 전달된 페이로드 바이트
    pub bytes_received: u64,

    /// 프레이밍 에러로 종료된 스트림 수
    pub framing_errors: u64,

    /// 저장소 에러로 종료된 스트림 수
    pub storage_failures: u64,

    /// 완료 전에 끊긴 스트림 수 (리셋/연결 종료)
    pub aborted_streams: u64,
}

impl ReceiveStats {
    /// 종료된 스트림 수 (성공 + 실패)
    pub fn streams_seen(&self) -> u64 {
        self.artifacts_completed
            + self.control_messages
            + self.framing_errors
            + self.storage_failures
            + self.aborted_streams
    }

    pub fn summary(&self) -> String {
        format!(
            "Artifacts: {} | Messages: {} | Bytes: {} | Framing errors: {} | Storage failures: {} | Aborted: {}",
            self.artifacts_completed,
            self.control_messages,
            self.bytes_received,
            self.framing_errors,
            self.storage_failures,
            self.aborted_streams,
        )
    }
}
