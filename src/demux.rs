//! 스트림 역다중화 (수신측)
//!
//! 연결 하나의 `(stream_id, bytes, is_final)` 이벤트를 완료된 아티팩트와
//! 컨트롤 메시지로 복원한다. `ConnectionContext`는 그 연결을 담당하는
//! 태스크 하나만 소유하므로 잠금이 없다.
//!
//! 스트림 상태 전이: AwaitingHeader → ReceivingArtifact → Done (역방향 없음).
//! 에러는 해당 스트림만 종료시키고 연결은 계속 사용된다.

use std::collections::{BTreeSet, HashMap};

use bytes::BytesMut;
use tracing::{debug, info, warn};

use crate::error::FailureKind;
use crate::frame::{self, Decoded, FrameHeader};
use crate::message::ControlMessage;
use crate::sink::{ArtifactStore, CompletedArtifact, SinkHandle};
use crate::stats::ReceiveStats;
use crate::transport::TransportEvent;
use crate::{Error, Result, StreamId};

/// 스트림 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    AwaitingHeader,
    ReceivingArtifact,
    Done,
}

/// 스트림 하나의 누적 버퍼
#[derive(Debug)]
struct StreamBuffer {
    state: StreamState,

    /// 헤더 구분자 전까지의 원시 바이트
    pending: BytesMut,

    /// ReceivingArtifact에서만 Some
    sink: Option<SinkHandle>,
}

impl StreamBuffer {
    fn new() -> Self {
        Self {
            state: StreamState::AwaitingHeader,
            pending: BytesMut::new(),
            sink: None,
        }
    }
}

/// 역다중화 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Artifact(CompletedArtifact),
    Control(ControlMessage),
}

/// 종료된 스트림 ID 집합
///
/// 스트림 인덱스는 연결 안에서 0부터 차례로 늘어나므로 `floor` 아래는
/// 전부 종료된 것으로 보고, 그 위에서 먼저 끝난 ID만 따로 들고 있는다.
#[derive(Debug, Default)]
struct RetiredStreams {
    floor: StreamId,
    above: BTreeSet<StreamId>,
}

impl RetiredStreams {
    fn contains(&self, stream_id: StreamId) -> bool {
        stream_id < self.floor || self.above.contains(&stream_id)
    }

    fn insert(&mut self, stream_id: StreamId) {
        if stream_id < self.floor {
            return;
        }
        self.above.insert(stream_id);
        while self.above.remove(&self.floor) {
            self.floor += 1;
        }
    }
}

/// 연결 단위 역다중화 컨텍스트
pub struct ConnectionContext {
    peer: String,
    store: ArtifactStore,
    max_header_size: usize,
    streams: HashMap<StreamId, StreamBuffer>,

    /// 종료된 스트림 ID (연결 수명 동안 재사용 금지)
    retired: RetiredStreams,
    stats: ReceiveStats,
}

impl ConnectionContext {
    pub fn new(peer: impl Into<String>, store: ArtifactStore, max_header_size: usize) -> Self {
        Self {
            peer: peer.into(),
            store,
            max_header_size,
            streams: HashMap::new(),
            retired: RetiredStreams::default(),
            stats: ReceiveStats::default(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn stats(&self) -> &ReceiveStats {
        &self.stats
    }

    /// 진행 중인 스트림 수
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// 스트림 상태 (버퍼가 없으면 종료됐거나 본 적 없는 ID)
    pub fn stream_state(&self, stream_id: StreamId) -> Option<StreamState> {
        if self.retired.contains(stream_id) {
            return Some(StreamState::Done);
        }
        self.streams.get(&stream_id).map(|b| b.state)
    }

    /// 단일 디스패치 지점
    ///
    /// 스트림 에러는 로그와 통계로만 남기고 삼킨다.
    pub async fn dispatch(&mut self, event: TransportEvent) -> Option<Delivery> {
        match event {
            TransportEvent::DataArrived {
                stream_id,
                bytes,
                is_final,
            } => match self.on_data(stream_id, &bytes, is_final).await {
                Ok(delivery) => delivery,
                Err(e) => {
                    warn!("[!] {} 스트림 {} 종료: {}", self.peer, stream_id, e);
                    match e.kind() {
                        FailureKind::Framing => self.stats.framing_errors += 1,
                        FailureKind::Storage => self.stats.storage_failures += 1,
                        _ => self.stats.aborted_streams += 1,
                    }
                    None
                }
            },
            TransportEvent::StreamReset { stream_id, reason } => {
                if let Some(buffer) = self.streams.remove(&stream_id) {
                    warn!("[!] {} 스트림 {} 리셋: {}", self.peer, stream_id, reason);
                    abort_buffer(buffer).await;
                    self.stats.aborted_streams += 1;
                }
                self.retired.insert(stream_id);
                None
            }
            TransportEvent::ConnectionClosed => {
                self.abort_all("연결 종료").await;
                None
            }
            TransportEvent::ConnectionError(reason) => {
                warn!("[!] {} 연결 에러: {}", self.peer, reason);
                self.abort_all(&reason).await;
                None
            }
        }
    }

    /// 청크 하나 처리
    ///
    /// 에러가 나면 해당 스트림의 싱크를 정리하고 ID를 폐기한다.
    pub async fn on_data(
        &mut self,
        stream_id: StreamId,
        bytes: &[u8],
        is_final: bool,
    ) -> Result<Option<Delivery>> {
        if self.retired.contains(stream_id) {
            if bytes.is_empty() {
                return Ok(None);
            }
            return Err(Error::StreamReused { stream_id });
        }

        let mut buffer = match self.streams.remove(&stream_id) {
            Some(buffer) => buffer,
            // 바이트 없이 끝난 스트림은 버퍼를 만들지 않음
            None if bytes.is_empty() => return Ok(None),
            None => {
                debug!("{} 스트림 {} 시작", self.peer, stream_id);
                StreamBuffer::new()
            }
        };

        match self.advance(&mut buffer, bytes, is_final).await {
            Ok(delivery) => {
                if buffer.state == StreamState::Done {
                    self.retired.insert(stream_id);
                } else {
                    self.streams.insert(stream_id, buffer);
                }
                Ok(delivery)
            }
            Err(e) => {
                abort_buffer(buffer).await;
                self.retired.insert(stream_id);
                Err(e)
            }
        }
    }

    async fn advance(
        &mut self,
        buffer: &mut StreamBuffer,
        bytes: &[u8],
        is_final: bool,
    ) -> Result<Option<Delivery>> {
        match buffer.state {
            StreamState::AwaitingHeader => {
                buffer.pending.extend_from_slice(bytes);

                let (header, consumed) = match frame::decode(&buffer.pending)? {
                    Decoded::Incomplete => {
                        if buffer.pending.len() > self.max_header_size {
                            return Err(Error::HeaderTooLarge {
                                max_size: self.max_header_size,
                            });
                        }
                        if is_final {
                            return Err(Error::TruncatedHeader);
                        }
                        return Ok(None);
                    }
                    Decoded::Complete { header, consumed } => (header, consumed),
                };

                if consumed - 1 > self.max_header_size {
                    return Err(Error::HeaderTooLarge {
                        max_size: self.max_header_size,
                    });
                }

                let rest = buffer.pending.split_off(consumed);
                buffer.pending = BytesMut::new();

                match header {
                    FrameHeader::Control(message) => {
                        if !rest.is_empty() {
                            debug!(
                                "{} 컨트롤 메시지 뒤 {} bytes 무시",
                                self.peer,
                                rest.len()
                            );
                        }
                        buffer.state = StreamState::Done;
                        self.stats.control_messages += 1;
                        return Ok(Some(Delivery::Control(message)));
                    }
                    FrameHeader::Artifact { name } => {
                        info!("[↓] {} 수신 시작: {}", self.peer, name);
                        buffer.sink = Some(self.store.open(&name).await?);
                        buffer.state = StreamState::ReceivingArtifact;
                        self.write_fragment(buffer, &rest).await?;
                    }
                }
            }
            StreamState::ReceivingArtifact => {
                self.write_fragment(buffer, bytes).await?;
            }
            StreamState::Done => return Ok(None),
        }

        if !is_final {
            return Ok(None);
        }

        let Some(mut sink) = buffer.sink.take() else {
            return Ok(None);
        };
        let completed = match sink.finalize().await {
            Ok(completed) => completed,
            Err(e) => {
                buffer.sink = Some(sink);
                return Err(e);
            }
        };
        buffer.state = StreamState::Done;
        self.stats.artifacts_completed += 1;
        Ok(Some(Delivery::Artifact(completed)))
    }

    async fn write_fragment(&mut self, buffer: &mut StreamBuffer, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if let Some(sink) = buffer.sink.as_mut() {
            sink.write(bytes).await?;
            self.stats.bytes_received += bytes.len() as u64;
        }
        Ok(())
    }

    /// 열린 스트림 전부 중단 (미완료 파일 삭제)
    async fn abort_all(&mut self, reason: &str) {
        for (stream_id, buffer) in self.streams.drain() {
            debug!("{} 스트림 {} 중단: {}", self.peer, stream_id, reason);
            self.retired.insert(stream_id);
            self.stats.aborted_streams += 1;
            abort_buffer(buffer).await;
        }
    }
}

async fn abort_buffer(mut buffer: StreamBuffer) {
    if let Some(sink) = buffer.sink.take() {
        debug!("{}: 미완료 {} 바이트 폐기", sink.name(), sink.written());
        sink.abort().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn context(dir: &std::path::Path) -> ConnectionContext {
        ConnectionContext::new("127.0.0.1:50000", ArtifactStore::new(dir, 0), 64)
    }

    fn data(stream_id: StreamId, bytes: &'static [u8], is_final: bool) -> TransportEvent {
        TransportEvent::DataArrived {
            stream_id,
            bytes: Bytes::from_static(bytes),
            is_final,
        }
    }

    #[tokio::test]
    async fn test_interleaved_streams() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        let events = [
            data(0, b"a.bin\0A1", false),
            data(4, b"b.b", false),
            data(0, b"A2", false),
            data(4, b"in\0B1B2", false),
            data(0, b"A3", true),
            data(4, b"B3", true),
        ];

        let mut delivered = Vec::new();
        for event in events {
            if let Some(delivery) = ctx.dispatch(event).await {
                delivered.push(delivery);
            }
        }

        assert_eq!(delivered.len(), 2);
        assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), b"A1A2A3");
        assert_eq!(std::fs::read(dir.path().join("b.bin")).unwrap(), b"B1B2B3");
        assert_eq!(ctx.stats().artifacts_completed, 2);
        assert_eq!(ctx.stats().bytes_received, 12);
        assert_eq!(ctx.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_single_chunk_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        let delivery = ctx.on_data(0, b"report.txt\0abc", true).await.unwrap();
        match delivery {
            Some(Delivery::Artifact(done)) => {
                assert_eq!(done.name, "report.txt");
                assert_eq!(done.total_bytes, 3);
                assert_eq!(std::fs::read(done.path).unwrap(), b"abc");
            }
            other => panic!("artifact expected: {other:?}"),
        }
        assert_eq!(ctx.stream_state(0), Some(StreamState::Done));
    }

    #[tokio::test]
    async fn test_empty_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        assert!(ctx.on_data(0, b"empty.txt\0", false).await.unwrap().is_none());
        assert_eq!(ctx.stream_state(0), Some(StreamState::ReceivingArtifact));

        let delivery = ctx.on_data(0, b"", true).await.unwrap();
        assert!(matches!(
            delivery,
            Some(Delivery::Artifact(CompletedArtifact { total_bytes: 0, .. }))
        ));
        assert!(dir.path().join("empty.txt").exists());
    }

    #[tokio::test]
    async fn test_control_is_emitted_without_final() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        let delivery = ctx.dispatch(data(8, b"MSG:3|evacuate\0", false)).await;
        assert_eq!(
            delivery,
            Some(Delivery::Control(ControlMessage::new("evacuate", 3).unwrap()))
        );

        // 뒤따르는 빈 종료 청크는 조용히 무시
        assert!(ctx.dispatch(data(8, b"", true)).await.is_none());
        assert_eq!(ctx.stats().control_messages, 1);
        assert_eq!(ctx.stats().framing_errors, 0);
    }

    #[tokio::test]
    async fn test_header_split_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        assert!(ctx.on_data(0, b"MSG:2|fi", false).await.unwrap().is_none());
        assert_eq!(ctx.stream_state(0), Some(StreamState::AwaitingHeader));
        let delivery = ctx.on_data(0, b"re\0", false).await.unwrap();
        assert_eq!(
            delivery,
            Some(Delivery::Control(ControlMessage::new("fire", 2).unwrap()))
        );
    }

    #[tokio::test]
    async fn test_oversized_header_fails_only_that_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        let long = vec![b'x'; 100];
        let result = ctx.on_data(0, &long, false).await;
        assert!(matches!(result, Err(Error::HeaderTooLarge { max_size: 64 })));

        let delivery = ctx.on_data(4, b"ok.txt\0fine", true).await.unwrap();
        assert!(matches!(delivery, Some(Delivery::Artifact(_))));
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        assert!(ctx.dispatch(data(0, b"no-separator", true)).await.is_none());
        assert_eq!(ctx.stats().framing_errors, 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_reuse_after_done_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        ctx.on_data(0, b"first.txt\0x", true).await.unwrap();
        let result = ctx.on_data(0, b"MSG:1|late\0", false).await;
        assert!(matches!(result, Err(Error::StreamReused { stream_id: 0 })));

        assert!(ctx.dispatch(data(0, b"MSG:1|late\0", false)).await.is_none());
        assert_eq!(ctx.stats().framing_errors, 1);
    }

    #[tokio::test]
    async fn test_retired_ids_compact() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        for stream_id in 0..1000 {
            let delivery = ctx.dispatch(data(stream_id, b"MSG:1|tick\0", true)).await;
            assert!(matches!(delivery, Some(Delivery::Control(_))));
        }
        assert_eq!(ctx.retired.floor, 1000);
        assert_eq!(ctx.retired.above.len(), 0);

        let result = ctx.on_data(5, b"MSG:1|again\0", false).await;
        assert!(matches!(result, Err(Error::StreamReused { stream_id: 5 })));
        assert_eq!(ctx.stream_state(999), Some(StreamState::Done));
    }

    #[tokio::test]
    async fn test_retired_ids_out_of_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        // 0번이 열려 있는 동안 뒤 스트림들이 먼저 끝남
        ctx.dispatch(data(0, b"slow.bin\0part", false)).await;
        for stream_id in 1..=3 {
            ctx.dispatch(data(stream_id, b"MSG:1|fast\0", false)).await;
        }
        assert_eq!(ctx.retired.floor, 0);
        assert_eq!(ctx.retired.above.len(), 3);
        assert_eq!(ctx.stream_state(0), Some(StreamState::ReceivingArtifact));

        ctx.dispatch(data(0, b"-end", true)).await;
        assert_eq!(ctx.retired.floor, 4);
        assert_eq!(ctx.retired.above.len(), 0);
        assert_eq!(std::fs::read(dir.path().join("slow.bin")).unwrap(), b"part-end");
    }

    #[tokio::test]
    async fn test_storage_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("occupied");
        std::fs::write(&not_a_dir, b"file").unwrap();
        let mut ctx = ConnectionContext::new("peer", ArtifactStore::new(&not_a_dir, 0), 64);

        assert!(ctx.dispatch(data(0, b"doomed.bin\0data", false)).await.is_none());
        assert_eq!(ctx.stats().storage_failures, 1);

        // 이후 청크는 재사용으로 취급, 다른 스트림은 정상
        assert!(ctx.dispatch(data(0, b"more", true)).await.is_none());
        let delivery = ctx.dispatch(data(4, b"MSG:1|still here\0", false)).await;
        assert!(matches!(delivery, Some(Delivery::Control(_))));
    }

    #[tokio::test]
    async fn test_connection_close_aborts_partials() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        ctx.dispatch(data(0, b"done.txt\0ok", true)).await;
        ctx.dispatch(data(4, b"partial.bin\0half", false)).await;
        ctx.dispatch(data(8, b"pending-head", false)).await;
        assert_eq!(ctx.active_streams(), 2);

        ctx.dispatch(TransportEvent::ConnectionError("idle timeout".into()))
            .await;

        assert_eq!(ctx.active_streams(), 0);
        assert_eq!(ctx.stats().aborted_streams, 2);
        assert!(dir.path().join("done.txt").exists());
        assert!(!dir.path().join("partial.bin").exists());
    }

    #[tokio::test]
    async fn test_stream_reset_removes_partial() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        ctx.dispatch(data(4, b"video.mp4\0frames", false)).await;
        ctx.dispatch(TransportEvent::StreamReset {
            stream_id: 4,
            reason: "reset by peer".into(),
        })
        .await;

        assert!(!dir.path().join("video.mp4").exists());
        assert_eq!(ctx.stream_state(4), Some(StreamState::Done));
        assert_eq!(ctx.stats().aborted_streams, 1);
    }
}
