//! 수신자 (서버측)
//!
//! - 하나의 포트에서 QUIC(UDP)과 TCP를 함께 수신
//! - 연결마다 `ConnectionContext` 하나, 그 연결의 단일 태스크가 소유
//! - 완료된 아티팩트와 컨트롤 메시지를 채널로 전달

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use quinn::{ConnectionError, Endpoint, RecvStream, VarInt};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::demux::{ConnectionContext, Delivery};
use crate::message::ControlMessage;
use crate::quic::{self, ServerIdentity};
use crate::sink::{ArtifactStore, CompletedArtifact};
use crate::transport::{TransportEvent, TransportKind};
use crate::{Config, Result};

/// 수신 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    Artifact {
        peer: SocketAddr,
        artifact: CompletedArtifact,
    },
    Control {
        peer: SocketAddr,
        message: ControlMessage,
    },
}

impl ReceiverEvent {
    pub fn peer(&self) -> SocketAddr {
        match self {
            ReceiverEvent::Artifact { peer, .. } | ReceiverEvent::Control { peer, .. } => *peer,
        }
    }
}

/// 활성 연결 정보
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub peer: SocketAddr,
    pub kind: TransportKind,
    pub opened_at: Instant,
}

/// 연결 태스크들이 공유하는 상태 (읽기 전용 + 레지스트리)
struct Shared {
    config: Config,
    store: ArtifactStore,
    events: mpsc::Sender<ReceiverEvent>,
    connections: DashMap<u64, ConnectionInfo>,
    next_connection_id: AtomicU64,
}

impl Shared {
    fn register(&self, peer: SocketAddr, kind: TransportKind) -> u64 {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(
            id,
            ConnectionInfo {
                peer,
                kind,
                opened_at: Instant::now(),
            },
        );
        info!("[+] {} 연결 ({})", peer, kind);
        id
    }

    async fn serve_quic(self: Arc<Self>, incoming: quinn::Incoming) {
        let connection = match incoming.await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("[!] QUIC 핸드셰이크 실패: {}", e);
                return;
            }
        };
        let peer = connection.remote_address();
        let id = self.register(peer, TransportKind::Preferred);

        let (tx, rx) = mpsc::channel(self.config.event_queue);
        let reader = tokio::spawn(read_quic_streams(connection, tx, self.config.chunk_size));
        self.pump(peer, TransportKind::Preferred, rx).await;
        let _ = reader.await;
        self.connections.remove(&id);
    }

    async fn serve_tcp(self: Arc<Self>, socket: TcpStream, peer: SocketAddr) {
        let id = self.register(peer, TransportKind::Fallback);

        let (tx, rx) = mpsc::channel(self.config.event_queue);
        let reader = tokio::spawn(read_tcp_stream(socket, tx, self.config.chunk_size));
        self.pump(peer, TransportKind::Fallback, rx).await;
        let _ = reader.await;
        self.connections.remove(&id);
    }

    /// 연결 하나의 단일 디스패치 루프
    async fn pump(
        &self,
        peer: SocketAddr,
        kind: TransportKind,
        mut rx: mpsc::Receiver<TransportEvent>,
    ) {
        let mut context =
            ConnectionContext::new(peer.to_string(), self.store.clone(), self.config.max_header_size);

        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            if let Some(delivery) = context.dispatch(event).await {
                self.deliver(peer, delivery).await;
            }
            if terminal {
                break;
            }
        }

        // 리더가 종료 이벤트 없이 사라진 경우
        if context.active_streams() > 0 {
            context.dispatch(TransportEvent::ConnectionClosed).await;
        }
        info!("[-] {} 연결 종료 ({}): {}", peer, kind, context.stats().summary());
    }

    async fn deliver(&self, peer: SocketAddr, delivery: Delivery) {
        let event = match delivery {
            Delivery::Artifact(artifact) => {
                debug!(
                    "{} 아티팩트 완료: {} ({} bytes)",
                    peer,
                    artifact.path.display(),
                    artifact.total_bytes
                );
                ReceiverEvent::Artifact { peer, artifact }
            }
            Delivery::Control(message) => {
                debug!("{} 컨트롤 메시지 x{}", peer, message.repeat_count);
                ReceiverEvent::Control { peer, message }
            }
        };

        if self.events.send(event).await.is_err() {
            debug!("이벤트 수신자 없음, 전달 생략");
        }
    }
}

/// QUIC 연결의 단방향 스트림 수신
///
/// 연결이 닫혀도 이미 도착한 스트림 데이터는 모두 읽은 뒤에
/// 종료 이벤트를 보낸다.
async fn read_quic_streams(
    connection: quinn::Connection,
    tx: mpsc::Sender<TransportEvent>,
    chunk_size: usize,
) {
    let mut readers = JoinSet::new();

    let end = loop {
        tokio::select! {
            accepted = connection.accept_uni() => match accepted {
                Ok(recv) => {
                    readers.spawn(read_quic_stream(recv, tx.clone(), chunk_size));
                }
                Err(ConnectionError::ApplicationClosed(_)) | Err(ConnectionError::LocallyClosed) => {
                    break TransportEvent::ConnectionClosed;
                }
                Err(e) => break TransportEvent::ConnectionError(e.to_string()),
            },
            Some(_) = readers.join_next(), if !readers.is_empty() => {}
        }
    };

    while readers.join_next().await.is_some() {}
    let _ = tx.send(end).await;
}

async fn read_quic_stream(mut recv: RecvStream, tx: mpsc::Sender<TransportEvent>, chunk_size: usize) {
    let stream_id = recv.id().index();

    loop {
        let event = match recv.read_chunk(chunk_size, true).await {
            Ok(Some(chunk)) => TransportEvent::DataArrived {
                stream_id,
                bytes: chunk.bytes,
                is_final: false,
            },
            Ok(None) => {
                let _ = tx
                    .send(TransportEvent::DataArrived {
                        stream_id,
                        bytes: Bytes::new(),
                        is_final: true,
                    })
                    .await;
                return;
            }
            Err(e) => {
                let _ = recv.stop(VarInt::from_u32(1));
                let _ = tx
                    .send(TransportEvent::StreamReset {
                        stream_id,
                        reason: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        if tx.send(event).await.is_err() {
            return;
        }
    }
}

/// TCP 연결 = 스트림 0 하나, EOF가 종료 표시
async fn read_tcp_stream(
    mut socket: TcpStream,
    tx: mpsc::Sender<TransportEvent>,
    chunk_size: usize,
) {
    let mut buf = BytesMut::with_capacity(chunk_size);

    loop {
        buf.reserve(chunk_size);
        match socket.read_buf(&mut buf).await {
            Ok(0) => {
                let _ = tx
                    .send(TransportEvent::DataArrived {
                        stream_id: 0,
                        bytes: Bytes::new(),
                        is_final: true,
                    })
                    .await;
                let _ = tx.send(TransportEvent::ConnectionClosed).await;
                return;
            }
            Ok(_) => {
                let event = TransportEvent::DataArrived {
                    stream_id: 0,
                    bytes: buf.split().freeze(),
                    is_final: false,
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(TransportEvent::ConnectionError(e.to_string())).await;
                return;
            }
        }
    }
}

/// 수신 서버
pub struct Receiver {
    shared: Arc<Shared>,
    endpoint: Endpoint,
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown: Notify,
}

impl Receiver {
    /// 같은 포트에 TCP와 QUIC 바인드
    ///
    /// 포트 0이면 TCP가 고른 포트를 QUIC도 사용한다.
    pub async fn bind(
        config: Config,
        addr: SocketAddr,
        download_dir: impl Into<PathBuf>,
        identity: &ServerIdentity,
    ) -> Result<(Self, mpsc::Receiver<ReceiverEvent>)> {
        config.validate()?;

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let endpoint = Endpoint::server(quic::server_config(&config, identity)?, local_addr)?;

        let (events, events_rx) = mpsc::channel(config.event_queue);
        let store = ArtifactStore::new(download_dir, config.checkpoint_interval_bytes);
        debug!("다운로드 디렉터리: {}", store.dir().display());

        let shared = Arc::new(Shared {
            config,
            store,
            events,
            connections: DashMap::new(),
            next_connection_id: AtomicU64::new(0),
        });

        Ok((
            Self {
                shared,
                endpoint,
                listener,
                local_addr,
                shutdown: Notify::new(),
            },
            events_rx,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 현재 연결 목록
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.shared
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// 수신 루프 (`shutdown` 호출 시 종료)
    pub async fn run(&self) -> Result<()> {
        info!("[*] 수신 대기: {} (QUIC + TCP)", self.local_addr);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                incoming = self.endpoint.accept() => match incoming {
                    Some(incoming) => {
                        tokio::spawn(Arc::clone(&self.shared).serve_quic(incoming));
                    }
                    None => break,
                },
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        tokio::spawn(Arc::clone(&self.shared).serve_tcp(socket, peer));
                    }
                    Err(e) => warn!("[!] TCP accept 실패: {}", e),
                },
            }
        }

        info!("[*] 수신 종료");
        Ok(())
    }

    /// 수신 중지 (진행 중인 QUIC 연결도 닫힘)
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
        self.endpoint.close(VarInt::from_u32(0), b"shutdown");
    }
}
