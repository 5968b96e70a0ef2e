//! 127.0.0.1 왕복 테스트 (실제 QUIC / TCP)

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use quinn::{Endpoint, VarInt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use qft::quic::client_config;
use qft::{
    Artifact, Config, ControlMessage, Outcome, Payload, QuicTransport, Receiver, ReceiverEvent,
    ServerIdentity, TcpTransport, TransferSession, Transport, TransportKind,
};

const WAIT: Duration = Duration::from_secs(10);

async fn start_receiver(dir: &Path) -> (Arc<Receiver>, mpsc::Receiver<ReceiverEvent>, Config) {
    let (receiver, events) = Receiver::bind(
        Config::default(),
        "127.0.0.1:0".parse().unwrap(),
        dir,
        &ServerIdentity::SelfSigned,
    )
    .await
    .unwrap();

    let config = Config {
        port: receiver.local_addr().port(),
        chunk_size: 16 * 1024,
        ..Config::default()
    };

    let receiver = Arc::new(receiver);
    let server = Arc::clone(&receiver);
    tokio::spawn(async move { server.run().await });
    (receiver, events, config)
}

async fn next_event(events: &mut mpsc::Receiver<ReceiverEvent>) -> ReceiverEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("receiver event timed out")
        .expect("receiver channel closed")
}

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_quic_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let (receiver, mut events, config) = start_receiver(dir.path()).await;

    let data = sample(300 * 1024);
    let session = TransferSession::from_config(config).unwrap();
    let payload = Payload::Artifact(Artifact::from_bytes("big.bin", data.clone()));

    let attempt = session.run("127.0.0.1", &payload).await;
    assert_eq!(
        attempt.outcome,
        Outcome::Success {
            transport: TransportKind::Preferred
        }
    );
    assert_eq!(attempt.bytes_sent, data.len() as u64);

    match next_event(&mut events).await {
        ReceiverEvent::Artifact { artifact, .. } => {
            assert_eq!(artifact.name, "big.bin");
            assert_eq!(artifact.total_bytes, data.len() as u64);
            assert_eq!(std::fs::read(&artifact.path).unwrap(), data);
        }
        other => panic!("artifact expected: {other:?}"),
    }
    receiver.shutdown();
}

#[tokio::test]
async fn test_control_message_over_quic() {
    let dir = tempfile::tempdir().unwrap();
    let (receiver, mut events, config) = start_receiver(dir.path()).await;

    let message = ControlMessage::new("지진 대피 훈련", 3).unwrap();
    let session = TransferSession::from_config(config).unwrap();
    let attempt = session.run("127.0.0.1", &Payload::Control(message.clone())).await;
    assert!(attempt.outcome.is_success());

    match next_event(&mut events).await {
        ReceiverEvent::Control { message: received, .. } => assert_eq!(received, message),
        other => panic!("control expected: {other:?}"),
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    receiver.shutdown();
}

#[tokio::test]
async fn test_falls_back_to_tcp() {
    let dir = tempfile::tempdir().unwrap();
    let (receiver, mut events, config) = start_receiver(dir.path()).await;

    // 아무도 응답하지 않는 UDP 포트
    let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let quic_config = Config {
        port: silent.local_addr().unwrap().port(),
        connect_timeout_ms: 300,
        ..config.clone()
    };

    let session = TransferSession::new(
        QuicTransport::new(quic_config).unwrap(),
        TcpTransport::new(config),
    );
    let data = sample(70 * 1024);
    let payload = Payload::Artifact(Artifact::from_bytes("fallback.bin", data.clone()));

    let attempt = session.run("127.0.0.1", &payload).await;
    assert_eq!(
        attempt.outcome,
        Outcome::Success {
            transport: TransportKind::Fallback
        }
    );

    match next_event(&mut events).await {
        ReceiverEvent::Artifact { artifact, .. } => {
            assert_eq!(artifact.name, "fallback.bin");
            assert_eq!(std::fs::read(&artifact.path).unwrap(), data);
        }
        other => panic!("artifact expected: {other:?}"),
    }
    receiver.shutdown();
}

#[tokio::test]
async fn test_name_collision_keeps_original() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("report.txt"), b"original").unwrap();
    let (receiver, mut events, config) = start_receiver(dir.path()).await;

    let transport = TcpTransport::new(config);
    let payload = Payload::Artifact(Artifact::from_bytes("report.txt", &b"abc"[..]));
    assert_eq!(transport.send("127.0.0.1", &payload).await.unwrap(), 3);

    match next_event(&mut events).await {
        ReceiverEvent::Artifact { artifact, .. } => {
            assert_eq!(artifact.path, dir.path().join("report_1.txt"));
            assert_eq!(artifact.total_bytes, 3);
        }
        other => panic!("artifact expected: {other:?}"),
    }
    assert_eq!(std::fs::read(dir.path().join("report.txt")).unwrap(), b"original");
    assert_eq!(std::fs::read(dir.path().join("report_1.txt")).unwrap(), b"abc");
    receiver.shutdown();
}

#[tokio::test]
async fn test_interleaved_streams_on_one_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (receiver, mut events, config) = start_receiver(dir.path()).await;

    let mut endpoint = Endpoint::client("127.0.0.1:0".parse().unwrap()).unwrap();
    endpoint.set_default_client_config(client_config(&config).unwrap());
    let addr = format!("127.0.0.1:{}", config.port).parse().unwrap();
    let connection = endpoint.connect(addr, "localhost").unwrap().await.unwrap();

    let mut a = connection.open_uni().await.unwrap();
    let mut b = connection.open_uni().await.unwrap();
    a.write_all(b"a.txt\0A1").await.unwrap();
    b.write_all(b"b.txt\0B1").await.unwrap();
    a.write_all(b"A2").await.unwrap();
    b.write_all(b"B2").await.unwrap();
    a.finish().unwrap();
    b.finish().unwrap();
    assert_eq!(a.stopped().await.unwrap(), None);
    assert_eq!(b.stopped().await.unwrap(), None);
    connection.close(VarInt::from_u32(0), b"done");

    let mut received = Vec::new();
    for _ in 0..2 {
        match next_event(&mut events).await {
            ReceiverEvent::Artifact { artifact, .. } => received.push(artifact),
            other => panic!("artifact expected: {other:?}"),
        }
    }
    received.sort_by(|x, y| x.name.cmp(&y.name));

    assert_eq!(received[0].name, "a.txt");
    assert_eq!(std::fs::read(&received[0].path).unwrap(), b"A1A2");
    assert_eq!(received[1].name, "b.txt");
    assert_eq!(std::fs::read(&received[1].path).unwrap(), b"B1B2");
    receiver.shutdown();
}
