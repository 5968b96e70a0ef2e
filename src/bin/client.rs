//! QFT 송신기 - QUIC File Transfer
//!
//! 파일 하나 또는 컨트롤 메시지 하나를 여러 피어에 동시에 보낸다.
//! 피어마다 QUIC을 먼저 시도하고, 실패하면 TCP로 한 번 더 시도한다.
//!
//! 사용법:
//!   cargo run --release --bin qft-send -- [OPTIONS]
//!
//! 예시:
//!   # 파일 전송 (피어 직접 지정)
//!   cargo run --release --bin qft-send -- -p 100.64.0.2 -p laptop.tail.ts.net -f report.pdf
//!
//!   # 메시 상태 파일의 모든 온라인 피어에 경보 3회
//!   cargo run --release --bin qft-send -- --status status.json -m "대피하세요" -r 3

use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use qft::directory;
use qft::{Artifact, Config, ControlMessage, FanoutCoordinator, Outcome, Payload, TransferSession};

/// 송신기 실행 설정
#[derive(Default)]
struct ClientArgs {
    peers: Vec<String>,
    status_path: Option<PathBuf>,
    file: Option<PathBuf>,
    message: Option<String>,
    repeat: u8,
    config: Config,
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag}: 값이 필요함"))
}

fn parse_args() -> Result<ClientArgs, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ClientArgs {
        repeat: 1,
        ..ClientArgs::default()
    };
    let mut port: Option<u16> = None;
    let mut chunk_size: Option<usize> = None;
    let mut attempt_timeout_secs: Option<u64> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--peer" | "-p" => {
                parsed.peers.push(value(&args, i, "--peer")?.to_string());
                i += 1;
            }
            "--status" | "-s" => {
                parsed.status_path = Some(PathBuf::from(value(&args, i, "--status")?));
                i += 1;
            }
            "--file" | "-f" => {
                parsed.file = Some(PathBuf::from(value(&args, i, "--file")?));
                i += 1;
            }
            "--message" | "-m" => {
                parsed.message = Some(value(&args, i, "--message")?.to_string());
                i += 1;
            }
            "--repeat" | "-r" => {
                parsed.repeat = value(&args, i, "--repeat")?.parse()?;
                i += 1;
            }
            "--port" => {
                port = Some(value(&args, i, "--port")?.parse()?);
                i += 1;
            }
            "--chunk-size" => {
                chunk_size = Some(value(&args, i, "--chunk-size")?.parse()?);
                i += 1;
            }
            "--timeout" | "-t" => {
                attempt_timeout_secs = Some(value(&args, i, "--timeout")?.parse()?);
                i += 1;
            }
            "--low-spec" => {
                parsed.config = Config::low_spec();
            }
            "--high-performance" => {
                parsed.config = Config::high_performance();
            }
            "--help" | "-h" => {
                println!(
                    r#"QFT Sender - QUIC File Transfer 송신기

파일 또는 경보 메시지를 여러 피어에 동시 전송
- 피어마다 독립 세션 (QUIC 우선, 실패 시 TCP 대체)
- 피어가 모든 데이터를 확인해야 성공으로 기록

사용법:
  cargo run --release --bin qft-send -- [OPTIONS]

옵션:
  -p, --peer <ADDR>       대상 피어 (여러 번 지정 가능)
  -s, --status <PATH>     메시 상태 JSON (tailscale status --json)
  -f, --file <PATH>       전송할 파일
  -m, --message <TEXT>    전송할 경보 메시지 (최대 500자)
  -r, --repeat <N>        경보 반복 횟수 1~10 (기본: 1)
  --port <PORT>           대상 포트 (기본: 9999)
  --chunk-size <SIZE>     청크 크기 바이트 (기본/최대: 65536)
  -t, --timeout <SECS>    전송 시도당 제한 시간 (기본: 없음)
  --low-spec              저사양 기기용 설정
  --high-performance      고성능 기기용 설정
  -h, --help              이 도움말 출력

환경 변수:
  QFT_STATUS_PATH         --status 기본값
  TAILSCALE_STATUS_PATH   --status 기본값 (QFT_STATUS_PATH 다음)
  RUST_LOG                로그 필터 (기본: info)
"#
                );
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {other}").into()),
        }
        i += 1;
    }

    // 프리셋 위에 개별 옵션 적용
    if let Some(port) = port {
        parsed.config.port = port;
    }
    if let Some(chunk_size) = chunk_size {
        parsed.config.chunk_size = chunk_size;
    }
    if let Some(secs) = attempt_timeout_secs {
        parsed.config.attempt_timeout_ms = secs * 1000;
    }
    if parsed.status_path.is_none() {
        parsed.status_path = directory::status_path_from_env();
    }
    Ok(parsed)
}

fn build_payload(args: &ClientArgs) -> Result<Payload, Box<dyn std::error::Error>> {
    match (&args.file, &args.message) {
        (Some(path), None) => Ok(Artifact::from_path(path)?.into()),
        (None, Some(text)) => Ok(ControlMessage::new(text.as_str(), args.repeat)?.into()),
        (Some(_), Some(_)) => Err("--file과 --message는 함께 쓸 수 없음".into()),
        (None, None) => Err("--file 또는 --message가 필요함".into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args()?;
    let payload = build_payload(&args)?;

    let mut peers = args.peers.clone();
    if let Some(path) = &args.status_path {
        match directory::load_peers(path).await {
            Ok(found) => {
                info!("Status file {}: {} peers", path.display(), found.len());
                peers.extend(found);
            }
            Err(e) => warn!("상태 파일 읽기 실패 {}: {}", path.display(), e),
        }
    }
    peers.sort();
    peers.dedup();

    if peers.is_empty() {
        return Err("대상 피어 없음 (--peer 또는 --status)".into());
    }

    info!("QFT Sender starting...");
    info!("Payload: {}", payload.label());
    info!("Peers: {}", peers.join(", "));
    info!("Port: {}", args.config.port);
    info!("Chunk size: {} bytes", args.config.chunk_size);

    let coordinator = FanoutCoordinator::new(TransferSession::from_config(args.config)?);
    let report = coordinator.broadcast(payload, &peers).await;

    for attempt in &report.attempts {
        match &attempt.outcome {
            Outcome::Success { transport } => println!(
                "[✓] {:<32} {} ({} bytes, {:.2}s)",
                attempt.peer,
                transport,
                attempt.bytes_sent,
                attempt.elapsed.as_secs_f64()
            ),
            outcome => println!("[✗] {:<32} {}", attempt.peer, outcome),
        }
    }
    println!("{}", report.summary());

    if !report.all_succeeded() {
        std::process::exit(1);
    }
    Ok(())
}
