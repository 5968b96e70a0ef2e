//! QFT 수신기 - QUIC File Transfer
//!
//! 하나의 포트에서 QUIC과 TCP(대체 전송)를 함께 받아
//! 아티팩트는 다운로드 디렉터리에 저장하고 컨트롤 메시지는 로그로 남긴다.
//!
//! 사용법:
//!   cargo run --release --bin qft-recv -- [OPTIONS]
//!
//! 예시:
//!   # 기본 수신 (0.0.0.0:9999, ~/Downloads)
//!   cargo run --release --bin qft-recv
//!
//!   # 인증서 지정 + 다른 디렉터리
//!   cargo run --release --bin qft-recv -- -o /srv/inbox --cert cert.pem --key key.pem

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use qft::{Config, Receiver, ReceiverEvent, ServerIdentity, DEFAULT_PORT};

/// 수신기 실행 설정
struct ServerArgs {
    bind_addr: SocketAddr,
    output_dir: PathBuf,
    identity: ServerIdentity,
    config: Config,
}

impl Default for ServerArgs {
    fn default() -> Self {
        let output_dir = std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join("Downloads"))
            .unwrap_or_else(|| PathBuf::from("downloads"));

        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            output_dir,
            identity: ServerIdentity::SelfSigned,
            config: Config::default(),
        }
    }
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag}: 값이 필요함"))
}

fn parse_args() -> Result<ServerArgs, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ServerArgs::default();
    let mut cert: Option<PathBuf> = None;
    let mut key: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                parsed.bind_addr = value(&args, i, "--bind")?.parse()?;
                i += 1;
            }
            "--output" | "-o" => {
                parsed.output_dir = PathBuf::from(value(&args, i, "--output")?);
                i += 1;
            }
            "--cert" => {
                cert = Some(PathBuf::from(value(&args, i, "--cert")?));
                i += 1;
            }
            "--key" => {
                key = Some(PathBuf::from(value(&args, i, "--key")?));
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
                    r#"QFT Receiver - QUIC File Transfer 수신기

QUIC(UDP)과 TCP 대체 전송을 같은 포트에서 수신
- 한 연결의 여러 스트림을 독립 아티팩트로 저장
- 같은 이름이 있으면 name_1, name_2 ... 로 저장

사용법:
  cargo run --release --bin qft-recv -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       바인드 주소 (기본: 0.0.0.0:9999)
  -o, --output <DIR>      저장 디렉터리 (기본: ~/Downloads)
  --cert <PATH>           PEM 인증서 체인 (없으면 자체 서명)
  --key <PATH>            PEM 개인키
  --low-spec              저사양 기기용 설정
  --high-performance      고성능 기기용 설정
  -h, --help              이 도움말 출력

환경 변수:
  RUST_LOG                로그 필터 (기본: info)
"#
                );
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {other}").into()),
        }
        i += 1;
    }

    parsed.identity = match (cert, key) {
        (Some(cert), Some(key)) => ServerIdentity::Pem { cert, key },
        (None, None) => ServerIdentity::SelfSigned,
        _ => return Err("--cert와 --key는 함께 지정해야 함".into()),
    };
    parsed.config.port = parsed.bind_addr.port();
    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args()?;

    info!("QFT Receiver starting...");
    info!("Bind address: {}", args.bind_addr);
    info!("Output directory: {}", args.output_dir.display());
    info!("Chunk size: {} bytes", args.config.chunk_size);

    let (receiver, mut events) =
        Receiver::bind(args.config, args.bind_addr, &args.output_dir, &args.identity).await?;
    info!("Receiver listening on {} (QUIC + TCP)", receiver.local_addr());

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ReceiverEvent::Artifact { peer, artifact } => {
                    info!(
                        "[✓] {} <- {}: {} ({:.2} MB)",
                        artifact.path.display(),
                        peer,
                        artifact.name,
                        artifact.total_bytes as f64 / 1024.0 / 1024.0
                    );
                }
                ReceiverEvent::Control { peer, message } => {
                    info!(
                        "[MSG] {} (x{}): {}",
                        peer, message.repeat_count, message.text
                    );
                }
            }
        }
    });

    tokio::select! {
        result = receiver.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            receiver.shutdown();
        }
    }

    printer.abort();
    Ok(())
}
