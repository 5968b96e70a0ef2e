//! 피어 디렉터리 (메시 상태 파일)
//!
//! `tailscale status --json` 스냅샷에서 접속 가능한 피어 주소를 뽑는다.
//! 갱신 주기나 재시도는 상태 파일을 만드는 쪽의 책임이다.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::Result;

/// 상태 파일 경로 환경 변수 (앞쪽 우선)
pub const STATUS_PATH_VARS: [&str; 2] = ["QFT_STATUS_PATH", "TAILSCALE_STATUS_PATH"];

#[derive(Debug, Default, Deserialize)]
struct Status {
    #[serde(rename = "Self", default)]
    self_node: Option<Node>,

    #[serde(rename = "Peer", default)]
    peers: HashMap<String, Node>,
}

#[derive(Debug, Default, Deserialize)]
struct Node {
    #[serde(rename = "Online", default)]
    online: bool,

    #[serde(rename = "DNSName", default)]
    dns_name: String,

    #[serde(rename = "TailscaleIPs", default)]
    ips: Vec<String>,
}

/// 상태 JSON에서 피어 주소 추출
///
/// 온라인이고 첫 주소가 자기 주소가 아닌 피어만. DNS 이름(끝의 `.` 제거)을
/// IP보다 우선한다. 결과는 정렬, 중복 제거.
pub fn parse_status(raw: &[u8]) -> Result<Vec<String>> {
    let text = decode_text(raw);
    let status: Status = serde_json::from_str(&text)?;

    let own: BTreeSet<&str> = status
        .self_node
        .as_ref()
        .map(|node| node.ips.iter().map(String::as_str).collect())
        .unwrap_or_default();

    let mut peers = BTreeSet::new();
    for node in status.peers.values().filter(|node| node.online) {
        let Some(first_ip) = node.ips.first() else {
            continue;
        };
        if own.contains(first_ip.as_str()) {
            continue;
        }

        let dns_name = node.dns_name.trim_end_matches('.');
        let addr = if dns_name.is_empty() {
            first_ip.clone()
        } else {
            dns_name.to_string()
        };
        debug!("피어 추가: {} ({})", addr, first_ip);
        peers.insert(addr);
    }

    Ok(peers.into_iter().collect())
}

/// 상태 파일 읽기
pub async fn load_peers(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let raw = tokio::fs::read(path.as_ref()).await?;
    parse_status(&raw)
}

/// 환경 변수에 지정된 상태 파일 경로
pub fn status_path_from_env() -> Option<PathBuf> {
    STATUS_PATH_VARS
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// BOM으로 인코딩 판별 (UTF-16 LE/BE, UTF-8), 없으면 UTF-8
fn decode_text(raw: &[u8]) -> String {
    match raw {
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        _ => String::from_utf8_lossy(raw).into_owned(),
    }
}

fn decode_utf16(raw: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
