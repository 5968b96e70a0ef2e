//! 와이어 프레이밍
//!
//! 전송 단위 = 헤더 세그먼트 + NUL(0x00) 1바이트 + (아티팩트라면) 페이로드.
//!
//! - 아티팩트 헤더: `MSG:`로 시작하지 않는 임의 문자열, 목적지 이름 그대로
//! - 컨트롤 헤더: `MSG:<repeat>|<text>`, NUL 뒤에 페이로드 없음
//!
//! 길이 필드는 없다. 페이로드 끝은 스트림 종료로만 표시된다.

use bytes::{BufMut, Bytes, BytesMut};

use crate::message::ControlMessage;
use crate::{Error, Result, CONTROL_TAG};

/// 헤더 구분자
pub const SEPARATOR: u8 = 0x00;

/// 디코딩된 헤더
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameHeader {
    Artifact { name: String },
    Control(ControlMessage),
}

/// 디코딩 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// 구분자를 아직 못 봄
    Incomplete,

    /// `consumed`는 NUL을 포함한 헤더 길이
    Complete { header: FrameHeader, consumed: usize },
}

/// 아티팩트 헤더 인코딩
pub fn encode_artifact_header(name: &str) -> Result<Bytes> {
    if name.is_empty() || name.as_bytes().contains(&SEPARATOR) || name.starts_with(CONTROL_TAG) {
        return Err(Error::InvalidName(name.to_string()));
    }

    let mut buf = BytesMut::with_capacity(name.len() + 1);
    buf.put_slice(name.as_bytes());
    buf.put_u8(SEPARATOR);
    Ok(buf.freeze())
}

/// 컨트롤 헤더 인코딩
pub fn encode_control_header(message: &ControlMessage) -> Result<Bytes> {
    message.validate()?;

    let body = format!("{}{}|{}", CONTROL_TAG, message.repeat_count, message.text);
    let mut buf = BytesMut::with_capacity(body.len() + 1);
    buf.put_slice(body.as_bytes());
    buf.put_u8(SEPARATOR);
    Ok(buf.freeze())
}

/// 누적 바이트에서 헤더 디코딩
///
/// 헤더 바이트는 UTF-8로 관대하게 해석한다 (잘못된 시퀀스는 U+FFFD로 대체).
pub fn decode(buf: &[u8]) -> Result<Decoded> {
    let Some(pos) = buf.iter().position(|&b| b == SEPARATOR) else {
        return Ok(Decoded::Incomplete);
    };

    let text = String::from_utf8_lossy(&buf[..pos]);
    let header = if text.starts_with(CONTROL_TAG) {
        FrameHeader::Control(decode_control(&text[CONTROL_TAG.len()..])?)
    } else {
        FrameHeader::Artifact {
            name: text.into_owned(),
        }
    };

    Ok(Decoded::Complete {
        header,
        consumed: pos + 1,
    })
}

/// `<repeat>|<text>` 파싱
///
/// 횟수가 없거나 잘못되면 반복 1회, 나머지 전체가 본문.
fn decode_control(rest: &str) -> Result<ControlMessage> {
    let parsed = rest.split_once('|').and_then(|(count, text)| {
        count
            .parse::<u8>()
            .ok()
            .filter(|c| (1..=crate::MAX_REPEAT_COUNT).contains(c))
            .map(|c| (c, text))
    });

    let (repeat_count, text) = parsed.unwrap_or((1, rest));
    ControlMessage::new(text, repeat_count)
}
