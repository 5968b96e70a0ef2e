//! 프로토콜 메시지 정의
//!
//! 컨트롤 메시지는 아티팩트와 같은 프레이밍을 공유하는 우선순위 방송이다.

use crate::chunk::Artifact;
use crate::{Error, Result, MAX_CONTROL_TEXT, MAX_REPEAT_COUNT};

/// 컨트롤 메시지 (짧은 경보 텍스트)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    /// 메시지 본문 (최대 500자)
    pub text: String,

    /// 반복 횟수 (1 ~ 10)
    pub repeat_count: u8,
}

impl ControlMessage {
    /// 검증 후 생성
    pub fn new(text: impl Into<String>, repeat_count: u8) -> Result<Self> {
        let message = Self {
            text: text.into(),
            repeat_count,
        };
        message.validate()?;
        Ok(message)
    }

    /// 범위/문자 검증
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_REPEAT_COUNT).contains(&self.repeat_count) {
            return Err(Error::MalformedControl(format!(
                "반복 횟수 범위 초과: {}",
                self.repeat_count
            )));
        }
        let chars = self.text.chars().count();
        if chars > MAX_CONTROL_TEXT {
            return Err(Error::MalformedControl(format!(
                "본문 길이 초과: {chars}자 (최대 {MAX_CONTROL_TEXT})"
            )));
        }
        if self.text.contains('\0') {
            return Err(Error::MalformedControl("본문에 NUL 포함".into()));
        }
        Ok(())
    }
}

/// 전송 단위
#[derive(Debug, Clone)]
pub enum Payload {
    Artifact(Artifact),
    Control(ControlMessage),
}

impl Payload {
    /// 로그/결과 보고용 라벨
    pub fn label(&self) -> String {
        match self {
            Payload::Artifact(artifact) => artifact.name().to_string(),
            Payload::Control(message) => format!("{}{}x", crate::CONTROL_TAG, message.repeat_count),
        }
    }
}

impl From<Artifact> for Payload {
    fn from(artifact: Artifact) -> Self {
        Payload::Artifact(artifact)
    }
}

impl From<ControlMessage> for Payload {
    fn from(message: ControlMessage) -> Self {
        Payload::Control(message)
    }
}
