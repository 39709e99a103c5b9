//! 로그 엔트리 -- 파이프라인을 흐르는 데이터의 기본 단위
//!
//! [`Entry`]는 인풋 오퍼레이터가 생성하고, 각 오퍼레이터가 순서대로
//! 소유권을 넘겨받으며 처리하는 로그 레코드입니다.
//! 본문은 [`Value`]로 표현되며 문자열, 바이트 시퀀스, 중첩 맵을 담을 수
//! 있습니다.

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// 엔트리 본문 값
///
/// 문자열, 원시 바이트, 또는 문자열 키를 가진 중첩 맵을 담습니다.
/// 인풋이 디코딩한 원본 형태를 그대로 보존하고, 파서/트랜스포머가
/// 맵 형태로 재구성합니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// 값 없음 (빈 본문)
    #[default]
    Null,
    /// 문자열 값
    String(String),
    /// 원시 바이트 값
    Bytes(Bytes),
    /// 중첩 맵 값
    Map(HashMap<String, Value>),
}

impl Value {
    /// 문자열 값이면 참조를 반환합니다.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// 맵 값이면 참조를 반환합니다.
    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// 값이 비어있는지 확인합니다.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// JSON 값을 엔트리 값으로 변환합니다.
    ///
    /// 0..=255 범위의 정수만 담긴 배열은 바이트 시퀀스로 취급합니다.
    /// 그 외 배열과 불리언/숫자는 텍스트 렌더링으로 문자열화합니다.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Bool(b) => Self::String(b.to_string()),
            serde_json::Value::Number(n) => Self::String(n.to_string()),
            serde_json::Value::Array(items) => match json_byte_array(&items) {
                Some(bytes) => Self::Bytes(Bytes::from(bytes)),
                None => Self::String(
                    serde_json::to_string(&items).unwrap_or_default(),
                ),
            },
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

/// 배열의 모든 원소가 0..=255 정수이면 바이트 벡터로 변환합니다.
fn json_byte_array(items: &[serde_json::Value]) -> Option<Vec<u8>> {
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

/// 로그 심각도
///
/// `Ord` 구현으로 심각도 비교가 가능합니다
/// (`Default < Trace < ... < Error3 < Fatal`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    /// 심각도 미지정
    #[default]
    Default,
    /// 추적 수준
    Trace,
    /// 디버그 수준
    Debug,
    /// 정보 수준
    Info,
    /// 정보 수준 (상위)
    Info2,
    /// 경고 수준
    Warn,
    /// 에러 수준
    Error,
    /// 에러 수준 (상위)
    Error2,
    /// 에러 수준 (최상위)
    Error3,
    /// 치명적 -- 시스템 사용 불가
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Default => "default",
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Info2 => "info2",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Error2 => "error2",
            Self::Error3 => "error3",
            Self::Fatal => "fatal",
        };
        write!(f, "{name}")
    }
}

/// 로그 엔트리
///
/// 인풋이 생성하여 다운스트림으로 전달되는 단위 레코드입니다.
/// 처리 중인 오퍼레이터만 가변 접근이 가능하며, 다운스트림으로 쓰여지면
/// 소유권이 함께 이동합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// 발생 시각 (나노초 정밀도)
    pub timestamp: SystemTime,
    /// 본문
    pub body: Value,
    /// 엔트리 단위 속성 (key-value)
    pub attributes: HashMap<String, String>,
    /// 소스 단위 리소스 정보 (key-value)
    pub resource: HashMap<String, String>,
    /// 심각도
    pub severity: Severity,
    /// 심각도 원문 표기 (예: "err", "warning")
    pub severity_text: String,
}

impl Entry {
    /// 현재 시각으로 빈 엔트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            timestamp: SystemTime::now(),
            body: Value::Null,
            attributes: HashMap::new(),
            resource: HashMap::new(),
            severity: Severity::Default,
            severity_text: String::new(),
        }
    }

    /// 본문을 지정하여 엔트리를 생성합니다.
    pub fn with_body(body: impl Into<Value>) -> Self {
        let mut entry = Self::new();
        entry.body = body.into();
        entry
    }

    /// 속성을 추가합니다. 같은 키가 있으면 덮어씁니다.
    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// 리소스 정보를 추가합니다. 같은 키가 있으면 덮어씁니다.
    pub fn add_resource(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.resource.insert(key.into(), value.into());
    }
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            Value::Null => "<empty>".to_owned(),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
            Value::Map(m) => format!("<map with {} keys>", m.len()),
        };
        write!(f, "[{}] {}", self.severity, body)
    }
}
