//! 테스트 더블 -- 오퍼레이터 테스트용 가짜 출력
//!
//! [`FakeOutput`]은 다운스트림으로 쓰여진 엔트리를 채널에 수집하여
//! 테스트에서 검증할 수 있게 합니다. 단위 테스트와 통합 테스트가 함께
//! 사용하므로 공개 모듈입니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use logpost_core::entry::Entry;
use logpost_core::error::LogpostError;
use logpost_core::operator::{BoxFuture, Operator};

/// 받은 엔트리를 수집하는 가짜 출력 오퍼레이터
pub struct FakeOutput {
    id: String,
    output_ids: Vec<String>,
    tx: mpsc::UnboundedSender<Entry>,
    rx: Mutex<mpsc::UnboundedReceiver<Entry>>,
}

impl FakeOutput {
    /// 새 가짜 출력을 생성합니다.
    pub fn new() -> Self {
        Self::with_id("fake")
    }

    /// ID를 지정하여 가짜 출력을 생성합니다.
    pub fn with_id(id: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            id: id.into(),
            output_ids: Vec::new(),
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// 지금까지 받은 엔트리를 모두 꺼냅니다.
    pub fn take_entries(&self) -> Vec<Entry> {
        let mut entries = Vec::new();
        if let Ok(mut rx) = self.rx.try_lock() {
            while let Ok(entry) = rx.try_recv() {
                entries.push(entry);
            }
        }
        entries
    }

    /// 제한 시간 내에 엔트리 하나를 기다립니다.
    pub async fn expect_entry(&self, timeout: Duration) -> Option<Entry> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// 제한 시간 동안 엔트리가 오지 않는지 확인합니다.
    pub async fn expect_no_entry(&self, timeout: Duration) -> bool {
        self.expect_entry(timeout).await.is_none()
    }
}

impl Default for FakeOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for FakeOutput {
    fn id(&self) -> &str {
        &self.id
    }

    fn operator_type(&self) -> &str {
        "fake_output"
    }

    fn output_ids(&self) -> &[String] {
        &self.output_ids
    }

    fn set_outputs(&self, _outputs: Vec<Arc<dyn Operator>>) {}

    fn process(&self, entry: Entry) -> BoxFuture<'_, Result<(), LogpostError>> {
        let result = self.tx.send(entry);
        Box::pin(async move {
            result.map_err(|e| {
                logpost_core::error::PipelineError::ProcessFailed(e.to_string()).into()
            })
        })
    }
}
