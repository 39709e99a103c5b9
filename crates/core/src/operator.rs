//! 오퍼레이터 trait -- 파이프라인 구성 요소의 공통 생명주기
//!
//! 모든 오퍼레이터는 Build(설정 구조체의 `build`) → `start` → `process` →
//! `stop` 순서의 생명주기를 따릅니다. 인풋은 엔트리를 생성해 다운스트림에
//! 쓰고, 트랜스포머는 `process`로 받은 엔트리를 변환하거나 버퍼링합니다.
//!
//! trait 메서드는 [`BoxFuture`]를 반환하여 `Arc<dyn Operator>`로 동적
//! 관리가 가능합니다.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use crate::entry::Entry;
use crate::error::{LogpostError, PipelineError};
use crate::persister::Persister;

/// dyn-compatible Future 타입 별칭
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 모든 오퍼레이터가 구현하는 생명주기 trait
///
/// `process`는 핫 패스이며, 동시 호출을 허용하는 오퍼레이터만 문서화된
/// 경우 동시 호출이 가능합니다. 여기 포함된 트랜스포머들은 내부 뮤텍스로
/// `process`를 직렬화합니다.
pub trait Operator: Send + Sync {
    /// 오퍼레이터 ID (파이프라인 내에서 유일)
    fn id(&self) -> &str;

    /// 오퍼레이터 타입명 (예: "recombine", "journald_input")
    fn operator_type(&self) -> &str;

    /// 설정에 지정된 다운스트림 오퍼레이터 ID 목록
    fn output_ids(&self) -> &[String];

    /// 다운스트림 오퍼레이터 핸들을 연결합니다.
    ///
    /// 파이프라인 빌드 시 한 번 호출됩니다.
    fn set_outputs(&self, outputs: Vec<Arc<dyn Operator>>);

    /// 오퍼레이터를 시작합니다.
    ///
    /// 백그라운드 태스크를 스폰할 수 있으며, 오퍼레이터 ID로 스코프된
    /// [`Persister`]를 전달받습니다.
    fn start(&self, persister: Arc<dyn Persister>) -> BoxFuture<'_, Result<(), LogpostError>> {
        let _ = persister;
        Box::pin(async { Ok(()) })
    }

    /// 엔트리 하나를 처리합니다.
    ///
    /// 인풋 오퍼레이터는 엔트리를 받지 않으므로 기본 구현은 에러를
    /// 반환합니다.
    fn process(&self, entry: Entry) -> BoxFuture<'_, Result<(), LogpostError>> {
        let _ = entry;
        let id = self.id().to_owned();
        Box::pin(async move { Err(PipelineError::NotProcessor { id }.into()) })
    }

    /// 오퍼레이터를 정지합니다.
    ///
    /// 진행 중인 상태를 제한 시간 내에 드레인하거나 안전하게 폐기합니다.
    fn stop(&self) -> BoxFuture<'_, Result<(), LogpostError>> {
        Box::pin(async { Ok(()) })
    }
}

impl std::fmt::Debug for dyn Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("id", &self.id())
            .field("operator_type", &self.operator_type())
            .finish()
    }
}

/// 다운스트림 출력 연결
///
/// 빌드 시 [`Operator::set_outputs`]로 채워지고, 이후에는 읽기만 합니다.
/// [`OutputList::write`]는 첫 번째 출력으로 엔트리를 전달하며, 출력이
/// 없으면 아무 일도 하지 않습니다.
#[derive(Default)]
pub struct OutputList {
    outputs: RwLock<Vec<Arc<dyn Operator>>>,
}

impl OutputList {
    /// 빈 출력 목록을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 출력 목록을 교체합니다.
    pub fn set(&self, outputs: Vec<Arc<dyn Operator>>) {
        let mut guard = self
            .outputs
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = outputs;
    }

    /// 첫 번째 출력 핸들을 반환합니다.
    pub fn first(&self) -> Option<Arc<dyn Operator>> {
        self.outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .cloned()
    }

    /// 연결된 출력 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 출력이 하나도 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 엔트리를 첫 번째 출력으로 전달합니다.
    ///
    /// 출력이 없으면 no-op입니다. 다운스트림 처리 실패는 로그만 남기고
    /// 호출자에게 전파하지 않습니다.
    pub async fn write(&self, entry: Entry) {
        let Some(output) = self.first() else {
            return;
        };
        if let Err(e) = output.process(entry).await {
            tracing::error!(
                operator = output.id(),
                error = %e,
                "failed to write entry downstream"
            );
        }
    }
}

/// 오퍼레이터 빌드 컨텍스트
///
/// 설정 로더가 오퍼레이터를 구성할 때 전달하는 네임스페이스 정보입니다.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// 파이프라인 네임스페이스 (로그 식별용)
    pub namespace: String,
}

impl BuildContext {
    /// 새 빌드 컨텍스트를 생성합니다.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// 비어있는 ID를 오퍼레이터 타입명으로 대체합니다.
    pub fn resolve_id(&self, id: &str, operator_type: &str) -> String {
        if id.is_empty() {
            operator_type.to_owned()
        } else {
            id.to_owned()
        }
    }
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new("$")
    }
}
