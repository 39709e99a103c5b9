//! 파이프라인 조립 -- 레지스트리, 출력 연결, DAG 검증
//!
//! 오퍼레이터 빌더는 프로세스 시작 시 한 번 구성되는 읽기 전용
//! [`Registry`]에 등록됩니다. [`Pipeline::build`]는 설정 문서 목록을
//! 오퍼레이터로 구성하고, ID 중복과 존재하지 않는 출력, 출력 그래프의
//! 순환을 Build 시점에 거부합니다.

use std::collections::HashMap;
use std::sync::Arc;

use logpost_core::error::LogpostError;
use logpost_core::operator::{BuildContext, Operator};
use logpost_core::persister::{Persister, ScopedPersister};

use crate::error::OperatorError;
use crate::input::JournaldConfig;
use crate::parser::CsvParserConfig;
use crate::transformer::RecombineConfig;

/// 오퍼레이터 타입별 빌드 함수
pub type BuildFn =
    fn(&serde_yaml::Value, &BuildContext) -> Result<Vec<Arc<dyn Operator>>, OperatorError>;

/// 오퍼레이터 타입명 → 빌드 함수 레지스트리
///
/// 프로세스 시작 시 [`Registry::with_builtins`]로 한 번 구성하고 이후에는
/// 읽기만 합니다.
pub struct Registry {
    builders: HashMap<String, BuildFn>,
}

impl Registry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// 내장 오퍼레이터가 모두 등록된 레지스트리를 생성합니다.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("recombine", build_recombine);
        registry.register("journald_input", build_journald);
        registry.register("csv_parser", build_csv);
        registry
    }

    /// 빌드 함수를 등록합니다. 같은 타입이 있으면 덮어씁니다.
    pub fn register(&mut self, operator_type: impl Into<String>, build: BuildFn) {
        self.builders.insert(operator_type.into(), build);
    }

    /// 등록된 타입 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.builders.len()
    }

    /// 등록된 타입이 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// 설정 문서에서 오퍼레이터를 생성합니다.
    pub fn build(
        &self,
        operator_type: &str,
        document: &serde_yaml::Value,
        ctx: &BuildContext,
    ) -> Result<Vec<Arc<dyn Operator>>, OperatorError> {
        let build = self
            .builders
            .get(operator_type)
            .ok_or_else(|| OperatorError::UnknownType(operator_type.to_owned()))?;
        build(document, ctx)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn build_recombine(
    document: &serde_yaml::Value,
    ctx: &BuildContext,
) -> Result<Vec<Arc<dyn Operator>>, OperatorError> {
    let config: RecombineConfig = serde_yaml::from_value(document.clone())?;
    config.build(ctx)
}

fn build_journald(
    document: &serde_yaml::Value,
    ctx: &BuildContext,
) -> Result<Vec<Arc<dyn Operator>>, OperatorError> {
    let config: JournaldConfig = serde_yaml::from_value(document.clone())?;
    config.build(ctx)
}

fn build_csv(
    document: &serde_yaml::Value,
    ctx: &BuildContext,
) -> Result<Vec<Arc<dyn Operator>>, OperatorError> {
    let config: CsvParserConfig = serde_yaml::from_value(document.clone())?;
    config.build(ctx)
}

/// 조립된 오퍼레이터 파이프라인
///
/// 오퍼레이터는 다운스트림 우선 순서로 보관됩니다. 시작은 이 순서대로
/// (출력이 먼저 준비되도록), 정지는 역순으로 (인풋부터) 수행합니다.
pub struct Pipeline {
    operators: Vec<Arc<dyn Operator>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("operators", &self.operators.len())
            .finish()
    }
}

impl Pipeline {
    /// 설정 문서 목록에서 파이프라인을 구성합니다.
    ///
    /// 각 문서는 `type` 필드로 오퍼레이터 타입을 지정합니다.
    pub fn build(
        documents: &[serde_yaml::Value],
        registry: &Registry,
        ctx: &BuildContext,
    ) -> Result<Self, OperatorError> {
        let mut operators: Vec<Arc<dyn Operator>> = Vec::new();
        for document in documents {
            let operator_type = document
                .get("type")
                .and_then(serde_yaml::Value::as_str)
                .ok_or_else(|| OperatorError::Config {
                    field: "type".to_owned(),
                    reason: "every operator document requires a type".to_owned(),
                })?;
            operators.extend(registry.build(operator_type, document, ctx)?);
        }

        // ID 중복 검사
        let mut by_id: HashMap<String, Arc<dyn Operator>> = HashMap::new();
        for operator in &operators {
            if by_id
                .insert(operator.id().to_owned(), Arc::clone(operator))
                .is_some()
            {
                return Err(OperatorError::DuplicateId(operator.id().to_owned()));
            }
        }

        // 출력 연결
        for operator in &operators {
            let outputs = operator
                .output_ids()
                .iter()
                .map(|output| {
                    by_id
                        .get(output)
                        .cloned()
                        .ok_or_else(|| OperatorError::UnknownOutput {
                            id: operator.id().to_owned(),
                            output: output.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            operator.set_outputs(outputs);
        }

        // 순환 거부 + 다운스트림 우선 순서 계산
        let order = topological_order(&operators)?;
        tracing::debug!(
            namespace = ctx.namespace,
            operators = operators.len(),
            "built operator pipeline"
        );
        let mut sorted = Vec::with_capacity(operators.len());
        for id in order {
            if let Some(operator) = by_id.get(&id) {
                sorted.push(Arc::clone(operator));
            }
        }

        Ok(Self { operators: sorted })
    }

    /// 다운스트림 우선 순서의 오퍼레이터 목록을 반환합니다.
    pub fn operators(&self) -> &[Arc<dyn Operator>] {
        &self.operators
    }

    /// ID로 오퍼레이터를 찾습니다.
    pub fn operator(&self, id: &str) -> Option<Arc<dyn Operator>> {
        self.operators
            .iter()
            .find(|operator| operator.id() == id)
            .cloned()
    }

    /// 모든 오퍼레이터를 시작합니다 (다운스트림 먼저).
    ///
    /// 각 오퍼레이터는 자기 ID로 스코프된 퍼시스터를 받습니다.
    pub async fn start_all(&self, persister: Arc<dyn Persister>) -> Result<(), LogpostError> {
        for operator in &self.operators {
            let scoped: Arc<dyn Persister> =
                Arc::new(ScopedPersister::new(Arc::clone(&persister), operator.id()));
            operator.start(scoped).await?;
        }
        Ok(())
    }

    /// 모든 오퍼레이터를 정지합니다 (인풋 먼저).
    pub async fn stop_all(&self) -> Result<(), LogpostError> {
        for operator in self.operators.iter().rev() {
            operator.stop().await?;
        }
        Ok(())
    }
}

/// 출력 그래프의 다운스트림 우선(후위) 순서를 계산합니다.
///
/// 순환이 발견되면 [`OperatorError::Cycle`]을 반환합니다.
fn topological_order(operators: &[Arc<dyn Operator>]) -> Result<Vec<String>, OperatorError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        id: &str,
        adjacency: &HashMap<&str, Vec<&str>>,
        marks: &mut HashMap<String, Mark>,
        order: &mut Vec<String>,
    ) -> Result<(), OperatorError> {
        match marks.get(id) {
            Some(Mark::Visiting) => return Err(OperatorError::Cycle(id.to_owned())),
            Some(Mark::Done) => return Ok(()),
            None => {}
        }
        marks.insert(id.to_owned(), Mark::Visiting);
        if let Some(outputs) = adjacency.get(id) {
            for output in outputs {
                visit(output, adjacency, marks, order)?;
            }
        }
        marks.insert(id.to_owned(), Mark::Done);
        order.push(id.to_owned());
        Ok(())
    }

    let adjacency: HashMap<&str, Vec<&str>> = operators
        .iter()
        .map(|operator| {
            (
                operator.id(),
                operator
                    .output_ids()
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>(),
            )
        })
        .collect();

    let mut marks = HashMap::new();
    let mut order = Vec::with_capacity(operators.len());
    for operator in operators {
        visit(operator.id(), &adjacency, &mut marks, &mut order)?;
    }
    Ok(order)
}
