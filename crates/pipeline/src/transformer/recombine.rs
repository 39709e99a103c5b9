//! 리컴바인 트랜스포머 -- 소스별로 멀티라인 로그 레코드를 재조립
//!
//! 스택 트레이스처럼 여러 라인으로 쪼개져 수집된 레코드를 소스 키 단위로
//! 버퍼링했다가 하나의 엔트리로 합쳐 전달합니다. 레코드 경계는
//! `is_first_entry` 또는 `is_last_entry` 술어로 판별합니다.
//!
//! # 플러시 조건
//! - 술어가 경계를 감지했을 때 (합쳐서 전달)
//! - 소스별 배치가 `max_batch_size`에 도달했을 때 (합쳐서 전달)
//! - 마지막 엔트리 이후 `force_flush_period`가 지났을 때 (합쳐서 전달)
//! - 소스 수가 `max_sources`를 넘을 때와 정지 시 (낱개로 전달 -- 유실 방지)

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use logpost_core::entry::{Entry, Value};
use logpost_core::error::LogpostError;
use logpost_core::field::Field;
use logpost_core::operator::{BoxFuture, BuildContext, Operator, OutputList};
use logpost_core::persister::Persister;

use crate::config::{CommonConfig, OnError};
use crate::error::OperatorError;
use crate::expr::{EnvPool, Program};

/// 소스 식별 필드를 읽을 수 없을 때 사용하는 기본 소스 키
pub const DEFAULT_SOURCE_IDENTIFIER: &str = "DefaultSourceIdentifier";

/// 정지 시 낱개 플러시에 허용하는 최대 시간
const STOP_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// 리컴바인 오퍼레이터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecombineConfig {
    /// 공통 설정 (id/output/on_error)
    #[serde(flatten)]
    pub common: CommonConfig,
    /// 레코드의 첫 라인을 감지하는 술어. `is_last_entry`와 택일.
    #[serde(default)]
    pub is_first_entry: Option<String>,
    /// 레코드의 마지막 라인을 감지하는 술어. `is_first_entry`와 택일.
    #[serde(default)]
    pub is_last_entry: Option<String>,
    /// 합칠 문자열이 위치한 필드 (필수)
    #[serde(default)]
    pub combine_field: Option<Field>,
    /// 합칠 때 사용하는 구분자
    #[serde(default = "default_combine_with")]
    pub combine_with: String,
    /// 소스 키를 읽을 필드
    #[serde(default = "default_source_identifier")]
    pub source_identifier: Field,
    /// 합쳐진 엔트리의 기반이 될 엔트리 선택 ("oldest" 또는 "newest")
    #[serde(default = "default_overwrite_with")]
    pub overwrite_with: String,
    /// 소스별 배치 최대 크기. 도달 시 즉시 플러시됩니다.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// 동시에 버퍼링하는 최대 소스 수
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    /// 마지막 엔트리 이후 강제 플러시까지의 시간
    #[serde(default = "default_force_flush_period", with = "humantime_serde")]
    pub force_flush_period: Duration,
}

fn default_combine_with() -> String {
    "\n".to_owned()
}

fn default_source_identifier() -> Field {
    Field::attribute("file.path")
}

fn default_overwrite_with() -> String {
    "oldest".to_owned()
}

fn default_max_batch_size() -> usize {
    1000
}

fn default_max_sources() -> usize {
    1000
}

fn default_force_flush_period() -> Duration {
    Duration::from_secs(5)
}

impl Default for RecombineConfig {
    fn default() -> Self {
        Self {
            common: CommonConfig::default(),
            is_first_entry: None,
            is_last_entry: None,
            combine_field: None,
            combine_with: default_combine_with(),
            source_identifier: default_source_identifier(),
            overwrite_with: default_overwrite_with(),
            max_batch_size: default_max_batch_size(),
            max_sources: default_max_sources(),
            force_flush_period: default_force_flush_period(),
        }
    }
}

impl RecombineConfig {
    /// 설정을 검증하고 리컴바인 오퍼레이터를 생성합니다.
    pub fn build(&self, ctx: &BuildContext) -> Result<Vec<Arc<dyn Operator>>, OperatorError> {
        let on_error = self.common.on_error_policy()?;

        let (match_first, predicate) = match (&self.is_first_entry, &self.is_last_entry) {
            (Some(_), Some(_)) => {
                return Err(OperatorError::Config {
                    field: "is_first_entry".to_owned(),
                    reason: "only one of is_first_entry and is_last_entry can be set".to_owned(),
                });
            }
            (None, None) => {
                return Err(OperatorError::Config {
                    field: "is_first_entry".to_owned(),
                    reason: "one of is_first_entry and is_last_entry must be set".to_owned(),
                });
            }
            (Some(first), None) => (true, first),
            (None, Some(last)) => (false, last),
        };
        let program = Program::compile(predicate)?;

        let combine_field = self
            .combine_field
            .clone()
            .ok_or(OperatorError::MissingArgument("combine_field"))?;

        let overwrite_with_oldest = match self.overwrite_with.as_str() {
            "oldest" => true,
            "newest" => false,
            other => {
                return Err(OperatorError::Config {
                    field: "overwrite_with".to_owned(),
                    reason: format!("'{other}' is not one of 'oldest' or 'newest'"),
                });
            }
        };

        if self.max_batch_size == 0 {
            return Err(OperatorError::Config {
                field: "max_batch_size".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.max_sources == 0 {
            return Err(OperatorError::Config {
                field: "max_sources".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.force_flush_period.is_zero() {
            return Err(OperatorError::Config {
                field: "force_flush_period".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        let id = self.common.resolve_id(ctx, "recombine");
        let operator = RecombineOperator {
            shared: Arc::new(Shared {
                id,
                outputs: OutputList::new(),
                combine_field,
                combine_with: self.combine_with.clone(),
                overwrite_with_oldest,
                max_batch_size: self.max_batch_size,
                max_sources: self.max_sources,
                force_flush_period: self.force_flush_period,
                state: Mutex::new(RecombineState {
                    batches: HashMap::new(),
                    next_flush: Instant::now() + self.force_flush_period,
                }),
                cancel: CancellationToken::new(),
            }),
            output_ids: self.common.output.clone(),
            match_first,
            program,
            env_pool: EnvPool::new(),
            on_error,
            source_identifier: self.source_identifier.clone(),
            flush_task: StdMutex::new(None),
        };
        Ok(vec![Arc::new(operator)])
    }
}

/// 소스 키 → 버퍼링된 엔트리 배치
struct RecombineState {
    batches: HashMap<String, Vec<Entry>>,
    /// 다음 강제 플러시 시점. 낱개 플러시와 틱 처리 후 앞으로 밀립니다.
    next_flush: Instant,
}

/// 플러시 태스크와 `process`가 공유하는 상태
struct Shared {
    id: String,
    outputs: OutputList,
    combine_field: Field,
    combine_with: String,
    overwrite_with_oldest: bool,
    max_batch_size: usize,
    max_sources: usize,
    force_flush_period: Duration,
    state: Mutex<RecombineState>,
    cancel: CancellationToken,
}

impl Shared {
    /// 엔트리를 소스 배치에 추가합니다.
    ///
    /// 새 소스 추가로 `max_sources`를 넘게 되면 모든 배치를 낱개로
    /// 플러시한 뒤 새 소스를 받아들입니다. 추가 후 배치가
    /// `max_batch_size`에 도달하면 해당 소스를 즉시 플러시합니다.
    async fn add_to_batch(
        &self,
        state: &mut RecombineState,
        entry: Entry,
        source: &str,
    ) -> Result<(), LogpostError> {
        if !state.batches.contains_key(source) && state.batches.len() >= self.max_sources {
            tracing::error!(
                operator = %self.id,
                max_sources = self.max_sources,
                "batched sources exceed max_sources, flushing all entries uncombined; consider increasing max_sources"
            );
            self.flush_uncombined(state).await;
        }

        let batch = state.batches.entry(source.to_owned()).or_default();
        batch.push(entry);
        let len = batch.len();

        if len >= self.max_batch_size {
            self.flush_source(state, source).await?;
        }
        Ok(())
    }

    /// 소스의 배치를 하나의 엔트리로 합쳐 다운스트림으로 전달합니다.
    ///
    /// 배치가 없으면 no-op입니다. `combine_field`를 읽을 수 없는 엔트리는
    /// 로그를 남기고 건너뜁니다.
    async fn flush_source(
        &self,
        state: &mut RecombineState,
        source: &str,
    ) -> Result<(), LogpostError> {
        let Some(mut entries) = state.batches.remove(source) else {
            return Ok(());
        };
        if entries.is_empty() {
            return Ok(());
        }

        let mut parts = Vec::with_capacity(entries.len());
        for entry in &entries {
            match self.combine_field.read_string(entry) {
                Ok(value) => parts.push(value),
                Err(e) => {
                    tracing::error!(
                        operator = %self.id,
                        error = %e,
                        "entry does not contain the combine_field, skipping it during combine"
                    );
                }
            }
        }
        let combined = parts.join(&self.combine_with);

        let mut base = if self.overwrite_with_oldest {
            entries.swap_remove(0)
        } else {
            match entries.pop() {
                Some(entry) => entry,
                None => return Ok(()),
            }
        };
        self.combine_field.set(&mut base, Value::String(combined))?;

        self.outputs.write(base).await;
        Ok(())
    }

    /// 버퍼링된 모든 엔트리를 낱개로 전달하고 배치를 비웁니다.
    ///
    /// 용량 초과와 정지 시에만 사용됩니다. 플러시 시점도 함께 리셋됩니다.
    async fn flush_uncombined(&self, state: &mut RecombineState) {
        for (_, entries) in state.batches.drain() {
            for entry in entries {
                self.outputs.write(entry).await;
            }
        }
        state.next_flush = Instant::now() + self.force_flush_period;
    }

    /// 강제 플러시 루프. 취소 토큰으로 종료됩니다.
    async fn flush_loop(&self) {
        loop {
            let deadline = self.state.lock().await.next_flush;
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {
                    let mut state = self.state.lock().await;
                    // 잠든 사이 플러시 시점이 뒤로 밀렸으면 다시 잠듭니다
                    if Instant::now() < state.next_flush {
                        continue;
                    }

                    let now = SystemTime::now();
                    let stale: Vec<String> = state
                        .batches
                        .iter()
                        .filter_map(|(source, entries)| {
                            let last = entries.last()?;
                            let age = now.duration_since(last.timestamp).ok()?;
                            (age >= self.force_flush_period).then(|| source.clone())
                        })
                        .collect();

                    for source in stale {
                        if let Err(e) = self.flush_source(&mut state, &source).await {
                            tracing::error!(
                                operator = %self.id,
                                error = %e,
                                "failed to flush combined entries"
                            );
                        }
                    }
                    state.next_flush = Instant::now() + self.force_flush_period;
                }
            }
        }
    }
}

/// 리컴바인 트랜스포머 오퍼레이터
///
/// `process`는 내부 뮤텍스로 직렬화되므로 소스 하나에 대해 전달 순서가
/// 보존됩니다. 소스 간 순서는 보장하지 않습니다.
pub struct RecombineOperator {
    shared: Arc<Shared>,
    output_ids: Vec<String>,
    match_first: bool,
    program: Program,
    env_pool: EnvPool,
    on_error: OnError,
    source_identifier: Field,
    flush_task: StdMutex<Option<JoinHandle<()>>>,
}

impl RecombineOperator {
    /// 버퍼링 중인 소스 수를 반환합니다.
    pub async fn buffered_sources(&self) -> usize {
        self.shared.state.lock().await.batches.len()
    }
}

impl Operator for RecombineOperator {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn operator_type(&self) -> &str {
        "recombine"
    }

    fn output_ids(&self) -> &[String] {
        &self.output_ids
    }

    fn set_outputs(&self, outputs: Vec<Arc<dyn Operator>>) {
        self.shared.outputs.set(outputs);
    }

    fn start(&self, _persister: Arc<dyn Persister>) -> BoxFuture<'_, Result<(), LogpostError>> {
        Box::pin(async move {
            let shared = Arc::clone(&self.shared);
            let handle = tokio::spawn(async move { shared.flush_loop().await });
            *self
                .flush_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
            Ok(())
        })
    }

    fn process(&self, entry: Entry) -> BoxFuture<'_, Result<(), LogpostError>> {
        Box::pin(async move {
            let env = self.env_pool.acquire(&entry);
            let matched = self.program.run_bool(&env);
            self.env_pool.release(env);

            let matched = match matched {
                Ok(matched) => matched,
                Err(e) => {
                    return handle_entry_error_for(self, entry, e.into()).await;
                }
            };

            let source = match self.source_identifier.read_string(&entry) {
                Ok(source) if !source.is_empty() => source,
                Ok(_) => DEFAULT_SOURCE_IDENTIFIER.to_owned(),
                Err(_) => {
                    tracing::warn!(
                        operator = %self.shared.id,
                        "entry does not contain the source_identifier, so it may be pooled with other sources"
                    );
                    DEFAULT_SOURCE_IDENTIFIER.to_owned()
                }
            };

            let shared = &self.shared;
            let mut state = shared.state.lock().await;

            if matched && self.match_first {
                // 새 레코드의 첫 라인: 기존 배치를 플러시하고 새로 시작
                shared.flush_source(&mut state, &source).await?;
                shared.add_to_batch(&mut state, entry, &source).await?;
            } else if matched {
                // 완성된 레코드의 마지막 라인
                shared.add_to_batch(&mut state, entry, &source).await?;
                shared.flush_source(&mut state, &source).await?;
            } else {
                shared.add_to_batch(&mut state, entry, &source).await?;
            }
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), LogpostError>> {
        Box::pin(async move {
            {
                let mut state = self.shared.state.lock().await;
                let buffered: usize = state.batches.values().map(Vec::len).sum();
                let flushed = tokio::time::timeout(
                    STOP_FLUSH_TIMEOUT,
                    self.shared.flush_uncombined(&mut state),
                )
                .await;
                if flushed.is_err() {
                    // 타임아웃으로 중단된 drain이 남은 엔트리를 함께 비웁니다
                    tracing::error!(
                        operator = %self.shared.id,
                        buffered,
                        "stop deadline exceeded, dropping remaining buffered entries"
                    );
                    state.batches.clear();
                }
            }

            self.shared.cancel.cancel();
            let handle = self
                .flush_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
            Ok(())
        })
    }
}

/// 술어 평가 실패 엔트리를 on_error 정책으로 처리합니다.
async fn handle_entry_error_for(
    operator: &RecombineOperator,
    entry: Entry,
    err: OperatorError,
) -> Result<(), LogpostError> {
    super::handle_entry_error(
        &operator.shared.id,
        operator.on_error,
        &operator.shared.outputs,
        entry,
        err,
    )
    .await
}
