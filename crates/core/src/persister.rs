//! 퍼시스터 -- 인풋 오퍼레이터의 재개 상태를 보관하는 키/값 저장소
//!
//! 인풋은 스트림 위치(커서 등)를 [`Persister`]에 체크포인트하고,
//! 재시작 시 같은 키에서 읽어 이어서 수집합니다. 값은 불투명한 바이트
//! 문자열입니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::PersistError;
use crate::operator::BoxFuture;

/// 불투명 키/값 내구 저장소
///
/// 단일 오퍼레이터가 단일 태스크에서 호출하는 동시 `get`/`set`에 대해
/// 안전해야 합니다. 그 이상의 보장은 요구하지 않습니다.
pub trait Persister: Send + Sync {
    /// 키에 저장된 값을 조회합니다. 키가 없으면 `None`입니다.
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, PersistError>>;

    /// 키에 값을 저장합니다. 기존 값은 덮어씁니다.
    fn set(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), PersistError>>;

    /// 키를 삭제합니다. 키가 없어도 성공합니다.
    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), PersistError>>;
}

/// 인메모리 퍼시스터
///
/// 테스트와 내구성이 필요 없는 실행에 사용합니다.
#[derive(Default)]
pub struct MemoryPersister {
    store: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryPersister {
    /// 빈 인메모리 퍼시스터를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 키 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 저장된 키가 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Persister for MemoryPersister {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, PersistError>> {
        let value = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        Box::pin(async move { Ok(value) })
    }

    fn set(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), PersistError>> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value);
        Box::pin(async { Ok(()) })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), PersistError>> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Box::pin(async { Ok(()) })
    }
}

/// 오퍼레이터 ID로 키를 스코프하는 퍼시스터 래퍼
///
/// 여러 오퍼레이터가 하나의 저장소를 공유할 때 키 충돌을 방지합니다.
/// 키는 `"<operator_id>.<key>"` 형태로 변환됩니다.
pub struct ScopedPersister {
    inner: Arc<dyn Persister>,
    scope: String,
}

impl ScopedPersister {
    /// 주어진 스코프로 래퍼를 생성합니다.
    pub fn new(inner: Arc<dyn Persister>, scope: impl Into<String>) -> Self {
        Self {
            inner,
            scope: scope.into(),
        }
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("{}.{}", self.scope, key)
    }
}

impl Persister for ScopedPersister {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, PersistError>> {
        let key = self.scoped_key(key);
        Box::pin(async move { self.inner.get(&key).await })
    }

    fn set(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), PersistError>> {
        let key = self.scoped_key(key);
        Box::pin(async move { self.inner.set(&key, value).await })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), PersistError>> {
        let key = self.scoped_key(key);
        Box::pin(async move { self.inner.delete(&key).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_persister_roundtrip() {
        let persister = MemoryPersister::new();
        assert!(persister.get("cursor").await.unwrap().is_none());

        persister.set("cursor", b"c1".to_vec()).await.unwrap();
        assert_eq!(persister.get("cursor").await.unwrap(), Some(b"c1".to_vec()));

        persister.set("cursor", b"c2".to_vec()).await.unwrap();
        assert_eq!(persister.get("cursor").await.unwrap(), Some(b"c2".to_vec()));
    }

    #[tokio::test]
    async fn memory_persister_delete() {
        let persister = MemoryPersister::new();
        persister.set("k", b"v".to_vec()).await.unwrap();
        persister.delete("k").await.unwrap();
        assert!(persister.get("k").await.unwrap().is_none());

        // 없는 키 삭제도 성공
        persister.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn scoped_persister_isolates_operators() {
        let shared: Arc<dyn Persister> = Arc::new(MemoryPersister::new());
        let a = ScopedPersister::new(shared.clone(), "journald_a");
        let b = ScopedPersister::new(shared.clone(), "journald_b");

        a.set("lastReadCursor", b"cursor-a".to_vec()).await.unwrap();
        b.set("lastReadCursor", b"cursor-b".to_vec()).await.unwrap();

        assert_eq!(
            a.get("lastReadCursor").await.unwrap(),
            Some(b"cursor-a".to_vec())
        );
        assert_eq!(
            b.get("lastReadCursor").await.unwrap(),
            Some(b"cursor-b".to_vec())
        );
    }

    #[tokio::test]
    async fn scoped_persister_prefixes_keys() {
        let shared = Arc::new(MemoryPersister::new());
        let scoped = ScopedPersister::new(shared.clone(), "op1");
        scoped.set("state", b"v".to_vec()).await.unwrap();

        assert_eq!(shared.get("op1.state").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn concurrent_get_set_is_safe() {
        let persister = Arc::new(MemoryPersister::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let p = persister.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("k{}", i % 2);
                for _ in 0..100 {
                    p.set(&key, vec![i]).await.unwrap();
                    let _ = p.get(&key).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(persister.len(), 2);
    }
}
