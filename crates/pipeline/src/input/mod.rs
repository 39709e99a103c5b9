//! 인풋 오퍼레이터 -- 외부 소스에서 엔트리를 생성
//!
//! 인풋은 `process`로 엔트리를 받지 않고, 자체 백그라운드 태스크에서
//! 엔트리를 만들어 다운스트림으로 씁니다. 수집 재개 위치는 오퍼레이터
//! ID로 스코프된 퍼시스터에 체크포인트합니다.

pub mod journald;

pub use journald::{JournaldConfig, JournaldInput, LAST_READ_CURSOR_KEY};
