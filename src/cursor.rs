//! Binlog 처리 위치 추적 — 재시작 가능한 커서 (C1, `spec.md` §4.1)
//!
//! dispatcher가 단독으로 소유하고 매 이벤트마다 갱신한다. `snapshot()`이
//! 내놓는 값은 그대로 downstream sink가 체크포인트로 영속화할 수 있는
//! 불투명한 맵이다.

use crate::gtid::GtidSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 재시작 좌표 `(file, position, row-in-event)` — `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Position {
    pub file: String,
    pub position: u64,
    pub row_in_event: u32,
}

impl Position {
    pub fn new(file: String, position: u64) -> Self {
        Position {
            file,
            position,
            row_in_event: 0,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.file, self.position, self.row_in_event)
    }
}

/// 매 이벤트가 완전히 처리된 후 `snapshot()`이 내놓는 영속 가능한 offset.
///
/// 필드 목록은 `spec.md` §6 "Persisted state"에 나열된 offset map key와
/// 정확히 일치한다: `server_id, file, pos, row, ts_sec, gtids?`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePosition {
    pub server_id: u32,
    pub file: String,
    pub pos: u64,
    pub row: u32,
    pub ts_sec: u32,
    pub gtids: Option<String>,
}

impl SourcePosition {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "server_id": self.server_id,
            "file": self.file,
            "pos": self.pos,
            "row": self.row,
            "ts_sec": self.ts_sec,
            "gtids": self.gtids,
        })
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SourcePosition {{ server_id: {}, file: {}, pos: {}, row: {}, gtids: {:?} }}",
            self.server_id, self.file, self.pos, self.row, self.gtids
        )
    }
}

/// 하나의 binlog 스트림에 대한, dispatcher가 단독으로 쓰는 위치 커서.
///
/// 모든 mutator는 수신 스레드/태스크에서만 호출된다(`spec.md` §5) —
/// 락이 전혀 필요 없다.
#[derive(Debug, Clone)]
pub struct PositionCursor {
    server_id: u32,
    ts_sec: u32,
    position: Position,
    gtid_set: GtidSet,
}

impl PositionCursor {
    pub fn new(file: String, position: u64) -> Self {
        PositionCursor {
            server_id: 0,
            ts_sec: 0,
            position: Position::new(file, position),
            gtid_set: GtidSet::new(),
        }
    }

    pub fn from_snapshot(server_id: u32, file: String, position: u64, gtid_set: GtidSet) -> Self {
        PositionCursor {
            server_id,
            ts_sec: 0,
            position: Position::new(file, position),
            gtid_set,
        }
    }

    /// 이벤트 헤더를 관찰해 최신 타임스탬프와 서버 id를 갱신한다. 실패하지 않는다.
    pub fn observe_header(&mut self, ts_sec: u32, server_id: u32) {
        self.ts_sec = ts_sec;
        self.server_id = server_id;
    }

    /// `ROTATE`: file/position을 원자적으로 교체하고 row-in-event를 리셋한다.
    pub fn observe_rotate(&mut self, file: String, position: u64) {
        self.position = Position::new(file, position);
    }

    /// 헤더가 알려주는 다음 이벤트 위치로 전진한다(0보다 클 때만).
    pub fn observe_next_position(&mut self, next_position: u32) {
        if next_position > 0 {
            self.position.position = next_position as u64;
            self.position.row_in_event = 0;
        }
    }

    /// GTID를 커서의 GTID 집합에 추가한다.
    pub fn observe_gtid(&mut self, gtid: &str) -> crate::error::Result<()> {
        self.gtid_set.add_gtid(gtid)
    }

    /// 레코드 하나를 내보낼 때마다 한 번씩 호출된다.
    pub fn advance_row(&mut self) {
        self.position.row_in_event += 1;
    }

    /// 현재 row-in-event (다음에 advance_row가 만들 값이 아니라 지금 값).
    pub fn row_in_event(&self) -> u32 {
        self.position.row_in_event
    }

    pub fn file(&self) -> &str {
        &self.position.file
    }

    pub fn position(&self) -> u64 {
        self.position.position
    }

    /// 영속 가능한 offset의 얼려진(frozen) 사본을 만든다.
    pub fn snapshot(&self) -> SourcePosition {
        SourcePosition {
            server_id: self.server_id,
            file: self.position.file.clone(),
            pos: self.position.position,
            row: self.position.row_in_event,
            ts_sec: self.ts_sec,
            gtids: if self.gtid_set.is_empty() {
                None
            } else {
                Some(self.gtid_set.to_string())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_resets_row_in_event() {
        let mut cursor = PositionCursor::new("mysql-bin.000001".into(), 4);
        cursor.advance_row();
        cursor.advance_row();
        assert_eq!(cursor.row_in_event(), 2);

        cursor.observe_rotate("mysql-bin.000002".into(), 4);
        assert_eq!(cursor.row_in_event(), 0);
        assert_eq!(cursor.file(), "mysql-bin.000002");
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn next_position_only_advances_when_positive() {
        let mut cursor = PositionCursor::new("mysql-bin.000001".into(), 4);
        cursor.observe_next_position(0);
        assert_eq!(cursor.position(), 4);

        cursor.advance_row();
        cursor.observe_next_position(500);
        assert_eq!(cursor.position(), 500);
        assert_eq!(cursor.row_in_event(), 0, "advancing position resets row_in_event");
    }

    #[test]
    fn snapshot_reflects_gtid_advance() {
        let mut cursor = PositionCursor::new("mysql-bin.000001".into(), 4);
        cursor.observe_header(100, 1);
        cursor
            .observe_gtid("550e8400-e29b-41d4-a716-446655440000:1-5")
            .unwrap();

        let snap = cursor.snapshot();
        assert_eq!(snap.server_id, 1);
        assert_eq!(snap.ts_sec, 100);
        assert_eq!(
            snap.gtids.as_deref(),
            Some("550e8400-e29b-41d4-a716-446655440000:1-5")
        );
    }

    #[test]
    fn advance_row_increments_monotonically_within_an_event() {
        let mut cursor = PositionCursor::new("mysql-bin.000001".into(), 4);
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(cursor.row_in_event());
            cursor.advance_row();
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
