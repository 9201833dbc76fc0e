//! 타입이 지정된 변경 레코드 — `spec.md` §3 `ChangeRecord`.

use crate::cursor::SourcePosition;
use crate::events::CellValue;
use crate::table_map::TableId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 하나의 행(또는 DDL 문) 이미지.
pub type Row = HashMap<String, CellValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Create,
    Update,
    Delete,
    Ddl,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Create => "CREATE",
            Op::Update => "UPDATE",
            Op::Delete => "DELETE",
            Op::Ddl => "DDL",
        }
    }
}

/// `spec.md` §3: `{op, tableId?, before?, after?, ts, sourcePosition}`.
///
/// 매 레코드는 만들어지는 시점의 커서 스냅샷을 얼려서 들고 있다 —
/// `record_maker.rs`가 유일한 생성자다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub op: Op,
    pub table_id: Option<TableId>,
    pub before: Option<Row>,
    pub after: Option<Row>,
    pub ts: DateTime<Utc>,
    pub source_position: SourcePosition,
    /// DDL 레코드에만 실리는 원본 statement 목록.
    pub statements: Option<Vec<String>>,
}
