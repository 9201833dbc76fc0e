//! 테이블 번호 ↔ 논리적 테이블 식별자 바인딩 (C3, `spec.md` §4.3)
//!
//! `TABLE_MAP` 이벤트가 서버 단에서 부여하는 숫자 `TableNumber`는 하나의
//! binlog 파일 안에서만, 그리고 다음 `ROTATE`나 재바인딩 전까지만 유효
//!하다. 이 맵은 그 바인딩과, 컬럼 프로젝션별로 캐시된 레코드 변환기를
//! 함께 들고 있는다.

use crate::events::TableNumber;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// 안정적인 논리적 테이블 식별자 — 재시작 전후로 동일해야 한다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId {
    pub database: String,
    pub schema: Option<String>,
    pub table: String,
}

impl TableId {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        TableId {
            database: database.into(),
            schema: None,
            table: table.into(),
        }
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}.{}", self.database, schema, self.table),
            None => write!(f, "{}.{}", self.database, self.table),
        }
    }
}

/// 컬럼 프로젝션 — 몇 번째 컬럼이 이벤트에 실려 왔는지 나타내는 비트셋.
///
/// §9 "cache RecordsForTable by (tableNumber, columnBitset)": 비트셋이
/// 바뀌면 캐시를 변형하지 않고 다시 만든다(re-key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnBitset(pub u64);

impl ColumnBitset {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut mask = 0u64;
        for (byte_idx, byte) in bytes.iter().enumerate().take(8) {
            mask |= (*byte as u64) << (byte_idx * 8);
        }
        ColumnBitset(mask)
    }

    pub fn is_set(&self, column_index: usize) -> bool {
        column_index < 64 && (self.0 & (1 << column_index)) != 0
    }
}

/// 하나의 (테이블 번호, 컬럼 비트셋) 쌍에 대해 캐시되는, 타입 지정된
/// 레코드 변환기. `record_maker.rs`가 row 튜플을 변환할 때 필요로 하는
/// 컬럼 이름 투영만 들고 있는다 — 전체 스키마는 schema tracker가 소유한다.
#[derive(Debug, Clone)]
pub struct RecordsForTable {
    pub table_id: TableId,
    pub table_number: TableNumber,
    pub column_names: Arc<Vec<String>>,
    pub bitset: ColumnBitset,
}

struct Binding {
    table_id: TableId,
    included: bool,
}

/// C3 — `assign`/`lookup`/`clear`.
pub struct TableIdMap {
    bindings: HashMap<TableNumber, Binding>,
    cache: HashMap<(TableNumber, ColumnBitset), Arc<RecordsForTable>>,
    /// 주어진 `TableId`에 대한 컬럼 이름을 얻기 위해 스키마 트래커를 참조한다.
    column_lookup: Box<dyn Fn(&TableId) -> Option<Vec<String>> + Send>,
}

impl std::fmt::Debug for TableIdMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableIdMap")
            .field("bindings", &self.bindings.len())
            .field("cache", &self.cache.len())
            .finish()
    }
}

impl TableIdMap {
    pub fn new(column_lookup: Box<dyn Fn(&TableId) -> Option<Vec<String>> + Send>) -> Self {
        TableIdMap {
            bindings: HashMap::new(),
            cache: HashMap::new(),
            column_lookup,
        }
    }

    /// `TABLE_MAP`을 바인딩한다. 테이블이 필터로 제외된 경우 `false`를
    /// 반환하고, 이후 해당 번호의 row 이벤트는 조용히 무시된다.
    pub fn assign(&mut self, table_number: TableNumber, table_id: TableId, included: bool) -> bool {
        self.bindings.insert(
            table_number,
            Binding {
                table_id,
                included,
            },
        );
        // re-bind는 이전에 파생된 캐시 엔트리를 무효화한다.
        self.cache.retain(|(num, _), _| *num != table_number);
        included
    }

    /// 바인딩과 컬럼 비트셋으로 캐시된(혹은 새로 파생한) `RecordsForTable`을 찾는다.
    ///
    /// `table_number`가 바인딩되어 있지 않거나 필터로 제외된 경우 `None`.
    pub fn lookup(
        &mut self,
        table_number: TableNumber,
        included_columns: ColumnBitset,
    ) -> Option<Arc<RecordsForTable>> {
        let binding = self.bindings.get(&table_number)?;
        if !binding.included {
            return None;
        }

        let key = (table_number, included_columns);
        if let Some(cached) = self.cache.get(&key) {
            return Some(cached.clone());
        }

        let column_names = (self.column_lookup)(&binding.table_id)?;
        let entry = Arc::new(RecordsForTable {
            table_id: binding.table_id.clone(),
            table_number,
            column_names: Arc::new(column_names),
            bitset: included_columns,
        });
        self.cache.insert(key, entry.clone());
        Some(entry)
    }

    /// `ROTATE`에서 호출된다: 모든 바인딩을 무효화한다.
    pub fn clear(&mut self) {
        self.bindings.clear();
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with_columns(columns: Vec<String>) -> TableIdMap {
        TableIdMap::new(Box::new(move |_| Some(columns.clone())))
    }

    #[test]
    fn lookup_returns_none_before_any_table_map() {
        let mut map = map_with_columns(vec!["id".into()]);
        assert!(map.lookup(TableNumber(42), ColumnBitset(0b1)).is_none());
    }

    #[test]
    fn filtered_out_tables_are_never_looked_up() {
        let mut map = map_with_columns(vec!["id".into()]);
        let accepted = map.assign(TableNumber(7), TableId::new("d", "excluded"), false);
        assert!(!accepted);
        assert!(map.lookup(TableNumber(7), ColumnBitset(0b1)).is_none());
    }

    #[test]
    fn rotation_invalidates_bindings() {
        let mut map = map_with_columns(vec!["id".into()]);
        map.assign(TableNumber(5), TableId::new("d", "t"), true);
        assert!(map.lookup(TableNumber(5), ColumnBitset(0b1)).is_some());

        map.clear();
        assert!(map.lookup(TableNumber(5), ColumnBitset(0b1)).is_none());
    }

    #[test]
    fn changed_bitset_rederives_instead_of_mutating_cache() {
        let mut map = map_with_columns(vec!["id".into(), "name".into()]);
        map.assign(TableNumber(1), TableId::new("d", "t"), true);

        let first = map.lookup(TableNumber(1), ColumnBitset(0b01)).unwrap();
        let second = map.lookup(TableNumber(1), ColumnBitset(0b11)).unwrap();
        assert_eq!(first.bitset.0, 0b01);
        assert_eq!(second.bitset.0, 0b11);
        assert_eq!(map.cache.len(), 2);
    }

    #[test]
    fn rebinding_same_number_invalidates_old_cache_entries() {
        let mut map = map_with_columns(vec!["id".into()]);
        map.assign(TableNumber(1), TableId::new("d", "t1"), true);
        map.lookup(TableNumber(1), ColumnBitset(0b1)).unwrap();

        map.assign(TableNumber(1), TableId::new("d", "t2"), true);
        let entry = map.lookup(TableNumber(1), ColumnBitset(0b1)).unwrap();
        assert_eq!(entry.table_id.table, "t2");
    }
}
