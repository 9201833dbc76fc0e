//! 레코드 메이커 (C4, `spec.md` §4.4)
//!
//! row 이벤트 하나(여러 행을 담고 있을 수 있다)를 `ChangeRecord`들로
//! 펼친다. 각 레코드는 만들어지는 순간의 커서 스냅샷을 얼려서 담고,
//! 그 전에 반드시 `cursor.advance_row()`가 호출되어 row-in-event가
//! 먼저 전진한 뒤 스냅샷이 찍힌다 — `spec.md` §10 Open Question 1의
//! 결정: 하나의 공유 카운터를 모든 경로(insert/update/delete)에서 쓴다.

use crate::cursor::PositionCursor;
use crate::events::CellValue;
use crate::record::{ChangeRecord, Op, Row};
use crate::table_map::RecordsForTable;
use chrono::{TimeZone, Utc};
use std::sync::Arc;

/// C4 — `create_each`/`update_each`/`delete_each`/`schema_change`.
pub struct RecordMaker;

impl RecordMaker {
    pub fn create_each(
        cursor: &mut PositionCursor,
        table: &Arc<RecordsForTable>,
        rows: &[Vec<CellValue>],
    ) -> Vec<ChangeRecord> {
        rows.iter()
            .map(|row| {
                let record = ChangeRecord {
                    op: Op::Create,
                    table_id: Some(table.table_id.clone()),
                    before: None,
                    after: Some(zip_row(&table.column_names, row)),
                    ts: event_timestamp(cursor),
                    source_position: cursor.snapshot(),
                    statements: None,
                };
                cursor.advance_row();
                record
            })
            .collect()
    }

    pub fn update_each(
        cursor: &mut PositionCursor,
        table: &Arc<RecordsForTable>,
        rows: &[(Vec<CellValue>, Vec<CellValue>)],
    ) -> Vec<ChangeRecord> {
        rows.iter()
            .map(|(before, after)| {
                let record = ChangeRecord {
                    op: Op::Update,
                    table_id: Some(table.table_id.clone()),
                    before: Some(zip_row(&table.column_names, before)),
                    after: Some(zip_row(&table.column_names, after)),
                    ts: event_timestamp(cursor),
                    source_position: cursor.snapshot(),
                    statements: None,
                };
                cursor.advance_row();
                record
            })
            .collect()
    }

    pub fn delete_each(
        cursor: &mut PositionCursor,
        table: &Arc<RecordsForTable>,
        rows: &[Vec<CellValue>],
    ) -> Vec<ChangeRecord> {
        rows.iter()
            .map(|row| {
                let record = ChangeRecord {
                    op: Op::Delete,
                    table_id: Some(table.table_id.clone()),
                    before: Some(zip_row(&table.column_names, row)),
                    after: None,
                    ts: event_timestamp(cursor),
                    source_position: cursor.snapshot(),
                    statements: None,
                };
                cursor.advance_row();
                record
            })
            .collect()
    }

    /// `include.schema.changes`가 켜져 있을 때 DDL statement들로부터
    /// 하나의 레코드를 만든다. `statements`가 비어 있으면 `None`.
    pub fn schema_change(cursor: &mut PositionCursor, statements: Vec<String>) -> Option<ChangeRecord> {
        if statements.is_empty() {
            return None;
        }
        let record = ChangeRecord {
            op: Op::Ddl,
            table_id: None,
            before: None,
            after: None,
            ts: event_timestamp(cursor),
            source_position: cursor.snapshot(),
            statements: Some(statements),
        };
        cursor.advance_row();
        Some(record)
    }
}

fn zip_row(column_names: &[String], values: &[CellValue]) -> Row {
    column_names
        .iter()
        .zip(values.iter())
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn event_timestamp(cursor: &PositionCursor) -> chrono::DateTime<Utc> {
    let snap = cursor.snapshot();
    Utc.timestamp_opt(snap.ts_sec as i64, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_map::{ColumnBitset, TableId};
    use crate::events::TableNumber;

    fn table() -> Arc<RecordsForTable> {
        Arc::new(RecordsForTable {
            table_id: TableId::new("d", "t"),
            table_number: TableNumber(1),
            column_names: Arc::new(vec!["id".into(), "name".into()]),
            bitset: ColumnBitset(0b11),
        })
    }

    #[test]
    fn create_each_advances_row_in_event_per_row() {
        let mut cursor = PositionCursor::new("mysql-bin.000001".into(), 4);
        let table = table();
        let rows = vec![
            vec![CellValue::Int64(1), CellValue::String("a".into())],
            vec![CellValue::Int64(2), CellValue::String("b".into())],
        ];

        let records = RecordMaker::create_each(&mut cursor, &table, &rows);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source_position.row, 0);
        assert_eq!(records[1].source_position.row, 1);
        assert_eq!(
            records[0].after.as_ref().unwrap().get("name").unwrap(),
            &CellValue::String("a".into())
        );
    }

    #[test]
    fn update_each_assigns_strictly_increasing_row_in_event() {
        let mut cursor = PositionCursor::new("mysql-bin.000001".into(), 4);
        let table = table();
        let rows = vec![
            (
                vec![CellValue::Int64(1), CellValue::String("x".into())],
                vec![CellValue::Int64(1), CellValue::String("y".into())],
            ),
            (
                vec![CellValue::Int64(2), CellValue::String("p".into())],
                vec![CellValue::Int64(2), CellValue::String("q".into())],
            ),
        ];

        let records = RecordMaker::update_each(&mut cursor, &table, &rows);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source_position.row, 0);
        assert_eq!(records[1].source_position.row, 1);
    }

    #[test]
    fn update_each_carries_before_and_after() {
        let mut cursor = PositionCursor::new("mysql-bin.000001".into(), 4);
        let table = table();
        let rows = vec![(
            vec![CellValue::Int64(1), CellValue::String("old".into())],
            vec![CellValue::Int64(1), CellValue::String("new".into())],
        )];

        let records = RecordMaker::update_each(&mut cursor, &table, &rows);
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].before.as_ref().unwrap().get("name").unwrap(),
            &CellValue::String("old".into())
        );
        assert_eq!(
            records[0].after.as_ref().unwrap().get("name").unwrap(),
            &CellValue::String("new".into())
        );
    }

    #[test]
    fn schema_change_returns_none_for_empty_statements() {
        let mut cursor = PositionCursor::new("mysql-bin.000001".into(), 4);
        assert!(RecordMaker::schema_change(&mut cursor, vec![]).is_none());
    }

    #[test]
    fn schema_change_builds_ddl_record() {
        let mut cursor = PositionCursor::new("mysql-bin.000001".into(), 4);
        let record = RecordMaker::schema_change(&mut cursor, vec!["CREATE TABLE t (id INT)".into()]).unwrap();
        assert_eq!(record.op, Op::Ddl);
        assert_eq!(record.statements.unwrap()[0], "CREATE TABLE t (id INT)");
    }
}
