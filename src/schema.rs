//! 스키마 트래커 (C2, `spec.md` §4.2)
//!
//! `QUERY` 이벤트의 `(database, sqlText)`를 소비해 DDL을 적용하고, 결과로
//! 얻은 `SchemaSnapshot` 변경을 만든다. DDL 적용은 이벤트 단위로
//! 원자적이다 — 한 이벤트의 모든 statement가 적용되거나 하나도 적용되지
//! 않는다. 파싱에 실패하면 스냅샷은 그대로 두고 `SchemaParseError`만
//! 알린다.
//!
//! 전체 SQL 문법을 파싱하는 것은 `spec.md` §1이 말하는 "out of scope"
//! 영역(와이어 프로토콜 코덱과 마찬가지로 외부 협력자가 할 일)이다.
//! 여기서는 row 이벤트의 타입을 유지하는 데 필요한, 좁은 DDL 형태만
//! 인식한다: `CREATE TABLE`, `ALTER TABLE ... ADD/DROP/MODIFY COLUMN`,
//! `DROP TABLE`, `RENAME TABLE`.

use crate::error::{CdcError, Result};
use crate::history::SchemaHistoryStore;
use crate::table_map::TableId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    pub ordinal: u32,
    pub default: Option<String>,
}

pub type ColumnList = Vec<ColumnDef>;

/// `TableId -> ColumnList` 매핑 — DDL로만 변경된다.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    tables: HashMap<TableId, ColumnList>,
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        SchemaSnapshot::default()
    }

    pub fn columns_of(&self, table_id: &TableId) -> Option<&ColumnList> {
        self.tables.get(table_id)
    }

    pub fn column_names(&self, table_id: &TableId) -> Option<Vec<String>> {
        self.tables
            .get(table_id)
            .map(|cols| cols.iter().map(|c| c.name.clone()).collect())
    }
}

/// 하나의 `QUERY` 이벤트에서 인식한 단일 DDL statement.
#[derive(Debug, Clone)]
enum DdlStatement {
    CreateTable {
        table: TableId,
        columns: ColumnList,
    },
    AddColumn {
        table: TableId,
        column: ColumnDef,
    },
    DropColumn {
        table: TableId,
        column_name: String,
    },
    DropTable {
        table: TableId,
    },
    RenameTable {
        from: TableId,
        to: TableId,
    },
}

/// C2 — 스키마 트래커.
///
/// 스냅샷은 `Arc<RwLock<_>>`로 들고 있는다 — `table_map.rs`의 컬럼 조회
/// 클로저가 동일한 스냅샷을 읽기 전용으로 공유해야 하기 때문이다(둘 다
/// `dispatcher.rs`가 단독 소유).
pub struct SchemaTracker<H: SchemaHistoryStore> {
    snapshot: Arc<RwLock<SchemaSnapshot>>,
    history: H,
}

impl<H: SchemaHistoryStore> SchemaTracker<H> {
    pub fn new(history: H) -> Self {
        SchemaTracker {
            snapshot: Arc::new(RwLock::new(SchemaSnapshot::new())),
            history,
        }
    }

    pub fn from_snapshot(snapshot: SchemaSnapshot, history: H) -> Self {
        SchemaTracker {
            snapshot: Arc::new(RwLock::new(snapshot)),
            history,
        }
    }

    /// 영속화 가능한 스냅샷의 사본.
    pub fn snapshot(&self) -> SchemaSnapshot {
        self.snapshot.read().clone()
    }

    pub fn columns_of(&self, table_id: &TableId) -> Option<ColumnList> {
        self.snapshot.read().columns_of(table_id).cloned()
    }

    /// `table_map.rs::TableIdMap`이 컬럼 이름을 조회하는 데 쓰는, 동일한
    /// 스냅샷을 공유하는 핸들.
    pub fn column_lookup(&self) -> impl Fn(&TableId) -> Option<Vec<String>> + Send + 'static {
        let snapshot = self.snapshot.clone();
        move |table_id| snapshot.read().column_names(table_id)
    }

    /// `QUERY` 이벤트를 적용한다. 인식된 statement 문자열 목록을 반환한다
    /// (dispatcher가 `include.schema.changes`일 때 이를 레코드로 만든다).
    ///
    /// 파싱 실패는 에러로 버블링되지 않고 `Ok(vec![])`로 흡수되며, 호출자가
    /// `SchemaParseError`를 로그로 남긴다 — §4.2의 "signal ... and continue".
    ///
    /// `position`은 history store에 적히는 `{position, database,
    /// statements[]}` 엔트리의 `position` 필드다 — 이 `QUERY` 이벤트를
    /// 처리할 때의 커서 스냅샷(호출자인 dispatcher가 넘긴다).
    pub fn apply_query(
        &mut self,
        position: &crate::cursor::SourcePosition,
        database: &str,
        sql_text: &str,
    ) -> Result<Vec<String>> {
        let mut parsed = Vec::new();
        for raw_statement in split_statements(sql_text) {
            match parse_statement(database, raw_statement) {
                Ok(Some(stmt)) => parsed.push((raw_statement.to_string(), stmt)),
                Ok(None) => {
                    // 스키마에 영향이 없는 statement(BEGIN/COMMIT 등) — 무시.
                }
                Err(err) => {
                    warn!(database, statement = raw_statement, error = %err, "schema parse error, skipping");
                    return Ok(Vec::new());
                }
            }
        }

        if parsed.is_empty() {
            return Ok(Vec::new());
        }

        // 원자적 적용: 임시 스냅샷에 전부 적용해본 뒤 한 번에 교체한다.
        let mut staged = self.snapshot.read().clone();
        for (_, stmt) in &parsed {
            apply_one(&mut staged, stmt);
        }

        let statements: Vec<String> = parsed.into_iter().map(|(raw, _)| raw).collect();

        // §9 "persist the DDL entry before acknowledging the QUERY event
        // complete" — in-memory 스냅샷을 뒤집기 전에 history store에 먼저
        // append-and-fsync 한다.
        self.history.append(position, database, &statements)?;

        *self.snapshot.write() = staged;
        debug!(database, count = statements.len(), "applied DDL statements");
        Ok(statements)
    }
}

fn apply_one(snapshot: &mut SchemaSnapshot, stmt: &DdlStatement) {
    match stmt {
        DdlStatement::CreateTable { table, columns } => {
            snapshot.tables.insert(table.clone(), columns.clone());
        }
        DdlStatement::AddColumn { table, column } => {
            snapshot
                .tables
                .entry(table.clone())
                .or_insert_with(Vec::new)
                .push(column.clone());
        }
        DdlStatement::DropColumn { table, column_name } => {
            if let Some(cols) = snapshot.tables.get_mut(table) {
                cols.retain(|c| &c.name != column_name);
            }
        }
        DdlStatement::DropTable { table } => {
            snapshot.tables.remove(table);
        }
        DdlStatement::RenameTable { from, to } => {
            if let Some(cols) = snapshot.tables.remove(from) {
                snapshot.tables.insert(to.clone(), cols);
            }
        }
    }
}

fn split_statements(sql_text: &str) -> Vec<&str> {
    sql_text
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_statement(database: &str, sql: &str) -> Result<Option<DdlStatement>> {
    let upper = sql.to_uppercase();

    if upper.starts_with("CREATE TABLE") {
        let (table, rest) = extract_table_name(database, sql, "CREATE TABLE")?;
        let columns = parse_column_list(rest)?;
        return Ok(Some(DdlStatement::CreateTable { table, columns }));
    }

    if upper.starts_with("ALTER TABLE") {
        let (table, rest) = extract_table_name(database, sql, "ALTER TABLE")?;
        let rest_upper = rest.to_uppercase();
        if let Some(idx) = rest_upper.find("ADD COLUMN").or_else(|| rest_upper.find("ADD ")) {
            let after = &rest[idx..];
            let after = strip_prefix_ci(after, "ADD COLUMN").unwrap_or_else(|| strip_prefix_ci(after, "ADD").unwrap_or(after));
            let column = parse_single_column(after.trim())?;
            return Ok(Some(DdlStatement::AddColumn { table, column }));
        }
        if let Some(idx) = rest_upper.find("DROP COLUMN").or_else(|| rest_upper.find("DROP ")) {
            let after = &rest[idx..];
            let after = strip_prefix_ci(after, "DROP COLUMN").unwrap_or_else(|| strip_prefix_ci(after, "DROP").unwrap_or(after));
            let column_name = after.trim().trim_matches('`').split_whitespace().next().unwrap_or("").to_string();
            if column_name.is_empty() {
                return Err(CdcError::SchemaParseError(format!("cannot find dropped column in: {sql}")));
            }
            return Ok(Some(DdlStatement::DropColumn { table, column_name }));
        }
        if let Some(idx) = rest_upper.find("MODIFY COLUMN").or_else(|| rest_upper.find("MODIFY ")) {
            let after = &rest[idx..];
            let after = strip_prefix_ci(after, "MODIFY COLUMN").unwrap_or_else(|| strip_prefix_ci(after, "MODIFY").unwrap_or(after));
            let column = parse_single_column(after.trim())?;
            // MODIFY replaces the column definition in place.
            return Ok(Some(DdlStatement::AddColumn { table, column }));
        }
        return Err(CdcError::SchemaParseError(format!(
            "unrecognized ALTER TABLE clause: {sql}"
        )));
    }

    if upper.starts_with("DROP TABLE") {
        let (table, _) = extract_table_name(database, sql, "DROP TABLE")?;
        return Ok(Some(DdlStatement::DropTable { table }));
    }

    if upper.starts_with("RENAME TABLE") {
        let body = sql["RENAME TABLE".len()..].trim();
        let mut parts = body.splitn(2, |c: char| c == ' ');
        let from_name = parts.next().unwrap_or("").trim_matches('`');
        let rest = parts.next().unwrap_or("");
        let to_name = rest
            .trim_start()
            .strip_prefix("TO")
            .or_else(|| rest.trim_start().strip_prefix("to"))
            .unwrap_or(rest)
            .trim()
            .trim_matches('`');
        if from_name.is_empty() || to_name.is_empty() {
            return Err(CdcError::SchemaParseError(format!(
                "malformed RENAME TABLE: {sql}"
            )));
        }
        return Ok(Some(DdlStatement::RenameTable {
            from: TableId::new(database, from_name),
            to: TableId::new(database, to_name),
        }));
    }

    if upper.starts_with("BEGIN") || upper.starts_with("COMMIT") || upper.is_empty() {
        return Ok(None);
    }

    // DML과 기타 문장은 스키마에 영향이 없으니 조용히 무시한다.
    Ok(None)
}

fn extract_table_name<'a>(
    database: &str,
    sql: &'a str,
    keyword: &str,
) -> Result<(TableId, &'a str)> {
    let mut rest = sql[keyword.len()..].trim();
    rest = rest
        .strip_prefix("IF NOT EXISTS")
        .or_else(|| rest.strip_prefix("if not exists"))
        .unwrap_or(rest)
        .trim_start();
    rest = rest
        .strip_prefix("IF EXISTS")
        .or_else(|| rest.strip_prefix("if exists"))
        .unwrap_or(rest)
        .trim_start();

    let name_end = rest
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(rest.len());
    let raw_name = rest[..name_end].trim_matches('`');
    if raw_name.is_empty() {
        return Err(CdcError::SchemaParseError(format!(
            "cannot find table name in: {sql}"
        )));
    }

    let (db, table) = match raw_name.split_once('.') {
        Some((db, table)) => (db.trim_matches('`').to_string(), table.trim_matches('`').to_string()),
        None => (database.to_string(), raw_name.to_string()),
    };

    Ok((TableId::new(db, table), rest[name_end..].trim()))
}

fn parse_column_list(rest: &str) -> Result<ColumnList> {
    let open = rest.find('(').ok_or_else(|| {
        CdcError::SchemaParseError(format!("expected column list in CREATE TABLE: {rest}"))
    })?;
    let close = rest.rfind(')').ok_or_else(|| {
        CdcError::SchemaParseError(format!("unterminated column list in CREATE TABLE: {rest}"))
    })?;
    let body = &rest[open + 1..close];

    let mut columns = Vec::new();
    let mut ordinal = 0;
    for part in split_top_level_commas(body) {
        let part = part.trim();
        let upper = part.to_uppercase();
        if upper.starts_with("PRIMARY KEY")
            || upper.starts_with("UNIQUE")
            || upper.starts_with("KEY")
            || upper.starts_with("INDEX")
            || upper.starts_with("CONSTRAINT")
            || upper.starts_with("FOREIGN KEY")
        {
            continue;
        }
        let mut column = parse_single_column(part)?;
        column.ordinal = ordinal;
        ordinal += 1;
        columns.push(column);
    }
    Ok(columns)
}

fn split_top_level_commas(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (idx, ch) in body.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&body[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

fn parse_single_column(def: &str) -> Result<ColumnDef> {
    let def = def.trim();
    let mut tokens = def.splitn(2, char::is_whitespace);
    let name = tokens
        .next()
        .ok_or_else(|| CdcError::SchemaParseError(format!("missing column name in: {def}")))?
        .trim_matches('`')
        .to_string();
    let rest = tokens.next().unwrap_or("").trim();

    let sql_type = rest
        .split(|c: char| c.is_whitespace())
        .next()
        .unwrap_or("")
        .trim_end_matches(',')
        .to_string();
    if sql_type.is_empty() {
        return Err(CdcError::SchemaParseError(format!(
            "missing column type in: {def}"
        )));
    }

    let upper_rest = rest.to_uppercase();
    let nullable = !upper_rest.contains("NOT NULL");
    let default = upper_rest.find("DEFAULT").map(|idx| {
        rest[idx + "DEFAULT".len()..]
            .trim()
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string()
    });

    Ok(ColumnDef {
        name,
        sql_type,
        nullable,
        ordinal: 0,
        default,
    })
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::SourcePosition;
    use crate::history::InMemorySchemaHistory;

    fn tracker() -> SchemaTracker<InMemorySchemaHistory> {
        SchemaTracker::new(InMemorySchemaHistory::new())
    }

    fn position(pos: u64) -> SourcePosition {
        SourcePosition {
            server_id: 1,
            file: "mysql-bin.000001".into(),
            pos,
            row: 0,
            ts_sec: 0,
            gtids: None,
        }
    }

    #[test]
    fn create_table_populates_snapshot() {
        let mut tracker = tracker();
        let statements = tracker
            .apply_query(&position(4), "d", "CREATE TABLE t (id INT NOT NULL, name VARCHAR(10))")
            .unwrap();
        assert_eq!(statements.len(), 1);

        let cols = tracker.columns_of(&TableId::new("d", "t")).unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].name, "id");
        assert!(!cols[0].nullable);
        assert_eq!(cols[1].name, "name");
        assert!(cols[1].nullable);
    }

    #[test]
    fn alter_table_add_column_is_monotone() {
        let mut tracker = tracker();
        tracker
            .apply_query(&position(4), "d", "CREATE TABLE t (id INT NOT NULL)")
            .unwrap();
        tracker
            .apply_query(&position(100), "d", "ALTER TABLE t ADD c INT")
            .unwrap();

        let cols = tracker.columns_of(&TableId::new("d", "t")).unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[1].name, "c");
        assert_eq!(cols[1].sql_type, "INT");
    }

    #[test]
    fn unparseable_ddl_leaves_snapshot_unchanged() {
        let mut tracker = tracker();
        tracker
            .apply_query(&position(4), "d", "CREATE TABLE t (id INT NOT NULL)")
            .unwrap();

        let statements = tracker
            .apply_query(&position(100), "d", "ALTER TABLE t FROB SOMETHING WEIRD")
            .unwrap();
        assert!(statements.is_empty());

        let cols = tracker.columns_of(&TableId::new("d", "t")).unwrap();
        assert_eq!(cols.len(), 1, "snapshot must be untouched after a parse failure");
    }

    #[test]
    fn drop_table_removes_entry() {
        let mut tracker = tracker();
        tracker
            .apply_query(&position(4), "d", "CREATE TABLE t (id INT NOT NULL)")
            .unwrap();
        tracker.apply_query(&position(100), "d", "DROP TABLE t").unwrap();
        assert!(tracker.columns_of(&TableId::new("d", "t")).is_none());
    }

    #[test]
    fn history_records_the_position_of_each_applied_statement() {
        let mut tracker = tracker();
        tracker
            .apply_query(&position(4), "d", "CREATE TABLE t (id INT NOT NULL)")
            .unwrap();
        tracker
            .apply_query(&position(200), "d", "ALTER TABLE t ADD c INT")
            .unwrap();

        let entries = tracker.history.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].position.pos, 4);
        assert_eq!(entries[1].position.pos, 200);
    }
}
