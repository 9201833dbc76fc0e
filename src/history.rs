//! 스키마 히스토리 저장소 — `spec.md` §9 "persist the DDL entry before
//! acknowledging the QUERY event complete".
//!
//! `SchemaTracker`는 in-memory 스냅샷만 들고 있고, 재시작 이후 과거
//! DDL 이력을 재구성해야 할 때를 위해 append-only로 이 store에 기록한다.
//! 순서 보장: DDL이 적용됐다고 간주되기 전에 반드시 `append`가 끝나야
//! 한다 — 실패하면 스키마 변경 자체가 실패한 것으로 취급된다.

use crate::cursor::SourcePosition;
use crate::error::{CdcError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// `spec.md` §6 "Persisted state": an append-only log of
/// `{position, database, statements[]}` entries, replayable in order
/// to reconstruct a `SchemaSnapshot` at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaHistoryEntry {
    pub position: SourcePosition,
    pub database: String,
    pub statements: Vec<String>,
    pub recorded_at: chrono::DateTime<Utc>,
}

pub trait SchemaHistoryStore: Send {
    fn append(&mut self, position: &SourcePosition, database: &str, statements: &[String]) -> Result<()>;
    fn entries(&self) -> Vec<SchemaHistoryEntry>;
}

/// 테스트와 `include.schema.changes = false` 배치에 쓰는 메모리 전용 구현.
#[derive(Debug, Default)]
pub struct InMemorySchemaHistory {
    entries: Vec<SchemaHistoryEntry>,
}

impl InMemorySchemaHistory {
    pub fn new() -> Self {
        InMemorySchemaHistory::default()
    }
}

impl SchemaHistoryStore for InMemorySchemaHistory {
    fn append(&mut self, position: &SourcePosition, database: &str, statements: &[String]) -> Result<()> {
        self.entries.push(SchemaHistoryEntry {
            position: position.clone(),
            database: database.to_string(),
            statements: statements.to_vec(),
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    fn entries(&self) -> Vec<SchemaHistoryEntry> {
        self.entries.clone()
    }
}

/// append-only, 줄 단위 JSON 파일에 fsync까지 하고 나서 반환하는 구현.
///
/// 한 줄에 하나의 `SchemaHistoryEntry`를 JSON으로 쓴다 — 재시작 시
/// 그대로 읽어 재생할 수 있다.
pub struct FileSchemaHistory {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl FileSchemaHistory {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(CdcError::IoError)?;
        Ok(FileSchemaHistory {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl SchemaHistoryStore for FileSchemaHistory {
    fn append(&mut self, position: &SourcePosition, database: &str, statements: &[String]) -> Result<()> {
        let entry = SchemaHistoryEntry {
            position: position.clone(),
            database: database.to_string(),
            statements: statements.to_vec(),
            recorded_at: Utc::now(),
        };
        let line = serde_json::to_string(&entry).map_err(CdcError::SerializationError)?;

        let mut file = self.file.lock().unwrap();
        writeln!(file, "{line}").map_err(CdcError::IoError)?;
        file.flush().map_err(CdcError::IoError)?;
        file.sync_data().map_err(CdcError::IoError)?;
        Ok(())
    }

    fn entries(&self) -> Vec<SchemaHistoryEntry> {
        let Ok(contents) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        contents
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn in_memory_history_records_statements_in_order() {
        let mut history = InMemorySchemaHistory::new();
        history.append(&position(4), "d", &["CREATE TABLE t (id INT)".into()]).unwrap();
        history.append(&position(200), "d", &["ALTER TABLE t ADD c INT".into()]).unwrap();

        let entries = history.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].statements[0], "CREATE TABLE t (id INT)");
        assert_eq!(entries[0].position.pos, 4);
        assert_eq!(entries[1].statements[0], "ALTER TABLE t ADD c INT");
        assert_eq!(entries[1].position.pos, 200);
    }

    #[test]
    fn file_history_persists_across_handles() {
        let dir = std::env::temp_dir().join(format!("cdc-history-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("schema_history.jsonl");
        if path.exists() {
            std::fs::remove_file(&path).unwrap();
        }

        {
            let mut history = FileSchemaHistory::open(&path).unwrap();
            history.append(&position(4), "d", &["CREATE TABLE t (id INT)".into()]).unwrap();
        }

        let history = FileSchemaHistory::open(&path).unwrap();
        let entries = history.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].database, "d");
        assert_eq!(entries[0].position.pos, 4);

        std::fs::remove_file(&path).ok();
    }
}
