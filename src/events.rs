//! MySQL Binlog 이벤트 타입 및 데이터 구조 정의
//!
//! 여기서 정의하는 타입들은 `EventSource`(`source.rs`)가 내보내는 디코딩된
//! 이벤트의 모양이다. 와이어 프로토콜 자체(`protocol.rs`/`binlog.rs`)는
//! 이 모양으로 디코딩하는 외부 협력자일 뿐이고, dispatcher는 이 타입만
//! 알면 된다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// MySQL Binlog 이벤트 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventType {
    /// 알 수 없는 이벤트
    Unknown = 0,
    /// 쿼리 이벤트 (DDL, DML)
    QueryEvent = 2,
    /// 로테이션 이벤트 (새 binlog 파일)
    RotateEvent = 4,
    /// 서버가 연결을 끊기 전에 보내는 이벤트
    StopEvent = 1,
    /// 복제 하트비트
    HeartbeatEvent = 27,
    /// 복제에 영향을 준 비정상 상황 통지
    IncidentEvent = 26,
    /// 테이블 맵 이벤트 (스키마 정보)
    TableMapEvent = 19,
    /// WRITE_ROWS 이벤트 (INSERT)
    WriteRowsEvent = 30,
    /// UPDATE_ROWS 이벤트 (UPDATE)
    UpdateRowsEvent = 31,
    /// DELETE_ROWS 이벤트 (DELETE)
    DeleteRowsEvent = 32,
    /// GTID 이벤트 (Global Transaction ID)
    GtidEvent = 33,
    /// 익명 GTID 이벤트
    AnonymousGtidEvent = 34,
    /// Rows Query 이벤트 (원본 쿼리)
    RowsQueryEvent = 36,
    /// 트랜잭션 페이로드 이벤트
    TransactionPayloadEvent = 38,
}

impl EventType {
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => EventType::StopEvent,
            2 => EventType::QueryEvent,
            4 => EventType::RotateEvent,
            19 => EventType::TableMapEvent,
            26 => EventType::IncidentEvent,
            27 => EventType::HeartbeatEvent,
            30 => EventType::WriteRowsEvent,
            31 => EventType::UpdateRowsEvent,
            32 => EventType::DeleteRowsEvent,
            33 => EventType::GtidEvent,
            34 => EventType::AnonymousGtidEvent,
            36 => EventType::RowsQueryEvent,
            38 => EventType::TransactionPayloadEvent,
            _ => EventType::Unknown,
        }
    }
}

/// 서버가 할당한, 하나의 binlog 파일 안에서만 유효한 테이블 번호.
///
/// `ROTATE`나 동일 번호에 대한 새 `TABLE_MAP`으로 재바인딩될 때까지만
/// 유효하다 — `spec.md` §3의 불변 조건.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableNumber(pub u64);

impl From<u64> for TableNumber {
    fn from(value: u64) -> Self {
        TableNumber(value)
    }
}

impl std::fmt::Display for TableNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Binlog 이벤트 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHeader {
    /// 이벤트 타임스탬프 (초 단위)
    pub timestamp: u32,
    /// 이벤트 타입
    pub event_type: EventType,
    /// MySQL 서버 ID
    pub server_id: u32,
    /// 이벤트 길이 (바이트)
    pub event_length: u32,
    /// 다음 이벤트 위치 (0이면 알 수 없음/미사용)
    pub next_pos: u32,
    /// 이벤트 플래그
    pub flags: u16,
}

/// 테이블 맵 정보 (컬럼 메타데이터)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMapData {
    /// 테이블 번호
    pub table_number: TableNumber,
    /// 데이터베이스명
    pub database: String,
    /// 테이블명
    pub table: String,
    /// 컬럼 타입들
    pub column_types: Vec<u8>,
    /// 컬럼 메타데이터
    pub column_meta: Vec<Vec<u8>>,
    /// nullable 비트맵
    pub nullable_bitmap: Vec<u8>,
}

/// WRITE_ROWS 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRowsData {
    pub table_number: TableNumber,
    pub flags: u16,
    pub column_count: u64,
    /// 사용된(포함된) 컬럼 비트맵
    pub columns_present: Vec<u8>,
    pub rows: Vec<Vec<CellValue>>,
}

/// UPDATE_ROWS 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRowsData {
    pub table_number: TableNumber,
    pub flags: u16,
    pub column_count: u64,
    pub columns_present: Vec<u8>,
    pub columns_changed: Vec<u8>,
    /// (변경 전, 변경 후) 쌍들
    pub rows: Vec<(Vec<CellValue>, Vec<CellValue>)>,
}

/// DELETE_ROWS 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRowsData {
    pub table_number: TableNumber,
    pub flags: u16,
    pub column_count: u64,
    pub columns_present: Vec<u8>,
    pub rows: Vec<Vec<CellValue>>,
}

/// 셀 값 (다양한 MySQL 타입 지원)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
    Date(String),
    Time(String),
    Decimal(String),
    Json(serde_json::Value),
}

impl CellValue {
    pub fn as_string(&self) -> Option<String> {
        match self {
            CellValue::String(s) => Some(s.clone()),
            CellValue::Int64(i) => Some(i.to_string()),
            CellValue::UInt64(u) => Some(u.to_string()),
            CellValue::Double(d) => Some(d.to_string()),
            CellValue::DateTime(dt) => Some(dt.to_rfc3339()),
            CellValue::Null => Some("NULL".to_string()),
            _ => None,
        }
    }
}

/// GTID 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtidEventData {
    /// GTID 문자열 (format: uuid:sequence-number)
    pub gtid: String,
    pub committed: bool,
}

/// 쿼리 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEventData {
    pub thread_id: u32,
    pub exec_time: u32,
    pub database: String,
    pub query: String,
}

/// 회전 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateEventData {
    /// 새 바이너리 로그 파일명
    pub next_binlog_name: String,
    /// 새 파일의 시작 위치
    pub position: u64,
}

/// `INCIDENT` 이벤트 데이터 — 원문 메시지만 보존한다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentEventData {
    pub message: String,
}

/// 모든 Binlog 이벤트 페이로드를 포함하는 열거형.
///
/// §9 "Handler table: use a fixed mapping from event-type tag to handler
/// function" — dispatcher는 이 열거형에 대해 `match`하는 고정 테이블로
/// 구현되고, 폴리모픽 클래스 계층을 쓰지 않는다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BinlogEventData {
    Stop,
    Heartbeat,
    Incident(IncidentEventData),
    TableMap(TableMapData),
    WriteRows(WriteRowsData),
    UpdateRows(UpdateRowsData),
    DeleteRows(DeleteRowsData),
    Query(QueryEventData),
    Rotate(RotateEventData),
    Gtid(GtidEventData),
    RowsQuery(String),
    Unknown(Vec<u8>),
}

/// 완성된 Binlog 이벤트 — `EventSource`가 내보내는 단위.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinlogEvent {
    pub header: EventHeader,
    pub data: BinlogEventData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_through_u8() {
        for (byte, expected) in [
            (1u8, EventType::StopEvent),
            (2, EventType::QueryEvent),
            (4, EventType::RotateEvent),
            (19, EventType::TableMapEvent),
            (26, EventType::IncidentEvent),
            (27, EventType::HeartbeatEvent),
            (30, EventType::WriteRowsEvent),
            (31, EventType::UpdateRowsEvent),
            (32, EventType::DeleteRowsEvent),
            (33, EventType::GtidEvent),
        ] {
            assert_eq!(EventType::from_u8(byte), expected);
        }
        assert_eq!(EventType::from_u8(255), EventType::Unknown);
    }

    #[test]
    fn table_number_displays_as_plain_integer() {
        assert_eq!(TableNumber(42).to_string(), "42");
    }
}
