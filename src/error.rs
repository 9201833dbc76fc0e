//! CDC 관련 에러 타입
//!
//! 에러의 성격에 따라 처리 방식이 갈린다: 스트림의 무결성을 해치는 에러
//! (연결 끊김, 역직렬화 실패)는 치명적이고, 의미적인 이상(알 수 없는
//! 테이블, 잘못된 DDL)은 로그만 남기고 계속 진행한다.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CdcError {
    /// 초기 연결이 `connect.timeout.ms` 내에 끝나지 않음 — fatal.
    #[error("connect timeout after {timeout_ms}ms connecting to {host}:{port} as {user}")]
    ConnectTimeout {
        host: String,
        port: u16,
        user: String,
        timeout_ms: u64,
    },

    /// 자격 증명이 연결 시점에 거부됨 — fatal.
    #[error("authentication failed for {user}@{host}:{port}")]
    AuthenticationFailed {
        host: String,
        port: u16,
        user: String,
    },

    /// 스트리밍 도중 전송 계층 실패 — dispatcher를 FAILED로 전이시킨다.
    #[error("transport failed: {0}")]
    TransportFailed(String),

    /// 이벤트 역직렬화 실패 — dispatcher를 FAILED로 전이시킨다.
    #[error("failed to deserialize event: {0}")]
    DeserializationFailed(String),

    /// DDL을 파싱할 수 없음 — 스키마는 변경하지 않고 계속 진행.
    #[error("failed to parse DDL statement: {0}")]
    SchemaParseError(String),

    /// 바인딩되지 않은 table number에 대한 row 이벤트 — trace 로그 후 무시.
    #[error("unknown table number: {0}")]
    UnknownTableNumber(u64),

    /// stop() 요청으로 인한 핸들러 중단 — 에러로 표면화되지 않는다.
    #[error("interrupted")]
    Interrupted,

    /// 하위 큐가 가득 참 — 에러가 아니라 backpressure 신호.
    #[error("downstream queue is full")]
    QueueFull,

    #[error("MySQL 연결 에러: {0}")]
    ConnectionError(String),

    #[error("Binlog 파싱 에러: {0}")]
    BinlogParseError(String),

    #[error("GTID 처리 에러: {0}")]
    GtidError(String),

    #[error("쿼리 실행 에러: {0}")]
    QueryError(String),

    #[error("I/O 에러: {0}")]
    IoError(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("예상치 못한 에러: {0}")]
    Other(String),
}

impl CdcError {
    /// 스트림의 무결성을 해치는, 재시도 불가능한 에러인지.
    ///
    /// true면 dispatcher는 `Failed`로 전이해야 한다(§7 disposition 표).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CdcError::ConnectTimeout { .. }
                | CdcError::AuthenticationFailed { .. }
                | CdcError::TransportFailed(_)
                | CdcError::DeserializationFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CdcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_deserialization_errors_are_fatal() {
        assert!(CdcError::TransportFailed("reset".into()).is_fatal());
        assert!(CdcError::DeserializationFailed("bad header".into()).is_fatal());
    }

    #[test]
    fn semantic_oddities_are_not_fatal() {
        assert!(!CdcError::SchemaParseError("bad sql".into()).is_fatal());
        assert!(!CdcError::UnknownTableNumber(42).is_fatal());
        assert!(!CdcError::Interrupted.is_fatal());
        assert!(!CdcError::QueueFull.is_fatal());
    }

    #[test]
    fn connect_timeout_message_names_host_port_user() {
        let err = CdcError::ConnectTimeout {
            host: "db.internal".into(),
            port: 3306,
            user: "replicator".into(),
            timeout_ms: 5000,
        };
        let msg = err.to_string();
        assert!(msg.contains("db.internal"));
        assert!(msg.contains("3306"));
        assert!(msg.contains("replicator"));
    }
}
