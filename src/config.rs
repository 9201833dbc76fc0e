//! 리더 설정 — `spec.md` §6 "Config".

use std::time::Duration;

/// `BinlogReader`를 구동하는 데 필요한 전체 설정.
///
/// 연결 파라미터는 `connection.rs::ConnectionConfig`의 필드를 그대로
/// 반영한다 — 거기에 dispatcher/queue 레벨 파라미터를 더한 것.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub server_id: u32,
    /// 초기 연결이 이 시간 내에 끝나지 않으면 `ConnectTimeout`.
    pub connect_timeout: Duration,
    /// 스트리밍 연결 유지를 위한 하트비트 주기 — `None`이면 서버 기본값.
    pub keep_alive_interval: Option<Duration>,
    /// 필터링할 데이터베이스 목록 — 비어 있으면 전부 포함.
    pub databases: Vec<String>,
    /// `QUERY` 이벤트에서 스키마 변경 레코드를 만들지 여부.
    pub include_schema_changes: bool,
    /// downstream queue의 최대 용량 — `spec.md` §5.
    pub queue_capacity: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            hostname: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            server_id: 1,
            connect_timeout: Duration::from_secs(30),
            keep_alive_interval: Some(Duration::from_secs(30)),
            databases: Vec::new(),
            include_schema_changes: true,
            queue_capacity: 1024,
        }
    }
}

impl ReaderConfig {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        ReaderConfig {
            hostname: hostname.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn database_included(&self, database: &str) -> bool {
        self.databases.is_empty() || self.databases.iter().any(|d| d == database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_every_database() {
        let config = ReaderConfig::default();
        assert!(config.database_included("anything"));
    }

    #[test]
    fn explicit_database_list_filters() {
        let mut config = ReaderConfig::new("db.internal", "replicator");
        config.databases = vec!["orders".into()];
        assert!(config.database_included("orders"));
        assert!(!config.database_included("other"));
    }
}
