//! Event dispatcher (C5, `spec.md` §4.5)
//!
//! The single-writer state machine that owns the cursor, the table-id
//! map and the schema tracker, and pushes `ChangeRecord`s into the
//! downstream queue. It is driven by an `EventSource` implementation
//! through the `EventSink` trait — it never touches the wire protocol.

use crate::config::ReaderConfig;
use crate::cursor::PositionCursor;
use crate::error::{CdcError, Result};
use crate::events::{BinlogEvent, BinlogEventData};
use crate::gtid::GtidSet;
use crate::history::SchemaHistoryStore;
use crate::queue::QueueHandle;
use crate::record_maker::RecordMaker;
use crate::schema::SchemaTracker;
use crate::source::EventSink;
use crate::table_map::{ColumnBitset, TableId, TableIdMap};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// `spec.md` §4.5: `Idle → Connecting → Streaming → {Failed, Stopped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Connecting,
    Streaming,
    Failed,
    Stopped,
}

/// C5 — owns C1/C2/C3, produces into C6.
pub struct EventDispatcher<H: SchemaHistoryStore> {
    state: DispatcherState,
    cursor: PositionCursor,
    table_map: TableIdMap,
    schema: SchemaTracker<H>,
    queue: QueueHandle,
    include_schema_changes: bool,
    databases: Vec<String>,
    stop_flag: Arc<AtomicBool>,
}

impl<H: SchemaHistoryStore> EventDispatcher<H> {
    pub fn new(config: &ReaderConfig, history: H, queue: QueueHandle) -> Self {
        let schema = SchemaTracker::new(history);
        let table_map = TableIdMap::new(Box::new(schema.column_lookup()));
        EventDispatcher {
            state: DispatcherState::Idle,
            cursor: PositionCursor::new("mysql-bin.000001".to_string(), 4),
            table_map,
            schema,
            queue,
            include_schema_changes: config.include_schema_changes,
            databases: config.databases.clone(),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_position(
        config: &ReaderConfig,
        history: H,
        queue: QueueHandle,
        server_id: u32,
        file: String,
        position: u64,
        gtid_set: GtidSet,
    ) -> Self {
        let schema = SchemaTracker::new(history);
        let table_map = TableIdMap::new(Box::new(schema.column_lookup()));
        EventDispatcher {
            state: DispatcherState::Idle,
            cursor: PositionCursor::from_snapshot(server_id, file, position, gtid_set),
            table_map,
            schema,
            queue,
            include_schema_changes: config.include_schema_changes,
            databases: config.databases.clone(),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// A cooperative flag `BinlogReader::stop()` can flip from the
    /// outside to unwind the receiver loop cleanly — `spec.md` §5.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    fn database_included(&self, database: &str) -> bool {
        self.databases.is_empty() || self.databases.iter().any(|d| d == database)
    }

    async fn handle_table_map(&mut self, data: crate::events::TableMapData) {
        let table_id = TableId::new(data.database.clone(), data.table.clone());
        let included = self.database_included(&data.database);
        let accepted = self.table_map.assign(data.table_number, table_id, included);
        if !accepted {
            trace!(table = %data.table, database = %data.database, "table excluded by filter");
        }
    }

    async fn handle_write_rows(&mut self, data: crate::events::WriteRowsData) -> Result<()> {
        let bitset = ColumnBitset::from_bytes(&data.columns_present);
        match self.table_map.lookup(data.table_number, bitset) {
            Some(table) => {
                let records = RecordMaker::create_each(&mut self.cursor, &table, &data.rows);
                for record in records {
                    self.queue.enqueue(record).await?;
                }
            }
            None => trace!(table_number = %data.table_number, "unbound table number, dropping write rows"),
        }
        Ok(())
    }

    async fn handle_update_rows(&mut self, data: crate::events::UpdateRowsData) -> Result<()> {
        let bitset = ColumnBitset::from_bytes(&data.columns_present);
        match self.table_map.lookup(data.table_number, bitset) {
            Some(table) => {
                let records = RecordMaker::update_each(&mut self.cursor, &table, &data.rows);
                for record in records {
                    self.queue.enqueue(record).await?;
                }
            }
            None => trace!(table_number = %data.table_number, "unbound table number, dropping update rows"),
        }
        Ok(())
    }

    async fn handle_delete_rows(&mut self, data: crate::events::DeleteRowsData) -> Result<()> {
        let bitset = ColumnBitset::from_bytes(&data.columns_present);
        match self.table_map.lookup(data.table_number, bitset) {
            Some(table) => {
                let records = RecordMaker::delete_each(&mut self.cursor, &table, &data.rows);
                for record in records {
                    self.queue.enqueue(record).await?;
                }
            }
            None => trace!(table_number = %data.table_number, "unbound table number, dropping delete rows"),
        }
        Ok(())
    }

    async fn handle_query(&mut self, data: crate::events::QueryEventData) -> Result<()> {
        let position = self.cursor.snapshot();
        let statements = self
            .schema
            .apply_query(&position, &data.database, &data.query)?;
        if self.include_schema_changes {
            if let Some(record) = RecordMaker::schema_change(&mut self.cursor, statements) {
                self.queue.enqueue(record).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<H: SchemaHistoryStore> EventSink for EventDispatcher<H> {
    async fn on_event(&mut self, event: BinlogEvent) -> Result<()> {
        if self.stop_flag.load(Ordering::Acquire) {
            self.state = DispatcherState::Stopped;
            return Err(CdcError::Interrupted);
        }

        self.state = DispatcherState::Streaming;
        self.cursor
            .observe_header(event.header.timestamp, event.header.server_id);

        let is_rotate = matches!(event.data, BinlogEventData::Rotate(_));

        // Captured instead of propagated with `?` directly: a blocking
        // enqueue interrupted mid-handler (`queue.rs`'s `close()` during
        // `BinlogReader::stop()`) surfaces as `CdcError::Interrupted`
        // here, and that must still flip the dispatcher to `Stopped` —
        // not just the pre-check above, which only catches a stop
        // requested *between* events.
        let handler_result: Result<()> = match event.data {
            BinlogEventData::Stop => {
                debug!("received STOP event");
                Ok(())
            }
            BinlogEventData::Heartbeat => {
                trace!("received HEARTBEAT event");
                Ok(())
            }
            BinlogEventData::Incident(data) => {
                warn!(message = %data.message, "received INCIDENT event, no record emitted");
                Ok(())
            }
            BinlogEventData::Rotate(rotate) => {
                self.cursor
                    .observe_rotate(rotate.next_binlog_name.clone(), rotate.position);
                self.table_map.clear();
                debug!(file = %rotate.next_binlog_name, "rotated, table-id bindings invalidated");
                Ok(())
            }
            BinlogEventData::TableMap(data) => {
                self.handle_table_map(data).await;
                Ok(())
            }
            BinlogEventData::WriteRows(data) => self.handle_write_rows(data).await,
            BinlogEventData::UpdateRows(data) => self.handle_update_rows(data).await,
            BinlogEventData::DeleteRows(data) => self.handle_delete_rows(data).await,
            BinlogEventData::Query(data) => self.handle_query(data).await,
            BinlogEventData::Gtid(data) => self.cursor.observe_gtid(&data.gtid),
            BinlogEventData::RowsQuery(_) => Ok(()),
            BinlogEventData::Unknown(_) => {
                trace!("received unrecognized event, skipping");
                Ok(())
            }
        };

        if let Err(err) = &handler_result {
            if matches!(err, CdcError::Interrupted) {
                self.state = DispatcherState::Stopped;
            }
            return handler_result;
        }

        // `spec.md` §4.5 step 4 is an "else if" against step 3: a ROTATE
        // event's own position update already happened above and must not
        // be clobbered by its header's (old-file) `next_pos`.
        if !is_rotate && event.header.next_pos > 0 {
            self.cursor.observe_next_position(event.header.next_pos);
        }

        Ok(())
    }

    fn on_connect(&mut self) {
        // `spec.md` §4.5: the `Connecting -> Streaming` edge fires on
        // "connect OK", which is exactly when `on_connect` is invoked
        // (right after handshake/auth/dump, before any event is read) —
        // not on the first event.
        self.state = DispatcherState::Streaming;
        debug!("event source connected");
    }

    fn on_disconnect(&mut self) {
        if self.state != DispatcherState::Stopped {
            self.state = DispatcherState::Failed;
        }
        debug!("event source disconnected");
    }

    fn on_communication_failure(&mut self, err: &CdcError) {
        self.state = DispatcherState::Failed;
        warn!(error = %err, "communication failure, dispatcher moved to Failed");
    }

    fn on_event_deserialization_failure(&mut self, err: &CdcError) {
        warn!(error = %err, "failed to deserialize event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventHeader, EventType, RotateEventData, TableMapData, TableNumber, WriteRowsData, CellValue};
    use crate::history::InMemorySchemaHistory;
    use crate::queue::DownstreamQueue;

    fn header(event_type: EventType, next_pos: u32) -> EventHeader {
        EventHeader {
            timestamp: 100,
            event_type,
            server_id: 1,
            event_length: 0,
            next_pos,
            flags: 0,
        }
    }

    fn dispatcher(queue: &DownstreamQueue) -> EventDispatcher<InMemorySchemaHistory> {
        let config = ReaderConfig::default();
        EventDispatcher::new(&config, InMemorySchemaHistory::new(), queue.handle())
    }

    #[tokio::test]
    async fn rotate_then_table_map_then_write_rows_enqueues_a_record() {
        let mut queue = DownstreamQueue::new(8);
        let mut dispatcher = dispatcher(&queue);

        dispatcher
            .on_event(BinlogEvent {
                header: header(EventType::RotateEvent, 0),
                data: BinlogEventData::Rotate(RotateEventData {
                    next_binlog_name: "mysql-bin.000002".into(),
                    position: 4,
                }),
            })
            .await
            .unwrap();

        dispatcher
            .on_event(BinlogEvent {
                header: header(EventType::TableMapEvent, 200),
                data: BinlogEventData::TableMap(TableMapData {
                    table_number: TableNumber(7),
                    database: "d".into(),
                    table: "t".into(),
                    column_types: vec![],
                    column_meta: vec![],
                    nullable_bitmap: vec![],
                }),
            })
            .await
            .unwrap();

        dispatcher
            .on_event(BinlogEvent {
                header: header(EventType::WriteRowsEvent, 300),
                data: BinlogEventData::WriteRows(WriteRowsData {
                    table_number: TableNumber(7),
                    flags: 0,
                    column_count: 1,
                    columns_present: vec![0b1],
                    rows: vec![vec![CellValue::Int64(1)]],
                }),
            })
            .await
            .unwrap();

        let batch = queue
            .drain_batch(10, std::time::Duration::from_millis(100))
            .await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].op, crate::record::Op::Create);
    }

    #[tokio::test]
    async fn rotate_event_next_pos_does_not_override_rotate_position() {
        let mut queue = DownstreamQueue::new(8);
        let mut dispatcher = dispatcher(&queue);

        dispatcher
            .on_event(BinlogEvent {
                header: header(EventType::RotateEvent, 999),
                data: BinlogEventData::Rotate(RotateEventData {
                    next_binlog_name: "mysql-bin.000002".into(),
                    position: 4,
                }),
            })
            .await
            .unwrap();

        assert_eq!(dispatcher.cursor.file(), "mysql-bin.000002");
        assert_eq!(dispatcher.cursor.position(), 4);
    }

    #[tokio::test]
    async fn write_rows_for_unbound_table_number_is_dropped() {
        let mut queue = DownstreamQueue::new(8);
        let mut dispatcher = dispatcher(&queue);

        dispatcher
            .on_event(BinlogEvent {
                header: header(EventType::WriteRowsEvent, 0),
                data: BinlogEventData::WriteRows(WriteRowsData {
                    table_number: TableNumber(99),
                    flags: 0,
                    column_count: 1,
                    columns_present: vec![0b1],
                    rows: vec![vec![CellValue::Int64(1)]],
                }),
            })
            .await
            .unwrap();

        let batch = queue
            .drain_batch(10, std::time::Duration::from_millis(20))
            .await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn stop_flag_interrupts_dispatch() {
        let mut queue = DownstreamQueue::new(8);
        let mut dispatcher = dispatcher(&queue);
        dispatcher.stop_handle().store(true, Ordering::Release);

        let result = dispatcher
            .on_event(BinlogEvent {
                header: header(EventType::HeartbeatEvent, 0),
                data: BinlogEventData::Heartbeat,
            })
            .await;

        assert!(matches!(result, Err(CdcError::Interrupted)));
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }

    /// `spec.md` §5 cancellation: `stop()` closing the queue while a
    /// handler is blocked mid-`enqueue` (not just the pre-event check)
    /// must also surface as `Interrupted` and flip the dispatcher to
    /// `Stopped`, not bubble out as a generic queue error.
    #[tokio::test]
    async fn enqueue_interrupted_mid_handler_transitions_to_stopped() {
        let mut queue = DownstreamQueue::new(1);
        let mut dispatcher = dispatcher(&queue);

        dispatcher
            .on_event(BinlogEvent {
                header: header(EventType::TableMapEvent, 0),
                data: BinlogEventData::TableMap(TableMapData {
                    table_number: TableNumber(1),
                    database: "d".into(),
                    table: "t".into(),
                    column_types: vec![],
                    column_meta: vec![],
                    nullable_bitmap: vec![],
                }),
            })
            .await
            .unwrap();

        // Two rows against a capacity-1, undrained queue: the first
        // enqueue fits, the second blocks until `close()` runs below.
        let write_event = BinlogEvent {
            header: header(EventType::WriteRowsEvent, 0),
            data: BinlogEventData::WriteRows(WriteRowsData {
                table_number: TableNumber(1),
                flags: 0,
                column_count: 1,
                columns_present: vec![0b1],
                rows: vec![vec![CellValue::Int64(1)], vec![CellValue::Int64(2)]],
            }),
        };

        let task = tokio::spawn(async move {
            let result = dispatcher.on_event(write_event).await;
            (result, dispatcher)
        });

        tokio::task::yield_now().await;
        queue.close();

        let (result, dispatcher) = task.await.unwrap();
        assert!(matches!(result, Err(CdcError::Interrupted)));
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }
}
