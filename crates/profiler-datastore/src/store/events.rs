// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datastore metadata events.
//!
//! Rows are owned by [`DATASTORE_RESERVED_STREAM_ID`] and record every
//! stream connect and disconnect seen by the host.

use crate::error::Result;
use crate::model::{Stream, StreamEvent, StreamEventKind, DATASTORE_RESERVED_STREAM_ID};
use crate::store::Database;
use rusqlite::params;
use std::sync::Arc;

/// Append-only log of stream connection events.
pub struct StreamEventTable {
    db: Arc<Database>,
}

impl StreamEventTable {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        db.with_connection(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS Datastore_StreamEvents (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_stream INTEGER NOT NULL,
                    timestamp INTEGER NOT NULL,
                    kind INTEGER NOT NULL,
                    stream_id INTEGER NOT NULL,
                    pid INTEGER NOT NULL,
                    name TEXT NOT NULL
                )",
                [],
            )?;
            Ok(())
        })?;
        Ok(Self { db })
    }

    pub fn insert_stream_event(&self, event: &StreamEvent) -> Result<()> {
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO Datastore_StreamEvents
                 (owner_stream, timestamp, kind, stream_id, pid, name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    DATASTORE_RESERVED_STREAM_ID,
                    event.timestamp,
                    event.kind.as_i64(),
                    event.stream.stream_id,
                    event.stream.pid,
                    event.stream.name,
                ],
            )?;
            Ok(())
        })
    }

    /// Events newer than `since`, in insertion order
    pub fn get_stream_events(&self, since: i64) -> Result<Vec<StreamEvent>> {
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, kind, stream_id, pid, name
                 FROM Datastore_StreamEvents
                 WHERE owner_stream = ?1 AND timestamp > ?2
                 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![DATASTORE_RESERVED_STREAM_ID, since], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    Stream::new(row.get(2)?, row.get(3)?, row.get::<_, String>(4)?),
                ))
            })?;

            let mut events = Vec::new();
            for row in rows {
                let (timestamp, kind, stream) = row?;
                match StreamEventKind::from_i64(kind) {
                    Some(kind) => events.push(StreamEvent {
                        timestamp,
                        kind,
                        stream,
                    }),
                    None => tracing::debug!("Skipping stream event with unknown kind {}", kind),
                }
            }
            Ok(events)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(timestamp: i64, kind: StreamEventKind, stream_id: i64) -> StreamEvent {
        StreamEvent {
            timestamp,
            kind,
            stream: Stream::new(stream_id, 42, "app"),
        }
    }

    #[test]
    fn test_stream_events_in_order_after_since() {
        let db = Arc::new(Database::open_in_memory("events").unwrap());
        let table = StreamEventTable::new(db).unwrap();

        table
            .insert_stream_event(&event(10, StreamEventKind::Connected, 1))
            .unwrap();
        table
            .insert_stream_event(&event(20, StreamEventKind::Connected, 2))
            .unwrap();
        table
            .insert_stream_event(&event(30, StreamEventKind::Disconnected, 1))
            .unwrap();

        let all = table.get_stream_events(i64::MIN).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2], event(30, StreamEventKind::Disconnected, 1));

        let recent = table.get_stream_events(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].stream.stream_id, 2);
    }
}
