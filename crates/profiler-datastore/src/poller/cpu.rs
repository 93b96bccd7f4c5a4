// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CPU category poller.

use super::{Checkpoint, Poller};
use crate::error::Result;
use crate::model::{EndTime, Session};
use crate::rpc::{CpuClient, CpuDataRequest};
use crate::store::CpuUsageTable;
use std::sync::Arc;

/// Polls one stream's CPU usage into a [`CpuUsageTable`].
pub struct CpuDataPoller {
    session: Session,
    checkpoint: Checkpoint,
    client: Arc<dyn CpuClient>,
    table: Arc<CpuUsageTable>,
}

impl CpuDataPoller {
    pub fn new(session: Session, client: Arc<dyn CpuClient>, table: Arc<CpuUsageTable>) -> Self {
        Self {
            session,
            checkpoint: Checkpoint::new(),
            client,
            table,
        }
    }

    pub fn checkpoint(&self) -> i64 {
        self.checkpoint.get()
    }
}

impl Poller for CpuDataPoller {
    fn poll(&mut self) -> Result<()> {
        let response = self.client.get_data(&CpuDataRequest {
            session: self.session,
            start_time: self.checkpoint.get(),
            end_time: EndTime::Open,
        })?;

        self.table
            .insert_cpu_usage(&self.session, &response.usage_samples)?;
        self.checkpoint.advance(response.end_timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CpuUsageSample;
    use crate::rpc::{Channel, CpuData, MockChannel, RpcError};
    use crate::store::Database;

    fn session() -> Session {
        Session {
            session_id: 3,
            stream_id: 9,
            pid: 99,
            start_timestamp: 0,
        }
    }

    fn sample(timestamp: i64) -> CpuUsageSample {
        CpuUsageSample {
            timestamp,
            elapsed_time_ms: timestamp / 10,
            app_cpu_time_ms: 1,
            system_cpu_time_ms: 1,
        }
    }

    #[test]
    fn test_cpu_poll_persists_and_advances() {
        let db = Arc::new(Database::open_in_memory("cpu-poller").unwrap());
        let table = Arc::new(CpuUsageTable::new(db).unwrap());
        let channel = MockChannel::new();
        channel.push_cpu_response(Ok(CpuData {
            usage_samples: vec![sample(100), sample(200)],
            end_timestamp: 200,
        }));
        channel.push_cpu_response(Err(RpcError::Unavailable("offline".into())));
        channel.push_cpu_response(Ok(CpuData {
            usage_samples: vec![sample(300)],
            end_timestamp: 300,
        }));

        let mut poller = CpuDataPoller::new(session(), channel.cpu_client(), Arc::clone(&table));
        poller.poll().unwrap();
        assert!(poller.poll().is_err());
        assert_eq!(poller.checkpoint(), 200);
        poller.poll().unwrap();

        let starts: Vec<_> = channel.cpu_requests().iter().map(|r| r.start_time).collect();
        assert_eq!(starts, vec![i64::MIN, 200, 200]);

        let stored = table
            .get_cpu_usage(&CpuDataRequest {
                session: session(),
                start_time: i64::MIN,
                end_time: EndTime::Open,
            })
            .unwrap();
        assert_eq!(stored.usage_samples.len(), 3);
        assert_eq!(stored.end_timestamp, 300);
    }
}
