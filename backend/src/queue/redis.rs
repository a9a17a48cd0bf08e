// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};

use crate::settings::QueueSettings;

use super::{QueueError, WorkQueue};

/// Work queue backed by a single Redis list.
///
/// `LPUSH` appends on the producer side, `BRPOP` consumes from the other
/// end, which gives FIFO and lets Redis serialize concurrent consumers.
/// The connection manager reconnects transparently and keeps one
/// multiplexed connection per process.
#[derive(Clone)]
pub struct RedisWorkQueue {
    connection: ConnectionManager,
    key: String,
}

impl RedisWorkQueue {
    pub async fn connect(settings: &QueueSettings) -> Result<Self, QueueError> {
        let client = redis::Client::open(settings.url())?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection,
            key: settings.key.clone(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn push(&self, record: &[u8]) -> Result<(), QueueError> {
        let mut connection = self.connection.clone();
        let _: i64 = connection.lpush(&self.key, record).await?;
        Ok(())
    }

    async fn blocking_pop(&self, timeout: Duration) -> Result<Option<Vec<u8>>, QueueError> {
        let mut connection = self.connection.clone();
        // BRPOP returns (key, value) or nil on timeout.
        let popped: Option<(String, Vec<u8>)> = connection
            .brpop(&self.key, timeout.as_secs_f64())
            .await?;
        Ok(popped.map(|(_, record)| record))
    }

    async fn len(&self) -> Result<u64, QueueError> {
        let mut connection = self.connection.clone();
        let length: u64 = connection.llen(&self.key).await?;
        Ok(length)
    }

    async fn healthy(&self) -> bool {
        let mut connection = self.connection.clone();
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut connection).await;
        pong.is_ok()
    }
}
