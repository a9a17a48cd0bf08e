// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The durable work queue between gateway and workers.
//!
//! The queue is a buffer, not the source of truth: a record here without a
//! registry row is an orphan the worker drops on `NotFound`. Records are
//! opaque bytes to the queue; the worker parses them.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod memory;
mod redis;

pub use memory::MemoryWorkQueue;
pub use redis::RedisWorkQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Redis(#[from] ::redis::RedisError),
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// FIFO queue of opaque records with blocking consumption.
///
/// Implementations guarantee at-most-one delivery of each pushed record to
/// concurrent consumers and survive consumer restarts. FIFO holds for a
/// single producer; with several producers ordering is only approximate.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append a record. Non-blocking.
    async fn push(&self, record: &[u8]) -> Result<(), QueueError>;

    /// Remove and return one record, waiting up to `timeout` for one to
    /// arrive. `None` on timeout.
    async fn blocking_pop(&self, timeout: Duration) -> Result<Option<Vec<u8>>, QueueError>;

    /// Advisory queue length.
    async fn len(&self) -> Result<u64, QueueError>;

    /// Liveness probe.
    async fn healthy(&self) -> bool;
}
