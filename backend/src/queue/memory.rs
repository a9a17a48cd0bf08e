// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{collections::VecDeque, sync::Mutex, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Notify, time::Instant};

use super::{QueueError, WorkQueue};

/// In-process queue with the same contract as the Redis one. Used by tests
/// and local development; it does not survive a restart.
#[derive(Default)]
pub struct MemoryWorkQueue {
    records: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_pop(&self) -> Option<Vec<u8>> {
        self.records.lock().expect("queue lock poisoned").pop_back()
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn push(&self, record: &[u8]) -> Result<(), QueueError> {
        self.records
            .lock()
            .expect("queue lock poisoned")
            .push_front(record.to_vec());
        self.notify.notify_one();
        Ok(())
    }

    async fn blocking_pop(&self, timeout: Duration) -> Result<Option<Vec<u8>>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(record) = self.try_pop() {
                return Ok(Some(record));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn len(&self) -> Result<u64, QueueError> {
        Ok(self.records.lock().expect("queue lock poisoned").len() as u64)
    }

    async fn healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn fifo_order() {
        let queue = MemoryWorkQueue::new();
        queue.push(b"first").await.unwrap();
        queue.push(b"second").await.unwrap();
        queue.push(b"third").await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 3);

        let timeout = Duration::from_millis(10);
        assert_eq!(
            queue.blocking_pop(timeout).await.unwrap().as_deref(),
            Some(b"first".as_slice())
        );
        assert_eq!(
            queue.blocking_pop(timeout).await.unwrap().as_deref(),
            Some(b"second".as_slice())
        );
        assert_eq!(
            queue.blocking_pop(timeout).await.unwrap().as_deref(),
            Some(b"third".as_slice())
        );
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pop_times_out_on_empty_queue() {
        let queue = MemoryWorkQueue::new();
        let started = std::time::Instant::now();
        let popped = queue.blocking_pop(Duration::from_millis(50)).await.unwrap();
        assert!(popped.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn pop_wakes_up_on_push() {
        let queue = Arc::new(MemoryWorkQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.blocking_pop(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(b"late arrival").await.unwrap();
        let popped = consumer.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some(b"late arrival".as_slice()));
    }

    #[tokio::test]
    async fn concurrent_consumers_each_record_once() {
        let queue = Arc::new(MemoryWorkQueue::new());
        for i in 0..10u8 {
            queue.push(&[i]).await.unwrap();
        }
        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(record) =
                    queue.blocking_pop(Duration::from_millis(20)).await.unwrap()
                {
                    seen.push(record[0]);
                }
                seen
            }));
        }
        let mut all: Vec<u8> = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }
}
