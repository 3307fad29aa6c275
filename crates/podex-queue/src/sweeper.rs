// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-session background maintenance: the visibility-timeout sweep and
//! the orphan GC, each on its own interval, both bound to the session's
//! cancellation token so session teardown stops them promptly.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::queue::TaskQueue;

pub struct SessionSweeper {
    queue: Arc<TaskQueue>,
    session_id: String,
    sweep_interval: Duration,
    gc_interval: Duration,
}

impl SessionSweeper {
    pub fn new(
        queue: Arc<TaskQueue>,
        session_id: impl Into<String>,
        sweep_interval: Duration,
        gc_interval: Duration,
    ) -> Self {
        Self {
            queue,
            session_id: session_id.into(),
            sweep_interval,
            gc_interval,
        }
    }

    /// Run both loops until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(self.sweep_interval);
            let mut gc = tokio::time::interval(self.gc_interval);
            // The first tick of a tokio interval is immediate; skip it so a
            // sweeper started mid-claim doesn't instantly fail fresh tasks.
            sweep.tick().await;
            gc.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(session_id = %self.session_id, "sweeper stopped");
                        break;
                    }
                    _ = sweep.tick() => {
                        if let Err(e) = self.queue.check_timed_out_tasks(&self.session_id).await {
                            warn!(session_id = %self.session_id, "timeout sweep failed: {e}");
                        }
                    }
                    _ = gc.tick() => {
                        if let Err(e) = self.queue.cleanup_orphaned_tasks(&self.session_id).await {
                            warn!(session_id = %self.session_id, "orphan gc failed: {e}");
                        }
                    }
                }
            }
        })
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::EnqueueParams;
    use podex_core::{TaskPriority, TaskStatus};
    use podex_redis::MemoryRedis;

    #[tokio::test]
    async fn sweeper_requeues_a_stuck_task() {
        let queue = Arc::new(TaskQueue::new(Arc::new(MemoryRedis::new()), 0));
        let id = queue
            .enqueue(EnqueueParams::new("s1", "coder", "hang", TaskPriority::Medium))
            .await
            .unwrap();
        queue.dequeue("s1", None, "w1").await.unwrap().unwrap();

        let cancel = CancellationToken::new();
        let handle = SessionSweeper::new(
            queue.clone(),
            "s1",
            Duration::from_millis(400),
            Duration::from_secs(3600),
        )
        .spawn(cancel.clone());

        // The claim has to age past the (zero-second) visibility timeout.
        tokio::time::sleep(Duration::from_millis(1600)).await;
        cancel.cancel();
        let _ = handle.await;

        let task = queue.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.retry_count >= 1);
    }

    #[tokio::test]
    async fn cancellation_stops_the_sweeper() {
        let queue = Arc::new(TaskQueue::new(Arc::new(MemoryRedis::new()), 300));
        let cancel = CancellationToken::new();
        let handle = SessionSweeper::new(
            queue,
            "s1",
            Duration::from_millis(50),
            Duration::from_millis(50),
        )
        .spawn(cancel.clone());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper must stop on cancellation")
            .unwrap();
    }
}
