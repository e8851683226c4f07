//! Bounded task groups
//!
//! A permit is taken from the semaphore before each unit is spawned, so the
//! dispatcher waits while all slots are busy. The permit travels into the task
//! and is released when the unit finishes. The returned future completes once
//! every spawned unit has.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::error;

async fn acquire(semaphore: &Arc<Semaphore>) -> Option<OwnedSemaphorePermit> {
    semaphore.clone().acquire_owned().await.ok()
}

/// Runs `make(item)` for every item with at most `limit` units in flight and
/// returns their outputs in completion order. A unit that panics is logged and
/// contributes no output.
pub async fn run_bounded<I, F, Fut>(limit: usize, items: I, mut make: F) -> Vec<Fut::Output>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks = JoinSet::new();

    for item in items {
        // The semaphore is never closed, so this only stops on a logic error.
        let Some(permit) = acquire(&semaphore).await else {
            break;
        };
        let unit = make(item);
        tasks.spawn(async move {
            let output = unit.await;
            drop(permit);
            output
        });
    }

    let mut outputs = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(output) => outputs.push(output),
            Err(e) => error!(error = %e, "Task did not complete"),
        }
    }
    outputs
}
