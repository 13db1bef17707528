use crate::error::{MigrationError, Result};
use rand::seq::SliceRandom;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::debug;

/// Run `work` over every item with at most `workers` running at once
///
/// Items are fed through a channel to a fixed set of workers, optionally in
/// random order so that objects of the same kind are not all applied back to
/// back. The first error stops the dispatch of further items and is returned
/// once the running workers are aborted.
pub async fn run_pool<T, F, Fut>(items: Vec<T>, workers: usize, shuffle: bool, work: F) -> Result<()>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let total = items.len();
    if total == 0 {
        return Ok(());
    }
    let mut items = items;
    if shuffle {
        items.shuffle(&mut rand::thread_rng());
    }
    let width = workers.max(1).min(total);
    debug!("Dispatching {} items to {} workers", total, width);

    let (task_tx, task_rx) = mpsc::channel::<T>(width);
    let task_rx = Arc::new(Mutex::new(task_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<Result<()>>(total);
    let work = Arc::new(work);

    let dispatcher = tokio::spawn(async move {
        for item in items {
            if task_tx.send(item).await.is_err() {
                break;
            }
        }
    });

    let mut pool = JoinSet::new();
    for _ in 0..width {
        let task_rx = task_rx.clone();
        let result_tx = result_tx.clone();
        let work = work.clone();
        pool.spawn(async move {
            loop {
                let next = task_rx.lock().await.recv().await;
                let Some(item) = next else {
                    break;
                };
                let result = (work.as_ref())(item).await;
                if result_tx.send(result).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(result_tx);

    let mut outcome = Ok(());
    for _ in 0..total {
        match result_rx.recv().await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                outcome = Err(e);
                break;
            }
            None => {
                outcome = Err(MigrationError::internal_error(
                    "worker pool stopped before all items were processed",
                ));
                break;
            }
        }
    }

    if outcome.is_err() {
        dispatcher.abort();
        pool.abort_all();
    }
    while pool.join_next().await.is_some() {}
    outcome
}
