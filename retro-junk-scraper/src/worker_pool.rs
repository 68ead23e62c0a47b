//! Worker pool for one running task.
//!
//! Spawns N persistent tokio tasks that pull sub-items from a bounded
//! async-channel. Results are sent to an unbounded channel for consumption
//! by the runner.
//!
//! `async-channel` is used for work distribution because its `Receiver` is
//! `Clone`: each worker gets its own handle and no worker can hold a lock
//! while blocked on `recv()`.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A pool of worker tasks that process items concurrently.
///
/// - Backpressure: the work channel holds at most N items.
/// - Cooperative stop: each worker checks the stop flag before dispatching
///   its next item. Items already dispatched run to completion; items not
///   yet dispatched are dropped without producing a result.
/// - Shutdown: the pool drains when the item source is exhausted or the
///   stop flag is raised, and [`recv`](Self::recv) then returns `None`.
///
/// ```ignore
/// let mut pool = WorkerPool::start(4, games, stop, |game| async move {
///     process(game).await
/// });
///
/// while let Some(result) = pool.recv().await {
///     handle(result);
/// }
/// ```
pub struct WorkerPool<R: Send + 'static> {
    result_rx: mpsc::UnboundedReceiver<R>,
    _handles: Vec<JoinHandle<()>>,
}

impl<R: Send + 'static> WorkerPool<R> {
    /// Spawn `n` workers (at least one) and feed them `items` in order.
    ///
    /// Submission happens in a background task so the caller can start
    /// receiving results immediately.
    pub fn start<W, F, Fut>(n: usize, items: Vec<W>, stop: Arc<AtomicBool>, process_fn: F) -> Self
    where
        W: Send + 'static,
        F: Fn(W) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let n = n.max(1);
        let (work_tx, work_rx) = async_channel::bounded::<W>(n);
        let (result_tx, result_rx) = mpsc::unbounded_channel::<R>();
        let process_fn = Arc::new(process_fn);

        let handles: Vec<JoinHandle<()>> = (0..n)
            .map(|_| {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                let process_fn = process_fn.clone();
                let stop = stop.clone();
                tokio::spawn(async move {
                    while let Ok(item) = work_rx.recv().await {
                        if stop.load(Ordering::SeqCst) {
                            work_rx.close();
                            break;
                        }
                        if result_tx.send(process_fn(item).await).is_err() {
                            break; // Receiver dropped
                        }
                    }
                })
            })
            .collect();

        // Drop our copy of result_tx so the channel closes when all workers finish
        drop(result_tx);

        tokio::spawn(async move {
            for item in items {
                if stop.load(Ordering::SeqCst) || work_tx.send(item).await.is_err() {
                    break;
                }
            }
            // work_tx dropped here -> channel closes -> workers drain then stop
        });

        Self {
            result_rx,
            _handles: handles,
        }
    }

    /// Next result, or `None` once every worker has exited.
    pub async fn recv(&mut self) -> Option<R> {
        self.result_rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_processes_every_item() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut pool = WorkerPool::start(3, (0..10).collect(), stop, |i: u32| async move { i * 2 });
        let mut results = Vec::new();
        while let Some(r) = pool.recv().await {
            results.push(r);
        }
        results.sort_unstable();
        assert_eq!(results, (0..10).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_width_bounds_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let (a, p) = (active.clone(), peak.clone());
        let mut pool = WorkerPool::start(2, (0..6).collect::<Vec<u32>>(), stop, move |_| {
            let (a, p) = (a.clone(), p.clone());
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                a.fetch_sub(1, Ordering::SeqCst);
            }
        });
        let mut count = 0;
        while pool.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flag_halts_dispatch() {
        let stop = Arc::new(AtomicBool::new(false));
        let dispatched = Arc::new(AtomicUsize::new(0));
        let (s, d) = (stop.clone(), dispatched.clone());
        let mut pool = WorkerPool::start(2, (0..20).collect::<Vec<u32>>(), stop.clone(), move |i| {
            let (s, d) = (s.clone(), d.clone());
            async move {
                d.fetch_add(1, Ordering::SeqCst);
                if i == 1 {
                    s.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                i
            }
        });
        let mut results = Vec::new();
        while let Some(r) = pool.recv().await {
            results.push(r);
        }
        // items 0 and 1 were in flight when the flag went up; nothing after
        assert_eq!(dispatched.load(Ordering::SeqCst), 2);
        assert_eq!(results.len(), 2);
    }
}
