//! The serialized gate implementation.

use std::collections::VecDeque;
use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

/// A strict-FIFO asynchronous mutual exclusion gate.
///
/// Callers obtain exclusive access with [`acquire`](Self::acquire); the Nth
/// caller to invoke it is the Nth to be granted access, regardless of how
/// long earlier holders take. Acquisition never fails.
///
/// Release happens when the returned [`GatePermit`] is dropped, so release is
/// guaranteed on every exit path of the protected section: normal return,
/// `?`-propagated errors, and cancellation. A holder that leaks its permit
/// starves every later caller; that is caller misuse, not a gate fault.
#[derive(Default)]
pub struct SerializedGate {
    queue: Mutex<WaiterQueue>,
}

#[derive(Default)]
struct WaiterQueue {
    held: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl SerializedGate {
    /// Create an unheld gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until every previously enqueued holder has released, then take
    /// the gate.
    ///
    /// A waiter whose future is dropped before its turn gives up its place;
    /// the grant passes to the next ticket in line.
    pub async fn acquire(&self) -> GatePermit<'_> {
        let ticket = {
            let mut queue = self.queue.lock();
            if queue.held {
                let (tx, rx) = oneshot::channel();
                queue.waiters.push_back(tx);
                Some(rx)
            } else {
                queue.held = true;
                None
            }
        };

        if let Some(rx) = ticket {
            trace!("waiting for gate");
            // The sender is either granted by the previous holder's release
            // or dropped with the gate itself; both unblock us.
            let _ = rx.await;
        }

        GatePermit { gate: self }
    }

    /// Run `section` while holding the gate.
    ///
    /// Scoped-acquisition helper: the gate is released when `section`'s
    /// future completes or is dropped.
    pub async fn locked<F, Fut, T>(&self, section: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        section().await
    }
}

/// Exclusive access to the gate's critical section.
///
/// Dropping the permit grants the gate to the next waiting ticket in FIFO
/// order.
#[must_use = "the critical section ends when the permit is dropped"]
pub struct GatePermit<'a> {
    gate: &'a SerializedGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        let mut queue = self.gate.queue.lock();
        loop {
            match queue.waiters.pop_front() {
                Some(next) => {
                    // A failed send means that waiter was cancelled while
                    // queued; skip to the one behind it.
                    if next.send(()).is_ok() {
                        return;
                    }
                }
                None => {
                    queue.held = false;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_uncontended_acquire() {
        let gate = SerializedGate::new();

        let permit = gate.acquire().await;
        drop(permit);

        // Released, so a second acquire completes immediately.
        let _permit = gate.acquire().await;
    }

    #[tokio::test]
    async fn test_grants_in_fifo_order() {
        let gate = Arc::new(SerializedGate::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let held = gate.acquire().await;

        let mut handles = Vec::new();
        for n in 0..5usize {
            let gate = Arc::clone(&gate);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await;
                order.lock().push(n);
            }));
            // Let the task reach its acquire before spawning the next, so
            // enqueue order matches spawn order.
            tokio::task::yield_now().await;
        }

        assert!(order.lock().is_empty());
        drop(held);

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_skipped() {
        let gate = Arc::new(SerializedGate::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let held = gate.acquire().await;

        let cancelled = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let _permit = gate.acquire().await;
            })
        };
        tokio::task::yield_now().await;

        let behind = {
            let gate = Arc::clone(&gate);
            let order = Arc::clone(&order);
            tokio::spawn(async move {
                let _permit = gate.acquire().await;
                order.lock().push("behind");
            })
        };
        tokio::task::yield_now().await;

        cancelled.abort();
        let _ = cancelled.await;

        drop(held);
        behind.await.unwrap();

        assert_eq!(*order.lock(), vec!["behind"]);
    }

    #[tokio::test]
    async fn test_locked_releases_on_error_path() {
        let gate = SerializedGate::new();

        let result: Result<(), &str> = gate.locked(|| async { Err("section failed") }).await;
        assert!(result.is_err());

        // The error return above must have released the gate.
        let acquired =
            tokio::time::timeout(Duration::from_millis(100), gate.acquire()).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_critical_sections_never_interleave() {
        let gate = Arc::new(SerializedGate::new());
        let inside = Arc::new(Mutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let inside = Arc::clone(&inside);
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await;
                {
                    let mut count = inside.lock();
                    assert_eq!(*count, 0, "another holder is inside the section");
                    *count = 1;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
                *inside.lock() = 0;
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
    }
}
