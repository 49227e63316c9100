//! Producer side of the double-buffered outbound queue.
//!
//! Senders push into the incoming queue under a short lock. The writer
//! loop owns a separate work queue and only touches the incoming one to
//! swap the two containers, so the lock is never held while payloads are
//! written or copied.

use std::collections::VecDeque;
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct IncomingQueue {
    queue: Mutex<VecDeque<Bytes>>,
    notify: Notify,
}

impl IncomingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Bytes>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a payload and wake the writer.
    pub fn push(&self, payload: Bytes) {
        self.lock().push_back(payload);
        self.notify.notify_one();
    }

    /// Exchange `work` with the incoming queue. `work` must be empty so
    /// FIFO order holds across the swap.
    pub fn swap_into(&self, work: &mut VecDeque<Bytes>) {
        debug_assert!(work.is_empty());
        mem::swap(&mut *self.lock(), work);
    }

    /// Drop everything not yet taken by the writer.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Resolves after the next `push` (or immediately if one happened
    /// since the last wait).
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_preserves_fifo() {
        let queue = IncomingQueue::new();
        queue.push(Bytes::from_static(b"a"));
        queue.push(Bytes::from_static(b"b"));

        let mut work = VecDeque::new();
        queue.swap_into(&mut work);
        let mut rest = VecDeque::new();
        queue.swap_into(&mut rest);
        assert!(rest.is_empty());

        queue.push(Bytes::from_static(b"c"));
        let drained: Vec<_> = work.drain(..).collect();
        assert_eq!(drained, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);

        queue.swap_into(&mut work);
        assert_eq!(work.pop_front(), Some(Bytes::from_static(b"c")));
    }

    #[tokio::test]
    async fn push_before_wait_is_not_lost() {
        let queue = IncomingQueue::new();
        queue.push(Bytes::from_static(b"x"));
        // The stored permit completes the wait immediately.
        tokio::time::timeout(std::time::Duration::from_secs(1), queue.notified())
            .await
            .unwrap();
    }
}
