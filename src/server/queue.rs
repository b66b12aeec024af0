//! Bounded request queue.
//!
//! A plain fixed-capacity circular buffer with no internal locking. It is
//! always used through the coordinated protocol in
//! [`ServerContext`](super::context::ServerContext): wait on the `empty`
//! semaphore before `push`, wait on `full` before `pop`, and hold the queue
//! mutex around either. Calling `push` on a full queue or `pop` on an empty
//! one without having waited is a programming error and aborts the process,
//! since it means the semaphore protocol has been violated.

use crate::protocol::Request;

/// Contract of the pending-request queue.
///
/// One concrete implementation exists ([`BoundedQueue`]); the trait states
/// the contract and lets tests substitute a fake.
pub trait RequestQueue {
    /// Append a request. Caller must have waited on the `empty` semaphore.
    fn push(&mut self, request: Request);

    /// Remove the oldest request. Caller must have waited on `full`.
    fn pop(&mut self) -> Request;

    /// Number of queued requests.
    fn len(&self) -> usize;

    /// Whether no requests are queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed capacity (equals the bank office count).
    fn capacity(&self) -> usize;
}

/// Fixed-capacity circular buffer of owned requests.
pub struct BoundedQueue {
    slots: Vec<Option<Request>>,
    front: usize,
    count: usize,
}

impl BoundedQueue {
    /// Create a queue with the given capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            front: 0,
            count: 0,
        }
    }
}

impl RequestQueue for BoundedQueue {
    fn push(&mut self, request: Request) {
        assert!(
            self.count < self.slots.len(),
            "push on a full queue: empty-semaphore protocol violated"
        );
        let rear = (self.front + self.count) % self.slots.len();
        self.slots[rear] = Some(request);
        self.count += 1;
    }

    fn pop(&mut self) -> Request {
        assert!(
            self.count > 0,
            "pop on an empty queue: full-semaphore protocol violated"
        );
        let request = self.slots[self.front]
            .take()
            .expect("queue slot within count is occupied");
        self.front = (self.front + 1) % self.slots.len();
        self.count -= 1;
        request
    }

    fn len(&self) -> usize {
        self.count
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;

    fn request(tag: u32) -> Request {
        Request::balance(tag, 1, "secret-pw", 0)
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = BoundedQueue::new(4);
        for i in 0..4 {
            queue.push(request(i));
        }
        for i in 0..4 {
            assert_eq!(queue.pop().header.pid, i);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_count_never_exceeds_capacity() {
        let mut queue = BoundedQueue::new(3);
        assert_eq!(queue.capacity(), 3);
        assert_eq!(queue.len(), 0);

        queue.push(request(1));
        queue.push(request(2));
        queue.push(request(3));
        assert_eq!(queue.len(), 3);

        queue.pop();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_wraparound_preserves_fifo() {
        let mut queue = BoundedQueue::new(3);

        // Interleave pushes and pops so front/rear wrap several times.
        let mut next = 0u32;
        let mut expect = 0u32;
        for _ in 0..10 {
            queue.push(request(next));
            next += 1;
            queue.push(request(next));
            next += 1;
            assert_eq!(queue.pop().header.pid, expect);
            expect += 1;
            assert_eq!(queue.pop().header.pid, expect);
            expect += 1;
        }
        assert!(queue.is_empty());
    }

    #[test]
    #[should_panic(expected = "push on a full queue")]
    fn test_push_on_full_is_fatal() {
        let mut queue = BoundedQueue::new(1);
        queue.push(request(1));
        queue.push(request(2));
    }

    #[test]
    #[should_panic(expected = "pop on an empty queue")]
    fn test_pop_on_empty_is_fatal() {
        let mut queue = BoundedQueue::new(1);
        queue.pop();
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_zero_capacity_rejected() {
        BoundedQueue::new(0);
    }
}
