//! Telephony side of the bridge
//!
//! The carrier-facing WebSocket endpoint, the per-call bridge, the
//! call manager and state machine, and the bounded frame queues that
//! keep the two socket sides decoupled.

pub mod bridge;
pub mod call_manager;
pub mod call_state;
pub mod media_stream;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

pub use bridge::Bridge;
pub use call_manager::CallManager;
pub use call_state::{CallEvent, CallStateMachine};

/// Default queue capacity: roughly 200 ms of audio at one carrier
/// frame (20 ms) per entry.
pub const DEFAULT_FRAME_CAPACITY: usize = 10;

/// Bounded drop-oldest audio queue.
///
/// Audio frames are latency-bound: when a consumer stalls, the oldest
/// queued frame is the least valuable, so `push` never blocks and
/// overflow evicts from the front while a counter records the loss.
pub struct FrameQueue {
    frames: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a frame, evicting the oldest one on overflow. Returns
    /// false once the queue is closed.
    pub fn push(&self, frame: Vec<u8>) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        {
            let mut frames = self.frames.lock().expect("frame queue poisoned");
            if frames.len() == self.capacity {
                frames.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            frames.push_back(frame);
        }
        self.notify.notify_one();
        true
    }

    /// Dequeue the next frame in arrival order; `None` after close.
    pub async fn pop(&self) -> Option<Vec<u8>> {
        loop {
            let notified = self.notify.notified();
            {
                let mut frames = self.frames.lock().expect("frame queue poisoned");
                if let Some(frame) = frames.pop_front() {
                    return Some(frame);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue and wake all waiting consumers.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Discard everything currently queued (barge-in flush).
    pub fn clear(&self) {
        self.frames.lock().expect("frame queue poisoned").clear();
    }

    /// Frames evicted under overflow since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().expect("frame queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
