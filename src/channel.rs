//! Bounded latest-wins frame handoff
//!
//! Decouples the driver's callback thread from slower consumers. The producer
//! never blocks; when the buffer is full the oldest unconsumed frame is
//! discarded to admit the new one.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::frame::Frame;

struct ChannelInner {
    queue: Mutex<ChannelQueue>,
    available: Condvar,
}

struct ChannelQueue {
    frames: VecDeque<Frame>,
    stopped: bool,
}

/// Cloneable handle to a bounded drop-oldest frame queue
///
/// All clones share the same buffer; dropping the last handle drops any
/// unconsumed frames.
#[derive(Clone)]
pub struct FrameChannel {
    inner: Arc<ChannelInner>,
    capacity: usize,
}

impl FrameChannel {
    /// Create a channel holding at most `capacity` frames (at least 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                queue: Mutex::new(ChannelQueue {
                    frames: VecDeque::new(),
                    stopped: false,
                }),
                available: Condvar::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Hand a frame to the consumer side; never blocks
    ///
    /// At capacity the oldest buffered frame is evicted first, so the newest
    /// frame always wins. Pushing into a stopped channel silently drops the
    /// frame.
    pub fn push(&self, frame: Frame) {
        let mut queue = self.inner.queue.lock();
        if queue.stopped {
            return;
        }
        while queue.frames.len() >= self.capacity {
            queue.frames.pop_front();
            log::trace!("frame queue full, dropping oldest frame");
        }
        queue.frames.push_back(frame);
        self.inner.available.notify_one();
    }

    /// Block until a frame arrives or the channel is stopped
    ///
    /// `None` is the shutdown signal; once the channel is stopped every call
    /// returns it immediately.
    pub fn pop(&self) -> Option<Frame> {
        let mut queue = self.inner.queue.lock();
        loop {
            if queue.stopped {
                return None;
            }
            if let Some(frame) = queue.frames.pop_front() {
                return Some(frame);
            }
            self.inner.available.wait(&mut queue);
        }
    }

    /// Non-blocking pop; `None` means "nothing buffered right now" or stopped
    pub fn try_pop(&self) -> Option<Frame> {
        let mut queue = self.inner.queue.lock();
        if queue.stopped {
            return None;
        }
        queue.frames.pop_front()
    }

    /// Release every blocked consumer and refuse further frames; idempotent
    pub fn stop(&self) {
        let mut queue = self.inner.queue.lock();
        if queue.stopped {
            return;
        }
        queue.stopped = true;
        queue.frames.clear();
        self.inner.available.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.queue.lock().stopped
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
