// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-subscriber buffering with drop-oldest overflow and lag marking.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use vg_core::NotificationEvent;

vg_core::define_id! {
    /// Unique identifier for an observer connection.
    pub struct SubscriberId("obs-");
}

pub(crate) struct SubscriberState {
    queue: Mutex<VecDeque<NotificationEvent>>,
    notify: Notify,
    closed: AtomicBool,
    /// Events dropped since the subscriber last drained; surfaces as a
    /// `lag` marker on the next receive.
    dropped: AtomicU64,
    pub(crate) last_seen_ms: AtomicU64,
}

impl SubscriberState {
    pub(crate) fn new(now_ms: u64) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            last_seen_ms: AtomicU64::new(now_ms),
        }
    }

    /// Enqueue, dropping the oldest event on overflow.
    pub(crate) fn push(&self, event: NotificationEvent, capacity: usize) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut queue = self.queue.lock();
        if queue.len() >= capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::AcqRel);
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A live observer connection handle.
pub struct Subscription {
    pub id: SubscriberId,
    pub(crate) state: Arc<SubscriberState>,
}

impl Subscription {
    /// Next event; a `lag` marker first when events were dropped. `None`
    /// once the connection is closed and drained.
    pub async fn recv(&self) -> Option<NotificationEvent> {
        loop {
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if self.state.is_closed() {
                return None;
            }
            self.state.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<NotificationEvent> {
        let dropped = self.state.dropped.swap(0, Ordering::AcqRel);
        if dropped > 0 {
            let at_ms = self.state.last_seen_ms.load(Ordering::Acquire);
            return Some(NotificationEvent::Lag { dropped, at_ms });
        }
        self.state.queue.lock().pop_front()
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}
