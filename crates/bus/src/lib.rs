// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! vg-bus: typed publish/subscribe over a partitioned durable log.
//!
//! [`MessageBus`] is the broker seam: at-least-once, per-key ordering
//! within a partition, consumer-group offset discipline. [`MemoryBus`] is
//! the in-process log for tests and the local daemon; production binds a
//! real broker behind the same trait. [`BusGateway`] layers the typed topic
//! envelopes and dead-letter routing on top.

mod bus;
mod gateway;
mod memory;
mod topic;

pub use bus::{BusError, Delivery, MessageBus};
pub use gateway::{BusGateway, Intake};
pub use memory::MemoryBus;
pub use topic::Topic;
