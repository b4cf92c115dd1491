//! Event bus and event vocabulary
//!
//! Components emit events; consumers (UI, loggers, tests) subscribe. Built on
//! tokio broadcast so emitters never block on slow subscribers.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use types::Event;
