//! The concurrent per-flow coding state engine.
//!
//! One inbound frame at a time flows from the dispatcher into a role coder
//! looked up (or created) in the coder map for its flow key. Each coder
//! owns a table-driven state machine whose handlers run on a dedicated
//! driver task; operations dispatch events that wake the driver. A
//! housekeeping sweep visits every live coder to retire the finished and
//! the timed out.
//!
//! ```text
//! netlink reader ─> Dispatcher ─> CoderMap::get_coder(key) ─> role op
//!                                                     │
//!                                          dispatch_event ─> driver task
//!                                                     │
//!                                              Outbound channel ─> writer
//! ```

pub mod coder_map;
pub mod counters;
pub mod dispatch;
mod error;
pub mod gate;
pub mod links;
pub mod outbound;
pub mod params;
pub mod roles;
pub mod state;
pub mod timer;

pub use coder_map::CoderMap;
pub use counters::{CounterStore, Counters};
pub use dispatch::Dispatcher;
pub use error::EngineError;
pub use gate::EncoderGate;
pub use links::LinkDb;
pub use outbound::OutboundSink;
pub use params::Params;
pub use roles::CoderCtx;
