//! Shared vocabulary for the rlncd coding daemon.
//!
//! This crate holds the types every other layer speaks: mesh addresses and
//! flow keys, the frame-type byte, control-channel message shapes, protocol
//! constants, and the pure budget arithmetic that converts link-loss
//! estimates into per-role packet budgets.

pub mod budget;
pub mod constants;
pub mod types;

pub use types::{FlowKey, FrameEvent, FrameType, HopInfo, MeshAddr, Outbound};
