//! Typed signal broadcast with priority dispatch.
//!
//! The controller, the rendering surface and optional collaborators such as
//! a tray icon subscribe here. Life-cycle signals (exit/reload) reach the
//! controller before cosmetic ones reach anyone else.

pub mod bus;
pub mod types;

pub use bus::{
    Handler, Priority, SignalBus, SubscriberId, PRIORITY_CONTROLLER, PRIORITY_SURFACE,
    PRIORITY_TRAY,
};
pub use types::{IpcCommand, Signal, SignalKind};
