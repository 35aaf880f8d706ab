//! Session broker core: holds, login tokens, the stop-grace timer and the
//! process lifetime, driven by a single actor.

pub mod actor;
pub mod controller;
pub mod hold_registry;
pub mod lifetime;
pub mod login_tokens;
pub mod stop_grace;
pub mod types;

pub use actor::{BrokerHandle, BrokerTimings};
