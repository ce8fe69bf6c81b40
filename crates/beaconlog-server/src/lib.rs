//! # beaconlog-server
//!
//! HTTP daemon for the beaconlog beacon logger.
//!
//! This library provides the API handlers, the UI-owning task and the state
//! wiring for beaconlog.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
pub mod ui;
