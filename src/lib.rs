//! Boxwatch - client and watchdog for Neufbox home routers
//!
//! The device only exposes its HTML administration interface. This crate
//! logs into it, scrapes status and configuration pages, drives its forms
//! and diagnostics jobs, and reboots it when the internet link is lost.

pub mod config;
pub mod device;
pub mod error;
pub mod http;
pub mod lock;
pub mod models;
pub mod output;
pub mod parser;
pub mod session;
pub mod utils;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use device::Device;
pub use error::{Error, Result};
