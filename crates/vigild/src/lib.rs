//! Library surface of the vigild daemon: environment configuration and
//! the monitor loop. The binary in `main.rs` wires these to the real
//! HTTP prober, SSH executor, and webhook notifier.

pub mod config;
pub mod monitor;
