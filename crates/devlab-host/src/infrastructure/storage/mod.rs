//! Persistent storage: the daemon's configuration file on disk.

pub mod config;
