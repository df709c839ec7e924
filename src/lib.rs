// src/lib.rs
pub mod app;
pub mod clips;
pub mod config;
pub mod core;
pub mod location;
pub mod monitoring;
pub mod notify;
pub mod schedule;
pub mod stream;
pub mod supervisor;
pub mod testing;
pub mod worker;

// Re-export the most used types
pub use app::{App, AppDeps};
pub use config::{Settings, SettingsStore};
pub use core::{ComponentLogger, LogContext};
pub use stream::{StreamId, StreamInfo, StreamInfoCache};
pub use supervisor::StreamSupervisor;
pub use worker::StreamWorker;
