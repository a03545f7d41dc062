pub mod autosave;
pub mod config;
pub mod core;
pub mod editor;
pub mod notify;
pub mod remote;
pub mod share;
pub mod storage;
pub mod telemetry;
