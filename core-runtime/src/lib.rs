//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the collection engine:
//! - Logging and tracing infrastructure
//! - Engine configuration, persisted to the application settings store
//! - Event bus system for scan and collection notifications
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the other modules depend on. It
//! establishes the logging conventions, the settings persistence format, and
//! the event broadcasting mechanism used throughout the engine.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use events::{CollectionEvent, CoreEvent, EventBus, ScanEvent};
pub use logging::{init_logging, LogFormat, LoggingConfig};
