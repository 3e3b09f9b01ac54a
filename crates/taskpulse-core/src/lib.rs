//! # taskpulse-core
//!
//! Core types, traits, and abstractions for taskpulse.
//!
//! This crate provides the task and job models, the repository and mailer
//! traits implemented by the storage and delivery crates, and the
//! topic-based [`EventBus`] used to fan task changes out to live sessions.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{owner_topic, EventBus, EventEnvelope, Subscription, TaskAction, TaskEvent};
pub use models::*;
pub use traits::*;
pub use uuid_utils::new_v7;
