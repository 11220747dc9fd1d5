//! Typed query functions, one module per table.

pub mod jobs;
pub mod messages;
pub mod stats;
pub mod webhooks;
