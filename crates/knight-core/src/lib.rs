//! # knight-core
//!
//! Core types, traits, configuration, and error handling for Knight.

pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod traits;
