//! # knight-channels
//!
//! Messaging platform integrations for Knight.

pub mod utils;
pub mod whatsapp;
