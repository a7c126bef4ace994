//! Core data models for the luxury catalog.
//!
//! Items and users serialize as JSON via `serde`, both into local key-value
//! slots and onto the wire of the hosted backend.

pub mod asset;
pub mod item;
pub mod user;
