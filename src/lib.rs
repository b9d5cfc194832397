//! Streaming acquisition driver for EDL patch-clamp amplifiers.
pub mod config;
pub mod drivers;
pub mod edl;
pub mod engine;
pub mod types;
