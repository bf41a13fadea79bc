//! Label extraction module - enrich an address table with Lizard hazard labels

pub mod fetch;
pub mod parse;
pub mod resolve;
pub mod types;
pub mod utils;
pub mod write;

pub use types::*;
