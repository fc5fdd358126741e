//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
