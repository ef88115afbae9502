//! Core business logic module

pub mod applier;
pub mod error;
pub mod fetcher;
pub mod frame;
pub mod scanner;
pub mod session;
pub mod types;
