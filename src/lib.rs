// src/lib.rs
pub mod correction;
pub mod error;
pub mod matching;
pub mod models;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod utils;
pub mod worker;

pub use error::{ReconcileError, Result};
