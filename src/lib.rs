pub mod cli;
pub mod config;
pub mod convert;
pub mod error;
pub mod instrument;
pub mod judge;
pub mod sandbox;
pub mod structural;
pub mod suite;

pub use error::{JudgeletError, Result};
