pub mod config;
pub mod dashboard;
pub mod error;
pub mod report;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod worker;

pub use error::{BatchError, Result};
