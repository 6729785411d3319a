pub mod config;
pub mod logging;

pub mod clock;
pub mod connection;
pub mod error;
pub mod pool;
pub mod retry;
pub mod session;

pub use error::{Classify, ErrorKind, LineError};
