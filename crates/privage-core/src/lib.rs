pub mod config;
pub mod error;
pub mod fsutil;
pub mod types;

pub use config::Config;
pub use error::{PrivageError, PrivageResult};
pub use types::Slot;
