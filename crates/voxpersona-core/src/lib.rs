pub mod config;
pub mod error;
pub mod types;

pub use config::VoxConfig;
pub use error::CoreError;
pub use types::{AnalysisContext, Mode};
