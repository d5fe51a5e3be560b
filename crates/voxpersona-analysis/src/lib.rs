pub mod chain;
pub mod error;
pub mod planner;
pub mod transcribe;

pub use chain::ChainExecutor;
pub use error::AnalysisError;
pub use planner::{AnalysisOutcome, PromptChainPlan, ReportPlanner};
pub use transcribe::{AudioBlob, SpeechToText, Transcriber};
