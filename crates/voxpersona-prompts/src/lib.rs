pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::PromptError;
pub use store::PromptStore;
pub use types::{PromptStage, ResolvedPrompts};

/// Well-known named prompt: converts a raw interview transcript into
/// dialogue lines prefixed with `[Client:]` / `[Employee:]`.
pub const ASSIGN_ROLES: &str = "assign_roles";
/// Well-known named prompt: maps a free-form dialog query to a RAG scope.
pub const CLASSIFY: &str = "classify";
