use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    /// The (scenario, report_type, building_type) triple has no prompts.
    #[error("no prompts for triple ({scenario}, {report_type}, {building_type})")]
    NotFound {
        scenario: String,
        report_type: String,
        building_type: String,
    },

    /// A well-known named prompt is missing from the catalogue.
    #[error("named prompt not found: {name}")]
    NamedNotFound { name: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, PromptError>;
