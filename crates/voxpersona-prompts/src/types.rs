use serde::{Deserialize, Serialize};

/// One stage of a prompt chain, in resolved order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptStage {
    pub prompt_id: i64,
    pub text: String,
    /// Group number within the chain. Stages are ordered by
    /// (run_part asc, prompt_id asc).
    pub run_part: i64,
    /// JSON-formatting stages are always executed last, regardless of the
    /// run_part they were stored under.
    pub is_json: bool,
}

/// The full result of resolving a triple: the ordered stages plus the
/// dimension ids needed later for the user_road traceability row.
#[derive(Debug, Clone)]
pub struct ResolvedPrompts {
    pub scenario_id: i64,
    pub report_type_id: i64,
    pub building_id: i64,
    pub stages: Vec<PromptStage>,
}
