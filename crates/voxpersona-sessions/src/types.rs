use serde::{Deserialize, Serialize};

use voxpersona_core::types::{AnalysisContext, Mode};

use crate::error::{Result, SessionError};

/// Where a user's collection/confirmation flow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Neutral state between analyses.
    Idle,
    CollectingAudioMeta,
    Confirming,
    AwaitingReportChoice,
    AwaitingBuildingChoice,
    Ready,
    Dialog,
}

/// Context fields gathered piecemeal from front-end events. Becomes an
/// immutable `AnalysisContext` at confirmation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialContext {
    pub audio_number: Option<u32>,
    pub date: Option<String>,
    pub employee: Option<String>,
    pub client: Option<String>,
    pub place: Option<String>,
    pub building_type: Option<String>,
    pub zone: Option<String>,
    pub city: Option<String>,
}

impl PartialContext {
    /// Freeze into a full context. Client is mandatory for interviews only.
    pub fn freeze(&self, mode: Mode) -> Result<AnalysisContext> {
        let missing = |field| SessionError::IncompleteContext { field };
        if mode == Mode::Interview && self.client.is_none() {
            return Err(missing("client"));
        }
        Ok(AnalysisContext {
            audio_number: self.audio_number.ok_or(missing("audio_number"))?,
            date: self.date.clone().ok_or(missing("date"))?,
            employee: self.employee.clone().ok_or(missing("employee"))?,
            client: self.client.clone(),
            place: self.place.clone().ok_or(missing("place"))?,
            building_type: self.building_type.clone().ok_or(missing("building_type"))?,
            zone: self.zone.clone(),
            city: self.city.clone(),
            mode,
        })
    }
}

/// One user's in-process session.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub step: Step,
    pub previous_step: Option<Step>,
    pub mode: Mode,
    pub partial: PartialContext,
    /// Frozen at confirmation; consumed when the analysis starts.
    pub confirmed: Option<AnalysisContext>,
    pub report_type: Option<String>,
    pub deep_search: bool,
}

impl SessionState {
    pub fn new(mode: Mode, deep_search: bool) -> Self {
        Self {
            step: Step::Idle,
            previous_step: None,
            mode,
            partial: PartialContext::default(),
            confirmed: None,
            report_type: None,
            deep_search,
        }
    }
}
