use dashmap::DashMap;
use tracing::debug;

use voxpersona_core::types::{AnalysisContext, Mode};

use crate::error::{Result, SessionError};
use crate::types::{SessionState, Step};

/// In-process per-user session map, passed explicitly to whatever needs it.
///
/// Concurrent messages from one user are serialised by the front-end layer;
/// this store only guarantees that distinct users never interfere.
pub struct SessionStore {
    states: DashMap<u64, SessionState>,
    deep_search_default: bool,
}

impl SessionStore {
    pub fn new(deep_search_default: bool) -> Self {
        Self {
            states: DashMap::new(),
            deep_search_default,
        }
    }

    /// Start collecting metadata for a new analysis, replacing whatever the
    /// user had in flight.
    pub fn begin(&self, user_id: u64, mode: Mode) {
        let deep = self
            .states
            .get(&user_id)
            .map(|s| s.deep_search)
            .unwrap_or(self.deep_search_default);
        let mut state = SessionState::new(mode, deep);
        state.step = Step::CollectingAudioMeta;
        self.states.insert(user_id, state);
        debug!(user_id, ?mode, "session started");
    }

    /// Mutate the partial context while it is still collectable.
    pub fn update_context<F>(&self, user_id: u64, apply: F) -> Result<()>
    where
        F: FnOnce(&mut crate::types::PartialContext),
    {
        let mut state = self.get_mut(user_id)?;
        match state.step {
            Step::CollectingAudioMeta | Step::Confirming => {
                apply(&mut state.partial);
                Ok(())
            }
            from => Err(SessionError::InvalidTransition {
                from,
                event: "update context",
            }),
        }
    }

    /// Present the collected fields back to the user for confirmation.
    pub fn to_confirming(&self, user_id: u64) -> Result<()> {
        self.transition(user_id, Step::CollectingAudioMeta, Step::Confirming, "confirm")
    }

    /// Freeze the context. The snapshot becomes immutable; the flow moves
    /// on to report selection.
    pub fn confirm(&self, user_id: u64) -> Result<()> {
        let mut state = self.get_mut(user_id)?;
        if state.step != Step::Confirming {
            return Err(SessionError::InvalidTransition {
                from: state.step,
                event: "confirm",
            });
        }
        let ctx = state.partial.freeze(state.mode)?;
        state.confirmed = Some(ctx);
        state.previous_step = Some(state.step);
        state.step = Step::AwaitingReportChoice;
        Ok(())
    }

    pub fn choose_report(&self, user_id: u64, report_type: &str) -> Result<()> {
        let mut state = self.get_mut(user_id)?;
        if state.step != Step::AwaitingReportChoice {
            return Err(SessionError::InvalidTransition {
                from: state.step,
                event: "choose report",
            });
        }
        state.report_type = Some(report_type.to_string());
        state.previous_step = Some(state.step);
        state.step = Step::AwaitingBuildingChoice;
        Ok(())
    }

    pub fn choose_building(&self, user_id: u64, building_type: &str) -> Result<()> {
        let mut state = self.get_mut(user_id)?;
        if state.step != Step::AwaitingBuildingChoice {
            return Err(SessionError::InvalidTransition {
                from: state.step,
                event: "choose building",
            });
        }
        if let Some(ctx) = state.confirmed.as_mut() {
            ctx.building_type = building_type.to_string();
        }
        state.previous_step = Some(state.step);
        state.step = Step::Ready;
        Ok(())
    }

    /// Consume the ready session: hand out the confirmed context and report
    /// selection for the planner, returning the session to neutral.
    pub fn take_ready(&self, user_id: u64) -> Result<(AnalysisContext, String)> {
        let mut state = self.get_mut(user_id)?;
        if state.step != Step::Ready {
            return Err(SessionError::InvalidTransition {
                from: state.step,
                event: "start analysis",
            });
        }
        let ctx = state
            .confirmed
            .take()
            .ok_or(SessionError::IncompleteContext { field: "context" })?;
        let report = state
            .report_type
            .take()
            .ok_or(SessionError::IncompleteContext { field: "report_type" })?;
        state.previous_step = Some(state.step);
        state.step = Step::Idle;
        Ok((ctx, report))
    }

    /// Step back to wherever the user was before the last transition.
    pub fn back(&self, user_id: u64) -> Result<Step> {
        let mut state = self.get_mut(user_id)?;
        match state.previous_step.take() {
            Some(prev) => {
                state.step = prev;
                Ok(prev)
            }
            None => Err(SessionError::InvalidTransition {
                from: state.step,
                event: "go back",
            }),
        }
    }

    pub fn enter_dialog(&self, user_id: u64) -> Result<()> {
        let mut state = self
            .states
            .entry(user_id)
            .or_insert_with(|| SessionState::new(Mode::Interview, self.deep_search_default));
        state.previous_step = Some(state.step);
        state.step = Step::Dialog;
        Ok(())
    }

    pub fn set_deep_search(&self, user_id: u64, deep: bool) -> Result<()> {
        let mut state = self.get_mut(user_id)?;
        state.deep_search = deep;
        Ok(())
    }

    pub fn deep_search(&self, user_id: u64) -> bool {
        self.states
            .get(&user_id)
            .map(|s| s.deep_search)
            .unwrap_or(self.deep_search_default)
    }

    pub fn step(&self, user_id: u64) -> Option<Step> {
        self.states.get(&user_id).map(|s| s.step)
    }

    fn get_mut(
        &self,
        user_id: u64,
    ) -> Result<dashmap::mapref::one::RefMut<'_, u64, SessionState>> {
        self.states
            .get_mut(&user_id)
            .ok_or(SessionError::NotFound { user_id })
    }

    fn transition(
        &self,
        user_id: u64,
        from: Step,
        to: Step,
        event: &'static str,
    ) -> Result<()> {
        let mut state = self.get_mut(user_id)?;
        if state.step != from {
            return Err(SessionError::InvalidTransition {
                from: state.step,
                event,
            });
        }
        state.previous_step = Some(state.step);
        state.step = to;
        Ok(())
    }
}
