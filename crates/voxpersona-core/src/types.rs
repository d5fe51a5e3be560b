use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The two audit scenarios the system knows about.
///
/// `Design` audits are walk-through reports of a building; `Interview`
/// audits are transcribed guest/employee conversations with role labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Design,
    Interview,
}

impl Mode {
    /// Canonical scenario name as stored in the `scenario` table.
    pub fn scenario_name(&self) -> &'static str {
        match self {
            Mode::Design => "design",
            Mode::Interview => "interview",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scenario_name())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "design" => Ok(Mode::Design),
            "interview" => Ok(Mode::Interview),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// Confirmed metadata for one analysis request.
///
/// Collected interactively by the session layer; immutable once the user
/// confirms. Everything downstream (planner, repository) takes a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub audio_number: u32,
    /// ISO-8601 date of the visit, e.g. "2026-07-14".
    pub date: String,
    pub employee: String,
    /// Interview scenarios carry the client name; design audits do not.
    pub client: Option<String>,
    pub place: String,
    /// Building type name, e.g. "hotel", "restaurant", "spa".
    pub building_type: String,
    pub zone: Option<String>,
    pub city: Option<String>,
    pub mode: Mode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Interview".parse::<Mode>().unwrap(), Mode::Interview);
        assert_eq!(" design ".parse::<Mode>().unwrap(), Mode::Design);
        assert!("audit".parse::<Mode>().is_err());
    }

    #[test]
    fn mode_display_matches_scenario_name() {
        assert_eq!(Mode::Interview.to_string(), "interview");
        assert_eq!(Mode::Design.to_string(), "design");
    }
}
