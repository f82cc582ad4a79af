use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub mod alarm;
pub mod departure;
pub mod filter;
pub mod info;
pub mod journey;
pub mod stop;
pub mod vehicle;

/// Selects which provider entry function serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParseMode {
    Departures,
    Arrivals,
    Journeys,
    StopSuggestions,
    AdditionalData,
}

impl ParseMode {
    pub fn name(&self) -> &'static str {
        match self {
            ParseMode::Departures => "departures",
            ParseMode::Arrivals => "arrivals",
            ParseMode::Journeys => "journeys",
            ParseMode::StopSuggestions => "stopSuggestions",
            ParseMode::AdditionalData => "additionalData",
        }
    }
}

impl std::fmt::Display for ParseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Special service flags of a transport line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineServices {
    pub night_line: bool,
    pub express_line: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayType {
    /// No delay information available (delay value -1).
    Unknown,
    OnSchedule,
    Delayed,
}

/// Information about a whole result set, as opposed to a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalTimetableInfo {
    pub delay_info_available: bool,
    pub request_date: NaiveDate,
}

impl GlobalTimetableInfo {
    pub fn new(request_date: NaiveDate) -> Self {
        Self {
            delay_info_available: true,
            request_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    EmptyName,
    ForbiddenCharacter(char),
    ValueTypeMismatch,
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::EmptyName => write!(f, "name must not be empty"),
            SettingsError::ForbiddenCharacter(c) => {
                write!(f, "name must not contain '{}'", c)
            }
            SettingsError::ValueTypeMismatch => {
                write!(f, "constraint value type does not fit the constraint type")
            }
        }
    }
}

impl std::error::Error for SettingsError {}

/// Validates a filter or alarm name: non-empty, no `*` and no `&`.
pub fn validate_settings_name(name: &str) -> Result<(), SettingsError> {
    if name.is_empty() {
        return Err(SettingsError::EmptyName);
    }
    for forbidden in ['*', '&'] {
        if name.contains(forbidden) {
            return Err(SettingsError::ForbiddenCharacter(forbidden));
        }
    }
    Ok(())
}
