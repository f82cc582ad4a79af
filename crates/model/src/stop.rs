use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// A candidate stop returned for a user-typed prefix.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopSuggestion {
    pub stop_name: String,
    pub stop_id: Option<String>,
    /// Provider-supplied ranking weight, higher is better.
    pub stop_weight: Option<i32>,
    pub stop_city: Option<String>,
    pub stop_country_code: Option<String>,
}

impl StopSuggestion {
    pub fn new(stop_name: impl Into<String>) -> Self {
        Self {
            stop_name: stop_name.into(),
            stop_id: None,
            stop_weight: None,
            stop_city: None,
            stop_country_code: None,
        }
    }
}
