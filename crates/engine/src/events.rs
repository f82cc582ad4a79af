use model::departure::Departure;
use model::info::TimetableData;
use model::journey::Journey;
use model::stop::StopSuggestion;
use model::GlobalTimetableInfo;
use scripting::error::ScriptErrorKind;
use scripting::result::{ResultFeatures, ResultHints};

use crate::request::Request;

/// Payload of a `*_ready` event: the complete result set of one job.
#[derive(Debug)]
pub struct ResultsReady<T> {
    pub source: String,
    pub records: Vec<T>,
    pub features: ResultFeatures,
    pub hints: ResultHints,
    pub url: Option<String>,
    pub global_info: GlobalTimetableInfo,
    pub request: Request,
    /// Records were published incrementally and more arrived afterwards, so
    /// subscribers may want to force an update.
    pub could_need_forced_update: bool,
}

/// Typed messages delivered to subscribers, keyed by source name.
#[derive(Debug)]
pub enum EngineEvent {
    DeparturesReady(ResultsReady<Departure>),
    ArrivalsReady(ResultsReady<Departure>),
    JourneysReady(ResultsReady<Journey>),
    StopSuggestionsReady(ResultsReady<StopSuggestion>),
    AdditionalDataReady(ResultsReady<TimetableData>),

    BeginDepartureProcessing {
        source: String,
    },
    DeparturesProcessed {
        source: String,
        departures: Vec<Departure>,
        url: Option<String>,
        updated: bool,
    },
    BeginJourneyProcessing {
        source: String,
    },
    JourneysProcessed {
        source: String,
        journeys: Vec<Journey>,
        url: Option<String>,
        updated: bool,
    },
    BeginFiltering {
        source: String,
    },
    DeparturesFiltered {
        source: String,
        departures: Vec<Departure>,
        newly_filtered: Vec<Departure>,
        newly_not_filtered: Vec<Departure>,
    },

    ErrorParsing {
        kind: ScriptErrorKind,
        message: String,
        url: Option<String>,
        request: Request,
    },
}

impl EngineEvent {
    /// The source name this event belongs to.
    pub fn source(&self) -> &str {
        match self {
            EngineEvent::DeparturesReady(ready) | EngineEvent::ArrivalsReady(ready) => {
                &ready.source
            }
            EngineEvent::JourneysReady(ready) => &ready.source,
            EngineEvent::StopSuggestionsReady(ready) => &ready.source,
            EngineEvent::AdditionalDataReady(ready) => &ready.source,
            EngineEvent::BeginDepartureProcessing { source }
            | EngineEvent::DeparturesProcessed { source, .. }
            | EngineEvent::BeginJourneyProcessing { source }
            | EngineEvent::JourneysProcessed { source, .. }
            | EngineEvent::BeginFiltering { source }
            | EngineEvent::DeparturesFiltered { source, .. } => source,
            EngineEvent::ErrorParsing { request, .. } => request.source_name(),
        }
    }
}
