use chrono::{DateTime, Datelike, Local, Timelike};
use model::ParseMode;
use rhai::{Dynamic, Map};
use serde::{Deserialize, Serialize};

/// A stop given either by name or by provider-specific id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopValue {
    pub name: String,
    pub id: Option<String>,
}

impl StopValue {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
        }
    }

    pub fn by_id(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: Some(id.into()),
        }
    }

    /// The id when known, the name otherwise.
    pub fn value(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    pub fn is_id(&self) -> bool {
        self.id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepartureRequest {
    pub source_name: String,
    pub stop: StopValue,
    pub datetime: DateTime<Local>,
    pub max_count: i32,
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopSuggestionRequest {
    pub source_name: String,
    pub stop: String,
    pub city: Option<String>,
    pub max_count: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopsByGeoPositionRequest {
    pub source_name: String,
    pub longitude: f64,
    pub latitude: f64,
    /// Search radius in meters.
    pub distance: u32,
    pub count: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JourneyRequest {
    pub source_name: String,
    pub origin_stop: StopValue,
    pub target_stop: StopValue,
    pub datetime: DateTime<Local>,
    pub max_count: i32,
    pub city: Option<String>,
    /// URL to use to download the journey document, when the provider needs it.
    pub url_to_use: Option<String>,
    /// Round trips used so far to fulfil this request.
    pub round_trips: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdditionalDataRequest {
    pub source_name: String,
    pub transport_line: String,
    pub target: String,
    pub datetime: DateTime<Local>,
    pub route_data_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MoreItemsDirection {
    EarlierItems,
    LaterItems,
}

impl MoreItemsDirection {
    pub fn name(&self) -> &'static str {
        match self {
            MoreItemsDirection::EarlierItems => "EarlierItems",
            MoreItemsDirection::LaterItems => "LaterItems",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoreItemsRequest {
    pub direction: MoreItemsDirection,
    pub request: Box<Request>,
}

/// One timetable query, consumed by exactly one job.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Departures(DepartureRequest),
    Arrivals(DepartureRequest),
    StopSuggestions(StopSuggestionRequest),
    StopsByGeoPosition(StopsByGeoPositionRequest),
    Journeys(JourneyRequest),
    AdditionalData(AdditionalDataRequest),
    MoreItems(MoreItemsRequest),
}

fn format_datetime(datetime: &DateTime<Local>) -> String {
    datetime.format("%Y-%m-%d %H:%M").to_string()
}

fn datetime_map(datetime: &DateTime<Local>) -> Map {
    let mut map = Map::new();
    map.insert("year".into(), Dynamic::from(datetime.year() as i64));
    map.insert("month".into(), Dynamic::from(datetime.month() as i64));
    map.insert("day".into(), Dynamic::from(datetime.day() as i64));
    map.insert("hour".into(), Dynamic::from(datetime.hour() as i64));
    map.insert("minute".into(), Dynamic::from(datetime.minute() as i64));
    map
}

impl Request {
    pub fn source_name(&self) -> &str {
        match self {
            Request::Departures(r) | Request::Arrivals(r) => &r.source_name,
            Request::StopSuggestions(r) => &r.source_name,
            Request::StopsByGeoPosition(r) => &r.source_name,
            Request::Journeys(r) => &r.source_name,
            Request::AdditionalData(r) => &r.source_name,
            Request::MoreItems(r) => r.request.source_name(),
        }
    }

    pub fn parse_mode(&self) -> ParseMode {
        match self {
            Request::Departures(_) => ParseMode::Departures,
            Request::Arrivals(_) => ParseMode::Arrivals,
            Request::StopSuggestions(_) | Request::StopsByGeoPosition(_) => {
                ParseMode::StopSuggestions
            }
            Request::Journeys(_) => ParseMode::Journeys,
            Request::AdditionalData(_) => ParseMode::AdditionalData,
            Request::MoreItems(r) => r.request.parse_mode(),
        }
    }

    /// The provider entry function serving this request. Departures and
    /// arrivals both go through `getTimetable`.
    pub fn function_name(&self) -> &'static str {
        match self.parse_mode() {
            ParseMode::Departures | ParseMode::Arrivals => "getTimetable",
            ParseMode::Journeys => "getJourneys",
            ParseMode::StopSuggestions => "getStopSuggestions",
            ParseMode::AdditionalData => "getAdditionalData",
        }
    }

    pub fn max_count(&self) -> i32 {
        match self {
            Request::Departures(r) | Request::Arrivals(r) => r.max_count,
            Request::StopSuggestions(r) => r.max_count,
            Request::StopsByGeoPosition(r) => r.count,
            Request::Journeys(r) => r.max_count,
            Request::AdditionalData(_) => 1,
            Request::MoreItems(r) => r.request.max_count(),
        }
    }

    pub fn city(&self) -> Option<&str> {
        match self {
            Request::Departures(r) | Request::Arrivals(r) => r.city.as_deref(),
            Request::StopSuggestions(r) => r.city.as_deref(),
            Request::Journeys(r) => r.city.as_deref(),
            _ => None,
        }
    }

    pub fn datetime(&self) -> Option<DateTime<Local>> {
        match self {
            Request::Departures(r) | Request::Arrivals(r) => Some(r.datetime),
            Request::Journeys(r) => Some(r.datetime),
            Request::AdditionalData(r) => Some(r.datetime),
            Request::MoreItems(r) => r.request.datetime(),
            _ => None,
        }
    }

    /// Canonical one-line textual form for logging.
    pub fn arguments_string(&self) -> String {
        match self {
            Request::Departures(r) | Request::Arrivals(r) => format!(
                "{{stop: \"{}\", stopIsId: \"{}\", city: \"{}\", count: {}, dateTime: {}, dataType: {}}}",
                r.stop.value(),
                r.stop.is_id(),
                r.city.as_deref().unwrap_or(""),
                r.max_count,
                format_datetime(&r.datetime),
                self.parse_mode()
            ),
            Request::StopSuggestions(r) => format!(
                "{{stop: \"{}\", city: \"{}\", count: {}}}",
                r.stop,
                r.city.as_deref().unwrap_or(""),
                r.max_count
            ),
            Request::StopsByGeoPosition(r) => format!(
                "{{longitude: {}, latitude: {}, distance: {}, count: {}}}",
                r.longitude, r.latitude, r.distance, r.count
            ),
            Request::Journeys(r) => format!(
                "{{city: \"{}\", count: {}, originStop: \"{}\", originStopIsId: \"{}\", \
                 targetStop: \"{}\", targetStopIsId: \"{}\", dateTime: {}}}",
                r.city.as_deref().unwrap_or(""),
                r.max_count,
                r.origin_stop.value(),
                r.origin_stop.is_id(),
                r.target_stop.value(),
                r.target_stop.is_id(),
                format_datetime(&r.datetime)
            ),
            Request::AdditionalData(r) => format!(
                "{{dataType: additionalData, transportLine: \"{}\", target: \"{}\", dateTime: {}, routeDataUrl: {}}}",
                r.transport_line,
                r.target,
                format_datetime(&r.datetime),
                r.route_data_url.as_deref().unwrap_or("")
            ),
            Request::MoreItems(r) => {
                format!("{}: {}", r.direction.name(), r.request.arguments_string())
            }
        }
    }

    /// The single argument object the provider entry function receives.
    pub fn to_script_map(&self) -> Map {
        let mut map = Map::new();
        map.insert(
            "parseMode".into(),
            Dynamic::from(self.parse_mode().name().to_owned()),
        );
        map.insert("maxCount".into(), Dynamic::from(self.max_count() as i64));
        if let Some(city) = self.city() {
            map.insert("city".into(), Dynamic::from(city.to_owned()));
        }
        if let Some(datetime) = self.datetime() {
            map.insert("dateTime".into(), Dynamic::from_map(datetime_map(&datetime)));
        }
        match self {
            Request::Departures(r) | Request::Arrivals(r) => {
                map.insert("stop".into(), Dynamic::from(r.stop.value().to_owned()));
                map.insert("stopIsId".into(), Dynamic::from(r.stop.is_id()));
                let data_type = match self.parse_mode() {
                    ParseMode::Arrivals => "arrivals",
                    _ => "departures",
                };
                map.insert("dataType".into(), Dynamic::from(data_type.to_owned()));
            }
            Request::StopSuggestions(r) => {
                map.insert("stop".into(), Dynamic::from(r.stop.clone()));
                map.insert("dataType".into(), Dynamic::from("stopSuggestions".to_owned()));
            }
            Request::StopsByGeoPosition(r) => {
                map.insert("longitude".into(), Dynamic::from(r.longitude));
                map.insert("latitude".into(), Dynamic::from(r.latitude));
                map.insert("distance".into(), Dynamic::from(r.distance as i64));
                map.insert("count".into(), Dynamic::from(r.count as i64));
                map.insert("dataType".into(), Dynamic::from("stopSuggestions".to_owned()));
            }
            Request::Journeys(r) => {
                map.insert(
                    "originStop".into(),
                    Dynamic::from(r.origin_stop.value().to_owned()),
                );
                map.insert("originStopIsId".into(), Dynamic::from(r.origin_stop.is_id()));
                map.insert(
                    "targetStop".into(),
                    Dynamic::from(r.target_stop.value().to_owned()),
                );
                map.insert("targetStopIsId".into(), Dynamic::from(r.target_stop.is_id()));
                if let Some(url) = &r.url_to_use {
                    map.insert("urlToUse".into(), Dynamic::from(url.clone()));
                }
                map.insert("roundTrips".into(), Dynamic::from(r.round_trips as i64));
                map.insert("dataType".into(), Dynamic::from("journeys".to_owned()));
            }
            Request::AdditionalData(r) => {
                map.insert(
                    "transportLine".into(),
                    Dynamic::from(r.transport_line.clone()),
                );
                map.insert("target".into(), Dynamic::from(r.target.clone()));
                if let Some(url) = &r.route_data_url {
                    map.insert("routeDataUrl".into(), Dynamic::from(url.clone()));
                }
                map.insert("dataType".into(), Dynamic::from("additionalData".to_owned()));
            }
            Request::MoreItems(r) => {
                let inner = r.request.to_script_map();
                map.extend(inner);
                map.insert(
                    "moreItemsDirection".into(),
                    Dynamic::from(r.direction.name().to_owned()),
                );
            }
        }
        map
    }
}

/// Bit mask over request parse modes, used for selective job aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestTypeMask(u8);

impl RequestTypeMask {
    pub const DEPARTURES: RequestTypeMask = RequestTypeMask(1);
    pub const ARRIVALS: RequestTypeMask = RequestTypeMask(2);
    pub const JOURNEYS: RequestTypeMask = RequestTypeMask(4);
    pub const STOP_SUGGESTIONS: RequestTypeMask = RequestTypeMask(8);
    pub const ADDITIONAL_DATA: RequestTypeMask = RequestTypeMask(16);
    pub const ALL: RequestTypeMask = RequestTypeMask(31);

    pub fn union(self, other: RequestTypeMask) -> RequestTypeMask {
        RequestTypeMask(self.0 | other.0)
    }

    pub fn contains(&self, parse_mode: ParseMode) -> bool {
        let bit = match parse_mode {
            ParseMode::Departures => Self::DEPARTURES.0,
            ParseMode::Arrivals => Self::ARRIVALS.0,
            ParseMode::Journeys => Self::JOURNEYS.0,
            ParseMode::StopSuggestions => Self::STOP_SUGGESTIONS.0,
            ParseMode::AdditionalData => Self::ADDITIONAL_DATA.0,
        };
        self.0 & bit != 0
    }
}
