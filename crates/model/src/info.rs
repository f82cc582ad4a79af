use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone};
use indexmap::IndexMap;

use crate::vehicle::VehicleType;

/// Canonical names for the pieces of information a provider script can emit
/// for one timetable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimetableInformation {
    // departures and arrivals
    DepartureDateTime,
    DepartureDate,
    DepartureTime,
    TypeOfVehicle,
    TransportLine,
    Target,
    TargetShortened,
    Platform,
    Delay,
    DelayReason,
    JourneyNews,
    JourneyNewsOther,
    JourneyNewsLink,
    Operator,
    Status,
    IsNightLine,
    RouteStops,
    RouteStopsShortened,
    RouteTimes,
    RouteTimesDeparture,
    RouteTimesArrival,
    RouteExactStops,
    RouteTypesOfVehicles,
    RouteTransportLines,
    RoutePlatformsDeparture,
    RoutePlatformsArrival,
    RouteTimesDepartureDelay,
    RouteTimesArrivalDelay,
    // journeys
    Duration,
    StartStopName,
    StartStopId,
    TargetStopName,
    TargetStopId,
    ArrivalDateTime,
    ArrivalDate,
    ArrivalTime,
    Changes,
    TypesOfVehicleInJourney,
    Pricing,
    // stop suggestions
    StopName,
    StopId,
    StopWeight,
    StopCity,
    StopCountryCode,
}

impl TimetableInformation {
    pub fn name(&self) -> &'static str {
        use TimetableInformation::*;
        match self {
            DepartureDateTime => "DepartureDateTime",
            DepartureDate => "DepartureDate",
            DepartureTime => "DepartureTime",
            TypeOfVehicle => "TypeOfVehicle",
            TransportLine => "TransportLine",
            Target => "Target",
            TargetShortened => "TargetShortened",
            Platform => "Platform",
            Delay => "Delay",
            DelayReason => "DelayReason",
            JourneyNews => "JourneyNews",
            JourneyNewsOther => "JourneyNewsOther",
            JourneyNewsLink => "JourneyNewsLink",
            Operator => "Operator",
            Status => "Status",
            IsNightLine => "IsNightLine",
            RouteStops => "RouteStops",
            RouteStopsShortened => "RouteStopsShortened",
            RouteTimes => "RouteTimes",
            RouteTimesDeparture => "RouteTimesDeparture",
            RouteTimesArrival => "RouteTimesArrival",
            RouteExactStops => "RouteExactStops",
            RouteTypesOfVehicles => "RouteTypesOfVehicles",
            RouteTransportLines => "RouteTransportLines",
            RoutePlatformsDeparture => "RoutePlatformsDeparture",
            RoutePlatformsArrival => "RoutePlatformsArrival",
            RouteTimesDepartureDelay => "RouteTimesDepartureDelay",
            RouteTimesArrivalDelay => "RouteTimesArrivalDelay",
            Duration => "Duration",
            StartStopName => "StartStopName",
            StartStopId => "StartStopID",
            TargetStopName => "TargetStopName",
            TargetStopId => "TargetStopID",
            ArrivalDateTime => "ArrivalDateTime",
            ArrivalDate => "ArrivalDate",
            ArrivalTime => "ArrivalTime",
            Changes => "Changes",
            TypesOfVehicleInJourney => "TypesOfVehicleInJourney",
            Pricing => "Pricing",
            StopName => "StopName",
            StopId => "StopID",
            StopWeight => "StopWeight",
            StopCity => "StopCity",
            StopCountryCode => "StopCountryCode",
        }
    }

    pub const ALL: [TimetableInformation; 44] = {
        use TimetableInformation::*;
        [
            DepartureDateTime,
            DepartureDate,
            DepartureTime,
            TypeOfVehicle,
            TransportLine,
            Target,
            TargetShortened,
            Platform,
            Delay,
            DelayReason,
            JourneyNews,
            JourneyNewsOther,
            JourneyNewsLink,
            Operator,
            Status,
            IsNightLine,
            RouteStops,
            RouteStopsShortened,
            RouteTimes,
            RouteTimesDeparture,
            RouteTimesArrival,
            RouteExactStops,
            RouteTypesOfVehicles,
            RouteTransportLines,
            RoutePlatformsDeparture,
            RoutePlatformsArrival,
            RouteTimesDepartureDelay,
            RouteTimesArrivalDelay,
            Duration,
            StartStopName,
            StartStopId,
            TargetStopName,
            TargetStopId,
            ArrivalDateTime,
            ArrivalDate,
            ArrivalTime,
            Changes,
            TypesOfVehicleInJourney,
            Pricing,
            StopName,
            StopId,
            StopWeight,
            StopCity,
            StopCountryCode,
        ]
    };

    /// Resolves a key case-insensitively.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .find(|info| info.name().eq_ignore_ascii_case(key))
            .copied()
    }

    /// Whether values for this key are decoded and trimmed on ingestion when
    /// the auto-decode feature is enabled.
    pub fn is_decodable_string(&self) -> bool {
        use TimetableInformation::*;
        matches!(
            self,
            StopName
                | Target
                | StartStopName
                | TargetStopName
                | Operator
                | TransportLine
                | Platform
                | DelayReason
                | Status
                | Pricing
        )
    }

    pub fn is_decodable_string_list(&self) -> bool {
        use TimetableInformation::*;
        matches!(
            self,
            RouteStops | RoutePlatformsDeparture | RoutePlatformsArrival
        )
    }
}

impl std::fmt::Display for TimetableInformation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A value attached to a [`TimetableInformation`] key, already converted from
/// the script engine's dynamic values into a neutral form.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    StrList(Vec<String>),
    IntList(Vec<i64>),
    Time(NaiveTime),
    Date(NaiveDate),
    DateTime(DateTime<Local>),
    TimeList(Vec<NaiveTime>),
}

impl InfoValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            InfoValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// String form of scalar values, used for informational text fields.
    pub fn to_text(&self) -> Option<String> {
        match self {
            InfoValue::Str(s) => Some(s.clone()),
            InfoValue::Int(i) => Some(i.to_string()),
            InfoValue::Float(f) => Some(f.to_string()),
            InfoValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            InfoValue::Bool(b) => Some(*b),
            InfoValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            InfoValue::Int(i) => Some(*i),
            InfoValue::Float(f) => Some(*f as i64),
            InfoValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<Vec<String>> {
        match self {
            InfoValue::StrList(list) => Some(list.clone()),
            InfoValue::Str(s) => Some(vec![s.clone()]),
            _ => None,
        }
    }

    pub fn as_int_list(&self) -> Option<Vec<i64>> {
        match self {
            InfoValue::IntList(list) => Some(list.clone()),
            InfoValue::Int(i) => Some(vec![*i]),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            InfoValue::Time(t) => Some(*t),
            InfoValue::DateTime(dt) => Some(dt.time()),
            InfoValue::Str(s) => utility::datetime::match_time(s, "hh:mm"),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            InfoValue::Date(d) => Some(*d),
            InfoValue::DateTime(dt) => Some(dt.date_naive()),
            InfoValue::Str(s) => utility::datetime::match_date(s, "yyyy-MM-dd"),
            _ => None,
        }
    }

    pub fn as_date_time(&self) -> Option<DateTime<Local>> {
        match self {
            InfoValue::DateTime(dt) => Some(*dt),
            InfoValue::Int(secs) => Local.timestamp_opt(*secs, 0).single(),
            _ => None,
        }
    }

    pub fn as_time_list(&self) -> Option<Vec<NaiveTime>> {
        match self {
            InfoValue::TimeList(list) => Some(list.clone()),
            InfoValue::StrList(list) => Some(
                list.iter()
                    .filter_map(|s| utility::datetime::match_time(s, "hh:mm"))
                    .collect(),
            ),
            InfoValue::Time(t) => Some(vec![*t]),
            _ => None,
        }
    }

    pub fn as_vehicle_type(&self) -> Option<VehicleType> {
        match self {
            InfoValue::Int(id) => VehicleType::from_id(*id),
            InfoValue::Str(name) => VehicleType::from_name(name),
            _ => None,
        }
    }

    pub fn as_vehicle_type_list(&self) -> Option<Vec<VehicleType>> {
        match self {
            InfoValue::StrList(list) => {
                Some(list.iter().filter_map(|s| VehicleType::from_name(s)).collect())
            }
            InfoValue::IntList(list) => {
                Some(list.iter().filter_map(|i| VehicleType::from_id(*i)).collect())
            }
            _ => self.as_vehicle_type().map(|v| vec![v]),
        }
    }
}

/// One record as emitted by a provider script, before normalization.
pub type TimetableData = IndexMap<TimetableInformation, InfoValue>;
