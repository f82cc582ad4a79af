use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Local, NaiveTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{departure::Departure, journey::Journey, vehicle::VehicleType, SettingsError};

/// Which record field a constraint tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConstraintType {
    ByTarget,
    ByVia,
    ByNextStop,
    ByTransportLine,
    ByTransportLineNumber,
    ByDelay,
    ByVehicleType,
    ByDeparture,
    ByDayOfWeek,
    ByPricing,
}

impl ConstraintType {
    const ALL: [ConstraintType; 10] = [
        ConstraintType::ByTarget,
        ConstraintType::ByVia,
        ConstraintType::ByNextStop,
        ConstraintType::ByTransportLine,
        ConstraintType::ByTransportLineNumber,
        ConstraintType::ByDelay,
        ConstraintType::ByVehicleType,
        ConstraintType::ByDeparture,
        ConstraintType::ByDayOfWeek,
        ConstraintType::ByPricing,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConstraintVariant {
    Equals,
    DoesntEqual,
    Contains,
    DoesntContain,
    MatchesRegExp,
    DoesntMatchRegExp,
    IsOneOf,
    IsntOneOf,
    GreaterThan,
    LessThan,
}

impl ConstraintVariant {
    const ALL: [ConstraintVariant; 10] = [
        ConstraintVariant::Equals,
        ConstraintVariant::DoesntEqual,
        ConstraintVariant::Contains,
        ConstraintVariant::DoesntContain,
        ConstraintVariant::MatchesRegExp,
        ConstraintVariant::DoesntMatchRegExp,
        ConstraintVariant::IsOneOf,
        ConstraintVariant::IsntOneOf,
        ConstraintVariant::GreaterThan,
        ConstraintVariant::LessThan,
    ];
}

/// The comparison value of a constraint. Which variants are admissible is
/// determined by the constraint type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConstraintValue {
    Str(String),
    Int(i64),
    Time(NaiveTime),
    IntList(Vec<i64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    #[serde(rename = "type")]
    pub kind: ConstraintType,
    pub variant: ConstraintVariant,
    pub value: ConstraintValue,
}

/// Uniform read access for records that can be filtered.
pub trait Filterable {
    fn target(&self) -> &str;
    fn route_stops(&self) -> &[String];
    fn line_string(&self) -> &str;
    fn line_number(&self) -> i32;
    fn delay_minutes(&self) -> i32;
    fn vehicle_types(&self) -> Vec<VehicleType>;
    fn departure(&self) -> DateTime<Local>;
    /// The first route stop after the requested stop itself.
    fn next_stop(&self) -> Option<&str>;
    fn pricing(&self) -> Option<&str>;
}

impl Filterable for Departure {
    fn target(&self) -> &str {
        self.target()
    }

    fn route_stops(&self) -> &[String] {
        self.route_stops()
    }

    fn line_string(&self) -> &str {
        self.line_string()
    }

    fn line_number(&self) -> i32 {
        self.line_number()
    }

    fn delay_minutes(&self) -> i32 {
        self.delay_minutes()
    }

    fn vehicle_types(&self) -> Vec<VehicleType> {
        vec![self.vehicle_type()]
    }

    fn departure(&self) -> DateTime<Local> {
        self.departure()
    }

    fn next_stop(&self) -> Option<&str> {
        self.route_stops().get(1).map(|s| s.as_str())
    }

    fn pricing(&self) -> Option<&str> {
        None
    }
}

impl Filterable for Journey {
    fn target(&self) -> &str {
        self.target_stop()
    }

    fn route_stops(&self) -> &[String] {
        self.route_stops()
    }

    fn line_string(&self) -> &str {
        self.route_transport_lines().first().map(|s| s.as_str()).unwrap_or("")
    }

    fn line_number(&self) -> i32 {
        crate::departure::line_number_of(self.line_string())
    }

    fn delay_minutes(&self) -> i32 {
        -1
    }

    fn vehicle_types(&self) -> Vec<VehicleType> {
        self.vehicle_types().iter().copied().collect()
    }

    fn departure(&self) -> DateTime<Local> {
        self.departure()
    }

    fn next_stop(&self) -> Option<&str> {
        self.route_stops().get(1).map(|s| s.as_str())
    }

    fn pricing(&self) -> Option<&str> {
        self.pricing()
    }
}

fn match_string(variant: ConstraintVariant, filter_value: &str, test: &str) -> bool {
    match variant {
        ConstraintVariant::Equals => test.eq_ignore_ascii_case(filter_value),
        ConstraintVariant::DoesntEqual => !test.eq_ignore_ascii_case(filter_value),
        ConstraintVariant::Contains => test
            .to_lowercase()
            .contains(&filter_value.to_lowercase()),
        ConstraintVariant::DoesntContain => !test
            .to_lowercase()
            .contains(&filter_value.to_lowercase()),
        ConstraintVariant::MatchesRegExp => match Regex::new(filter_value) {
            Ok(rx) => rx.is_match(test),
            Err(why) => {
                log::warn!("invalid filter pattern {:?}: {}", filter_value, why);
                false
            }
        },
        ConstraintVariant::DoesntMatchRegExp => {
            !match_string(ConstraintVariant::MatchesRegExp, filter_value, test)
        }
        _ => {
            log::warn!("invalid filter variant for string matching: {:?}", variant);
            false
        }
    }
}

fn match_int(variant: ConstraintVariant, filter_value: i64, test: i64) -> bool {
    match variant {
        ConstraintVariant::Equals => test == filter_value,
        ConstraintVariant::DoesntEqual => test != filter_value,
        ConstraintVariant::GreaterThan => test > filter_value,
        ConstraintVariant::LessThan => test < filter_value,
        _ => {
            log::warn!("invalid filter variant for integer matching: {:?}", variant);
            false
        }
    }
}

fn match_list(variant: ConstraintVariant, filter_values: &[i64], test: &[i64]) -> bool {
    match variant {
        ConstraintVariant::IsOneOf => test.iter().any(|value| filter_values.contains(value)),
        ConstraintVariant::IsntOneOf => test.iter().all(|value| !filter_values.contains(value)),
        _ => {
            log::warn!("invalid filter variant for list matching: {:?}", variant);
            false
        }
    }
}

fn match_time(variant: ConstraintVariant, filter_value: NaiveTime, test: NaiveTime) -> bool {
    match variant {
        ConstraintVariant::Equals => test == filter_value,
        ConstraintVariant::DoesntEqual => test != filter_value,
        ConstraintVariant::GreaterThan => test > filter_value,
        ConstraintVariant::LessThan => test < filter_value,
        _ => {
            log::warn!("invalid filter variant for time matching: {:?}", variant);
            false
        }
    }
}

impl Constraint {
    pub fn matches<R: Filterable>(&self, record: &R) -> bool {
        match self.kind {
            ConstraintType::ByTarget => {
                self.match_string_value(record.target())
            }
            ConstraintType::ByVia => record
                .route_stops()
                .iter()
                .any(|via| self.match_string_value(via)),
            ConstraintType::ByNextStop => {
                self.match_string_value(record.next_stop().unwrap_or(""))
            }
            ConstraintType::ByTransportLine => self.match_string_value(record.line_string()),
            ConstraintType::ByTransportLineNumber => {
                let line_number = record.line_number();
                if line_number <= 0 {
                    // Invalid line numbers only match with variant DoesntEqual.
                    self.variant == ConstraintVariant::DoesntEqual
                } else {
                    self.match_int_value(line_number as i64)
                }
            }
            ConstraintType::ByDelay => {
                let delay = record.delay_minutes();
                if delay < 0 {
                    // Unknown delays only match with variant DoesntEqual.
                    self.variant == ConstraintVariant::DoesntEqual
                } else {
                    self.match_int_value(delay as i64)
                }
            }
            ConstraintType::ByVehicleType => match &self.value {
                ConstraintValue::IntList(ids) => {
                    let types: Vec<i64> =
                        record.vehicle_types().iter().map(|v| v.id()).collect();
                    match_list(self.variant, ids, &types)
                }
                _ => false,
            },
            ConstraintType::ByDeparture => match &self.value {
                ConstraintValue::Time(time) => {
                    match_time(self.variant, *time, record.departure().time())
                }
                _ => false,
            },
            ConstraintType::ByDayOfWeek => match &self.value {
                ConstraintValue::IntList(days) => {
                    let weekday = record.departure().weekday().number_from_monday() as i64;
                    match_list(self.variant, days, &[weekday])
                }
                _ => false,
            },
            ConstraintType::ByPricing => {
                self.match_string_value(record.pricing().unwrap_or(""))
            }
        }
    }

    fn match_string_value(&self, test: &str) -> bool {
        match &self.value {
            ConstraintValue::Str(value) => match_string(self.variant, value, test),
            _ => false,
        }
    }

    fn match_int_value(&self, test: i64) -> bool {
        match &self.value {
            ConstraintValue::Int(value) => match_int(self.variant, *value, test),
            _ => false,
        }
    }

    /// Checks value kind and variant admissibility for the constraint type.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let value_admissible = match self.kind {
            ConstraintType::ByTarget
            | ConstraintType::ByVia
            | ConstraintType::ByNextStop
            | ConstraintType::ByTransportLine
            | ConstraintType::ByPricing => matches!(self.value, ConstraintValue::Str(_)),
            ConstraintType::ByTransportLineNumber | ConstraintType::ByDelay => {
                matches!(self.value, ConstraintValue::Int(_))
            }
            ConstraintType::ByVehicleType | ConstraintType::ByDayOfWeek => {
                matches!(self.value, ConstraintValue::IntList(_))
            }
            ConstraintType::ByDeparture => matches!(self.value, ConstraintValue::Time(_)),
        };
        if value_admissible {
            Ok(())
        } else {
            Err(SettingsError::ValueTypeMismatch)
        }
    }
}

/// A non-empty ordered sequence of constraints combined by AND.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Filter {
    pub constraints: Vec<Constraint>,
}

impl Filter {
    pub fn new(constraints: Vec<Constraint>) -> Self {
        Self { constraints }
    }

    /// True when every constraint matches. Evaluation short-circuits on the
    /// first failing constraint.
    pub fn match_record<R: Filterable>(&self, record: &R) -> bool {
        self.constraints.iter().all(|c| c.matches(record))
    }
}

/// A possibly empty sequence of filters combined by OR.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterList {
    pub filters: Vec<Filter>,
}

impl FilterList {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    pub fn match_record<R: Filterable>(&self, record: &R) -> bool {
        self.filters.iter().any(|f| f.match_record(record))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterAction {
    #[default]
    ShowMatching,
    HideMatching,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSettings {
    pub name: String,
    pub action: FilterAction,
    pub filters: FilterList,
    /// Indices into the stop settings list this filter applies to.
    pub affected_stops: BTreeSet<usize>,
}

impl FilterSettings {
    /// Whether the record is hidden by these settings. An empty filter list
    /// never filters anything, regardless of the action.
    pub fn filter_out<R: Filterable>(&self, record: &R) -> bool {
        if self.filters.filters.is_empty() {
            return false;
        }
        match self.action {
            FilterAction::ShowMatching => !self.filters.match_record(record),
            FilterAction::HideMatching => self.filters.match_record(record),
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        crate::validate_settings_name(&self.name)?;
        for filter in &self.filters.filters {
            for constraint in &filter.constraints {
                constraint.validate()?;
            }
        }
        Ok(())
    }
}

/// Identity of filter settings is their name.
impl PartialEq for FilterSettings {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterBlobError {
    UnexpectedEnd,
    UnknownConstraintType(u8),
    UnknownConstraintVariant(u8),
    UnknownValueTag(u8),
    Oversize(usize),
    InvalidString,
    InvalidTime,
}

impl std::fmt::Display for FilterBlobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterBlobError::UnexpectedEnd => write!(f, "unexpected end of filter data"),
            FilterBlobError::UnknownConstraintType(id) => {
                write!(f, "unknown constraint type {}", id)
            }
            FilterBlobError::UnknownConstraintVariant(id) => {
                write!(f, "unknown constraint variant {}", id)
            }
            FilterBlobError::UnknownValueTag(id) => write!(f, "unknown value tag {}", id),
            FilterBlobError::Oversize(len) => {
                write!(f, "value of length {} exceeds the 16 bit length prefix", len)
            }
            FilterBlobError::InvalidString => write!(f, "string value is not valid utf-8"),
            FilterBlobError::InvalidTime => write!(f, "invalid time value"),
        }
    }
}

impl std::error::Error for FilterBlobError {}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], FilterBlobError> {
        if self.pos + len > self.data.len() {
            return Err(FilterBlobError::UnexpectedEnd);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, FilterBlobError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, FilterBlobError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn i64(&mut self) -> Result<i64, FilterBlobError> {
        let bytes = self.take(8)?;
        let mut buffer = [0u8; 8];
        buffer.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(buffer))
    }
}

fn push_u16(out: &mut Vec<u8>, value: usize) -> Result<(), FilterBlobError> {
    let value = u16::try_from(value).map_err(|_| FilterBlobError::Oversize(value))?;
    out.extend_from_slice(&value.to_le_bytes());
    Ok(())
}

impl ConstraintValue {
    fn encode(&self, out: &mut Vec<u8>) -> Result<(), FilterBlobError> {
        match self {
            ConstraintValue::Str(s) => {
                out.push(0);
                push_u16(out, s.len())?;
                out.extend_from_slice(s.as_bytes());
            }
            ConstraintValue::Int(i) => {
                out.push(1);
                out.extend_from_slice(&i.to_le_bytes());
            }
            ConstraintValue::Time(t) => {
                out.push(2);
                out.push(t.hour() as u8);
                out.push(t.minute() as u8);
            }
            ConstraintValue::IntList(list) => {
                out.push(3);
                push_u16(out, list.len())?;
                for item in list {
                    out.extend_from_slice(&item.to_le_bytes());
                }
            }
        }
        Ok(())
    }

    fn decode(reader: &mut Reader) -> Result<Self, FilterBlobError> {
        match reader.u8()? {
            0 => {
                let len = reader.u16()? as usize;
                let bytes = reader.take(len)?;
                let s = std::str::from_utf8(bytes).map_err(|_| FilterBlobError::InvalidString)?;
                Ok(ConstraintValue::Str(s.to_owned()))
            }
            1 => Ok(ConstraintValue::Int(reader.i64()?)),
            2 => {
                let hour = reader.u8()? as u32;
                let minute = reader.u8()? as u32;
                NaiveTime::from_hms_opt(hour, minute, 0)
                    .map(ConstraintValue::Time)
                    .ok_or(FilterBlobError::InvalidTime)
            }
            3 => {
                let count = reader.u16()? as usize;
                let mut list = Vec::with_capacity(count);
                for _ in 0..count {
                    list.push(reader.i64()?);
                }
                Ok(ConstraintValue::IntList(list))
            }
            tag => Err(FilterBlobError::UnknownValueTag(tag)),
        }
    }
}

impl FilterList {
    /// Encodes the filter list into the compact binary form used for
    /// persisted settings.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FilterBlobError> {
        let mut out = Vec::new();
        push_u16(&mut out, self.filters.len())?;
        for filter in &self.filters {
            push_u16(&mut out, filter.constraints.len())?;
            for constraint in &filter.constraints {
                out.push(
                    ConstraintType::ALL
                        .iter()
                        .position(|t| *t == constraint.kind)
                        .unwrap_or(0) as u8,
                );
                out.push(
                    ConstraintVariant::ALL
                        .iter()
                        .position(|v| *v == constraint.variant)
                        .unwrap_or(0) as u8,
                );
                constraint.value.encode(&mut out)?;
            }
        }
        Ok(out)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FilterBlobError> {
        let mut reader = Reader { data, pos: 0 };
        let filter_count = reader.u16()? as usize;
        let mut filters = Vec::with_capacity(filter_count);
        for _ in 0..filter_count {
            let constraint_count = reader.u16()? as usize;
            let mut constraints = Vec::with_capacity(constraint_count);
            for _ in 0..constraint_count {
                let type_id = reader.u8()?;
                let kind = ConstraintType::ALL
                    .get(type_id as usize)
                    .copied()
                    .ok_or(FilterBlobError::UnknownConstraintType(type_id))?;
                let variant_id = reader.u8()?;
                let variant = ConstraintVariant::ALL
                    .get(variant_id as usize)
                    .copied()
                    .ok_or(FilterBlobError::UnknownConstraintVariant(variant_id))?;
                let value = ConstraintValue::decode(&mut reader)?;
                constraints.push(Constraint { kind, variant, value });
            }
            filters.push(Filter { constraints });
        }
        Ok(FilterList { filters })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::departure::DepartureFields;
    use chrono::TimeZone;

    fn test_departure() -> Departure {
        let mut fields = DepartureFields::new(
            "S1",
            "Kiel Hbf",
            Local.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            VehicleType::TrainInterurban,
        );
        fields.delay_minutes = -1;
        fields.route_stops = vec!["Raisdorf".to_owned(), "Preetz".to_owned()];
        Departure::new(fields)
    }

    fn constraint(kind: ConstraintType, variant: ConstraintVariant, value: ConstraintValue) -> Constraint {
        Constraint { kind, variant, value }
    }

    #[test]
    fn string_matching_is_case_insensitive() {
        let departure = test_departure();
        let equals = constraint(
            ConstraintType::ByTarget,
            ConstraintVariant::Equals,
            ConstraintValue::Str("kiel hbf".to_owned()),
        );
        assert!(equals.matches(&departure));
        let contains = constraint(
            ConstraintType::ByTarget,
            ConstraintVariant::Contains,
            ConstraintValue::Str("HBF".to_owned()),
        );
        assert!(contains.matches(&departure));
    }

    #[test]
    fn doesnt_equal_is_negation_of_equals() {
        let departure = test_departure();
        for value in ["Kiel Hbf", "Lübeck"] {
            let equals = constraint(
                ConstraintType::ByTarget,
                ConstraintVariant::Equals,
                ConstraintValue::Str(value.to_owned()),
            );
            let doesnt = constraint(
                ConstraintType::ByTarget,
                ConstraintVariant::DoesntEqual,
                ConstraintValue::Str(value.to_owned()),
            );
            assert_ne!(equals.matches(&departure), doesnt.matches(&departure));
        }
    }

    #[test]
    fn unknown_delay_matches_only_doesnt_equal() {
        let departure = test_departure();
        assert_eq!(departure.delay_minutes(), -1);
        let equals_zero = constraint(
            ConstraintType::ByDelay,
            ConstraintVariant::Equals,
            ConstraintValue::Int(0),
        );
        assert!(!equals_zero.matches(&departure));
        let doesnt_equal_zero = constraint(
            ConstraintType::ByDelay,
            ConstraintVariant::DoesntEqual,
            ConstraintValue::Int(0),
        );
        assert!(doesnt_equal_zero.matches(&departure));
    }

    #[test]
    fn via_matches_any_route_stop() {
        let departure = test_departure();
        let via = constraint(
            ConstraintType::ByVia,
            ConstraintVariant::Contains,
            ConstraintValue::Str("preetz".to_owned()),
        );
        assert!(via.matches(&departure));
        let no_via = constraint(
            ConstraintType::ByVia,
            ConstraintVariant::Contains,
            ConstraintValue::Str("Plön".to_owned()),
        );
        assert!(!no_via.matches(&departure));
    }

    #[test]
    fn regexp_uses_find_semantics() {
        let departure = test_departure();
        let matches = constraint(
            ConstraintType::ByTransportLine,
            ConstraintVariant::MatchesRegExp,
            ConstraintValue::Str(r"\d".to_owned()),
        );
        assert!(matches.matches(&departure));
        let doesnt = constraint(
            ConstraintType::ByTransportLine,
            ConstraintVariant::DoesntMatchRegExp,
            ConstraintValue::Str(r"\d".to_owned()),
        );
        assert!(!doesnt.matches(&departure));
    }

    #[test]
    fn empty_filter_list_never_filters() {
        let departure = test_departure();
        for action in [FilterAction::ShowMatching, FilterAction::HideMatching] {
            let settings = FilterSettings {
                name: "empty".to_owned(),
                action,
                filters: FilterList::default(),
                affected_stops: BTreeSet::new(),
            };
            assert!(!settings.filter_out(&departure));
        }
    }

    #[test]
    fn show_matching_hides_non_matching_records() {
        let departure = test_departure();
        let settings = FilterSettings {
            name: "vehicles".to_owned(),
            action: FilterAction::ShowMatching,
            filters: FilterList::new(vec![Filter::new(vec![constraint(
                ConstraintType::ByVehicleType,
                ConstraintVariant::IsOneOf,
                ConstraintValue::IntList(vec![
                    VehicleType::Bus.id(),
                    VehicleType::Tram.id(),
                ]),
            )])]),
            affected_stops: BTreeSet::new(),
        };
        // the departure is an interurban train, which is not in the list
        assert!(settings.filter_out(&departure));
    }

    #[test]
    fn filter_short_circuits_with_and_semantics() {
        let departure = test_departure();
        let filter = Filter::new(vec![
            constraint(
                ConstraintType::ByTarget,
                ConstraintVariant::Equals,
                ConstraintValue::Str("Kiel Hbf".to_owned()),
            ),
            constraint(
                ConstraintType::ByTransportLineNumber,
                ConstraintVariant::Equals,
                ConstraintValue::Int(2),
            ),
        ]);
        assert!(!filter.match_record(&departure));
    }

    #[test]
    fn blob_round_trip() {
        let list = FilterList::new(vec![
            Filter::new(vec![
                constraint(
                    ConstraintType::ByTarget,
                    ConstraintVariant::Contains,
                    ConstraintValue::Str("Kiel".to_owned()),
                ),
                constraint(
                    ConstraintType::ByDeparture,
                    ConstraintVariant::GreaterThan,
                    ConstraintValue::Time(NaiveTime::from_hms_opt(7, 30, 0).unwrap()),
                ),
            ]),
            Filter::new(vec![constraint(
                ConstraintType::ByVehicleType,
                ConstraintVariant::IsntOneOf,
                ConstraintValue::IntList(vec![2, 3]),
            )]),
        ]);
        let bytes = list.to_bytes().unwrap();
        assert_eq!(FilterList::from_bytes(&bytes).unwrap(), list);
    }

    #[test]
    fn blob_decode_rejects_garbage() {
        assert!(FilterList::from_bytes(&[1]).is_err());
        // one filter, one constraint, bogus value tag
        let data = [1u8, 0, 1, 0, 0, 0, 9];
        assert!(matches!(
            FilterList::from_bytes(&data),
            Err(FilterBlobError::UnknownValueTag(9))
        ));
    }

    #[test]
    fn validation_rejects_mismatched_value_types() {
        let bad = constraint(
            ConstraintType::ByDelay,
            ConstraintVariant::Equals,
            ConstraintValue::Str("five".to_owned()),
        );
        assert!(bad.validate().is_err());
    }
}
