use std::cmp::Ordering;

use chrono::{DateTime, Duration, Local, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

use crate::{vehicle::VehicleType, DelayType, LineServices};

/// Derives the line number from a transport line string: the trailing run of
/// digits, or 0 when there is none.
pub fn line_number_of(line_string: &str) -> i32 {
    lazy_static! {
        static ref TRAILING_DIGITS: Regex = Regex::new(r"(\d+)$").unwrap();
    }
    TRAILING_DIGITS
        .captures(line_string.trim())
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0)
}

pub(crate) fn departure_content_hash(
    departure: &DateTime<Local>,
    vehicle_type: VehicleType,
    line_string: &str,
    target: &str,
) -> u64 {
    let key = format!(
        "{}{}{}{}",
        departure.format("%-d%-m%y%H%M"),
        vehicle_type.name(),
        line_string,
        target.trim().to_lowercase()
    );
    xxh64(key.as_bytes(), 0)
}

/// All plugin-supplied fields of a departure or arrival, used to construct
/// the canonical record.
#[derive(Debug, Clone)]
pub struct DepartureFields {
    pub operator: Option<String>,
    pub line_string: String,
    pub target: String,
    pub target_shortened: Option<String>,
    pub departure: DateTime<Local>,
    pub vehicle_type: VehicleType,
    pub line_services: LineServices,
    pub platform: Option<String>,
    pub delay_minutes: i32,
    pub delay_reason: Option<String>,
    pub journey_news: Option<String>,
    pub status: Option<String>,
    pub route_stops: Vec<String>,
    pub route_stops_shortened: Vec<String>,
    pub route_times: Vec<NaiveTime>,
    pub route_exact_stops: u32,
}

impl DepartureFields {
    pub fn new(
        line_string: impl Into<String>,
        target: impl Into<String>,
        departure: DateTime<Local>,
        vehicle_type: VehicleType,
    ) -> Self {
        Self {
            operator: None,
            line_string: line_string.into(),
            target: target.into(),
            target_shortened: None,
            departure,
            vehicle_type,
            line_services: LineServices::default(),
            platform: None,
            delay_minutes: -1,
            delay_reason: None,
            journey_news: None,
            status: None,
            route_stops: Vec::new(),
            route_stops_shortened: Vec::new(),
            route_times: Vec::new(),
            route_exact_stops: 0,
        }
    }
}

/// A single departure or arrival at a stop. Constructed by the normalizer,
/// published by value to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Departure {
    operator: Option<String>,
    line_string: String,
    line_number: i32,
    target: String,
    target_shortened: Option<String>,
    departure: DateTime<Local>,
    vehicle_type: VehicleType,
    line_services: LineServices,
    platform: Option<String>,
    delay_minutes: i32,
    delay_reason: Option<String>,
    journey_news: Option<String>,
    status: Option<String>,
    route_stops: Vec<String>,
    route_stops_shortened: Vec<String>,
    route_times: Vec<NaiveTime>,
    route_exact_stops: u32,
    filtered_out: bool,
    matched_alarms: Vec<usize>,
    hash: u64,
}

impl Departure {
    pub fn new(mut fields: DepartureFields) -> Self {
        // Route times run parallel to route stops; surplus entries on either
        // side are dropped.
        if !fields.route_times.is_empty() && fields.route_times.len() != fields.route_stops.len() {
            let len = fields.route_times.len().min(fields.route_stops.len());
            fields.route_times.truncate(len);
            fields.route_stops.truncate(len);
        }
        let delay_minutes = fields.delay_minutes.max(-1);
        let line_number = line_number_of(&fields.line_string);
        let hash = departure_content_hash(
            &fields.departure,
            fields.vehicle_type,
            &fields.line_string,
            &fields.target,
        );
        Self {
            operator: fields.operator,
            line_string: fields.line_string,
            line_number,
            target: fields.target,
            target_shortened: fields.target_shortened,
            departure: fields.departure,
            vehicle_type: fields.vehicle_type,
            line_services: fields.line_services,
            platform: fields.platform,
            delay_minutes,
            delay_reason: fields.delay_reason,
            journey_news: fields.journey_news,
            status: fields.status,
            route_stops: fields.route_stops,
            route_stops_shortened: fields.route_stops_shortened,
            route_times: fields.route_times,
            route_exact_stops: fields.route_exact_stops,
            filtered_out: false,
            matched_alarms: Vec::new(),
            hash,
        }
    }

    pub fn operator(&self) -> Option<&str> {
        self.operator.as_deref()
    }

    pub fn line_string(&self) -> &str {
        &self.line_string
    }

    pub fn line_number(&self) -> i32 {
        self.line_number
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn target_shortened(&self) -> Option<&str> {
        self.target_shortened.as_deref()
    }

    /// The shortened target if a city affix was removed, the target otherwise.
    pub fn target_display(&self) -> &str {
        self.target_shortened.as_deref().unwrap_or(&self.target)
    }

    pub fn departure(&self) -> DateTime<Local> {
        self.departure
    }

    pub fn vehicle_type(&self) -> VehicleType {
        self.vehicle_type
    }

    pub fn line_services(&self) -> LineServices {
        self.line_services
    }

    pub fn platform(&self) -> Option<&str> {
        self.platform.as_deref()
    }

    pub fn delay_minutes(&self) -> i32 {
        self.delay_minutes
    }

    pub fn delay_type(&self) -> DelayType {
        match self.delay_minutes {
            d if d < 0 => DelayType::Unknown,
            0 => DelayType::OnSchedule,
            _ => DelayType::Delayed,
        }
    }

    pub fn delay_reason(&self) -> Option<&str> {
        self.delay_reason.as_deref()
    }

    pub fn journey_news(&self) -> Option<&str> {
        self.journey_news.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn route_stops(&self) -> &[String] {
        &self.route_stops
    }

    pub fn route_stops_shortened(&self) -> &[String] {
        &self.route_stops_shortened
    }

    pub fn route_times(&self) -> &[NaiveTime] {
        &self.route_times
    }

    pub fn route_exact_stops(&self) -> u32 {
        self.route_exact_stops
    }

    pub fn filtered_out(&self) -> bool {
        self.filtered_out
    }

    pub fn matched_alarms(&self) -> &[usize] {
        &self.matched_alarms
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Scheduled time plus delay, or the scheduled time when the delay is
    /// unknown or zero.
    pub fn predicted_departure(&self) -> DateTime<Local> {
        if self.delay_minutes > 0 {
            self.departure + Duration::minutes(self.delay_minutes as i64)
        } else {
            self.departure
        }
    }

    pub fn set_filtered_out(&mut self, filtered_out: bool) {
        self.filtered_out = filtered_out;
    }

    pub fn set_matched_alarms(&mut self, matched_alarms: Vec<usize>) {
        self.matched_alarms = matched_alarms;
    }

    pub fn add_matched_alarm(&mut self, alarm_index: usize) {
        if !self.matched_alarms.contains(&alarm_index) {
            self.matched_alarms.push(alarm_index);
        }
    }

    pub fn set_shortened_stops(
        &mut self,
        target_shortened: Option<String>,
        route_stops_shortened: Vec<String>,
    ) {
        self.target_shortened = target_shortened;
        self.route_stops_shortened = route_stops_shortened;
    }
}

impl PartialEq for Departure {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.departure == other.departure
            && self.line_number == other.line_number
            && self.target == other.target
            && self.delay_minutes == other.delay_minutes
            && self.platform == other.platform
    }
}

impl Eq for Departure {}

impl PartialOrd for Departure {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Departure {
    fn cmp(&self, other: &Self) -> Ordering {
        self.predicted_departure()
            .cmp(&other.predicted_departure())
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn departure_at(hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn line_numbers() {
        assert_eq!(line_number_of("ICE 728"), 728);
        assert_eq!(line_number_of("S1"), 1);
        assert_eq!(line_number_of("N"), 0);
        assert_eq!(line_number_of(""), 0);
    }

    #[test]
    fn predicted_departure_honours_delay() {
        let mut fields = DepartureFields::new(
            "S1",
            "Kiel",
            departure_at(8, 0),
            VehicleType::TrainInterurban,
        );
        fields.delay_minutes = 5;
        let delayed = Departure::new(fields.clone());
        assert_eq!(delayed.predicted_departure(), departure_at(8, 5));

        fields.delay_minutes = -1;
        let unknown = Departure::new(fields.clone());
        assert_eq!(unknown.predicted_departure(), departure_at(8, 0));
        assert_eq!(unknown.delay_type(), DelayType::Unknown);

        fields.delay_minutes = 0;
        assert_eq!(
            Departure::new(fields).predicted_departure(),
            departure_at(8, 0)
        );
    }

    #[test]
    fn equal_content_hashes_for_equal_content() {
        let a = Departure::new(DepartureFields::new(
            "S1",
            " Kiel ",
            departure_at(8, 0),
            VehicleType::TrainInterurban,
        ));
        let b = Departure::new(DepartureFields::new(
            "S1",
            "KIEL",
            departure_at(8, 0),
            VehicleType::TrainInterurban,
        ));
        assert_eq!(a.hash(), b.hash());

        let c = Departure::new(DepartureFields::new(
            "S2",
            "Kiel",
            departure_at(8, 0),
            VehicleType::TrainInterurban,
        ));
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn route_times_are_kept_parallel_to_route_stops() {
        let mut fields = DepartureFields::new(
            "S1",
            "Kiel",
            departure_at(8, 0),
            VehicleType::TrainInterurban,
        );
        fields.route_stops = vec!["A".to_owned(), "B".to_owned(), "C".to_owned()];
        fields.route_times = vec![
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(8, 5, 0).unwrap(),
        ];
        let departure = Departure::new(fields);
        assert_eq!(departure.route_stops().len(), departure.route_times().len());
    }

    #[test]
    fn ordering_is_by_predicted_departure() {
        let mut early = DepartureFields::new(
            "1",
            "A",
            departure_at(8, 0),
            VehicleType::Bus,
        );
        early.delay_minutes = 20;
        let early = Departure::new(early);
        let late = Departure::new(DepartureFields::new(
            "2",
            "B",
            departure_at(8, 10),
            VehicleType::Bus,
        ));
        // The delayed 08:00 departure is predicted after the 08:10 one.
        assert!(late < early);
    }
}
