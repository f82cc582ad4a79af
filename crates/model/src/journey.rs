use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Local, NaiveTime};
use itertools::Itertools;
use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

use crate::vehicle::VehicleType;

fn journey_content_hash(
    departure: &DateTime<Local>,
    duration_min: i32,
    changes: u32,
    vehicle_types: &BTreeSet<VehicleType>,
) -> u64 {
    let key = format!(
        "{}{}{}{}",
        departure.format("%-d%-m%y%H%M"),
        duration_min,
        changes,
        vehicle_types.iter().map(|v| v.name()).join("")
    );
    xxh64(key.as_bytes(), 0)
}

#[derive(Debug, Clone)]
pub struct JourneyFields {
    pub operator: Option<String>,
    pub pricing: Option<String>,
    pub start_stop: String,
    pub target_stop: String,
    pub departure: DateTime<Local>,
    pub arrival: DateTime<Local>,
    /// Minutes, computed from departure and arrival when negative.
    pub duration_min: i32,
    pub changes: u32,
    pub vehicle_types: BTreeSet<VehicleType>,
    pub journey_news: Option<String>,
    pub route_stops: Vec<String>,
    pub route_stops_shortened: Vec<String>,
    pub route_transport_lines: Vec<String>,
    pub route_platforms_departure: Vec<String>,
    pub route_platforms_arrival: Vec<String>,
    pub route_vehicle_types: Vec<VehicleType>,
    pub route_times_departure: Vec<NaiveTime>,
    pub route_times_arrival: Vec<NaiveTime>,
    pub route_delays_departure: Vec<i32>,
    pub route_delays_arrival: Vec<i32>,
    pub route_exact_stops: u32,
}

impl JourneyFields {
    pub fn new(
        start_stop: impl Into<String>,
        target_stop: impl Into<String>,
        departure: DateTime<Local>,
        arrival: DateTime<Local>,
    ) -> Self {
        Self {
            operator: None,
            pricing: None,
            start_stop: start_stop.into(),
            target_stop: target_stop.into(),
            departure,
            arrival,
            duration_min: -1,
            changes: 0,
            vehicle_types: BTreeSet::new(),
            journey_news: None,
            route_stops: Vec::new(),
            route_stops_shortened: Vec::new(),
            route_transport_lines: Vec::new(),
            route_platforms_departure: Vec::new(),
            route_platforms_arrival: Vec::new(),
            route_vehicle_types: Vec::new(),
            route_times_departure: Vec::new(),
            route_times_arrival: Vec::new(),
            route_delays_departure: Vec::new(),
            route_delays_arrival: Vec::new(),
            route_exact_stops: 0,
        }
    }
}

/// A multi-leg trip from an origin to a destination stop.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Journey {
    operator: Option<String>,
    pricing: Option<String>,
    start_stop: String,
    target_stop: String,
    departure: DateTime<Local>,
    arrival: DateTime<Local>,
    duration_min: i32,
    changes: u32,
    vehicle_types: BTreeSet<VehicleType>,
    journey_news: Option<String>,
    route_stops: Vec<String>,
    route_stops_shortened: Vec<String>,
    route_transport_lines: Vec<String>,
    route_platforms_departure: Vec<String>,
    route_platforms_arrival: Vec<String>,
    route_vehicle_types: Vec<VehicleType>,
    route_times_departure: Vec<NaiveTime>,
    route_times_arrival: Vec<NaiveTime>,
    route_delays_departure: Vec<i32>,
    route_delays_arrival: Vec<i32>,
    route_exact_stops: u32,
    filtered_out: bool,
    matched_alarms: Vec<usize>,
    hash: u64,
}

impl Journey {
    pub fn new(fields: JourneyFields) -> Self {
        let duration_min = if fields.duration_min >= 0 {
            fields.duration_min
        } else {
            let minutes = (fields.arrival - fields.departure).num_minutes();
            if minutes >= 0 {
                minutes as i32
            } else {
                -1
            }
        };
        let hash = journey_content_hash(
            &fields.departure,
            duration_min,
            fields.changes,
            &fields.vehicle_types,
        );
        Self {
            operator: fields.operator,
            pricing: fields.pricing,
            start_stop: fields.start_stop,
            target_stop: fields.target_stop,
            departure: fields.departure,
            arrival: fields.arrival,
            duration_min,
            changes: fields.changes,
            vehicle_types: fields.vehicle_types,
            journey_news: fields.journey_news,
            route_stops: fields.route_stops,
            route_stops_shortened: fields.route_stops_shortened,
            route_transport_lines: fields.route_transport_lines,
            route_platforms_departure: fields.route_platforms_departure,
            route_platforms_arrival: fields.route_platforms_arrival,
            route_vehicle_types: fields.route_vehicle_types,
            route_times_departure: fields.route_times_departure,
            route_times_arrival: fields.route_times_arrival,
            route_delays_departure: fields.route_delays_departure,
            route_delays_arrival: fields.route_delays_arrival,
            route_exact_stops: fields.route_exact_stops,
            filtered_out: false,
            matched_alarms: Vec::new(),
            hash,
        }
    }

    pub fn operator(&self) -> Option<&str> {
        self.operator.as_deref()
    }

    pub fn pricing(&self) -> Option<&str> {
        self.pricing.as_deref()
    }

    pub fn start_stop(&self) -> &str {
        &self.start_stop
    }

    pub fn target_stop(&self) -> &str {
        &self.target_stop
    }

    pub fn departure(&self) -> DateTime<Local> {
        self.departure
    }

    pub fn arrival(&self) -> DateTime<Local> {
        self.arrival
    }

    pub fn duration_min(&self) -> i32 {
        self.duration_min
    }

    pub fn changes(&self) -> u32 {
        self.changes
    }

    pub fn vehicle_types(&self) -> &BTreeSet<VehicleType> {
        &self.vehicle_types
    }

    pub fn journey_news(&self) -> Option<&str> {
        self.journey_news.as_deref()
    }

    pub fn route_stops(&self) -> &[String] {
        &self.route_stops
    }

    pub fn route_stops_shortened(&self) -> &[String] {
        &self.route_stops_shortened
    }

    pub fn route_transport_lines(&self) -> &[String] {
        &self.route_transport_lines
    }

    pub fn route_platforms_departure(&self) -> &[String] {
        &self.route_platforms_departure
    }

    pub fn route_platforms_arrival(&self) -> &[String] {
        &self.route_platforms_arrival
    }

    pub fn route_vehicle_types(&self) -> &[VehicleType] {
        &self.route_vehicle_types
    }

    pub fn route_times_departure(&self) -> &[NaiveTime] {
        &self.route_times_departure
    }

    pub fn route_times_arrival(&self) -> &[NaiveTime] {
        &self.route_times_arrival
    }

    pub fn route_delays_departure(&self) -> &[i32] {
        &self.route_delays_departure
    }

    pub fn route_delays_arrival(&self) -> &[i32] {
        &self.route_delays_arrival
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

    pub fn set_filtered_out(&mut self, filtered_out: bool) {
        self.filtered_out = filtered_out;
    }

    pub fn add_matched_alarm(&mut self, alarm_index: usize) {
        if !self.matched_alarms.contains(&alarm_index) {
            self.matched_alarms.push(alarm_index);
        }
    }

    pub fn set_shortened_stops(&mut self, route_stops_shortened: Vec<String>) {
        self.route_stops_shortened = route_stops_shortened;
    }
}

impl PartialEq for Journey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.departure == other.departure
            && self.arrival == other.arrival
            && self.changes == other.changes
    }
}

impl Eq for Journey {}

impl PartialOrd for Journey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Journey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.departure
            .cmp(&other.departure)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn duration_is_computed_when_missing() {
        let departure = Local.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let arrival = Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let journey = Journey::new(JourneyFields::new("Kiel", "Lübeck", departure, arrival));
        assert_eq!(journey.duration_min(), 90);

        // arrival before departure is invalid
        let broken = Journey::new(JourneyFields::new("Kiel", "Lübeck", arrival, departure));
        assert_eq!(broken.duration_min(), -1);
    }

    #[test]
    fn hash_depends_on_vehicle_types() {
        let departure = Local.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let arrival = Local.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let mut fields = JourneyFields::new("A", "B", departure, arrival);
        fields.vehicle_types.insert(VehicleType::Bus);
        let by_bus = Journey::new(fields.clone());
        fields.vehicle_types.insert(VehicleType::Tram);
        let by_bus_and_tram = Journey::new(fields);
        assert_ne!(by_bus.hash(), by_bus_and_tram.hash());
    }
}
