use std::collections::HashMap;

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone, Timelike};
use lazy_static::lazy_static;
use model::departure::{Departure, DepartureFields};
use model::info::{TimetableData, TimetableInformation};
use model::journey::{Journey, JourneyFields};
use model::stop::StopSuggestion;
use model::vehicle::VehicleType;
use model::{GlobalTimetableInfo, LineServices, ParseMode};
use regex::Regex;
use scripting::result::{ResultFeatures, ResultHints};

/// Word occurrence count that immediately elects a city affix.
const AFFIX_HIGH_THRESHOLD: u32 = 30;
/// Minimum occurrences for the most frequent word to be elected after the pass.
const AFFIX_LOW_THRESHOLD: u32 = 10;

/// Seconds a departure time may lie before its predecessor without assuming
/// a midnight crossing.
const MIDNIGHT_CROSSING_SECS: i64 = -5 * 60;

#[derive(Debug)]
pub enum NormalizedRecords {
    Departures(Vec<Departure>),
    Journeys(Vec<Journey>),
    StopSuggestions(Vec<StopSuggestion>),
}

impl NormalizedRecords {
    pub fn len(&self) -> usize {
        match self {
            NormalizedRecords::Departures(records) => records.len(),
            NormalizedRecords::Journeys(records) => records.len(),
            NormalizedRecords::StopSuggestions(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Carries the date guessing state across the records of one batch.
struct DateGuesser {
    current_date: Option<NaiveDate>,
    last_time: Option<NaiveTime>,
    day_adjustment: i64,
}

impl DateGuesser {
    fn new(global_info: &GlobalTimetableInfo, hints: ResultHints) -> Self {
        let day_adjustment = if hints.dates_need_adjustment {
            (global_info.request_date - Local::now().date_naive()).num_days()
        } else {
            0
        };
        if day_adjustment != 0 {
            log::debug!("dates get adjusted by {} days", day_adjustment);
        }
        Self {
            current_date: None,
            last_time: None,
            day_adjustment,
        }
    }

    /// Resolves the full departure timestamp of one record, guessing the
    /// date when the record only carries a time.
    fn resolve(
        &mut self,
        datetime: Option<DateTime<Local>>,
        date: Option<NaiveDate>,
        time: Option<NaiveTime>,
    ) -> Option<DateTime<Local>> {
        let mut resolved = match datetime {
            Some(datetime) => datetime,
            None => {
                let time = time?;
                let guessed_date = if let Some(date) = date {
                    date
                } else if let Some(current) = self.current_date {
                    let seconds_to = self
                        .last_time
                        .map(|last| (time - last).num_seconds())
                        .unwrap_or(0);
                    if seconds_to < MIDNIGHT_CROSSING_SECS {
                        // Much earlier than the previous record: the timetable
                        // crossed midnight.
                        current + Duration::days(1)
                    } else {
                        current
                    }
                } else {
                    // First record of the batch: decide around midnight.
                    let now = Local::now();
                    if now.hour() < 3 && time.hour() > 21 {
                        now.date_naive() - Duration::days(1)
                    } else if now.hour() > 21 && time.hour() < 3 {
                        now.date_naive() + Duration::days(1)
                    } else {
                        now.date_naive()
                    }
                };
                Local
                    .from_local_datetime(&guessed_date.and_time(time))
                    .single()?
            }
        };
        if self.day_adjustment != 0 {
            resolved += Duration::days(self.day_adjustment);
        }
        self.current_date = Some(resolved.date_naive());
        self.last_time = Some(time.unwrap_or_else(|| resolved.time()));
        Some(resolved)
    }
}

fn text(record: &TimetableData, info: TimetableInformation) -> Option<String> {
    record.get(&info).and_then(|value| value.to_text()).filter(|s| !s.is_empty())
}

fn vehicle_type(record: &TimetableData, default: VehicleType) -> VehicleType {
    record
        .get(&TimetableInformation::TypeOfVehicle)
        .and_then(|value| value.as_vehicle_type())
        .unwrap_or(default)
}

fn journey_news(record: &TimetableData) -> Option<String> {
    text(record, TimetableInformation::JourneyNews)
        .or_else(|| text(record, TimetableInformation::JourneyNewsOther))
}

/// Converts the records of one finished job into canonical records:
/// vehicle type defaulting, date guessing, city affix removal, validation
/// and content hashing.
pub fn normalize(
    data: &[TimetableData],
    parse_mode: ParseMode,
    default_vehicle_type: VehicleType,
    global_info: &GlobalTimetableInfo,
    features: ResultFeatures,
    hints: ResultHints,
) -> NormalizedRecords {
    match parse_mode {
        ParseMode::Departures | ParseMode::Arrivals | ParseMode::AdditionalData => {
            let mut departures = normalize_departures(
                data,
                default_vehicle_type,
                global_info,
                hints,
            );
            if features.auto_remove_city_from_stop_names {
                remove_city_affixes(&mut departures);
            }
            NormalizedRecords::Departures(departures)
        }
        ParseMode::Journeys => NormalizedRecords::Journeys(normalize_journeys(
            data,
            default_vehicle_type,
            global_info,
            hints,
        )),
        ParseMode::StopSuggestions => {
            NormalizedRecords::StopSuggestions(normalize_stop_suggestions(data))
        }
    }
}

fn normalize_departures(
    data: &[TimetableData],
    default_vehicle_type: VehicleType,
    global_info: &GlobalTimetableInfo,
    hints: ResultHints,
) -> Vec<Departure> {
    let mut guesser = DateGuesser::new(global_info, hints);
    let mut departures = Vec::new();
    for record in data {
        let datetime = record
            .get(&TimetableInformation::DepartureDateTime)
            .and_then(|value| value.as_date_time());
        let date = record
            .get(&TimetableInformation::DepartureDate)
            .and_then(|value| value.as_date());
        let time = record
            .get(&TimetableInformation::DepartureTime)
            .and_then(|value| value.as_time())
            .or_else(|| datetime.map(|dt| dt.time()));
        let Some(departure) = guesser.resolve(datetime, date, time) else {
            log::debug!("record without departure time dropped");
            continue;
        };
        let Some(line_string) = text(record, TimetableInformation::TransportLine) else {
            log::debug!("record without transport line dropped");
            continue;
        };

        let mut fields = DepartureFields::new(
            line_string,
            text(record, TimetableInformation::Target).unwrap_or_default(),
            departure,
            vehicle_type(record, default_vehicle_type),
        );
        fields.operator = text(record, TimetableInformation::Operator);
        fields.platform = text(record, TimetableInformation::Platform);
        fields.delay_minutes = record
            .get(&TimetableInformation::Delay)
            .and_then(|value| value.as_int())
            .map(|delay| delay as i32)
            .unwrap_or(-1);
        fields.delay_reason = text(record, TimetableInformation::DelayReason);
        fields.journey_news = journey_news(record);
        fields.status = text(record, TimetableInformation::Status);
        fields.line_services = LineServices {
            night_line: record
                .get(&TimetableInformation::IsNightLine)
                .and_then(|value| value.as_bool())
                .unwrap_or(false),
            express_line: false,
        };
        fields.route_stops = record
            .get(&TimetableInformation::RouteStops)
            .and_then(|value| value.as_string_list())
            .unwrap_or_default();
        fields.route_times = record
            .get(&TimetableInformation::RouteTimes)
            .and_then(|value| value.as_time_list())
            .unwrap_or_default();
        fields.route_exact_stops = record
            .get(&TimetableInformation::RouteExactStops)
            .and_then(|value| value.as_int())
            .and_then(|count| u32::try_from(count).ok())
            .unwrap_or(0);
        departures.push(Departure::new(fields));
    }
    departures
}

fn normalize_journeys(
    data: &[TimetableData],
    default_vehicle_type: VehicleType,
    global_info: &GlobalTimetableInfo,
    hints: ResultHints,
) -> Vec<Journey> {
    let mut guesser = DateGuesser::new(global_info, hints);
    let mut journeys = Vec::new();
    for record in data {
        let departure_datetime = record
            .get(&TimetableInformation::DepartureDateTime)
            .and_then(|value| value.as_date_time());
        let departure_date = record
            .get(&TimetableInformation::DepartureDate)
            .and_then(|value| value.as_date());
        let departure_time = record
            .get(&TimetableInformation::DepartureTime)
            .and_then(|value| value.as_time())
            .or_else(|| departure_datetime.map(|dt| dt.time()));
        let Some(departure) = guesser.resolve(departure_datetime, departure_date, departure_time)
        else {
            log::debug!("journey without departure time dropped");
            continue;
        };

        let arrival_datetime = record
            .get(&TimetableInformation::ArrivalDateTime)
            .and_then(|value| value.as_date_time());
        let arrival = match arrival_datetime {
            Some(datetime) => datetime,
            None => {
                let arrival_time = record
                    .get(&TimetableInformation::ArrivalTime)
                    .and_then(|value| value.as_time());
                let arrival_date = record
                    .get(&TimetableInformation::ArrivalDate)
                    .and_then(|value| value.as_date())
                    .unwrap_or_else(|| departure.date_naive());
                let Some(time) = arrival_time else {
                    log::debug!("journey without arrival time dropped");
                    continue;
                };
                // Arrivals before the departure roll over to the next day.
                let mut candidate = match Local
                    .from_local_datetime(&arrival_date.and_time(time))
                    .single()
                {
                    Some(candidate) => candidate,
                    None => continue,
                };
                if candidate < departure {
                    candidate += Duration::days(1);
                }
                candidate
            }
        };

        let (Some(start_stop), Some(target_stop)) = (
            text(record, TimetableInformation::StartStopName),
            text(record, TimetableInformation::TargetStopName),
        ) else {
            log::debug!("journey without stop names dropped");
            continue;
        };

        let mut fields = JourneyFields::new(start_stop, target_stop, departure, arrival);
        fields.operator = text(record, TimetableInformation::Operator);
        fields.pricing = text(record, TimetableInformation::Pricing);
        fields.duration_min = record
            .get(&TimetableInformation::Duration)
            .and_then(|value| value.as_int())
            .map(|minutes| minutes as i32)
            .unwrap_or(-1);
        fields.changes = record
            .get(&TimetableInformation::Changes)
            .and_then(|value| value.as_int())
            .and_then(|changes| u32::try_from(changes).ok())
            .unwrap_or(0);
        fields.vehicle_types = record
            .get(&TimetableInformation::TypesOfVehicleInJourney)
            .and_then(|value| value.as_vehicle_type_list())
            .map(|types| types.into_iter().collect())
            .unwrap_or_default();
        if fields.vehicle_types.is_empty() {
            fields.vehicle_types.insert(vehicle_type(record, default_vehicle_type));
        }
        fields.journey_news = journey_news(record);
        fields.route_stops = record
            .get(&TimetableInformation::RouteStops)
            .and_then(|value| value.as_string_list())
            .unwrap_or_default();
        fields.route_transport_lines = record
            .get(&TimetableInformation::RouteTransportLines)
            .and_then(|value| value.as_string_list())
            .unwrap_or_default();
        fields.route_platforms_departure = record
            .get(&TimetableInformation::RoutePlatformsDeparture)
            .and_then(|value| value.as_string_list())
            .unwrap_or_default();
        fields.route_platforms_arrival = record
            .get(&TimetableInformation::RoutePlatformsArrival)
            .and_then(|value| value.as_string_list())
            .unwrap_or_default();
        fields.route_vehicle_types = record
            .get(&TimetableInformation::RouteTypesOfVehicles)
            .and_then(|value| value.as_vehicle_type_list())
            .unwrap_or_default();
        fields.route_times_departure = record
            .get(&TimetableInformation::RouteTimesDeparture)
            .and_then(|value| value.as_time_list())
            .unwrap_or_default();
        fields.route_times_arrival = record
            .get(&TimetableInformation::RouteTimesArrival)
            .and_then(|value| value.as_time_list())
            .unwrap_or_default();
        fields.route_delays_departure = record
            .get(&TimetableInformation::RouteTimesDepartureDelay)
            .and_then(|value| value.as_int_list())
            .map(|delays| delays.into_iter().map(|delay| delay as i32).collect())
            .unwrap_or_default();
        fields.route_delays_arrival = record
            .get(&TimetableInformation::RouteTimesArrivalDelay)
            .and_then(|value| value.as_int_list())
            .map(|delays| delays.into_iter().map(|delay| delay as i32).collect())
            .unwrap_or_default();
        fields.route_exact_stops = record
            .get(&TimetableInformation::RouteExactStops)
            .and_then(|value| value.as_int())
            .and_then(|count| u32::try_from(count).ok())
            .unwrap_or(0);
        journeys.push(Journey::new(fields));
    }
    journeys
}

fn normalize_stop_suggestions(data: &[TimetableData]) -> Vec<StopSuggestion> {
    let mut suggestions = Vec::new();
    for record in data {
        let Some(stop_name) = text(record, TimetableInformation::StopName) else {
            log::debug!("stop suggestion without name dropped");
            continue;
        };
        let mut suggestion = StopSuggestion::new(stop_name);
        suggestion.stop_id = text(record, TimetableInformation::StopId);
        suggestion.stop_weight = record
            .get(&TimetableInformation::StopWeight)
            .and_then(|value| value.as_int())
            .map(|weight| weight as i32);
        suggestion.stop_city = text(record, TimetableInformation::StopCity);
        suggestion.stop_country_code = text(record, TimetableInformation::StopCountryCode);
        suggestions.push(suggestion);
    }
    suggestions
}

lazy_static! {
    /// The last whitespace-delimited word, optionally preceded by a comma.
    static ref LAST_WORD: Regex = Regex::new(r",?\s+\S+$").unwrap();
}

fn first_word(s: &str) -> Option<&str> {
    match s.find(' ') {
        Some(pos) if pos > 0 => Some(&s[..pos]),
        _ => None,
    }
}

fn last_word(s: &str) -> Option<&str> {
    LAST_WORD.find(s).map(|m| m.as_str())
}

#[derive(Default)]
struct AffixScan {
    first_counts: HashMap<String, u32>,
    last_counts: HashMap<String, u32>,
    elected_first: Option<String>,
    elected_last: Option<String>,
}

impl AffixScan {
    fn done(&self) -> bool {
        self.elected_first.is_some() || self.elected_last.is_some()
    }

    /// Counts the first and last word of one stop name. On a count crossing
    /// the high threshold the word is elected; the last word wins when both
    /// cross at once.
    fn count(&mut self, name: &str) {
        let mut crossed_first = None;
        if let Some(word) = first_word(name) {
            let count = self.first_counts.entry(word.to_owned()).or_insert(0);
            *count += 1;
            if *count >= AFFIX_HIGH_THRESHOLD {
                crossed_first = Some(word.to_owned());
            }
        }
        if let Some(word) = last_word(name) {
            let count = self.last_counts.entry(word.to_owned()).or_insert(0);
            *count += 1;
            if *count >= AFFIX_HIGH_THRESHOLD {
                self.elected_last = Some(word.to_owned());
                return;
            }
        }
        if crossed_first.is_some() {
            self.elected_first = crossed_first;
        }
    }

    /// After the pass: elect the most frequent word if it occurs at least
    /// the low threshold often, preferring the last word over the first.
    fn finish(mut self) -> (Option<String>, Option<String>) {
        if self.done() {
            return (self.elected_first, self.elected_last);
        }
        let best_first = self
            .first_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(word, count)| (word.clone(), *count));
        let best_last = self
            .last_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(word, count)| (word.clone(), *count));
        match (best_first, best_last) {
            (_, Some((word, count)))
                if count >= AFFIX_LOW_THRESHOLD
                    && count
                        >= self
                            .first_counts
                            .values()
                            .max()
                            .copied()
                            .unwrap_or(0) =>
            {
                self.elected_last = Some(word)
            }
            (Some((word, count)), _) if count >= AFFIX_LOW_THRESHOLD => {
                self.elected_first = Some(word)
            }
            _ => {}
        }
        (self.elected_first, self.elected_last)
    }
}

fn strip_first(name: &str, word: &str) -> Option<String> {
    let rest = name.strip_prefix(word)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest).to_owned())
}

fn strip_last(name: &str, word: &str) -> Option<String> {
    name.strip_suffix(word).map(|rest| rest.to_owned())
}

/// Finds the word most stop names start or end with (most likely the city
/// name) and strips it into the shortened stop fields, leaving the original
/// names untouched.
fn remove_city_affixes(departures: &mut [Departure]) {
    let mut scan = AffixScan::default();
    for departure in departures.iter() {
        if scan.done() {
            break;
        }
        scan.count(departure.target());
        for stop in departure.route_stops() {
            if scan.done() {
                break;
            }
            scan.count(stop);
        }
    }
    let (elected_first, elected_last) = scan.finish();

    let strip: Box<dyn Fn(&str) -> Option<String>> = if let Some(word) = elected_last {
        Box::new(move |name| strip_last(name, &word))
    } else if let Some(word) = elected_first {
        Box::new(move |name| strip_first(name, &word))
    } else {
        return;
    };

    for departure in departures.iter_mut() {
        let target_shortened = strip(departure.target());
        let route_stops_shortened = departure
            .route_stops()
            .iter()
            .map(|stop| strip(stop).unwrap_or_else(|| stop.clone()))
            .collect();
        departure.set_shortened_stops(target_shortened, route_stops_shortened);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::info::InfoValue as V;

    fn info(entries: Vec<(TimetableInformation, V)>) -> TimetableData {
        entries.into_iter().collect()
    }

    fn global_info() -> GlobalTimetableInfo {
        GlobalTimetableInfo::new(Local::now().date_naive())
    }

    fn departure_record(time: &str, line: &str, target: &str) -> TimetableData {
        info(vec![
            (
                TimetableInformation::DepartureTime,
                V::Time(utility::datetime::match_time(time, "hh:mm").unwrap()),
            ),
            (TimetableInformation::TransportLine, V::Str(line.to_owned())),
            (TimetableInformation::Target, V::Str(target.to_owned())),
            (
                TimetableInformation::TypeOfVehicle,
                V::Str("Bus".to_owned()),
            ),
        ])
    }

    fn normalize_departure_records(data: &[TimetableData]) -> Vec<Departure> {
        match normalize(
            data,
            ParseMode::Departures,
            VehicleType::Unknown,
            &global_info(),
            ResultFeatures::default(),
            ResultHints::default(),
        ) {
            NormalizedRecords::Departures(departures) => departures,
            other => panic!("expected departures, got {:?}", other),
        }
    }

    #[test]
    fn times_get_todays_date() {
        let departures =
            normalize_departure_records(&[departure_record("08:05", "S1", "North")]);
        assert_eq!(departures.len(), 1);
        assert_eq!(
            departures[0].departure().date_naive(),
            Local::now().date_naive()
        );
        assert_eq!(departures[0].line_number(), 1);
    }

    #[test]
    fn midnight_crossing_moves_to_the_next_day() {
        let departures = normalize_departure_records(&[
            departure_record("23:50", "1", "A"),
            departure_record("23:58", "2", "B"),
            departure_record("00:05", "3", "C"),
        ]);
        assert_eq!(departures.len(), 3);
        assert_eq!(
            departures[1].departure().date_naive(),
            departures[0].departure().date_naive()
        );
        assert_eq!(
            departures[2].departure().date_naive(),
            departures[0].departure().date_naive() + Duration::days(1)
        );
    }

    #[test]
    fn explicit_dates_are_kept() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let record = info(vec![
            (TimetableInformation::DepartureDate, V::Date(date)),
            (
                TimetableInformation::DepartureTime,
                V::Time(NaiveTime::from_hms_opt(8, 5, 0).unwrap()),
            ),
            (TimetableInformation::TransportLine, V::Str("S1".to_owned())),
            (TimetableInformation::Target, V::Str("North".to_owned())),
        ]);
        let departures = normalize_departure_records(&[record]);
        assert_eq!(departures[0].departure().date_naive(), date);
    }

    #[test]
    fn dates_need_adjustment_shifts_to_the_request_date() {
        let request_date = Local::now().date_naive() + Duration::days(3);
        let records = [departure_record("08:05", "S1", "North")];
        let hints = ResultHints {
            dates_need_adjustment: true,
            ..Default::default()
        };
        let result = normalize(
            &records,
            ParseMode::Departures,
            VehicleType::Unknown,
            &GlobalTimetableInfo::new(request_date),
            ResultFeatures::default(),
            hints,
        );
        match result {
            NormalizedRecords::Departures(departures) => {
                assert_eq!(departures[0].departure().date_naive(), request_date);
            }
            other => panic!("expected departures, got {:?}", other),
        }
    }

    #[test]
    fn missing_vehicle_type_uses_the_provider_default() {
        let record = info(vec![
            (
                TimetableInformation::DepartureTime,
                V::Time(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
            ),
            (TimetableInformation::TransportLine, V::Str("42".to_owned())),
            (TimetableInformation::Target, V::Str("X".to_owned())),
        ]);
        let result = normalize(
            &[record],
            ParseMode::Departures,
            VehicleType::Tram,
            &global_info(),
            ResultFeatures::default(),
            ResultHints::default(),
        );
        match result {
            NormalizedRecords::Departures(departures) => {
                assert_eq!(departures[0].vehicle_type(), VehicleType::Tram);
            }
            other => panic!("expected departures, got {:?}", other),
        }
    }

    #[test]
    fn records_without_transport_line_are_rejected() {
        let record = info(vec![(
            TimetableInformation::DepartureTime,
            V::Time(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
        )]);
        assert!(normalize_departure_records(&[record]).is_empty());
    }

    #[test]
    fn city_prefix_is_stripped_above_the_high_threshold() {
        let records: Vec<TimetableData> = (0..40)
            .map(|i| departure_record("08:05", "S1", &format!("Berlin Stop{}", i)))
            .collect();
        let departures = normalize_departure_records(&records);
        assert_eq!(departures.len(), 40);
        for (i, departure) in departures.iter().enumerate() {
            assert_eq!(departure.target(), format!("Berlin Stop{}", i));
            assert_eq!(
                departure.target_shortened(),
                Some(format!("Stop{}", i).as_str())
            );
        }
    }

    #[test]
    fn no_stripping_below_the_low_threshold() {
        let records: Vec<TimetableData> = (0..8)
            .map(|i| departure_record("08:05", "S1", &format!("Berlin Stop{}", i)))
            .collect();
        let departures = normalize_departure_records(&records);
        for departure in &departures {
            assert_eq!(departure.target_shortened(), None);
        }
    }

    #[test]
    fn city_suffix_wins_over_prefix() {
        // every name both starts with "Alt" and ends with ", Berlin"
        let records: Vec<TimetableData> = (0..12)
            .map(|i| departure_record("08:05", "S1", &format!("Alt Gate{}, Berlin", i)))
            .collect();
        let departures = normalize_departure_records(&records);
        assert_eq!(departures[0].target_shortened(), Some("Alt Gate0"));
    }

    #[test]
    fn journeys_are_normalized() {
        let record = info(vec![
            (
                TimetableInformation::DepartureDateTime,
                V::DateTime(Local.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()),
            ),
            (
                TimetableInformation::ArrivalDateTime,
                V::DateTime(Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()),
            ),
            (
                TimetableInformation::StartStopName,
                V::Str("Kiel".to_owned()),
            ),
            (
                TimetableInformation::TargetStopName,
                V::Str("Lübeck".to_owned()),
            ),
            (TimetableInformation::Changes, V::Int(1)),
            (
                TimetableInformation::TypesOfVehicleInJourney,
                V::StrList(vec!["Bus".to_owned(), "RegionalTrain".to_owned()]),
            ),
        ]);
        let result = normalize(
            &[record],
            ParseMode::Journeys,
            VehicleType::Unknown,
            &global_info(),
            ResultFeatures::default(),
            ResultHints::default(),
        );
        match result {
            NormalizedRecords::Journeys(journeys) => {
                assert_eq!(journeys.len(), 1);
                assert_eq!(journeys[0].duration_min(), 90);
                assert_eq!(journeys[0].changes(), 1);
                assert_eq!(journeys[0].vehicle_types().len(), 2);
            }
            other => panic!("expected journeys, got {:?}", other),
        }
    }

    #[test]
    fn stop_suggestions_require_a_name() {
        let with_name = info(vec![
            (TimetableInformation::StopName, V::Str("Kiel Hbf".to_owned())),
            (TimetableInformation::StopWeight, V::Int(12)),
        ]);
        let without_name = info(vec![(TimetableInformation::StopId, V::Str("42".to_owned()))]);
        let result = normalize(
            &[with_name, without_name],
            ParseMode::StopSuggestions,
            VehicleType::Unknown,
            &global_info(),
            ResultFeatures::default(),
            ResultHints::default(),
        );
        match result {
            NormalizedRecords::StopSuggestions(suggestions) => {
                assert_eq!(suggestions.len(), 1);
                assert_eq!(suggestions[0].stop_name, "Kiel Hbf");
                assert_eq!(suggestions[0].stop_weight, Some(12));
            }
            other => panic!("expected stop suggestions, got {:?}", other),
        }
    }
}
