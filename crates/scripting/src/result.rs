use std::sync::Mutex;

use model::info::{InfoValue, TimetableData, TimetableInformation};
use model::vehicle::VehicleType;
use serde::Serialize;

use crate::convert::dynamic_to_info_value;
use crate::{JobEvent, JobEventSender};

/// Buffered records are published automatically once this many have
/// accumulated, when the auto-publish feature is on.
const AUTO_PUBLISH_THRESHOLD: usize = 10;

pub const FEATURE_AUTO_PUBLISH: i64 = 1;
pub const FEATURE_AUTO_DECODE_HTML_ENTITIES: i64 = 2;
pub const FEATURE_AUTO_REMOVE_CITY_FROM_STOP_NAMES: i64 = 4;

pub const HINT_DATES_NEED_ADJUSTMENT: i64 = 1;
pub const HINT_NO_DELAYS_FOR_STOP: i64 = 2;
pub const HINT_CITY_NAMES_ARE_LEFT: i64 = 4;
pub const HINT_CITY_NAMES_ARE_RIGHT: i64 = 8;

/// Automation knobs a script can toggle on its result sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultFeatures {
    pub auto_publish: bool,
    pub auto_decode_html_entities: bool,
    pub auto_remove_city_from_stop_names: bool,
}

impl Default for ResultFeatures {
    fn default() -> Self {
        Self {
            auto_publish: true,
            auto_decode_html_entities: true,
            auto_remove_city_from_stop_names: true,
        }
    }
}

impl ResultFeatures {
    pub fn flags(&self) -> i64 {
        let mut flags = 0;
        if self.auto_publish {
            flags |= FEATURE_AUTO_PUBLISH;
        }
        if self.auto_decode_html_entities {
            flags |= FEATURE_AUTO_DECODE_HTML_ENTITIES;
        }
        if self.auto_remove_city_from_stop_names {
            flags |= FEATURE_AUTO_REMOVE_CITY_FROM_STOP_NAMES;
        }
        flags
    }
}

/// Content metadata a script can pass to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultHints {
    pub dates_need_adjustment: bool,
    pub no_delays_for_stop: bool,
    pub city_names_are_left: bool,
    pub city_names_are_right: bool,
}

impl ResultHints {
    pub fn flags(&self) -> i64 {
        let mut flags = 0;
        if self.dates_need_adjustment {
            flags |= HINT_DATES_NEED_ADJUSTMENT;
        }
        if self.no_delays_for_stop {
            flags |= HINT_NO_DELAYS_FOR_STOP;
        }
        if self.city_names_are_left {
            flags |= HINT_CITY_NAMES_ARE_LEFT;
        }
        if self.city_names_are_right {
            flags |= HINT_CITY_NAMES_ARE_RIGHT;
        }
        flags
    }
}

#[derive(Debug, Default)]
struct ResultInner {
    data: Vec<TimetableData>,
    features: ResultFeatures,
    hints: ResultHints,
    auto_published: bool,
}

/// The collector injected into a provider script as `result`. One mutex
/// protects the buffer, features and hints.
pub struct ResultObject {
    events: JobEventSender,
    inner: Mutex<ResultInner>,
}

impl ResultObject {
    pub fn new(events: JobEventSender) -> Self {
        Self {
            events,
            inner: Mutex::new(ResultInner::default()),
        }
    }

    fn invalid_data(&self, message: String) {
        log::warn!("invalid data from script: {}", message);
        self.events.send(JobEvent::InvalidData { message });
    }

    /// Appends one record to the buffer. Keys are matched case-insensitively
    /// against [`TimetableInformation`]; unknown keys are reported and
    /// dropped.
    pub fn add_data(&self, map: &rhai::Map) {
        let mut inner = self.inner.lock().unwrap();
        let features = inner.features;
        let mut record = TimetableData::new();
        for (key, value) in map.iter() {
            let Some(info) = TimetableInformation::from_key(key.as_str()) else {
                self.invalid_data(format!("unknown timetable information '{}'", key));
                continue;
            };
            let Some(mut converted) = dynamic_to_info_value(value) else {
                self.invalid_data(format!("unusable value for '{}'", info));
                continue;
            };
            if info == TimetableInformation::TypeOfVehicle {
                if let InfoValue::Str(name) = &converted {
                    if VehicleType::from_name(name).is_none() {
                        self.invalid_data(format!("unknown vehicle type '{}'", name));
                        continue;
                    }
                }
            }
            if features.auto_decode_html_entities {
                converted = decode_entities(info, converted);
            }
            record.insert(info, converted);
        }
        inner.data.push(record);
        if features.auto_publish
            && !inner.auto_published
            && inner.data.len() == AUTO_PUBLISH_THRESHOLD
        {
            inner.auto_published = true;
            self.events.send(JobEvent::Publish {
                records: inner.data.clone(),
            });
        }
    }

    /// Asks the job to flush the buffered records to subscribers. The
    /// records accumulated so far are captured with the event.
    pub fn publish(&self) {
        let records = self.inner.lock().unwrap().data.clone();
        self.events.send(JobEvent::Publish { records });
    }

    pub fn enable_feature(&self, flag: i64, enable: bool) {
        let mut inner = self.inner.lock().unwrap();
        match flag {
            FEATURE_AUTO_PUBLISH => inner.features.auto_publish = enable,
            FEATURE_AUTO_DECODE_HTML_ENTITIES => {
                inner.features.auto_decode_html_entities = enable
            }
            FEATURE_AUTO_REMOVE_CITY_FROM_STOP_NAMES => {
                inner.features.auto_remove_city_from_stop_names = enable
            }
            other => log::warn!("unknown feature flag {}", other),
        }
    }

    pub fn is_feature_enabled(&self, flag: i64) -> bool {
        let features = self.features();
        match flag {
            FEATURE_AUTO_PUBLISH => features.auto_publish,
            FEATURE_AUTO_DECODE_HTML_ENTITIES => features.auto_decode_html_entities,
            FEATURE_AUTO_REMOVE_CITY_FROM_STOP_NAMES => {
                features.auto_remove_city_from_stop_names
            }
            _ => false,
        }
    }

    pub fn give_hint(&self, flag: i64, give: bool) {
        let mut inner = self.inner.lock().unwrap();
        match flag {
            HINT_DATES_NEED_ADJUSTMENT => inner.hints.dates_need_adjustment = give,
            HINT_NO_DELAYS_FOR_STOP => inner.hints.no_delays_for_stop = give,
            // The city name side hints exclude each other.
            HINT_CITY_NAMES_ARE_LEFT => {
                inner.hints.city_names_are_left = give;
                if give {
                    inner.hints.city_names_are_right = false;
                }
            }
            HINT_CITY_NAMES_ARE_RIGHT => {
                inner.hints.city_names_are_right = give;
                if give {
                    inner.hints.city_names_are_left = false;
                }
            }
            other => log::warn!("unknown hint flag {}", other),
        }
    }

    pub fn is_hint_given(&self, flag: i64) -> bool {
        let hints = self.hints();
        match flag {
            HINT_DATES_NEED_ADJUSTMENT => hints.dates_need_adjustment,
            HINT_NO_DELAYS_FOR_STOP => hints.no_delays_for_stop,
            HINT_CITY_NAMES_ARE_LEFT => hints.city_names_are_left,
            HINT_CITY_NAMES_ARE_RIGHT => hints.city_names_are_right,
            _ => false,
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().data.len()
    }

    pub fn data_snapshot(&self) -> Vec<TimetableData> {
        self.inner.lock().unwrap().data.clone()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.data.clear();
        inner.auto_published = false;
    }

    pub fn features(&self) -> ResultFeatures {
        self.inner.lock().unwrap().features
    }

    pub fn hints(&self) -> ResultHints {
        self.inner.lock().unwrap().hints
    }
}

fn decode_entities(info: TimetableInformation, value: InfoValue) -> InfoValue {
    if info.is_decodable_string() {
        if let InfoValue::Str(s) = &value {
            return InfoValue::Str(utility::text::trim(&utility::html::decode_html_entities(s)));
        }
    }
    if info.is_decodable_string_list() {
        if let InfoValue::StrList(list) = &value {
            return InfoValue::StrList(
                list.iter()
                    .map(|s| utility::text::trim(&utility::html::decode_html_entities(s)))
                    .collect(),
            );
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::Dynamic;

    fn result_with_events() -> (ResultObject, std::sync::mpsc::Receiver<JobEvent>) {
        let (events, receiver) = crate::JobEventSender::channel();
        (ResultObject::new(events), receiver)
    }

    fn record(entries: &[(&str, Dynamic)]) -> rhai::Map {
        let mut map = rhai::Map::new();
        for (key, value) in entries {
            map.insert((*key).into(), value.clone());
        }
        map
    }

    #[test]
    fn keys_match_case_insensitively() {
        let (result, _events) = result_with_events();
        result.add_data(&record(&[
            ("target", Dynamic::from("Kiel".to_owned())),
            ("TRANSPORTLINE", Dynamic::from("S1".to_owned())),
        ]));
        let data = result.data_snapshot();
        assert_eq!(data.len(), 1);
        assert!(data[0].contains_key(&TimetableInformation::Target));
        assert!(data[0].contains_key(&TimetableInformation::TransportLine));
    }

    #[test]
    fn unknown_keys_are_dropped_with_an_event() {
        let (result, events) = result_with_events();
        result.add_data(&record(&[("bogus", Dynamic::from(1i64))]));
        assert!(result.data_snapshot()[0].is_empty());
        assert!(matches!(
            events.try_recv(),
            Ok(JobEvent::InvalidData { .. })
        ));
    }

    #[test]
    fn unresolvable_vehicle_type_is_reported() {
        let (result, events) = result_with_events();
        result.add_data(&record(&[(
            "TypeOfVehicle",
            Dynamic::from("Hovercraft".to_owned()),
        )]));
        assert!(result.data_snapshot()[0].is_empty());
        assert!(matches!(
            events.try_recv(),
            Ok(JobEvent::InvalidData { .. })
        ));
    }

    #[test]
    fn string_fields_are_trimmed_and_decoded() {
        let (result, _events) = result_with_events();
        result.add_data(&record(&[(
            "Target",
            Dynamic::from("&nbsp;K&ouml;ln ".to_owned()),
        )]));
        let data = result.data_snapshot();
        assert_eq!(
            data[0].get(&TimetableInformation::Target),
            Some(&InfoValue::Str("Köln".to_owned()))
        );
    }

    #[test]
    fn auto_publish_fires_once_at_threshold() {
        let (result, events) = result_with_events();
        for i in 0..25 {
            result.add_data(&record(&[("Target", Dynamic::from(format!("stop {}", i)))]));
        }
        let publishes: Vec<_> = events
            .try_iter()
            .filter_map(|event| match event {
                JobEvent::Publish { records } => Some(records.len()),
                _ => None,
            })
            .collect();
        assert_eq!(publishes, vec![10]);
    }

    #[test]
    fn city_name_side_hints_are_exclusive() {
        let (result, _events) = result_with_events();
        result.give_hint(HINT_CITY_NAMES_ARE_LEFT, true);
        assert!(result.is_hint_given(HINT_CITY_NAMES_ARE_LEFT));
        result.give_hint(HINT_CITY_NAMES_ARE_RIGHT, true);
        assert!(result.is_hint_given(HINT_CITY_NAMES_ARE_RIGHT));
        assert!(!result.is_hint_given(HINT_CITY_NAMES_ARE_LEFT));
    }

    #[test]
    fn features_can_be_toggled() {
        let (result, _events) = result_with_events();
        assert!(result.is_feature_enabled(FEATURE_AUTO_DECODE_HTML_ENTITIES));
        result.enable_feature(FEATURE_AUTO_DECODE_HTML_ENTITIES, false);
        assert!(!result.is_feature_enabled(FEATURE_AUTO_DECODE_HTML_ENTITIES));
        result.add_data(&record(&[(
            "Target",
            Dynamic::from("&ouml;".to_owned()),
        )]));
        assert_eq!(
            result.data_snapshot()[0].get(&TimetableInformation::Target),
            Some(&InfoValue::Str("&ouml;".to_owned()))
        );
    }
}
