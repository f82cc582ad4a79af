use chrono::{DateTime, Local, NaiveTime, TimeZone};
use indexmap::IndexMap;
use model::alarm::{AlarmSettings, AlarmType};
use model::filter::{FilterAction, FilterList, FilterSettings};
use model::SettingsError;
use serde::{Deserialize, Serialize};

use crate::processor::{FirstDepartureConfig, FirstDepartureConfigMode};
use crate::request::StopValue;

/// One configured stop: where to ask which provider, and how departures at
/// this stop are displayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopSettings {
    pub location: String,
    pub provider_id: String,
    pub city: Option<String>,
    pub stops: Vec<StopValue>,
    /// Minutes before departure at which alarms fire.
    pub alarm_time_min: i64,
    pub first_departure: FirstDepartureConfig,
}

/// The persisted settings contract: stop list, filters and alarms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub current_stop_settings_index: usize,
    pub stop_settings_list: Vec<StopSettings>,
    pub filter_settings_list: Vec<FilterSettings>,
    pub alarm_settings: Vec<AlarmSettings>,
}

#[derive(Debug)]
pub enum SettingsReadError {
    MissingKey(String),
    InvalidValue { key: String, message: String },
    Validation(SettingsError),
}

impl std::fmt::Display for SettingsReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsReadError::MissingKey(key) => write!(f, "missing settings key '{}'", key),
            SettingsReadError::InvalidValue { key, message } => {
                write!(f, "invalid value for '{}': {}", key, message)
            }
            SettingsReadError::Validation(why) => write!(f, "{}", why),
        }
    }
}

impl std::error::Error for SettingsReadError {}

impl From<SettingsError> for SettingsReadError {
    fn from(why: SettingsError) -> Self {
        SettingsReadError::Validation(why)
    }
}

/// Key naming of the persisted config: the first entry has no suffix, later
/// entries append `_<index>`.
fn indexed(base: &str, index: usize) -> String {
    if index == 0 {
        base.to_owned()
    } else {
        format!("{}_{}", base, index)
    }
}

fn join(values: impl IntoIterator<Item = String>) -> String {
    values.into_iter().collect::<Vec<_>>().join(",")
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    utility::datetime::match_time(value, "hh:mm")
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        for filter in &self.filter_settings_list {
            filter.validate()?;
        }
        for alarm in &self.alarm_settings {
            alarm.validate()?;
        }
        Ok(())
    }

    /// Flattens the settings into the persisted key value shape.
    pub fn to_config_map(&self) -> IndexMap<String, String> {
        let mut map = IndexMap::new();
        map.insert(
            "currentStopSettingsIndex".to_owned(),
            self.current_stop_settings_index.to_string(),
        );
        map.insert(
            "stopSettings".to_owned(),
            self.stop_settings_list.len().to_string(),
        );
        for (i, stop) in self.stop_settings_list.iter().enumerate() {
            map.insert(indexed("location", i), stop.location.clone());
            map.insert(indexed("serviceProvider", i), stop.provider_id.clone());
            map.insert(
                indexed("city", i),
                stop.city.clone().unwrap_or_default(),
            );
            map.insert(
                indexed("stop", i),
                join(stop.stops.iter().map(|s| s.name.clone())),
            );
            map.insert(
                indexed("stopID", i),
                join(stop.stops.iter().map(|s| s.id.clone().unwrap_or_default())),
            );
            map.insert(
                indexed("timeOffsetOfFirstDeparture", i),
                stop.first_departure.offset_min.to_string(),
            );
            map.insert(
                indexed("timeOfFirstDepartureCustom", i),
                stop.first_departure.custom_time.format("%H:%M").to_string(),
            );
            map.insert(
                indexed("firstDepartureConfigMode", i),
                match stop.first_departure.mode {
                    FirstDepartureConfigMode::RelativeToCurrentTime => "0".to_owned(),
                    FirstDepartureConfigMode::AtCustomTime => "1".to_owned(),
                },
            );
            map.insert(indexed("alarmTime", i), stop.alarm_time_min.to_string());
        }

        map.insert(
            "filterCount".to_owned(),
            self.filter_settings_list.len().to_string(),
        );
        for (i, filter) in self.filter_settings_list.iter().enumerate() {
            let group = format!("filterConfig_{}", i);
            map.insert(format!("{}/Name", group), filter.name.clone());
            let blob = filter.filters.to_bytes().unwrap_or_default();
            map.insert(format!("{}/Filters", group), base64::encode(blob));
            map.insert(
                format!("{}/FilterAction", group),
                match filter.action {
                    FilterAction::ShowMatching => "0".to_owned(),
                    FilterAction::HideMatching => "1".to_owned(),
                },
            );
            map.insert(
                format!("{}/AffectedStops", group),
                join(filter.affected_stops.iter().map(|s| s.to_string())),
            );
        }

        map.insert(
            "alarmCount".to_owned(),
            self.alarm_settings.len().to_string(),
        );
        for (i, alarm) in self.alarm_settings.iter().enumerate() {
            map.insert(indexed("alarmName", i), alarm.name.clone());
            map.insert(
                indexed("alarmType", i),
                match alarm.alarm_type {
                    AlarmType::RemoveAfterFirstMatch => "0".to_owned(),
                    AlarmType::Recurring => "1".to_owned(),
                },
            );
            map.insert(
                indexed("alarmStops", i),
                join(alarm.affected_stops.iter().map(|s| s.to_string())),
            );
            let blob = FilterList::new(vec![alarm.filter.clone()])
                .to_bytes()
                .unwrap_or_default();
            map.insert(indexed("alarmFilter", i), base64::encode(blob));
            map.insert(indexed("alarmEnabled", i), alarm.enabled.to_string());
            map.insert(
                indexed("alarmLastFired", i),
                alarm
                    .last_fired
                    .map(|t| t.timestamp().to_string())
                    .unwrap_or_default(),
            );
            map.insert(
                indexed("alarmAutogenerated", i),
                alarm.auto_generated.to_string(),
            );
        }
        map
    }

    /// Reads settings back from the persisted key value shape, validating
    /// names and filter blobs.
    pub fn from_config_map(map: &IndexMap<String, String>) -> Result<Self, SettingsReadError> {
        let get = |key: String| map.get(&key);
        let count = |key: &str| -> Result<usize, SettingsReadError> {
            match map.get(key) {
                Some(value) => value.parse().map_err(|_| SettingsReadError::InvalidValue {
                    key: key.to_owned(),
                    message: "not a number".to_owned(),
                }),
                None => Ok(0),
            }
        };

        let mut settings = Settings {
            current_stop_settings_index: count("currentStopSettingsIndex")?,
            ..Default::default()
        };

        let stop_count = count("stopSettings")?;
        for i in 0..stop_count {
            let names: Vec<String> = get(indexed("stop", i))
                .map(|value| value.split(',').map(|s| s.to_owned()).collect())
                .unwrap_or_default();
            let ids: Vec<String> = get(indexed("stopID", i))
                .map(|value| value.split(',').map(|s| s.to_owned()).collect())
                .unwrap_or_default();
            let stops = names
                .into_iter()
                .enumerate()
                .filter(|(_, name)| !name.is_empty())
                .map(|(index, name)| match ids.get(index) {
                    Some(id) if !id.is_empty() => StopValue::by_id(name, id.clone()),
                    _ => StopValue::by_name(name),
                })
                .collect();
            let mode = match get(indexed("firstDepartureConfigMode", i)).map(|s| s.as_str()) {
                Some("1") => FirstDepartureConfigMode::AtCustomTime,
                _ => FirstDepartureConfigMode::RelativeToCurrentTime,
            };
            let custom_time = get(indexed("timeOfFirstDepartureCustom", i))
                .and_then(|value| parse_time(value))
                .unwrap_or(NaiveTime::MIN);
            let offset_min = get(indexed("timeOffsetOfFirstDeparture", i))
                .and_then(|value| value.parse().ok())
                .unwrap_or(0);
            settings.stop_settings_list.push(StopSettings {
                location: get(indexed("location", i)).cloned().unwrap_or_default(),
                provider_id: get(indexed("serviceProvider", i))
                    .cloned()
                    .ok_or_else(|| SettingsReadError::MissingKey(indexed("serviceProvider", i)))?,
                city: get(indexed("city", i)).cloned().filter(|c| !c.is_empty()),
                stops,
                alarm_time_min: get(indexed("alarmTime", i))
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(5),
                first_departure: FirstDepartureConfig {
                    mode,
                    custom_time,
                    offset_min,
                },
            });
        }

        let filter_count = count("filterCount")?;
        for i in 0..filter_count {
            let group = format!("filterConfig_{}", i);
            let name = get(format!("{}/Name", group))
                .cloned()
                .ok_or_else(|| SettingsReadError::MissingKey(format!("{}/Name", group)))?;
            let blob_key = format!("{}/Filters", group);
            let filters = match get(blob_key.clone()) {
                Some(encoded) => {
                    let bytes =
                        base64::decode(encoded).map_err(|why| SettingsReadError::InvalidValue {
                            key: blob_key.clone(),
                            message: why.to_string(),
                        })?;
                    FilterList::from_bytes(&bytes).map_err(|why| {
                        SettingsReadError::InvalidValue {
                            key: blob_key.clone(),
                            message: why.to_string(),
                        }
                    })?
                }
                None => FilterList::default(),
            };
            let action = match get(format!("{}/FilterAction", group)).map(|s| s.as_str()) {
                Some("1") => FilterAction::HideMatching,
                _ => FilterAction::ShowMatching,
            };
            let affected_stops = get(format!("{}/AffectedStops", group))
                .map(|value| {
                    value
                        .split(',')
                        .filter_map(|part| part.parse().ok())
                        .collect()
                })
                .unwrap_or_default();
            let filter_settings = FilterSettings {
                name,
                action,
                filters,
                affected_stops,
            };
            filter_settings.validate()?;
            settings.filter_settings_list.push(filter_settings);
        }

        let alarm_count = count("alarmCount")?;
        for i in 0..alarm_count {
            let name = get(indexed("alarmName", i))
                .cloned()
                .ok_or_else(|| SettingsReadError::MissingKey(indexed("alarmName", i)))?;
            let filter_key = indexed("alarmFilter", i);
            let filter = match get(filter_key.clone()) {
                Some(encoded) => {
                    let bytes =
                        base64::decode(encoded).map_err(|why| SettingsReadError::InvalidValue {
                            key: filter_key.clone(),
                            message: why.to_string(),
                        })?;
                    FilterList::from_bytes(&bytes)
                        .map_err(|why| SettingsReadError::InvalidValue {
                            key: filter_key.clone(),
                            message: why.to_string(),
                        })?
                        .filters
                        .into_iter()
                        .next()
                        .unwrap_or_default()
                }
                None => Default::default(),
            };
            let last_fired: Option<DateTime<Local>> = get(indexed("alarmLastFired", i))
                .filter(|value| !value.is_empty())
                .and_then(|value| value.parse::<i64>().ok())
                .and_then(|epoch| Local.timestamp_opt(epoch, 0).single());
            let alarm = AlarmSettings {
                name,
                alarm_type: match get(indexed("alarmType", i)).map(|s| s.as_str()) {
                    Some("1") => AlarmType::Recurring,
                    _ => AlarmType::RemoveAfterFirstMatch,
                },
                enabled: get(indexed("alarmEnabled", i))
                    .map(|value| value == "true")
                    .unwrap_or(true),
                affected_stops: get(indexed("alarmStops", i))
                    .map(|value| {
                        value
                            .split(',')
                            .filter_map(|part| part.parse().ok())
                            .collect()
                    })
                    .unwrap_or_default(),
                filter,
                last_fired,
                auto_generated: get(indexed("alarmAutogenerated", i))
                    .map(|value| value == "true")
                    .unwrap_or(false),
            };
            alarm.validate()?;
            settings.alarm_settings.push(alarm);
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::filter::{Constraint, ConstraintType, ConstraintValue, ConstraintVariant, Filter};

    fn sample_settings() -> Settings {
        Settings {
            current_stop_settings_index: 1,
            stop_settings_list: vec![
                StopSettings {
                    location: "de".to_owned(),
                    provider_id: "de_sh".to_owned(),
                    city: Some("Kiel".to_owned()),
                    stops: vec![StopValue::by_id("Kiel Hbf", "8000199")],
                    alarm_time_min: 5,
                    first_departure: FirstDepartureConfig::default(),
                },
                StopSettings {
                    location: "de".to_owned(),
                    provider_id: "de_db".to_owned(),
                    city: None,
                    stops: vec![StopValue::by_name("Raisdorf")],
                    alarm_time_min: 10,
                    first_departure: FirstDepartureConfig {
                        mode: FirstDepartureConfigMode::AtCustomTime,
                        custom_time: NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
                        offset_min: 3,
                    },
                },
            ],
            filter_settings_list: vec![FilterSettings {
                name: "no night buses".to_owned(),
                action: FilterAction::HideMatching,
                filters: FilterList::new(vec![Filter::new(vec![Constraint {
                    kind: ConstraintType::ByTransportLine,
                    variant: ConstraintVariant::MatchesRegExp,
                    value: ConstraintValue::Str("^N".to_owned()),
                }])]),
                affected_stops: [0usize].into_iter().collect(),
            }],
            alarm_settings: vec![AlarmSettings {
                name: "work alarm".to_owned(),
                alarm_type: AlarmType::Recurring,
                enabled: true,
                affected_stops: [1usize].into_iter().collect(),
                filter: Filter::new(vec![Constraint {
                    kind: ConstraintType::ByTarget,
                    variant: ConstraintVariant::Equals,
                    value: ConstraintValue::Str("Hamburg".to_owned()),
                }]),
                last_fired: None,
                auto_generated: false,
            }],
        }
    }

    #[test]
    fn config_map_round_trips() {
        let settings = sample_settings();
        let map = settings.to_config_map();
        assert_eq!(map.get("stopSettings").unwrap(), "2");
        assert_eq!(map.get("filterCount").unwrap(), "1");
        assert_eq!(map.get("serviceProvider").unwrap(), "de_sh");
        assert_eq!(map.get("serviceProvider_1").unwrap(), "de_db");
        let restored = Settings::from_config_map(&map).unwrap();
        assert_eq!(restored, settings);
        // filter settings identity is by name, so compare the contents too
        assert_eq!(
            restored.filter_settings_list[0].filters,
            settings.filter_settings_list[0].filters
        );
        assert_eq!(
            restored.alarm_settings[0].filter,
            settings.alarm_settings[0].filter
        );
    }

    #[test]
    fn invalid_filter_names_are_rejected() {
        let mut settings = sample_settings();
        settings.filter_settings_list[0].name = "bad*name".to_owned();
        let map = settings.to_config_map();
        assert!(matches!(
            Settings::from_config_map(&map),
            Err(SettingsReadError::Validation(_))
        ));
    }

    #[test]
    fn corrupt_filter_blob_is_rejected() {
        let settings = sample_settings();
        let mut map = settings.to_config_map();
        map.insert("filterConfig_0/Filters".to_owned(), "notbase64!!".to_owned());
        assert!(matches!(
            Settings::from_config_map(&map),
            Err(SettingsReadError::InvalidValue { .. })
        ));
    }
}
