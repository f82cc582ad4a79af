use std::collections::BTreeSet;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::{
    filter::{Filter, Filterable},
    validate_settings_name, SettingsError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlarmType {
    /// The alarm is removed after it fired once.
    #[default]
    RemoveAfterFirstMatch,
    Recurring,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmSettings {
    pub name: String,
    #[serde(rename = "type")]
    pub alarm_type: AlarmType,
    pub enabled: bool,
    /// Indices into the stop settings list this alarm applies to.
    pub affected_stops: BTreeSet<usize>,
    pub filter: Filter,
    pub last_fired: Option<DateTime<Local>>,
    pub auto_generated: bool,
}

impl AlarmSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        validate_settings_name(&self.name)?;
        for constraint in &self.filter.constraints {
            constraint.validate()?;
        }
        Ok(())
    }

    fn applies_to_stop(&self, stop_index: usize) -> bool {
        self.affected_stops.is_empty() || self.affected_stops.contains(&stop_index)
    }
}

/// Indices of all enabled alarms whose filter matches the record.
pub fn matched_alarm_indices<R: Filterable>(
    alarms: &[AlarmSettings],
    record: &R,
    stop_index: usize,
) -> Vec<usize> {
    alarms
        .iter()
        .enumerate()
        .filter(|(_, alarm)| {
            alarm.enabled
                && alarm.applies_to_stop(stop_index)
                && alarm.filter.match_record(record)
        })
        .map(|(index, _)| index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        departure::{Departure, DepartureFields},
        filter::{Constraint, ConstraintType, ConstraintValue, ConstraintVariant},
        vehicle::VehicleType,
    };
    use chrono::TimeZone;

    fn alarm_for_line(name: &str, line: &str, enabled: bool) -> AlarmSettings {
        AlarmSettings {
            name: name.to_owned(),
            alarm_type: AlarmType::Recurring,
            enabled,
            affected_stops: BTreeSet::new(),
            filter: Filter::new(vec![Constraint {
                kind: ConstraintType::ByTransportLine,
                variant: ConstraintVariant::Equals,
                value: ConstraintValue::Str(line.to_owned()),
            }]),
            last_fired: None,
            auto_generated: false,
        }
    }

    #[test]
    fn only_enabled_matching_alarms_attach() {
        let departure = Departure::new(DepartureFields::new(
            "S1",
            "Kiel",
            Local.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            VehicleType::TrainInterurban,
        ));
        let alarms = vec![
            alarm_for_line("disabled", "S1", false),
            alarm_for_line("matching", "S1", true),
            alarm_for_line("other line", "S2", true),
        ];
        assert_eq!(matched_alarm_indices(&alarms, &departure, 0), vec![1]);
    }

    #[test]
    fn affected_stops_limit_alarm_scope() {
        let departure = Departure::new(DepartureFields::new(
            "S1",
            "Kiel",
            Local.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            VehicleType::TrainInterurban,
        ));
        let mut alarm = alarm_for_line("stop 2 only", "S1", true);
        alarm.affected_stops.insert(2);
        let alarms = vec![alarm];
        assert!(matched_alarm_indices(&alarms, &departure, 0).is_empty());
        assert_eq!(matched_alarm_indices(&alarms, &departure, 2), vec![0]);
    }

    #[test]
    fn alarm_names_are_validated() {
        let alarm = alarm_for_line("with*star", "S1", true);
        assert!(alarm.validate().is_err());
    }
}
