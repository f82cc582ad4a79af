use chrono::{Local, NaiveDate, NaiveTime, TimeZone};
use indexmap::IndexMap;
use model::info::InfoValue;
use rhai::{Dynamic, Map};

use crate::storage::StorageValue;

fn map_int(map: &Map, key: &str) -> Option<i64> {
    map.get(key).and_then(|value| value.as_int().ok())
}

/// Maps produced by `helper.matchTime()` / `helper.matchDate()` carry an
/// `error` flag instead of components when matching failed.
fn map_has_error(map: &Map) -> bool {
    map.get("error")
        .map(|value| value.as_bool().unwrap_or(true))
        .unwrap_or(false)
}

pub fn map_to_time(map: &Map) -> Option<NaiveTime> {
    if map_has_error(map) {
        return None;
    }
    let hour = map_int(map, "hour")? as u32;
    let minute = map_int(map, "minute")? as u32;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

pub fn map_to_date(map: &Map) -> Option<NaiveDate> {
    if map_has_error(map) {
        return None;
    }
    NaiveDate::from_ymd_opt(
        map_int(map, "year")? as i32,
        map_int(map, "month")? as u32,
        map_int(map, "day")? as u32,
    )
}

fn map_to_info_value(map: &Map) -> Option<InfoValue> {
    if map_has_error(map) {
        return None;
    }
    let has_date = map.contains_key("year");
    let has_time = map.contains_key("hour");
    match (has_date, has_time) {
        (true, true) => {
            let date = map_to_date(map)?;
            let time = map_to_time(map)?;
            Local
                .from_local_datetime(&date.and_time(time))
                .single()
                .map(InfoValue::DateTime)
        }
        (true, false) => map_to_date(map).map(InfoValue::Date),
        (false, true) => map_to_time(map).map(InfoValue::Time),
        (false, false) => None,
    }
}

pub fn time_to_map(time: NaiveTime) -> Map {
    use chrono::Timelike;
    let mut map = Map::new();
    map.insert("hour".into(), Dynamic::from(time.hour() as i64));
    map.insert("minute".into(), Dynamic::from(time.minute() as i64));
    map
}

pub fn date_to_map(date: NaiveDate) -> Map {
    use chrono::Datelike;
    let mut map = Map::new();
    map.insert("year".into(), Dynamic::from(date.year() as i64));
    map.insert("month".into(), Dynamic::from(date.month() as i64));
    map.insert("day".into(), Dynamic::from(date.day() as i64));
    map
}

pub fn error_map() -> Map {
    let mut map = Map::new();
    map.insert("error".into(), Dynamic::from(true));
    map
}

/// Converts a script value into the neutral record value form. Returns None
/// for unit values and types that carry no usable information.
pub fn dynamic_to_info_value(value: &Dynamic) -> Option<InfoValue> {
    if value.is_unit() {
        return None;
    }
    if value.is_bool() {
        return value.as_bool().ok().map(InfoValue::Bool);
    }
    if value.is_int() {
        return value.as_int().ok().map(InfoValue::Int);
    }
    if value.is_float() {
        return value.as_float().ok().map(InfoValue::Float);
    }
    if value.is_string() {
        return value.clone().into_string().ok().map(InfoValue::Str);
    }
    if value.is_array() {
        let array = value.clone().into_array().ok()?;
        if array.is_empty() {
            return Some(InfoValue::StrList(Vec::new()));
        }
        if array.iter().all(|item| item.is_int()) {
            return Some(InfoValue::IntList(
                array.iter().filter_map(|item| item.as_int().ok()).collect(),
            ));
        }
        if array.iter().all(|item| item.is_map()) {
            let times: Vec<NaiveTime> = array
                .iter()
                .filter_map(|item| item.read_lock::<Map>().and_then(|map| map_to_time(&map)))
                .collect();
            if times.len() == array.len() {
                return Some(InfoValue::TimeList(times));
            }
        }
        return Some(InfoValue::StrList(
            array
                .iter()
                .filter_map(|item| {
                    if item.is_string() {
                        item.clone().into_string().ok()
                    } else if item.is_int() || item.is_float() || item.is_bool() {
                        Some(item.to_string())
                    } else {
                        None
                    }
                })
                .collect(),
        ));
    }
    if value.is_map() {
        let map = value.read_lock::<Map>()?;
        return map_to_info_value(&map);
    }
    None
}

/// Converts a script value into a storable value. Maps become string-keyed
/// maps, arrays become lists.
pub fn dynamic_to_storage_value(value: &Dynamic) -> Option<StorageValue> {
    if value.is_bool() {
        return value.as_bool().ok().map(StorageValue::Bool);
    }
    if value.is_int() {
        return value.as_int().ok().map(StorageValue::Int);
    }
    if value.is_float() {
        return value.as_float().ok().map(StorageValue::Float);
    }
    if value.is_string() {
        return value.clone().into_string().ok().map(StorageValue::Str);
    }
    if value.is_blob() {
        return value.clone().into_blob().ok().map(StorageValue::Bytes);
    }
    if value.is_array() {
        let array = value.clone().into_array().ok()?;
        return Some(StorageValue::List(
            array.iter().filter_map(dynamic_to_storage_value).collect(),
        ));
    }
    if value.is_map() {
        let map = value.read_lock::<Map>()?;
        let mut out = IndexMap::new();
        for (key, item) in map.iter() {
            if let Some(converted) = dynamic_to_storage_value(item) {
                out.insert(key.to_string(), converted);
            }
        }
        return Some(StorageValue::Map(out));
    }
    None
}

/// Converts a neutral record value back into a script value, used for
/// `result.data()`.
pub fn info_value_to_dynamic(value: &InfoValue) -> Dynamic {
    match value {
        InfoValue::Bool(b) => Dynamic::from(*b),
        InfoValue::Int(i) => Dynamic::from(*i),
        InfoValue::Float(f) => Dynamic::from(*f),
        InfoValue::Str(s) => Dynamic::from(s.clone()),
        InfoValue::StrList(list) => Dynamic::from_array(
            list.iter().map(|s| Dynamic::from(s.clone())).collect(),
        ),
        InfoValue::IntList(list) => {
            Dynamic::from_array(list.iter().map(|i| Dynamic::from(*i)).collect())
        }
        InfoValue::Time(t) => Dynamic::from_map(time_to_map(*t)),
        InfoValue::Date(d) => Dynamic::from_map(date_to_map(*d)),
        InfoValue::DateTime(dt) => {
            let mut map = date_to_map(dt.date_naive());
            map.extend(time_to_map(dt.time()));
            Dynamic::from_map(map)
        }
        InfoValue::TimeList(list) => Dynamic::from_array(
            list.iter()
                .map(|t| Dynamic::from_map(time_to_map(*t)))
                .collect(),
        ),
    }
}

pub fn storage_value_to_dynamic(value: &StorageValue) -> Dynamic {
    match value {
        StorageValue::Bool(b) => Dynamic::from(*b),
        StorageValue::Int(i) => Dynamic::from(*i),
        StorageValue::Float(f) => Dynamic::from(*f),
        StorageValue::Str(s) => Dynamic::from(s.clone()),
        StorageValue::Bytes(bytes) => Dynamic::from_blob(bytes.clone()),
        StorageValue::List(list) => Dynamic::from_array(
            list.iter().map(storage_value_to_dynamic).collect(),
        ),
        StorageValue::Map(map) => {
            let mut out = Map::new();
            for (key, item) in map {
                out.insert(key.as_str().into(), storage_value_to_dynamic(item));
            }
            Dynamic::from_map(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_convert() {
        assert_eq!(
            dynamic_to_info_value(&Dynamic::from(5i64)),
            Some(InfoValue::Int(5))
        );
        assert_eq!(
            dynamic_to_info_value(&Dynamic::from("x".to_owned())),
            Some(InfoValue::Str("x".to_owned()))
        );
        assert_eq!(dynamic_to_info_value(&Dynamic::UNIT), None);
    }

    #[test]
    fn time_maps_convert() {
        let map = time_to_map(NaiveTime::from_hms_opt(8, 15, 0).unwrap());
        assert_eq!(
            dynamic_to_info_value(&Dynamic::from_map(map)),
            Some(InfoValue::Time(NaiveTime::from_hms_opt(8, 15, 0).unwrap()))
        );
        assert_eq!(dynamic_to_info_value(&Dynamic::from_map(error_map())), None);
    }

    #[test]
    fn arrays_convert_by_element_type() {
        let ints = Dynamic::from_array(vec![Dynamic::from(1i64), Dynamic::from(2i64)]);
        assert_eq!(
            dynamic_to_info_value(&ints),
            Some(InfoValue::IntList(vec![1, 2]))
        );
        let strings = Dynamic::from_array(vec![
            Dynamic::from("a".to_owned()),
            Dynamic::from("b".to_owned()),
        ]);
        assert_eq!(
            dynamic_to_info_value(&strings),
            Some(InfoValue::StrList(vec!["a".to_owned(), "b".to_owned()]))
        );
    }

    #[test]
    fn storage_values_round_trip() {
        let mut map = Map::new();
        map.insert("a".into(), Dynamic::from(1i64));
        map.insert("b".into(), Dynamic::from("two".to_owned()));
        let value = dynamic_to_storage_value(&Dynamic::from_map(map)).unwrap();
        let back = storage_value_to_dynamic(&value);
        assert_eq!(dynamic_to_storage_value(&back), Some(value));
    }
}
