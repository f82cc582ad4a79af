use rhai::{Array, Dynamic, Map};
use utility::html::{
    AmbiguousNameResolution, FindTagOptions, FoundTag, NamePosition,
};

use crate::logfile::ProviderLog;

/// The `helper` global of a provider script: pure text and date utilities
/// plus the provider log sink.
#[derive(Clone)]
pub struct HelperHandle {
    log: ProviderLog,
}

impl HelperHandle {
    pub fn new(log: ProviderLog) -> Self {
        Self { log }
    }

    /// Called by scripts when they hit text they cannot parse.
    pub fn error(&self, message: &str, failing_text: &str) {
        log::warn!("script error: {} ({:?})", message, failing_text);
        self.log.append(message, failing_text);
    }
}

fn map_str(map: &Map, key: &str) -> Option<String> {
    map.get(key)
        .filter(|value| value.is_string())
        .and_then(|value| value.clone().into_string().ok())
}

fn map_bool(map: &Map, key: &str) -> bool {
    map.get(key)
        .and_then(|value| value.as_bool().ok())
        .unwrap_or(false)
}

fn map_usize(map: &Map, key: &str) -> Option<usize> {
    map.get(key)
        .and_then(|value| value.as_int().ok())
        .and_then(|value| usize::try_from(value).ok())
}

/// Reads tag search options out of the options map a script passed.
pub fn options_from_map(options: &Map) -> FindTagOptions {
    let mut result = FindTagOptions::default();
    if let Some(attributes) = options.get("attributes").and_then(|v| v.read_lock::<Map>()) {
        for (name, value) in attributes.iter() {
            if let Ok(pattern) = value.clone().into_string() {
                result.attributes.push((name.to_string(), pattern));
            }
        }
    }
    result.max_count = map_usize(options, "maxCount").unwrap_or(0);
    result.no_content = map_bool(options, "noContent");
    result.no_nesting = map_bool(options, "noNesting");
    result.contents_regexp = map_str(options, "contentsRegExp");
    result.position = map_usize(options, "position").unwrap_or(0);
    if let Some(name_position) = options.get("namePosition").and_then(|v| v.read_lock::<Map>()) {
        let regexp = map_str(&name_position, "regexp");
        match map_str(&name_position, "type").as_deref() {
            Some("contents") => {
                result.name_position = Some(NamePosition::Contents { regexp });
            }
            Some("attribute") => {
                if let Some(name) = map_str(&name_position, "name") {
                    result.name_position = Some(NamePosition::Attribute { name, regexp });
                }
            }
            _ => {}
        }
    }
    if let Some(resolution) = map_str(options, "ambiguousNameResolution") {
        result.ambiguous_name_resolution = if resolution.eq_ignore_ascii_case("addnumber") {
            AmbiguousNameResolution::AddNumber
        } else {
            AmbiguousNameResolution::Replace
        };
    }
    result
}

pub fn found_tag_to_map(tag: &FoundTag) -> Map {
    let mut map = Map::new();
    map.insert("contents".into(), Dynamic::from(tag.contents.clone()));
    map.insert("position".into(), Dynamic::from(tag.position as i64));
    map.insert(
        "endPosition".into(),
        Dynamic::from(tag.end_position as i64),
    );
    let mut attributes = Map::new();
    for (name, value) in &tag.attributes {
        attributes.insert(name.as_str().into(), Dynamic::from(value.clone()));
    }
    map.insert("attributes".into(), Dynamic::from_map(attributes));
    if let Some(name) = &tag.name {
        map.insert("name".into(), Dynamic::from(name.clone()));
    }
    map
}

pub fn found_tags_to_array(tags: &[FoundTag]) -> Array {
    tags.iter()
        .map(|tag| Dynamic::from_map(found_tag_to_map(tag)))
        .collect()
}
