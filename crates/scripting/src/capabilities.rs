use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::error::ScriptError;
use crate::host::ScriptHost;
use crate::logfile::ProviderLog;
use crate::provider::ProviderData;
use crate::storage::Storage;

/// What a provider plugin supports, discovered from its script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderFeature {
    Arrivals,
    Autocompletion,
    Delay,
    DelayReason,
    JourneyNews,
    JourneySearch,
    Operator,
    Platform,
    Status,
    StopId,
    TypeOfVehicle,
}

impl ProviderFeature {
    /// Maps a string returned by `usedTimetableInformations()` onto a
    /// feature, case-insensitively.
    pub fn from_information(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "arrivals" => Some(ProviderFeature::Arrivals),
            "delay" => Some(ProviderFeature::Delay),
            "delayreason" => Some(ProviderFeature::DelayReason),
            "platform" => Some(ProviderFeature::Platform),
            "journeynews" | "journeynewsother" | "journeynewslink" => {
                Some(ProviderFeature::JourneyNews)
            }
            "typeofvehicle" => Some(ProviderFeature::TypeOfVehicle),
            "status" => Some(ProviderFeature::Status),
            "operator" => Some(ProviderFeature::Operator),
            "stopid" => Some(ProviderFeature::StopId),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncludedFileEntry {
    path: PathBuf,
    modified_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntry {
    script_file_name: PathBuf,
    modified_time: i64,
    included_files: Vec<IncludedFileEntry>,
    features: Vec<ProviderFeature>,
    last_error: Option<String>,
}

fn modified_epoch(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}

/// Caches discovered provider features keyed on the script's (and every
/// included file's) modification time, persisted as one JSON file.
pub struct CapabilityCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CapabilityCache {
    pub fn load(cache_dir: impl Into<PathBuf>) -> Self {
        let path = cache_dir.into().join("capabilities.json");
        let entries = fs::read_to_string(&path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default();
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn persist(&self) {
        let entries = self.entries.lock().unwrap();
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&*entries) {
            Ok(contents) => {
                if let Err(why) = fs::write(&self.path, contents) {
                    log::warn!("cannot write capability cache: {}", why);
                }
            }
            Err(why) => log::warn!("cannot serialize capability cache: {}", why),
        }
    }

    fn cached_features(&self, provider: &ProviderData) -> Option<Vec<ProviderFeature>> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(&provider.id)?;
        if entry.script_file_name != provider.script_path
            || entry.modified_time != modified_epoch(&provider.script_path)
        {
            return None;
        }
        for included in &entry.included_files {
            if modified_epoch(&included.path) != included.modified_time {
                return None;
            }
        }
        Some(entry.features.clone())
    }

    /// Returns the provider's features, rediscovering them in a throwaway
    /// sandbox when the cached modification times no longer match.
    pub fn features(
        &self,
        provider: &ProviderData,
        storage: Arc<Storage>,
        log: ProviderLog,
        handle: Handle,
    ) -> Result<Vec<ProviderFeature>, ScriptError> {
        if let Some(features) = self.cached_features(provider) {
            return Ok(features);
        }

        let discovered = self.discover(provider, storage, log, handle);
        let entry = CacheEntry {
            script_file_name: provider.script_path.clone(),
            modified_time: modified_epoch(&provider.script_path),
            included_files: Vec::new(),
            features: Vec::new(),
            last_error: None,
        };
        let entry = match &discovered {
            Ok((features, included_files)) => CacheEntry {
                included_files: included_files
                    .iter()
                    .map(|path| IncludedFileEntry {
                        path: path.clone(),
                        modified_time: modified_epoch(path),
                    })
                    .collect(),
                features: features.clone(),
                ..entry
            },
            Err(why) => CacheEntry {
                last_error: Some(why.to_string()),
                ..entry
            },
        };
        self.entries
            .lock()
            .unwrap()
            .insert(provider.id.clone(), entry);
        self.persist();
        discovered.map(|(features, _)| features)
    }

    fn discover(
        &self,
        provider: &ProviderData,
        storage: Arc<Storage>,
        log: ProviderLog,
        handle: Handle,
    ) -> Result<(Vec<ProviderFeature>, Vec<PathBuf>), ScriptError> {
        let abort = Arc::new(AtomicBool::new(false));
        let mut host = ScriptHost::new(provider, storage, log, handle, abort)?;
        let mut features = Vec::new();
        for information in host.used_timetable_informations() {
            if let Some(feature) = ProviderFeature::from_information(&information) {
                if !features.contains(&feature) {
                    features.push(feature);
                }
            }
        }
        if host.has_function("getStopSuggestions") {
            features.push(ProviderFeature::Autocompletion);
        }
        if host.has_function("getJourneys") {
            features.push(ProviderFeature::JourneySearch);
        }
        let included_files = host.included_files().to_vec();
        Ok((features, included_files))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ServiceProviderManifest;

    fn provider_in(dir: &Path, script: &str) -> ProviderData {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("provider.rhai"), script).unwrap();
        let manifest = ServiceProviderManifest::parse(
            r#"<serviceProvider>
    <fileVersion>1.1</fileVersion>
    <name lang="en">Test</name>
    <script>provider.rhai</script>
</serviceProvider>"#,
        )
        .unwrap();
        ProviderData::from_manifest("cap_test", &manifest, dir).unwrap()
    }

    #[test]
    fn information_strings_map_to_features() {
        assert_eq!(
            ProviderFeature::from_information("DELAY"),
            Some(ProviderFeature::Delay)
        );
        assert_eq!(
            ProviderFeature::from_information("JourneyNewsLink"),
            Some(ProviderFeature::JourneyNews)
        );
        assert_eq!(ProviderFeature::from_information("Pricing"), None);
    }

    #[test]
    fn discovers_and_caches_features() {
        let dir = std::env::temp_dir().join(format!("caps-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let provider = provider_in(
            &dir,
            r#"
fn usedTimetableInformations() { ["Delay", "Platform"] }
fn getTimetable(values) {}
fn getStopSuggestions(values) {}
"#,
        );
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let log = ProviderLog::new(&dir, "cap_test");
        let storage = Arc::new(Storage::new(&dir, "cap_test", log.clone()));
        let cache = CapabilityCache::load(&dir);
        let features = cache
            .features(&provider, storage.clone(), log.clone(), runtime.handle().clone())
            .unwrap();
        assert!(features.contains(&ProviderFeature::Delay));
        assert!(features.contains(&ProviderFeature::Platform));
        assert!(features.contains(&ProviderFeature::Autocompletion));
        assert!(!features.contains(&ProviderFeature::JourneySearch));

        // the second lookup is served from the cache
        let reloaded = CapabilityCache::load(&dir);
        assert_eq!(reloaded.cached_features(&provider), Some(features));
    }
}
