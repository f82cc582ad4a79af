use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use tokio::runtime::Handle;

use crate::capabilities::{CapabilityCache, ProviderFeature};
use crate::error::ScriptError;
use crate::logfile::ProviderLog;
use crate::provider::{ProviderData, ProviderError, ServiceProviderManifest};
use crate::storage::Storage;

#[derive(Debug)]
pub enum RegistryError {
    Provider(ProviderError),
    Script(ScriptError),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Provider(why) => write!(f, "{}", why),
            RegistryError::Script(why) => write!(f, "{}", why),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<ProviderError> for RegistryError {
    fn from(why: ProviderError) -> Self {
        RegistryError::Provider(why)
    }
}

impl From<ScriptError> for RegistryError {
    fn from(why: ScriptError) -> Self {
        RegistryError::Script(why)
    }
}

/// Loads provider manifests from a directory (`<id>.xml` plus the script
/// next to it) and owns the per-provider shared resources: storage, log
/// file and the capability cache.
pub struct ProviderRegistry {
    providers_dir: PathBuf,
    storage_dir: PathBuf,
    log_dir: PathBuf,
    providers: RwLock<HashMap<String, Arc<ProviderData>>>,
    storages: Mutex<HashMap<String, Arc<Storage>>>,
    capabilities: CapabilityCache,
}

impl ProviderRegistry {
    pub fn new(providers_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            providers_dir: providers_dir.into(),
            storage_dir: cache_dir.join("storage"),
            log_dir: cache_dir.join("logs"),
            providers: RwLock::new(HashMap::new()),
            storages: Mutex::new(HashMap::new()),
            capabilities: CapabilityCache::load(&cache_dir),
        }
    }

    /// Ids of all providers with a manifest in the provider directory.
    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let Ok(entries) = fs::read_dir(&self.providers_dir) else {
            return ids;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "xml").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_owned());
                }
            }
        }
        ids.sort();
        ids
    }

    /// The provider metadata, loaded from its manifest on first use.
    /// Metadata is immutable after load and shared freely.
    pub fn provider(&self, id: &str) -> Result<Arc<ProviderData>, ProviderError> {
        if let Some(provider) = self.providers.read().unwrap().get(id) {
            return Ok(provider.clone());
        }
        let path = self.providers_dir.join(format!("{}.xml", id));
        let xml = fs::read_to_string(&path).map_err(|why| ProviderError::ManifestUnreadable {
            path: path.clone(),
            why,
        })?;
        let manifest = ServiceProviderManifest::parse(&xml).map_err(|message| {
            ProviderError::ManifestInvalid {
                path: path.clone(),
                message,
            }
        })?;
        let provider = Arc::new(ProviderData::from_manifest(id, &manifest, &self.providers_dir)?);
        self.providers
            .write()
            .unwrap()
            .insert(id.to_owned(), provider.clone());
        Ok(provider)
    }

    /// Drops the cached metadata so the next access reloads the manifest.
    pub fn invalidate(&self, id: &str) {
        self.providers.write().unwrap().remove(id);
    }

    pub fn log(&self, id: &str) -> ProviderLog {
        ProviderLog::new(&self.log_dir, id)
    }

    /// The storage shared by all jobs of one provider.
    pub fn storage(&self, id: &str) -> Arc<Storage> {
        let mut storages = self.storages.lock().unwrap();
        storages
            .entry(id.to_owned())
            .or_insert_with(|| Arc::new(Storage::new(&self.storage_dir, id, self.log(id))))
            .clone()
    }

    /// The provider's features, from the capability cache or rediscovered.
    pub fn features(&self, id: &str, handle: Handle) -> Result<Vec<ProviderFeature>, RegistryError> {
        let provider = self.provider(id)?;
        let storage = self.storage(id);
        let log = self.log(id);
        Ok(self.capabilities.features(&provider, storage, log, handle)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_provider(name: &str) -> (ProviderRegistry, PathBuf) {
        let dir = std::env::temp_dir().join(format!("registry-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let providers = dir.join("providers");
        fs::create_dir_all(&providers).unwrap();
        fs::write(
            providers.join("sh_test.xml"),
            r#"<serviceProvider>
    <fileVersion>1.1</fileVersion>
    <name lang="en">Test Provider</name>
    <url>https://example.com/</url>
    <script>sh_test.rhai</script>
</serviceProvider>"#,
        )
        .unwrap();
        fs::write(
            providers.join("sh_test.rhai"),
            "fn getTimetable(values) {}\nfn getJourneys(values) {}\n",
        )
        .unwrap();
        (ProviderRegistry::new(&providers, dir.join("cache")), dir)
    }

    #[test]
    fn loads_providers_by_id() {
        let (registry, _dir) = registry_with_provider("load");
        assert_eq!(registry.provider_ids(), vec!["sh_test"]);
        let provider = registry.provider("sh_test").unwrap();
        assert_eq!(provider.id, "sh_test");
        assert_eq!(provider.name("en"), "Test Provider");
        // the second access returns the cached copy
        let again = registry.provider("sh_test").unwrap();
        assert!(Arc::ptr_eq(&provider, &again));
    }

    #[test]
    fn missing_provider_is_an_error() {
        let (registry, _dir) = registry_with_provider("missing");
        assert!(registry.provider("nope").is_err());
    }

    #[test]
    fn storage_is_shared_per_provider() {
        let (registry, _dir) = registry_with_provider("storage");
        let a = registry.storage("sh_test");
        let b = registry.storage("sh_test");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn features_are_discovered() {
        let (registry, _dir) = registry_with_provider("features");
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let features = registry
            .features("sh_test", runtime.handle().clone())
            .unwrap();
        assert!(features.contains(&ProviderFeature::JourneySearch));
        assert!(!features.contains(&ProviderFeature::Autocompletion));
    }
}
