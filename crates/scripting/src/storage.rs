use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use chrono::{Duration, Local, TimeZone};
use indexmap::IndexMap;

use crate::logfile::ProviderLog;

const LIFETIME_SUFFIX: &str = "__expires__";
const MIN_LIFETIME_DAYS: i64 = 1;
const MAX_LIFETIME_DAYS: i64 = 30;
const DEFAULT_LIFETIME_DAYS: i64 = 7;
/// Expired entries are swept at most this often.
const LIFETIME_CHECK_INTERVAL_SECS: u64 = 15 * 60;

/// A value a provider script can store.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<StorageValue>),
    Map(IndexMap<String, StorageValue>),
}

#[derive(Debug)]
pub enum StorageError {
    /// A list item, key or value exceeds the 16 bit length prefix.
    Oversize(usize),
    /// The declared type byte is out of range.
    UnknownType(u8),
    /// A length prefix overflows the payload.
    Truncated,
    InvalidString,
    Io(std::io::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Oversize(len) => {
                write!(f, "encoded value of {} bytes exceeds the 16 bit length limit", len)
            }
            StorageError::UnknownType(t) => write!(f, "unknown storage type byte {}", t),
            StorageError::Truncated => write!(f, "encoded storage data is truncated"),
            StorageError::InvalidString => write!(f, "stored string is not valid utf-8"),
            StorageError::Io(why) => write!(f, "storage io error: {}", why),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(why: std::io::Error) -> Self {
        StorageError::Io(why)
    }
}

const TYPE_BOOL: u8 = 1;
const TYPE_INT: u8 = 2;
const TYPE_FLOAT: u8 = 3;
const TYPE_STR: u8 = 4;
const TYPE_BYTES: u8 = 5;
const TYPE_LIST: u8 = 6;
const TYPE_MAP: u8 = 7;

fn check_length(len: usize) -> Result<u16, StorageError> {
    u16::try_from(len).map_err(|_| StorageError::Oversize(len))
}

/// Encodes a value as `<type-byte><payload>`. Lists and maps are stored as
/// length-prefixed concatenations with little endian u16 lengths.
pub fn encode_value(value: &StorageValue) -> Result<Vec<u8>, StorageError> {
    let mut out = Vec::new();
    match value {
        StorageValue::Bool(b) => {
            out.push(TYPE_BOOL);
            out.push(*b as u8);
        }
        StorageValue::Int(i) => {
            out.push(TYPE_INT);
            out.extend_from_slice(&i.to_le_bytes());
        }
        StorageValue::Float(f) => {
            out.push(TYPE_FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        StorageValue::Str(s) => {
            out.push(TYPE_STR);
            out.extend_from_slice(s.as_bytes());
        }
        StorageValue::Bytes(bytes) => {
            out.push(TYPE_BYTES);
            out.extend_from_slice(bytes);
        }
        StorageValue::List(list) => {
            out.push(TYPE_LIST);
            for item in list {
                let encoded = encode_value(item)?;
                let length = check_length(encoded.len())?;
                out.extend_from_slice(&length.to_le_bytes());
                out.extend_from_slice(&encoded);
            }
        }
        StorageValue::Map(map) => {
            out.push(TYPE_MAP);
            for (key, item) in map {
                let encoded = encode_value(item)?;
                let key_length = check_length(key.len())?;
                let value_length = check_length(encoded.len())?;
                out.extend_from_slice(&key_length.to_le_bytes());
                out.extend_from_slice(key.as_bytes());
                out.extend_from_slice(&value_length.to_le_bytes());
                out.extend_from_slice(&encoded);
            }
        }
    }
    Ok(out)
}

fn read_u16(data: &[u8], pos: usize) -> Result<u16, StorageError> {
    if pos + 2 > data.len() {
        return Err(StorageError::Truncated);
    }
    Ok(u16::from_le_bytes([data[pos], data[pos + 1]]))
}

pub fn decode_value(data: &[u8]) -> Result<StorageValue, StorageError> {
    let Some((&type_byte, payload)) = data.split_first() else {
        return Err(StorageError::Truncated);
    };
    match type_byte {
        TYPE_BOOL => match payload.first() {
            Some(b) => Ok(StorageValue::Bool(*b != 0)),
            None => Err(StorageError::Truncated),
        },
        TYPE_INT => {
            let bytes: [u8; 8] = payload.try_into().map_err(|_| StorageError::Truncated)?;
            Ok(StorageValue::Int(i64::from_le_bytes(bytes)))
        }
        TYPE_FLOAT => {
            let bytes: [u8; 8] = payload.try_into().map_err(|_| StorageError::Truncated)?;
            Ok(StorageValue::Float(f64::from_le_bytes(bytes)))
        }
        TYPE_STR => std::str::from_utf8(payload)
            .map(|s| StorageValue::Str(s.to_owned()))
            .map_err(|_| StorageError::InvalidString),
        TYPE_BYTES => Ok(StorageValue::Bytes(payload.to_vec())),
        TYPE_LIST => {
            let mut items = Vec::new();
            let mut pos = 0;
            while pos < payload.len() {
                let length = read_u16(payload, pos)? as usize;
                pos += 2;
                if pos + length > payload.len() {
                    return Err(StorageError::Truncated);
                }
                items.push(decode_value(&payload[pos..pos + length])?);
                pos += length;
            }
            Ok(StorageValue::List(items))
        }
        TYPE_MAP => {
            let mut map = IndexMap::new();
            let mut pos = 0;
            while pos < payload.len() {
                let key_length = read_u16(payload, pos)? as usize;
                pos += 2;
                if pos + key_length > payload.len() {
                    return Err(StorageError::Truncated);
                }
                let key = std::str::from_utf8(&payload[pos..pos + key_length])
                    .map_err(|_| StorageError::InvalidString)?
                    .to_owned();
                pos += key_length;
                let value_length = read_u16(payload, pos)? as usize;
                pos += 2;
                if pos + value_length > payload.len() {
                    return Err(StorageError::Truncated);
                }
                map.insert(key, decode_value(&payload[pos..pos + value_length])?);
                pos += value_length;
            }
            Ok(StorageValue::Map(map))
        }
        other => Err(StorageError::UnknownType(other)),
    }
}

/// Key value store for provider scripts: a volatile in-memory half and a
/// persistent half with per-entry lifetimes, backed by one JSON file per
/// provider. One instance is shared by all jobs of a provider.
pub struct Storage {
    provider_id: String,
    file_path: PathBuf,
    log: ProviderLog,
    memory: RwLock<HashMap<String, StorageValue>>,
    persistent: RwLock<IndexMap<String, serde_json::Value>>,
    last_lifetime_check: Mutex<Option<Instant>>,
}

impl Storage {
    pub fn new(storage_dir: impl Into<PathBuf>, provider_id: &str, log: ProviderLog) -> Self {
        let file_path = storage_dir.into().join(format!("{}.storage.json", provider_id));
        let persistent = match fs::read_to_string(&file_path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|why| {
                log::warn!("corrupt storage file {}: {}", file_path.display(), why);
                IndexMap::new()
            }),
            Err(_) => IndexMap::new(),
        };
        let storage = Self {
            provider_id: provider_id.to_owned(),
            file_path,
            log,
            memory: RwLock::new(HashMap::new()),
            persistent: RwLock::new(persistent),
            last_lifetime_check: Mutex::new(None),
        };
        storage.check_lifetime();
        storage
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn write(&self, name: &str, value: StorageValue) {
        self.memory.write().unwrap().insert(name.to_owned(), value);
    }

    pub fn write_all(&self, values: impl IntoIterator<Item = (String, StorageValue)>) {
        let mut memory = self.memory.write().unwrap();
        for (name, value) in values {
            memory.insert(name, value);
        }
    }

    pub fn read(&self, name: &str) -> Option<StorageValue> {
        self.memory.read().unwrap().get(name).cloned()
    }

    pub fn read_all(&self) -> HashMap<String, StorageValue> {
        self.memory.read().unwrap().clone()
    }

    pub fn has_data(&self, name: &str) -> bool {
        self.memory.read().unwrap().contains_key(name)
    }

    pub fn remove(&self, name: &str) {
        self.memory.write().unwrap().remove(name);
    }

    pub fn clear(&self) {
        self.memory.write().unwrap().clear();
    }

    /// Writes a persistent entry with a lifetime clamped to 1..=30 days.
    pub fn write_persistent(
        &self,
        name: &str,
        value: &StorageValue,
        lifetime_days: i64,
    ) -> Result<(), StorageError> {
        let lifetime_days = lifetime_days.clamp(MIN_LIFETIME_DAYS, MAX_LIFETIME_DAYS);
        let expires = Local::now() + Duration::days(lifetime_days);
        let encoded = base64::encode(encode_value(value)?);
        {
            let mut persistent = self.persistent.write().unwrap();
            persistent.insert(name.to_owned(), serde_json::Value::String(encoded));
            persistent.insert(
                format!("{}{}", name, LIFETIME_SUFFIX),
                serde_json::Value::from(expires.timestamp()),
            );
        }
        self.sync()
    }

    pub fn read_persistent(&self, name: &str) -> Option<StorageValue> {
        let persistent = self.persistent.read().unwrap();
        let encoded = persistent.get(name)?.as_str()?.to_owned();
        drop(persistent);
        let bytes = match base64::decode(&encoded) {
            Ok(bytes) => bytes,
            Err(why) => {
                self.discard_corrupt(name, &why.to_string());
                return None;
            }
        };
        match decode_value(&bytes) {
            Ok(value) => Some(value),
            Err(why) => {
                self.discard_corrupt(name, &why.to_string());
                None
            }
        }
    }

    /// A corrupted entry is skipped and removed, with a log file entry.
    fn discard_corrupt(&self, name: &str, why: &str) {
        log::warn!(
            "corrupt persistent entry '{}' of provider {}: {}",
            name,
            self.provider_id,
            why
        );
        self.log.append(
            &format!("removed corrupt persistent entry '{}': {}", name, why),
            "",
        );
        self.remove_persistent(name);
    }

    pub fn has_persistent_data(&self, name: &str) -> bool {
        self.persistent.read().unwrap().contains_key(name)
    }

    pub fn remove_persistent(&self, name: &str) {
        {
            let mut persistent = self.persistent.write().unwrap();
            persistent.shift_remove(name);
            persistent.shift_remove(&format!("{}{}", name, LIFETIME_SUFFIX));
        }
        if let Err(why) = self.sync() {
            log::warn!("cannot sync storage of {}: {}", self.provider_id, why);
        }
    }

    pub fn clear_persistent(&self) {
        self.persistent.write().unwrap().clear();
        if let Err(why) = self.sync() {
            log::warn!("cannot sync storage of {}: {}", self.provider_id, why);
        }
    }

    /// Remaining whole days until the entry expires; zero or negative when
    /// it is already expired or absent.
    pub fn lifetime(&self, name: &str) -> i64 {
        let persistent = self.persistent.read().unwrap();
        let expires = persistent
            .get(&format!("{}{}", name, LIFETIME_SUFFIX))
            .and_then(|value| value.as_i64())
            .unwrap_or(0);
        drop(persistent);
        match Local.timestamp_opt(expires, 0).single() {
            Some(expiry) => (expiry - Local::now()).num_days(),
            None => 0,
        }
    }

    /// Sweeps expired persistent entries. Runs at most every 15 minutes; the
    /// first call after construction always runs.
    pub fn check_lifetime(&self) {
        {
            let mut last = self.last_lifetime_check.lock().unwrap();
            if let Some(instant) = *last {
                if instant.elapsed().as_secs() < LIFETIME_CHECK_INTERVAL_SECS {
                    return;
                }
            }
            *last = Some(Instant::now());
        }
        let names: Vec<String> = {
            let persistent = self.persistent.read().unwrap();
            persistent
                .keys()
                .filter(|key| !key.ends_with(LIFETIME_SUFFIX))
                .cloned()
                .collect()
        };
        for name in names {
            if self.lifetime(&name) <= 0 {
                log::debug!(
                    "lifetime of storage data '{}' for {} has expired",
                    name,
                    self.provider_id
                );
                self.remove_persistent(&name);
            }
        }
    }

    /// Writes the persistent map atomically: a temporary file is written and
    /// renamed over the previous one.
    fn sync(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = {
            let persistent = self.persistent.read().unwrap();
            serde_json::to_string_pretty(&*persistent).map_err(|why| {
                StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, why))
            })?
        };
        let temp_path = self.file_path.with_extension("json.tmp");
        fs::write(&temp_path, contents)?;
        fs::rename(&temp_path, &self.file_path)?;
        Ok(())
    }

    #[cfg(test)]
    fn override_expiry(&self, name: &str, expires_epoch: i64) {
        self.persistent.write().unwrap().insert(
            format!("{}{}", name, LIFETIME_SUFFIX),
            serde_json::Value::from(expires_epoch),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage(name: &str) -> Storage {
        let dir = std::env::temp_dir().join(format!("storage-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        Storage::new(&dir, "test_provider", ProviderLog::new(&dir, "test_provider"))
    }

    fn sample_map() -> StorageValue {
        let mut map = IndexMap::new();
        map.insert("a".to_owned(), StorageValue::Int(1));
        map.insert(
            "b".to_owned(),
            StorageValue::List(vec![
                StorageValue::Str("x".to_owned()),
                StorageValue::Bool(true),
            ]),
        );
        StorageValue::Map(map)
    }

    #[test]
    fn encode_decode_round_trip() {
        let values = [
            StorageValue::Bool(true),
            StorageValue::Int(-42),
            StorageValue::Float(13.25),
            StorageValue::Str("hällo".to_owned()),
            StorageValue::Bytes(vec![0, 1, 2, 255]),
            StorageValue::List(vec![StorageValue::Int(1), StorageValue::Str("two".to_owned())]),
            sample_map(),
        ];
        for value in values {
            let encoded = encode_value(&value).unwrap();
            assert_eq!(decode_value(&encoded).unwrap(), value);
        }
    }

    #[test]
    fn oversize_values_are_rejected() {
        let big = StorageValue::List(vec![StorageValue::Str("x".repeat(70_000))]);
        assert!(matches!(
            encode_value(&big),
            Err(StorageError::Oversize(_))
        ));
    }

    #[test]
    fn decode_rejects_bad_type_byte_and_truncation() {
        assert!(matches!(
            decode_value(&[99, 0]),
            Err(StorageError::UnknownType(99))
        ));
        // list with a length prefix overflowing the payload
        assert!(matches!(
            decode_value(&[TYPE_LIST, 10, 0, 1]),
            Err(StorageError::Truncated)
        ));
    }

    #[test]
    fn volatile_read_write() {
        let storage = test_storage("volatile");
        storage.write("counter", StorageValue::Int(3));
        assert_eq!(storage.read("counter"), Some(StorageValue::Int(3)));
        assert!(storage.has_data("counter"));
        storage.remove("counter");
        assert!(!storage.has_data("counter"));
    }

    #[test]
    fn persistent_round_trip_and_lifetime() {
        let storage = test_storage("persistent");
        storage
            .write_persistent("answer", &StorageValue::Int(42), 1)
            .unwrap();
        assert_eq!(storage.read_persistent("answer"), Some(StorageValue::Int(42)));
        let lifetime = storage.lifetime("answer");
        assert!((0..=1).contains(&lifetime), "lifetime was {}", lifetime);
    }

    #[test]
    fn lifetime_is_clamped_to_30_days() {
        let storage = test_storage("clamp");
        storage
            .write_persistent("k", &StorageValue::Int(1), 400)
            .unwrap();
        assert!(storage.lifetime("k") <= 30);
        storage
            .write_persistent("k2", &StorageValue::Int(1), 0)
            .unwrap();
        assert!(storage.lifetime("k2") >= 0);
    }

    #[test]
    fn expired_entries_are_swept() {
        let storage = test_storage("sweep");
        storage
            .write_persistent("stale", &StorageValue::Int(42), 1)
            .unwrap();
        // Simulate the clock advancing past the expiry.
        storage.override_expiry("stale", (Local::now() - Duration::hours(2)).timestamp());
        assert!(storage.lifetime("stale") <= 0);
        // First check after construction already ran, so reset the throttle.
        *storage.last_lifetime_check.lock().unwrap() = None;
        storage.check_lifetime();
        assert!(!storage.has_persistent_data("stale"));
        assert_eq!(storage.read_persistent("stale"), None);
    }

    #[test]
    fn corrupt_entries_are_removed_on_read() {
        let storage = test_storage("corrupt");
        storage.persistent.write().unwrap().insert(
            "broken".to_owned(),
            serde_json::Value::String(base64::encode([99u8, 1, 2])),
        );
        assert_eq!(storage.read_persistent("broken"), None);
        assert!(!storage.has_persistent_data("broken"));
    }

    #[test]
    fn storage_survives_reload() {
        let dir = std::env::temp_dir().join(format!("storage-reload-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let log = ProviderLog::new(&dir, "p");
        {
            let storage = Storage::new(&dir, "p", log.clone());
            storage
                .write_persistent("kept", &sample_map(), 7)
                .unwrap();
        }
        let reloaded = Storage::new(&dir, "p", log);
        assert_eq!(reloaded.read_persistent("kept"), Some(sample_map()));
    }
}
