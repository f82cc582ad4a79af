use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use lazy_static::lazy_static;
use model::info::TimetableData;
use regex::Regex;
use rhai::{Array, Dynamic, Engine, Map, Scope, AST};
use tokio::runtime::Handle;

use crate::convert;
use crate::error::ScriptError;
use crate::helper::{self, HelperHandle};
use crate::logfile::ProviderLog;
use crate::network::{Network, NetworkEvent, NetworkRequest, DEFAULT_TIMEOUT_MS};
use crate::provider::ProviderData;
use crate::result::{self, ResultFeatures, ResultHints, ResultObject};
use crate::storage::Storage;
use crate::{JobEvent, JobEventReceiver, JobEventSender};

/// Import names a provider manifest may request. Anything else fails the job
/// before the script runs.
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["qt", "qt.core", "qt.xml", "kross"];

/// Watchdog for one wait slice while driving the job to quiescence.
const WAIT_SLICE: Duration = Duration::from_secs(30);

const MAX_INCLUDE_DEPTH: usize = 16;

/// Everything a finished script job hands back to the scheduler.
#[derive(Debug)]
pub struct JobOutcome {
    pub records: Vec<TimetableData>,
    pub features: ResultFeatures,
    pub hints: ResultHints,
    pub last_url: Option<String>,
    pub last_url_datetime: Option<DateTime<Local>>,
    /// How many records had already been flushed through publish events.
    pub published: usize,
}

#[derive(Clone)]
struct StorageHandle(Arc<Storage>);

#[derive(Clone)]
struct ResultHandle(Arc<ResultObject>);

lazy_static! {
    // The statement prefix in which include() calls are permitted:
    // whitespace, line comments, block comments, include calls, semicolons.
    static ref INCLUDE_PREFIX: Regex =
        Regex::new(r#"(?s)\A(?:\s+|//[^\n]*|/\*.*?\*/|include\s*\(\s*"[^"]*"\s*\)|;)*"#).unwrap();
    static ref INCLUDE_CALL: Regex = Regex::new(r#"include\s*\(\s*"([^"]*)"\s*\)"#).unwrap();
}

/// Byte length of the program prefix in which include() calls are allowed.
fn include_prefix_len(source: &str) -> usize {
    INCLUDE_PREFIX.find(source).map(|m| m.end()).unwrap_or(0)
}

fn resolve_includes(
    source: &str,
    path: &Path,
    script_dir: &Path,
    included: &mut Vec<PathBuf>,
    sources: &mut Vec<(String, String)>,
    depth: usize,
) -> Result<(), ScriptError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(ScriptError::Include {
            message: "include() calls are nested too deeply".to_owned(),
        });
    }
    let source_name = path.display().to_string();
    if sources.iter().any(|(name, _)| name == &source_name) {
        return Ok(());
    }
    let prefix_len = include_prefix_len(source);
    for caps in INCLUDE_CALL.captures_iter(source) {
        let call = caps.get(0).unwrap();
        if call.start() >= prefix_len {
            return Err(ScriptError::Include {
                message: "include() calls must be the first statements".to_owned(),
            });
        }
        let name = &caps[1];
        if name.contains('/') || name.contains('\\') {
            return Err(ScriptError::Include {
                message: "cannot include files from other directories".to_owned(),
            });
        }
        let file = script_dir.join(name);
        if included.iter().any(|existing| existing == &file) || file == path {
            // already included (or an include cycle), a repeated include()
            // is a no-op
            continue;
        }
        let text = fs::read_to_string(&file).map_err(|_| ScriptError::Include {
            message: format!("cannot find file to be included: {}", name),
        })?;
        included.push(file.clone());
        resolve_includes(&text, &file, script_dir, included, sources, depth + 1)?;
    }
    // Blank out the include calls, preserving byte positions for error
    // messages, and register the processed source.
    let blanked = INCLUDE_CALL.replace_all(source, |caps: &regex::Captures| {
        " ".repeat(caps[0].len())
    });
    sources.push((source_name, blanked.into_owned()));
    Ok(())
}

fn flags_map() -> Map {
    let mut map = Map::new();
    map.insert("NoFeature".into(), Dynamic::from(0i64));
    map.insert("AutoPublish".into(), Dynamic::from(result::FEATURE_AUTO_PUBLISH));
    map.insert(
        "AutoDecodeHtmlEntities".into(),
        Dynamic::from(result::FEATURE_AUTO_DECODE_HTML_ENTITIES),
    );
    map.insert(
        "AutoRemoveCityFromStopNames".into(),
        Dynamic::from(result::FEATURE_AUTO_REMOVE_CITY_FROM_STOP_NAMES),
    );
    map.insert("NoHint".into(), Dynamic::from(0i64));
    map.insert(
        "DatesNeedAdjustment".into(),
        Dynamic::from(result::HINT_DATES_NEED_ADJUSTMENT),
    );
    map.insert(
        "NoDelaysForStop".into(),
        Dynamic::from(result::HINT_NO_DELAYS_FOR_STOP),
    );
    map.insert(
        "CityNamesAreLeft".into(),
        Dynamic::from(result::HINT_CITY_NAMES_ARE_LEFT),
    );
    map.insert(
        "CityNamesAreRight".into(),
        Dynamic::from(result::HINT_CITY_NAMES_ARE_RIGHT),
    );
    map
}

fn public_transport_map() -> Map {
    let mut map = Map::new();
    for info in model::info::TimetableInformation::ALL {
        map.insert(info.name().into(), Dynamic::from(info.name().to_owned()));
    }
    for vehicle in model::vehicle::VehicleType::ALL {
        map.insert(
            vehicle.name().into(),
            Dynamic::from(vehicle.name().to_owned()),
        );
    }
    map
}

fn register_helper(engine: &mut Engine) {
    engine.register_type_with_name::<HelperHandle>("Helper");
    engine.register_fn("trim", |_: &mut HelperHandle, s: &str| utility::text::trim(s));
    engine.register_fn("stripTags", |_: &mut HelperHandle, s: &str| {
        utility::html::strip_tags(s)
    });
    engine.register_fn("decodeHtmlEntities", |_: &mut HelperHandle, s: &str| {
        utility::html::decode_html_entities(s)
    });
    engine.register_fn("camelCase", |_: &mut HelperHandle, s: &str| {
        utility::text::camel_case(s)
    });
    engine.register_fn(
        "extractBlock",
        |_: &mut HelperHandle, s: &str, begin: &str, end: &str| {
            utility::text::extract_block(s, begin, end)
        },
    );
    engine.register_fn(
        "splitSkipEmptyParts",
        |_: &mut HelperHandle, s: &str, separator: &str| -> Array {
            utility::text::split_skip_empty_parts(s, separator)
                .into_iter()
                .map(Dynamic::from)
                .collect()
        },
    );
    engine.register_fn("matchTime", |helper: &mut HelperHandle, s: &str| {
        match_time_map(helper, s, "hh:mm")
    });
    engine.register_fn("matchTime", match_time_map);
    engine.register_fn("matchDate", |helper: &mut HelperHandle, s: &str| {
        match_date_map(helper, s, "yyyy-MM-dd")
    });
    engine.register_fn("matchDate", match_date_map);
    engine.register_fn("formatTime", |_: &mut HelperHandle, hour: i64, minute: i64| {
        utility::datetime::format_time(hour as u32, minute as u32, "hh:mm")
    });
    engine.register_fn(
        "formatTime",
        |_: &mut HelperHandle, hour: i64, minute: i64, format: &str| {
            utility::datetime::format_time(hour as u32, minute as u32, format)
        },
    );
    engine.register_fn(
        "formatDate",
        |_: &mut HelperHandle, year: i64, month: i64, day: i64| {
            utility::datetime::format_date(year as i32, month as u32, day as u32, "yyyy-MM-dd")
        },
    );
    engine.register_fn(
        "formatDate",
        |_: &mut HelperHandle, year: i64, month: i64, day: i64, format: &str| {
            utility::datetime::format_date(year as i32, month as u32, day as u32, format)
        },
    );
    engine.register_fn(
        "formatDateTime",
        |helper: &mut HelperHandle, value: Map| format_date_time_map(helper, value, "yyyy-MM-dd hh:mm"),
    );
    engine.register_fn(
        "formatDateTime",
        |helper: &mut HelperHandle, value: Map, format: &str| {
            format_date_time_map(helper, value, format)
        },
    );
    engine.register_fn("duration", |_: &mut HelperHandle, t1: &str, t2: &str| {
        utility::datetime::duration(t1, t2, "hh:mm")
    });
    engine.register_fn(
        "duration",
        |_: &mut HelperHandle, t1: &str, t2: &str, format: &str| {
            utility::datetime::duration(t1, t2, format)
        },
    );
    engine.register_fn(
        "addMinsToTime",
        |_: &mut HelperHandle, time: &str, minutes: i64| {
            utility::datetime::add_mins_to_time(time, minutes, "hh:mm")
        },
    );
    engine.register_fn(
        "addMinsToTime",
        |_: &mut HelperHandle, time: &str, minutes: i64, format: &str| {
            utility::datetime::add_mins_to_time(time, minutes, format)
        },
    );
    engine.register_fn(
        "addDaysToDate",
        |_: &mut HelperHandle, date: &str, days: i64| {
            utility::datetime::add_days_to_date(date, days, "yyyy-MM-dd")
        },
    );
    engine.register_fn(
        "addDaysToDate",
        |_: &mut HelperHandle, date: &str, days: i64, format: &str| {
            utility::datetime::add_days_to_date(date, days, format)
        },
    );
    engine.register_fn(
        "findFirstHtmlTag",
        |_: &mut HelperHandle, document: &str, tag: &str| find_first_tag(document, tag, &Map::new()),
    );
    engine.register_fn(
        "findFirstHtmlTag",
        |_: &mut HelperHandle, document: &str, tag: &str, options: Map| {
            find_first_tag(document, tag, &options)
        },
    );
    engine.register_fn(
        "findHtmlTags",
        |_: &mut HelperHandle, document: &str, tag: &str| -> Array {
            helper::found_tags_to_array(&utility::html::find_html_tags(
                document,
                tag,
                &Default::default(),
            ))
        },
    );
    engine.register_fn(
        "findHtmlTags",
        |_: &mut HelperHandle, document: &str, tag: &str, options: Map| -> Array {
            helper::found_tags_to_array(&utility::html::find_html_tags(
                document,
                tag,
                &helper::options_from_map(&options),
            ))
        },
    );
    engine.register_fn(
        "findNamedHtmlTags",
        |_: &mut HelperHandle, document: &str, tag: &str, options: Map| -> Map {
            let mut out = Map::new();
            for (name, found) in
                utility::html::find_named_html_tags(document, tag, &helper::options_from_map(&options))
            {
                out.insert(
                    name.as_str().into(),
                    Dynamic::from_map(helper::found_tag_to_map(&found)),
                );
            }
            out
        },
    );
    engine.register_fn("error", |helper: &mut HelperHandle, message: &str| {
        helper.error(message, "");
    });
    engine.register_fn(
        "error",
        |helper: &mut HelperHandle, message: &str, failing_text: &str| {
            helper.error(message, failing_text);
        },
    );
}

fn match_time_map(_: &mut HelperHandle, s: &str, format: &str) -> Map {
    match utility::datetime::match_time(s, format) {
        Some(time) => convert::time_to_map(time),
        None => convert::error_map(),
    }
}

fn match_date_map(_: &mut HelperHandle, s: &str, format: &str) -> Map {
    match utility::datetime::match_date(s, format) {
        Some(date) => convert::date_to_map(date),
        None => convert::error_map(),
    }
}

/// Formats a map carrying date and time components, as produced by
/// matchDate()/matchTime().
fn format_date_time_map(_: &mut HelperHandle, value: Map, format: &str) -> String {
    use chrono::TimeZone;
    let (Some(date), Some(time)) = (convert::map_to_date(&value), convert::map_to_time(&value))
    else {
        return String::new();
    };
    match Local.from_local_datetime(&date.and_time(time)).single() {
        Some(datetime) => utility::datetime::format_date_time(&datetime, format),
        None => String::new(),
    }
}

fn find_first_tag(document: &str, tag: &str, options: &Map) -> Map {
    let options = helper::options_from_map(options);
    match utility::html::find_first_html_tag(document, tag, &options) {
        Some(found) => {
            let mut map = helper::found_tag_to_map(&found);
            map.insert("found".into(), Dynamic::from(true));
            map
        }
        None => {
            let mut map = Map::new();
            map.insert("found".into(), Dynamic::from(false));
            map
        }
    }
}

fn register_network(engine: &mut Engine) {
    engine.register_type_with_name::<Network>("Network");
    engine.register_type_with_name::<NetworkRequest>("NetworkRequest");
    engine.register_fn("createRequest", |network: &mut Network, url: &str| {
        network.create_request(url)
    });
    engine.register_fn("get", |network: &mut Network, request: NetworkRequest| {
        network.get(&request)
    });
    engine.register_fn("post", |network: &mut Network, request: NetworkRequest| {
        network.post(&request)
    });
    engine.register_fn("head", |network: &mut Network, request: NetworkRequest| {
        network.head(&request)
    });
    engine.register_fn("getSynchronous", |network: &mut Network, url: &str| {
        network.get_synchronous(url, DEFAULT_TIMEOUT_MS)
    });
    engine.register_fn(
        "getSynchronous",
        |network: &mut Network, url: &str, timeout_ms: i64| {
            network.get_synchronous(url, timeout_ms.max(0) as u64)
        },
    );
    engine.register_fn("abortAllRequests", |network: &mut Network| {
        network.abort_all_requests()
    });
    engine.register_fn("hasRunningRequests", |network: &mut Network| {
        network.has_running_requests()
    });
    engine.register_fn("runningRequestCount", |network: &mut Network| {
        network.running_request_count() as i64
    });
    engine.register_get("lastUrl", |network: &mut Network| {
        network.last_url().unwrap_or_default()
    });
    engine.register_get("fallbackCharset", |network: &mut Network| {
        network.fallback_charset().unwrap_or_default()
    });

    engine.register_get("url", |request: &mut NetworkRequest| request.url());
    engine.register_fn("isRunning", |request: &mut NetworkRequest| request.is_running());
    engine.register_fn("isFinished", |request: &mut NetworkRequest| {
        request.is_finished()
    });
    engine.register_fn("setPostData", |request: &mut NetworkRequest, data: &str| {
        request.set_post_data(data, None)
    });
    engine.register_fn(
        "setPostData",
        |request: &mut NetworkRequest, data: &str, charset: &str| {
            request.set_post_data(data, Some(charset))
        },
    );
    engine.register_fn(
        "setHeader",
        |request: &mut NetworkRequest, name: &str, value: &str| request.set_header(name, value),
    );
    engine.register_fn("header", |request: &mut NetworkRequest, name: &str| {
        request.header(name).unwrap_or_default()
    });
    engine.register_fn("abort", |request: &mut NetworkRequest| request.abort());
    engine.register_fn("onFinished", |request: &mut NetworkRequest, function: &str| {
        request.set_on_finished(function)
    });
    engine.register_fn(
        "onFinishedNoDecoding",
        |request: &mut NetworkRequest, function: &str| {
            request.set_on_finished_no_decoding(function)
        },
    );
    engine.register_fn(
        "onReadyRead",
        |request: &mut NetworkRequest, function: &str| request.set_on_ready_read(function),
    );
    engine.register_fn("onAborted", |request: &mut NetworkRequest, function: &str| {
        request.set_on_aborted(function)
    });
}

fn register_storage(engine: &mut Engine) {
    engine.register_type_with_name::<StorageHandle>("Storage");
    engine.register_fn("write", |storage: &mut StorageHandle, name: &str, value: Dynamic| {
        match convert::dynamic_to_storage_value(&value) {
            Some(value) => storage.0.write(name, value),
            None => log::warn!("cannot store value of type {}", value.type_name()),
        }
    });
    engine.register_fn("write", |storage: &mut StorageHandle, values: Map| {
        for (name, value) in values.iter() {
            if let Some(value) = convert::dynamic_to_storage_value(value) {
                storage.0.write(name.as_str(), value);
            }
        }
    });
    engine.register_fn("read", |storage: &mut StorageHandle, name: &str| {
        storage
            .0
            .read(name)
            .map(|value| convert::storage_value_to_dynamic(&value))
            .unwrap_or(Dynamic::UNIT)
    });
    engine.register_fn(
        "read",
        |storage: &mut StorageHandle, name: &str, default: Dynamic| {
            storage
                .0
                .read(name)
                .map(|value| convert::storage_value_to_dynamic(&value))
                .unwrap_or(default)
        },
    );
    engine.register_fn("read", |storage: &mut StorageHandle| -> Map {
        let mut map = Map::new();
        for (name, value) in storage.0.read_all() {
            map.insert(name.as_str().into(), convert::storage_value_to_dynamic(&value));
        }
        map
    });
    engine.register_fn("remove", |storage: &mut StorageHandle, name: &str| {
        storage.0.remove(name)
    });
    engine.register_fn("clear", |storage: &mut StorageHandle| storage.0.clear());
    engine.register_fn("hasData", |storage: &mut StorageHandle, name: &str| {
        storage.0.has_data(name)
    });
    engine.register_fn(
        "writePersistent",
        |storage: &mut StorageHandle, name: &str, value: Dynamic| {
            write_persistent(storage, name, value, 7)
        },
    );
    engine.register_fn(
        "writePersistent",
        |storage: &mut StorageHandle, name: &str, value: Dynamic, lifetime_days: i64| {
            write_persistent(storage, name, value, lifetime_days)
        },
    );
    engine.register_fn("readPersistent", |storage: &mut StorageHandle, name: &str| {
        storage
            .0
            .read_persistent(name)
            .map(|value| convert::storage_value_to_dynamic(&value))
            .unwrap_or(Dynamic::UNIT)
    });
    engine.register_fn(
        "readPersistent",
        |storage: &mut StorageHandle, name: &str, default: Dynamic| {
            storage
                .0
                .read_persistent(name)
                .map(|value| convert::storage_value_to_dynamic(&value))
                .unwrap_or(default)
        },
    );
    engine.register_fn(
        "removePersistent",
        |storage: &mut StorageHandle, name: &str| storage.0.remove_persistent(name),
    );
    engine.register_fn("clearPersistent", |storage: &mut StorageHandle| {
        storage.0.clear_persistent()
    });
    engine.register_fn(
        "hasPersistentData",
        |storage: &mut StorageHandle, name: &str| storage.0.has_persistent_data(name),
    );
    engine.register_fn("lifetime", |storage: &mut StorageHandle, name: &str| {
        storage.0.lifetime(name)
    });
    engine.register_fn("checkLifetime", |storage: &mut StorageHandle| {
        storage.0.check_lifetime()
    });
}

fn write_persistent(storage: &mut StorageHandle, name: &str, value: Dynamic, lifetime_days: i64) {
    let Some(value) = convert::dynamic_to_storage_value(&value) else {
        log::warn!("cannot store value of type {}", value.type_name());
        return;
    };
    if let Err(why) = storage.0.write_persistent(name, &value, lifetime_days) {
        log::warn!("cannot write persistent entry '{}': {}", name, why);
    }
}

fn register_result(engine: &mut Engine) {
    engine.register_type_with_name::<ResultHandle>("ResultObject");
    engine.register_fn("addData", |result: &mut ResultHandle, data: Map| {
        result.0.add_data(&data)
    });
    engine.register_fn("publish", |result: &mut ResultHandle| result.0.publish());
    engine.register_fn(
        "enableFeature",
        |result: &mut ResultHandle, feature: i64, enable: bool| {
            result.0.enable_feature(feature, enable)
        },
    );
    engine.register_fn(
        "isFeatureEnabled",
        |result: &mut ResultHandle, feature: i64| result.0.is_feature_enabled(feature),
    );
    engine.register_fn(
        "giveHint",
        |result: &mut ResultHandle, hint: i64, give: bool| result.0.give_hint(hint, give),
    );
    engine.register_fn("isHintGiven", |result: &mut ResultHandle, hint: i64| {
        result.0.is_hint_given(hint)
    });
    engine.register_fn("count", |result: &mut ResultHandle| result.0.count() as i64);
    engine.register_fn("clear", |result: &mut ResultHandle| result.0.clear());
    engine.register_fn("data", |result: &mut ResultHandle| -> Array {
        result
            .0
            .data_snapshot()
            .iter()
            .map(|record| {
                let mut map = Map::new();
                for (info, value) in record {
                    map.insert(info.name().into(), convert::info_value_to_dynamic(value));
                }
                Dynamic::from_map(map)
            })
            .collect()
    });
    engine.register_get("features", |result: &mut ResultHandle| {
        result.0.features().flags()
    });
    engine.register_get("hints", |result: &mut ResultHandle| result.0.hints().flags());
}

/// One sandbox per job: a fresh engine with the capability objects bound,
/// the provider script compiled (includes resolved) and evaluated.
pub struct ScriptHost {
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    network: Network,
    result: Arc<ResultObject>,
    events: JobEventReceiver,
    abort: Arc<AtomicBool>,
    included_files: Vec<PathBuf>,
}

impl ScriptHost {
    pub fn new(
        provider: &ProviderData,
        storage: Arc<Storage>,
        log: ProviderLog,
        handle: Handle,
        abort: Arc<AtomicBool>,
    ) -> Result<Self, ScriptError> {
        for extension in &provider.script_extensions {
            if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
                return Err(ScriptError::DisallowedExtension {
                    extension: extension.clone(),
                });
            }
        }

        let source =
            fs::read_to_string(&provider.script_path).map_err(|why| ScriptError::ScriptUnreadable {
                path: provider.script_path.clone(),
                why,
            })?;
        let script_dir = provider
            .script_path
            .parent()
            .map(|dir| dir.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let mut included_files = Vec::new();
        let mut sources = Vec::new();
        resolve_includes(
            &source,
            &provider.script_path,
            &script_dir,
            &mut included_files,
            &mut sources,
            0,
        )?;

        let (events_tx, events_rx) = JobEventSender::channel();
        let network = Network::new(handle, provider.fallback_charset.clone(), events_tx.clone());
        let result = Arc::new(ResultObject::new(events_tx));

        let mut engine = Engine::new();
        // rhai's debug-build defaults (32/16) are tighter than release (64/32);
        // use the release limits unconditionally so scripts behave the same way
        // regardless of how this crate itself was built.
        engine.set_max_expr_depths(64, 32);
        register_helper(&mut engine);
        register_network(&mut engine);
        register_storage(&mut engine);
        register_result(&mut engine);
        let progress_abort = abort.clone();
        engine.on_progress(move |_| {
            if progress_abort.load(Ordering::Relaxed) {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });

        let provider_value =
            rhai::serde::to_dynamic(provider).map_err(|why| ScriptError::Evaluation {
                message: why.to_string(),
            })?;
        let included: Array = included_files
            .iter()
            .map(|path| Dynamic::from(path.display().to_string()))
            .collect();

        // The injected globals are served by a variable resolver: unlike
        // scope variables, resolved variables are visible inside script
        // functions, and the handles go out as temporaries so their &mut
        // methods stay callable.
        let mut globals: std::collections::HashMap<&'static str, Dynamic> =
            std::collections::HashMap::new();
        globals.insert("provider", provider_value);
        globals.insert("enum", Dynamic::from_map(flags_map()));
        globals.insert("PublicTransport", Dynamic::from_map(public_transport_map()));
        globals.insert("includedFiles", Dynamic::from_array(included));
        globals.insert("helper", Dynamic::from(HelperHandle::new(log)));
        globals.insert("network", Dynamic::from(network.clone()));
        globals.insert("storage", Dynamic::from(StorageHandle(storage)));
        globals.insert("result", Dynamic::from(ResultHandle(result.clone())));
        engine.on_var(move |name, _index, _context| Ok(globals.get(name).cloned()));

        // Included sources come first, the main program last, all sharing one
        // global scope.
        let mut ast = AST::empty();
        for (name, text) in &sources {
            let mut compiled = engine.compile(text).map_err(|why| ScriptError::Syntax {
                message: why.to_string(),
            })?;
            compiled.set_source(name.as_str());
            ast += compiled;
        }

        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|why| ScriptError::Evaluation {
                message: why.to_string(),
            })?;

        Ok(Self {
            engine,
            ast,
            scope,
            network,
            result,
            events: events_rx,
            abort,
            included_files,
        })
    }

    pub fn included_files(&self) -> &[PathBuf] {
        &self.included_files
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.ast.iter_functions().any(|f| f.name == name)
    }

    /// Calls the optional `usedTimetableInformations()` entry and returns the
    /// reported strings, empty when absent or failing.
    pub fn used_timetable_informations(&mut self) -> Vec<String> {
        if !self.has_function("usedTimetableInformations") {
            return Vec::new();
        }
        let result: Result<Dynamic, _> =
            self.engine
                .call_fn(&mut self.scope, &self.ast, "usedTimetableInformations", ());
        match result {
            Ok(value) if value.is_array() => value
                .into_array()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|item| item.into_string().ok())
                .collect(),
            Ok(_) => Vec::new(),
            Err(why) => {
                log::warn!("usedTimetableInformations() failed: {}", why);
                Vec::new()
            }
        }
    }

    fn check_abort(&self) -> Result<(), ScriptError> {
        if self.abort.load(Ordering::Relaxed) {
            self.network.abort_all_requests();
            Err(ScriptError::Aborted)
        } else {
            Ok(())
        }
    }

    fn call_function(&mut self, name: &str, args: Vec<Dynamic>) -> Result<(), ScriptError> {
        let result: Result<Dynamic, _> =
            self.engine
                .call_fn(&mut self.scope, &self.ast, name, args);
        match result {
            Ok(_) => Ok(()),
            Err(why) => {
                if self.abort.load(Ordering::Relaxed) {
                    Err(ScriptError::Aborted)
                } else {
                    Err(ScriptError::Runtime {
                        message: why.to_string(),
                    })
                }
            }
        }
    }

    fn handle_event(
        &mut self,
        event: JobEvent,
        published: &mut usize,
        on_publish: &mut dyn FnMut(Vec<TimetableData>),
    ) -> Result<(), ScriptError> {
        match event {
            JobEvent::Publish { records } => {
                *published = records.len();
                on_publish(records);
            }
            JobEvent::InvalidData { .. } => {}
            JobEvent::Network(NetworkEvent::Started { .. }) => {}
            JobEvent::Network(NetworkEvent::AllRequestsFinished) => {}
            JobEvent::Network(NetworkEvent::Finished { callback, text, .. }) => {
                if let Some(callback) = callback {
                    self.call_function(&callback, vec![Dynamic::from(text)])?;
                }
            }
            JobEvent::Network(NetworkEvent::FinishedNoDecoding { callback, data, .. }) => {
                self.call_function(&callback, vec![Dynamic::from_blob(data)])?;
            }
            JobEvent::Network(NetworkEvent::ReadyRead { callback, text, .. }) => {
                self.call_function(&callback, vec![Dynamic::from(text)])?;
            }
            JobEvent::Network(NetworkEvent::Aborted { callback, .. }) => {
                if let Some(callback) = callback {
                    self.call_function(&callback, Vec::new())?;
                }
            }
        }
        Ok(())
    }

    /// Invokes the entry function and drives the job to quiescence: network
    /// completion events are delivered to their script callbacks until no
    /// request is running, with a 30 s watchdog per wait slice.
    pub fn run(
        &mut self,
        function_name: &str,
        request: Map,
        on_publish: &mut dyn FnMut(Vec<TimetableData>),
    ) -> Result<JobOutcome, ScriptError> {
        if !self.has_function(function_name) {
            return Err(ScriptError::EntryMissing {
                function: function_name.to_owned(),
            });
        }
        self.check_abort()?;
        let mut published = 0usize;
        self.call_function(function_name, vec![Dynamic::from_map(request)])?;

        loop {
            while let Ok(event) = self.events.try_recv() {
                self.handle_event(event, &mut published, on_publish)?;
            }
            self.check_abort()?;
            if !self.network.has_running_requests() {
                break;
            }
            match self.events.recv_timeout(WAIT_SLICE) {
                Ok(event) => self.handle_event(event, &mut published, on_publish)?,
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "still waiting for {} network request(s)",
                        self.network.running_request_count()
                    );
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        // late publish events after the last request finished
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event, &mut published, on_publish)?;
        }

        Ok(JobOutcome {
            records: self.result.data_snapshot(),
            features: self.result.features(),
            hints: self.result.hints(),
            last_url: self.network.last_url(),
            last_url_datetime: self.network.last_url_datetime(),
            published,
        })
    }
}

impl Drop for ScriptHost {
    fn drop(&mut self) {
        self.network.abort_all_requests();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderData, ServiceProviderManifest};
    use std::fs;

    fn write_provider(dir: &Path, script: &str) -> ProviderData {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("provider.rhai"), script).unwrap();
        let manifest = ServiceProviderManifest::parse(
            r#"<serviceProvider>
    <fileVersion>1.1</fileVersion>
    <name lang="en">Test</name>
    <url>https://example.com/</url>
    <script>provider.rhai</script>
</serviceProvider>"#,
        )
        .unwrap();
        ProviderData::from_manifest("test", &manifest, dir).unwrap()
    }

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("host-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn host_for(dir: &Path, provider: &ProviderData, runtime: &tokio::runtime::Runtime) -> Result<ScriptHost, ScriptError> {
        let log = ProviderLog::new(dir, "test");
        let storage = Arc::new(Storage::new(dir, "test", log.clone()));
        ScriptHost::new(
            provider,
            storage,
            log,
            runtime.handle().clone(),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn runs_a_simple_timetable_script() {
        let dir = test_dir("simple");
        let provider = write_provider(
            &dir,
            r#"
fn getTimetable(values) {
    let time = helper.matchTime("08:15", "hh:mm");
    result.addData(#{
        DepartureTime: time,
        TransportLine: "S1",
        TypeOfVehicle: "InterurbanTrain",
        Target: "Kiel " + values.stop
    });
}
"#,
        );
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut host = host_for(&dir, &provider, &runtime).unwrap();
        assert!(host.has_function("getTimetable"));
        assert!(!host.has_function("getJourneys"));

        let mut request = Map::new();
        request.insert("stop".into(), Dynamic::from("Hbf".to_owned()));
        let outcome = host
            .run("getTimetable", request, &mut |_records| {})
            .unwrap();
        assert_eq!(outcome.records.len(), 1);
        let record = &outcome.records[0];
        assert_eq!(
            record.get(&model::info::TimetableInformation::Target),
            Some(&model::info::InfoValue::Str("Kiel Hbf".to_owned()))
        );
        assert_eq!(outcome.published, 0);
    }

    #[test]
    fn missing_entry_function_is_reported() {
        let dir = test_dir("missing-entry");
        let provider = write_provider(&dir, "fn getTimetable(values) {}");
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut host = host_for(&dir, &provider, &runtime).unwrap();
        let result = host.run("getJourneys", Map::new(), &mut |_| {});
        assert!(matches!(result, Err(ScriptError::EntryMissing { .. })));
    }

    #[test]
    fn syntax_errors_fail_the_load() {
        let dir = test_dir("syntax");
        let provider = write_provider(&dir, "fn getTimetable(values) { let ; }");
        let runtime = tokio::runtime::Runtime::new().unwrap();
        assert!(matches!(
            host_for(&dir, &provider, &runtime),
            Err(ScriptError::Syntax { .. })
        ));
    }

    #[test]
    fn disallowed_extension_is_refused() {
        let dir = test_dir("extension");
        let mut provider = write_provider(&dir, "fn getTimetable(values) {}");
        provider.script_extensions = vec!["python".to_owned()];
        let runtime = tokio::runtime::Runtime::new().unwrap();
        assert!(matches!(
            host_for(&dir, &provider, &runtime),
            Err(ScriptError::DisallowedExtension { .. })
        ));

        provider.script_extensions = vec!["qt.core".to_owned()];
        assert!(host_for(&dir, &provider, &runtime).is_ok());
    }

    #[test]
    fn includes_are_resolved_next_to_the_script() {
        let dir = test_dir("include");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("util.rhai"),
            "fn lineName(line) { \"Line \" + line }\n",
        )
        .unwrap();
        let provider = write_provider(
            &dir,
            r#"include("util.rhai");
include("util.rhai");
fn getTimetable(values) {
    result.addData(#{ Target: lineName("S1") });
}
"#,
        );
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut host = host_for(&dir, &provider, &runtime).unwrap();
        // the repeated include is a no-op
        assert_eq!(host.included_files().len(), 1);
        let outcome = host.run("getTimetable", Map::new(), &mut |_| {}).unwrap();
        assert_eq!(
            outcome.records[0].get(&model::info::TimetableInformation::Target),
            Some(&model::info::InfoValue::Str("Line S1".to_owned()))
        );
    }

    #[test]
    fn include_after_statements_fails() {
        let dir = test_dir("include-late");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("util.rhai"), "fn helper_fn() { 1 }\n").unwrap();
        let provider = write_provider(
            &dir,
            "let x = 1;\ninclude(\"util.rhai\");\nfn getTimetable(values) {}\n",
        );
        let runtime = tokio::runtime::Runtime::new().unwrap();
        assert!(matches!(
            host_for(&dir, &provider, &runtime),
            Err(ScriptError::Include { .. })
        ));
    }

    #[test]
    fn include_with_path_separator_is_refused() {
        let dir = test_dir("include-path");
        fs::create_dir_all(&dir).unwrap();
        let provider = write_provider(
            &dir,
            "include(\"../util.rhai\");\nfn getTimetable(values) {}\n",
        );
        let runtime = tokio::runtime::Runtime::new().unwrap();
        assert!(matches!(
            host_for(&dir, &provider, &runtime),
            Err(ScriptError::Include { .. })
        ));
    }

    #[test]
    fn include_prefix_covers_comments_and_includes_only() {
        let source = "// comment\n/* block */\ninclude(\"a.rhai\");\ninclude(\"b.rhai\");\nlet x = 1;\ninclude(\"c.rhai\");";
        let prefix = include_prefix_len(source);
        // the prefix ends before `let x = 1;`
        assert!(source[..prefix].contains("include(\"b.rhai\")"));
        assert!(!source[..prefix].contains("let x"));
        // the trailing include is outside the prefix
        let late = INCLUDE_CALL
            .captures_iter(source)
            .last()
            .unwrap()
            .get(0)
            .unwrap();
        assert!(late.start() >= prefix);
    }

    #[test]
    fn used_timetable_informations_is_called() {
        let dir = test_dir("features");
        let provider = write_provider(
            &dir,
            r#"
fn usedTimetableInformations() {
    ["Delay", "Platform", "StopID"]
}
fn getTimetable(values) {}
"#,
        );
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut host = host_for(&dir, &provider, &runtime).unwrap();
        assert_eq!(
            host.used_timetable_informations(),
            vec!["Delay", "Platform", "StopID"]
        );
    }
}
