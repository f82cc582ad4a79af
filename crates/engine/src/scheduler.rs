use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Local};
use model::departure::Departure;
use model::journey::Journey;
use model::{GlobalTimetableInfo, ParseMode};
use scripting::error::{ScriptError, ScriptErrorKind};
use scripting::host::ScriptHost;
use scripting::provider::ProviderData;
use scripting::registry::ProviderRegistry;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};

use crate::events::{EngineEvent, ResultsReady};
use crate::normalizer::{normalize, NormalizedRecords};
use crate::request::{MoreItemsDirection, Request, RequestTypeMask};
use crate::EngineError;

/// Last published result set of a source, used to derive MoreItems request
/// times and the forced update hint.
#[derive(Debug, Clone)]
enum PublishedRecords {
    Departures(Vec<Departure>),
    Journeys(Vec<Journey>),
}

#[derive(Clone)]
struct JobHandle {
    source: String,
    parse_mode: ParseMode,
    abort: Arc<AtomicBool>,
}

#[derive(Default)]
struct SchedulerState {
    running_sources: Mutex<HashSet<String>>,
    jobs: Mutex<Vec<JobHandle>>,
    published: Mutex<HashMap<String, PublishedRecords>>,
}

/// Bounded worker pool running provider script jobs: one job per request,
/// at most one job per source name in flight.
#[derive(Clone)]
pub struct ScriptScheduler {
    registry: Arc<ProviderRegistry>,
    events: mpsc::Sender<EngineEvent>,
    limit: Arc<Semaphore>,
    state: Arc<SchedulerState>,
}

impl ScriptScheduler {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        events: mpsc::Sender<EngineEvent>,
        max_jobs: usize,
    ) -> Self {
        Self {
            registry,
            events,
            limit: Arc::new(Semaphore::new(max_jobs.max(1))),
            state: Arc::new(SchedulerState::default()),
        }
    }

    /// Accepts a request and runs it as a script job. Returns an error when
    /// a job for the same source name is already queued or running.
    pub async fn enqueue(&self, provider_id: &str, request: Request) -> Result<(), EngineError> {
        let provider = self.registry.provider(provider_id)?;
        let request = self.resolve_more_items(request);
        let source = request.source_name().to_owned();
        {
            let mut running = self.state.running_sources.lock().unwrap();
            if !running.insert(source.clone()) {
                return Err(EngineError::DuplicateSourceJob(source));
            }
        }
        let abort = Arc::new(AtomicBool::new(false));
        self.state.jobs.lock().unwrap().push(JobHandle {
            source: source.clone(),
            parse_mode: request.parse_mode(),
            abort: abort.clone(),
        });
        log::debug!(
            "job started for source '{}': {}",
            source,
            request.arguments_string()
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            let _permit = match scheduler.limit.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    scheduler.finish_job(&source);
                    return;
                }
            };
            if abort.load(Ordering::Relaxed) {
                // aborted while waiting for a free worker slot
                scheduler.finish_job(&source);
                return;
            }
            scheduler.run(provider, request, abort).await;
            scheduler.finish_job(&source);
        });
        Ok(())
    }

    /// Sets the abort flag on queued and running jobs matching the mask.
    pub fn abort_jobs(&self, mask: RequestTypeMask) {
        for job in self.state.jobs.lock().unwrap().iter() {
            if mask.contains(job.parse_mode) {
                job.abort.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Drops the published record buffer of a source, eg. when the
    /// subscription ends.
    pub fn forget_source(&self, source: &str) {
        self.state.published.lock().unwrap().remove(source);
    }

    fn finish_job(&self, source: &str) {
        self.state.running_sources.lock().unwrap().remove(source);
        self.state
            .jobs
            .lock()
            .unwrap()
            .retain(|job| job.source != source);
    }

    /// Rewrites a MoreItems request into its inner request with the date
    /// moved past (or before) the already published records.
    fn resolve_more_items(&self, request: Request) -> Request {
        let Request::MoreItems(more) = request else {
            return request;
        };
        let mut inner = (*more.request).clone();
        let published = self.state.published.lock().unwrap();
        let boundary = match published.get(inner.source_name()) {
            Some(PublishedRecords::Departures(records)) => {
                fold_boundary(records.iter().map(|r| r.predicted_departure()), more.direction)
            }
            Some(PublishedRecords::Journeys(records)) => {
                fold_boundary(records.iter().map(|r| r.departure()), more.direction)
            }
            None => None,
        };
        drop(published);
        if let Some(datetime) = boundary {
            match &mut inner {
                Request::Departures(r) | Request::Arrivals(r) => r.datetime = datetime,
                Request::Journeys(r) => {
                    r.datetime = datetime;
                    r.round_trips += 1;
                }
                _ => {}
            }
        }
        inner
    }

    async fn run(&self, provider: Arc<ProviderData>, request: Request, abort: Arc<AtomicBool>) {
        let registry = self.registry.clone();
        let handle = Handle::current();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let job_provider = provider.clone();
        let job_request = request.clone();
        let job = tokio::task::spawn_blocking(move || {
            run_job(
                registry,
                job_provider,
                job_request,
                handle,
                abort,
                progress_tx,
            )
        });
        // forward incremental publishes while the job runs
        while let Some(event) = progress_rx.recv().await {
            let _ = self.events.send(event).await;
        }
        let finished = match job.await {
            Ok(finished) => finished,
            Err(why) => {
                log::error!("script job panicked: {}", why);
                Err(ScriptError::Runtime {
                    message: "the script job died unexpectedly".to_owned(),
                })
            }
        };
        let event = match finished {
            Ok(finished) => self.ready_event(finished),
            Err(why) => {
                log::warn!(
                    "job for '{}' failed: {}",
                    request.source_name(),
                    why
                );
                EngineEvent::ErrorParsing {
                    kind: why.kind(),
                    message: why.to_string(),
                    url: None,
                    request,
                }
            }
        };
        let _ = self.events.send(event).await;
    }

    fn ready_event(&self, finished: FinishedJob) -> EngineEvent {
        let FinishedJob {
            request,
            records,
            raw_records,
            features,
            hints,
            url,
            global_info,
            published,
        } = finished;
        let source = request.source_name().to_owned();
        let total = records.as_ref().map(|r| r.len()).unwrap_or(raw_records.len());
        if total == 0 {
            return EngineEvent::ErrorParsing {
                kind: ScriptErrorKind::ParseFailed,
                message: "parse failed, no usable records".to_owned(),
                url,
                request,
            };
        }
        let could_need_forced_update = published > 0 && total > published;
        match records {
            Some(NormalizedRecords::Departures(records)) => {
                self.state.published.lock().unwrap().insert(
                    source.clone(),
                    PublishedRecords::Departures(records.clone()),
                );
                let ready = ResultsReady {
                    source,
                    records,
                    features,
                    hints,
                    url,
                    global_info,
                    request: request.clone(),
                    could_need_forced_update,
                };
                match request.parse_mode() {
                    ParseMode::Arrivals => EngineEvent::ArrivalsReady(ready),
                    _ => EngineEvent::DeparturesReady(ready),
                }
            }
            Some(NormalizedRecords::Journeys(records)) => {
                self.state
                    .published
                    .lock()
                    .unwrap()
                    .insert(source.clone(), PublishedRecords::Journeys(records.clone()));
                EngineEvent::JourneysReady(ResultsReady {
                    source,
                    records,
                    features,
                    hints,
                    url,
                    global_info,
                    request,
                    could_need_forced_update,
                })
            }
            Some(NormalizedRecords::StopSuggestions(records)) => {
                EngineEvent::StopSuggestionsReady(ResultsReady {
                    source,
                    records,
                    features,
                    hints,
                    url,
                    global_info,
                    request,
                    could_need_forced_update,
                })
            }
            None => EngineEvent::AdditionalDataReady(ResultsReady {
                source,
                records: raw_records,
                features,
                hints,
                url,
                global_info,
                request,
                could_need_forced_update,
            }),
        }
    }
}

fn fold_boundary(
    times: impl Iterator<Item = DateTime<Local>>,
    direction: MoreItemsDirection,
) -> Option<DateTime<Local>> {
    match direction {
        MoreItemsDirection::LaterItems => times.max().map(|t| t + Duration::minutes(1)),
        MoreItemsDirection::EarlierItems => times.min().map(|t| t - Duration::minutes(1)),
    }
}

struct FinishedJob {
    request: Request,
    /// Normalized records; None for additional data jobs, which stay raw.
    records: Option<NormalizedRecords>,
    raw_records: Vec<model::info::TimetableData>,
    features: scripting::result::ResultFeatures,
    hints: scripting::result::ResultHints,
    url: Option<String>,
    global_info: GlobalTimetableInfo,
    published: usize,
}

/// Runs one job on a blocking worker thread: sandbox setup, entry function
/// invocation, drive to quiescence, normalization.
fn run_job(
    registry: Arc<ProviderRegistry>,
    provider: Arc<ProviderData>,
    request: Request,
    handle: Handle,
    abort: Arc<AtomicBool>,
    progress: mpsc::UnboundedSender<EngineEvent>,
) -> Result<FinishedJob, ScriptError> {
    let storage = registry.storage(&provider.id);
    let log = registry.log(&provider.id);
    let mut host = ScriptHost::new(&provider, storage, log, handle, abort)?;

    let parse_mode = request.parse_mode();
    let global_info = GlobalTimetableInfo::new(
        request
            .datetime()
            .map(|dt| dt.date_naive())
            .unwrap_or_else(|| Local::now().date_naive()),
    );
    let default_vehicle_type = provider.default_vehicle_type;

    let publish_request = request.clone();
    let mut on_publish = |records: Vec<model::info::TimetableData>| {
        if parse_mode == ParseMode::AdditionalData {
            return;
        }
        let normalized = normalize(
            &records,
            parse_mode,
            default_vehicle_type,
            &global_info,
            Default::default(),
            Default::default(),
        );
        if normalized.is_empty() {
            return;
        }
        let ready_source = publish_request.source_name().to_owned();
        let event = match normalized {
            NormalizedRecords::Departures(records) => {
                let ready = ResultsReady {
                    source: ready_source,
                    records,
                    features: Default::default(),
                    hints: Default::default(),
                    url: None,
                    global_info,
                    request: publish_request.clone(),
                    could_need_forced_update: false,
                };
                match parse_mode {
                    ParseMode::Arrivals => EngineEvent::ArrivalsReady(ready),
                    _ => EngineEvent::DeparturesReady(ready),
                }
            }
            NormalizedRecords::Journeys(records) => EngineEvent::JourneysReady(ResultsReady {
                source: ready_source,
                records,
                features: Default::default(),
                hints: Default::default(),
                url: None,
                global_info,
                request: publish_request.clone(),
                could_need_forced_update: false,
            }),
            NormalizedRecords::StopSuggestions(records) => {
                EngineEvent::StopSuggestionsReady(ResultsReady {
                    source: ready_source,
                    records,
                    features: Default::default(),
                    hints: Default::default(),
                    url: None,
                    global_info,
                    request: publish_request.clone(),
                    could_need_forced_update: false,
                })
            }
        };
        let _ = progress.send(event);
    };

    let outcome = host.run(
        request.function_name(),
        request.to_script_map(),
        &mut on_publish,
    )?;

    let records = if parse_mode == ParseMode::AdditionalData {
        None
    } else {
        Some(normalize(
            &outcome.records,
            parse_mode,
            default_vehicle_type,
            &global_info,
            outcome.features,
            outcome.hints,
        ))
    };
    Ok(FinishedJob {
        request,
        records,
        raw_records: outcome.records,
        features: outcome.features,
        hints: outcome.hints,
        url: outcome.last_url,
        global_info,
        published: outcome.published,
    })
}
