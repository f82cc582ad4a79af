use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Local, NaiveTime};
use model::alarm::{matched_alarm_indices, AlarmSettings};
use model::departure::Departure;
use model::filter::FilterSettings;
use model::journey::Journey;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::events::EngineEvent;

pub const DEPARTURE_BATCH_SIZE: usize = 10;
pub const JOURNEY_BATCH_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FirstDepartureConfigMode {
    RelativeToCurrentTime,
    AtCustomTime,
}

/// Which departures count as "not yet left" for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstDepartureConfig {
    pub mode: FirstDepartureConfigMode,
    pub custom_time: NaiveTime,
    pub offset_min: i64,
}

impl Default for FirstDepartureConfig {
    fn default() -> Self {
        Self {
            mode: FirstDepartureConfigMode::RelativeToCurrentTime,
            custom_time: NaiveTime::MIN,
            offset_min: 0,
        }
    }
}

/// Whether a departure lies in the past according to the first departure
/// configuration. Departures keep a one minute grace period, and guessed
/// dates a day off roll over instead of vanishing.
pub fn is_out_of_date(predicted: DateTime<Local>, config: &FirstDepartureConfig) -> bool {
    let first = match config.mode {
        FirstDepartureConfigMode::AtCustomTime => Local::now()
            .date_naive()
            .and_time(config.custom_time)
            .and_local_timezone(Local)
            .earliest()
            .unwrap_or_else(Local::now),
        FirstDepartureConfigMode::RelativeToCurrentTime => Local::now(),
    };
    let mut secs = (predicted - first).num_seconds();
    if config.mode == FirstDepartureConfigMode::RelativeToCurrentTime {
        secs -= config.offset_min * 60;
    }
    if -secs / 3600 >= 23 {
        secs += 24 * 3600;
    }
    secs <= -60
}

/// The filter, alarm and visibility settings the processor applies.
#[derive(Debug, Clone, Default)]
pub struct ProcessorSettings {
    pub filter_settings: Vec<FilterSettings>,
    pub alarms: Vec<AlarmSettings>,
    pub first_departure: FirstDepartureConfig,
}

impl ProcessorSettings {
    fn filter_out(&self, departure: &Departure, stop_index: usize) -> bool {
        let hidden_by_filters = self
            .filter_settings
            .iter()
            .filter(|settings| {
                settings.affected_stops.is_empty()
                    || settings.affected_stops.contains(&stop_index)
            })
            .any(|settings| settings.filter_out(departure));
        hidden_by_filters
            || is_out_of_date(departure.predicted_departure(), &self.first_departure)
    }
}

/// Work items of the background processor.
#[derive(Debug)]
pub enum ProcessorJob {
    ProcessDepartures {
        source: String,
        stop_index: usize,
        departures: Vec<Departure>,
        url: Option<String>,
        updated: bool,
        /// Resume index after a requeue.
        already_processed: usize,
    },
    ProcessJourneys {
        source: String,
        journeys: Vec<Journey>,
        url: Option<String>,
        updated: bool,
        already_processed: usize,
    },
    /// Re-applies the filters to an already processed list and reports which
    /// records changed visibility relative to `shown` (a set of content
    /// hashes).
    FilterDepartures {
        source: String,
        stop_index: usize,
        departures: Vec<Departure>,
        shown: HashSet<u64>,
    },
}

impl ProcessorJob {
    fn source(&self) -> &str {
        match self {
            ProcessorJob::ProcessDepartures { source, .. }
            | ProcessorJob::ProcessJourneys { source, .. }
            | ProcessorJob::FilterDepartures { source, .. } => source,
        }
    }
}

struct ProcessorInner {
    queue: Mutex<VecDeque<ProcessorJob>>,
    notify: Notify,
    settings: RwLock<ProcessorSettings>,
    abort: AtomicBool,
    requeue: AtomicBool,
    running: AtomicBool,
}

/// Background worker applying filters, alarms and the first departure rule,
/// emitting records to subscribers in fixed size batches. A settings change
/// while a job runs finishes the current batch, then requeues the job at
/// the head of the queue.
#[derive(Clone)]
pub struct DepartureProcessor {
    inner: Arc<ProcessorInner>,
}

impl DepartureProcessor {
    /// Starts the worker task; must be called inside a tokio runtime.
    pub fn start(events: mpsc::Sender<EngineEvent>) -> Self {
        let inner = Arc::new(ProcessorInner {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            settings: RwLock::new(ProcessorSettings::default()),
            abort: AtomicBool::new(false),
            requeue: AtomicBool::new(false),
            running: AtomicBool::new(false),
        });
        let worker = inner.clone();
        tokio::spawn(async move {
            run_worker(worker, events).await;
        });
        Self { inner }
    }

    pub fn enqueue(&self, job: ProcessorJob) {
        self.inner.queue.lock().unwrap().push_back(job);
        self.inner.notify.notify_one();
    }

    fn enqueue_front(inner: &ProcessorInner, job: ProcessorJob) {
        inner.queue.lock().unwrap().push_front(job);
        inner.notify.notify_one();
    }

    /// Overwrites the settings. A running job finishes its current batch and
    /// is requeued so the remaining records see the new settings.
    pub fn update_settings(&self, settings: ProcessorSettings) {
        *self.inner.settings.write().unwrap() = settings;
        if self.inner.running.load(Ordering::SeqCst) {
            self.inner.requeue.store(true, Ordering::SeqCst);
        }
    }

    pub fn settings(&self) -> ProcessorSettings {
        self.inner.settings.read().unwrap().clone()
    }

    /// Drops all queued jobs for the source and aborts the current job if it
    /// belongs to the source.
    pub fn abort_source(&self, source: &str) {
        self.inner
            .queue
            .lock()
            .unwrap()
            .retain(|job| job.source() != source);
        if self.inner.running.load(Ordering::SeqCst) {
            self.inner.abort.store(true, Ordering::SeqCst);
        }
    }

    pub fn abort_all(&self) {
        self.inner.queue.lock().unwrap().clear();
        if self.inner.running.load(Ordering::SeqCst) {
            self.inner.abort.store(true, Ordering::SeqCst);
        }
    }

    pub fn queued_jobs(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }
}

async fn run_worker(inner: Arc<ProcessorInner>, events: mpsc::Sender<EngineEvent>) {
    loop {
        let job = loop {
            if let Some(job) = inner.queue.lock().unwrap().pop_front() {
                break job;
            }
            inner.notify.notified().await;
        };
        inner.running.store(true, Ordering::SeqCst);
        match job {
            ProcessorJob::ProcessDepartures {
                source,
                stop_index,
                departures,
                url,
                updated,
                already_processed,
            } => {
                process_departures(
                    &inner,
                    &events,
                    source,
                    stop_index,
                    departures,
                    url,
                    updated,
                    already_processed,
                )
                .await;
            }
            ProcessorJob::ProcessJourneys {
                source,
                journeys,
                url,
                updated,
                already_processed,
            } => {
                process_journeys(&inner, &events, source, journeys, url, updated, already_processed)
                    .await;
            }
            ProcessorJob::FilterDepartures {
                source,
                stop_index,
                departures,
                shown,
            } => {
                filter_departures(&inner, &events, source, stop_index, departures, shown).await;
            }
        }
        inner.running.store(false, Ordering::SeqCst);
    }
}

/// What to do after one emitted batch.
enum BatchOutcome {
    Continue,
    Abort,
    Requeue,
}

fn after_batch(inner: &ProcessorInner) -> BatchOutcome {
    if inner.abort.swap(false, Ordering::SeqCst) {
        BatchOutcome::Abort
    } else if inner.requeue.swap(false, Ordering::SeqCst) {
        BatchOutcome::Requeue
    } else {
        BatchOutcome::Continue
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_departures(
    inner: &Arc<ProcessorInner>,
    events: &mpsc::Sender<EngineEvent>,
    source: String,
    stop_index: usize,
    mut departures: Vec<Departure>,
    url: Option<String>,
    updated: bool,
    already_processed: usize,
) {
    if already_processed == 0 {
        let _ = events
            .send(EngineEvent::BeginDepartureProcessing {
                source: source.clone(),
            })
            .await;
    }
    let settings = inner.settings.read().unwrap().clone();
    let mut batch = Vec::new();
    let mut index = already_processed;
    while index < departures.len() {
        let departure = &mut departures[index];
        departure.set_filtered_out(settings.filter_out(departure, stop_index));
        departure.set_matched_alarms(matched_alarm_indices(
            &settings.alarms,
            departure,
            stop_index,
        ));
        batch.push(departure.clone());
        index += 1;

        if batch.len() == DEPARTURE_BATCH_SIZE {
            let _ = events
                .send(EngineEvent::DeparturesProcessed {
                    source: source.clone(),
                    departures: std::mem::take(&mut batch),
                    url: url.clone(),
                    updated,
                })
                .await;
            match after_batch(inner) {
                BatchOutcome::Continue => {}
                BatchOutcome::Abort => return,
                BatchOutcome::Requeue => {
                    DepartureProcessor::enqueue_front(
                        inner,
                        ProcessorJob::ProcessDepartures {
                            source,
                            stop_index,
                            departures,
                            url,
                            updated,
                            already_processed: index,
                        },
                    );
                    return;
                }
            }
        }
    }
    if !batch.is_empty() {
        let _ = events
            .send(EngineEvent::DeparturesProcessed {
                source,
                departures: batch,
                url,
                updated,
            })
            .await;
    }
}

async fn process_journeys(
    inner: &Arc<ProcessorInner>,
    events: &mpsc::Sender<EngineEvent>,
    source: String,
    mut journeys: Vec<Journey>,
    url: Option<String>,
    updated: bool,
    already_processed: usize,
) {
    if already_processed == 0 {
        let _ = events
            .send(EngineEvent::BeginJourneyProcessing {
                source: source.clone(),
            })
            .await;
    }
    journeys.sort();
    let mut batch = Vec::new();
    let mut index = already_processed;
    while index < journeys.len() {
        batch.push(journeys[index].clone());
        index += 1;
        if batch.len() == JOURNEY_BATCH_SIZE {
            let _ = events
                .send(EngineEvent::JourneysProcessed {
                    source: source.clone(),
                    journeys: std::mem::take(&mut batch),
                    url: url.clone(),
                    updated,
                })
                .await;
            match after_batch(inner) {
                BatchOutcome::Continue => {}
                BatchOutcome::Abort => return,
                BatchOutcome::Requeue => {
                    DepartureProcessor::enqueue_front(
                        inner,
                        ProcessorJob::ProcessJourneys {
                            source,
                            journeys,
                            url,
                            updated,
                            already_processed: index,
                        },
                    );
                    return;
                }
            }
        }
    }
    if !batch.is_empty() {
        let _ = events
            .send(EngineEvent::JourneysProcessed {
                source,
                journeys: batch,
                url,
                updated,
            })
            .await;
    }
}

async fn filter_departures(
    inner: &Arc<ProcessorInner>,
    events: &mpsc::Sender<EngineEvent>,
    source: String,
    stop_index: usize,
    mut departures: Vec<Departure>,
    shown: HashSet<u64>,
) {
    let _ = events
        .send(EngineEvent::BeginFiltering {
            source: source.clone(),
        })
        .await;
    let settings = inner.settings.read().unwrap().clone();
    let mut newly_filtered = Vec::new();
    let mut newly_not_filtered = Vec::new();
    for departure in departures.iter_mut() {
        let filtered_out = settings.filter_out(departure, stop_index);
        departure.set_filtered_out(filtered_out);
        let was_shown = shown.contains(&departure.hash());
        if filtered_out && was_shown {
            newly_filtered.push(departure.clone());
        } else if !filtered_out && !was_shown {
            newly_not_filtered.push(departure.clone());
        }
    }
    let _ = events
        .send(EngineEvent::DeparturesFiltered {
            source,
            departures,
            newly_filtered,
            newly_not_filtered,
        })
        .await;
    // filtering is not interruptible batch-wise, but clear stale flags
    inner.abort.store(false, Ordering::SeqCst);
    inner.requeue.store(false, Ordering::SeqCst);
}
