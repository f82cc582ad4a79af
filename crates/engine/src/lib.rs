use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use scripting::provider::ProviderError;
use scripting::registry::ProviderRegistry;
use tokio::sync::mpsc;

pub mod events;
pub mod normalizer;
pub mod processor;
pub mod request;
pub mod scheduler;
pub mod settings;

use events::EngineEvent;
use processor::{DepartureProcessor, ProcessorJob, ProcessorSettings};
use request::{Request, RequestTypeMask};
use scheduler::ScriptScheduler;

#[derive(Debug)]
pub enum EngineError {
    Provider(ProviderError),
    /// A job for this source name is already queued or running.
    DuplicateSourceJob(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Provider(why) => write!(f, "{}", why),
            EngineError::DuplicateSourceJob(source) => {
                write!(f, "a job for source '{}' is already running", source)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ProviderError> for EngineError {
    fn from(why: ProviderError) -> Self {
        EngineError::Provider(why)
    }
}

/// Everything the engine needs from its surroundings. No global state; the
/// context is passed in at construction.
#[derive(Debug, Clone)]
pub struct EngineContext {
    /// Directory holding `<id>.xml` manifests and their scripts.
    pub providers_dir: PathBuf,
    /// Directory for persistent storage, capability cache and log files.
    pub cache_dir: PathBuf,
    /// Maximum number of concurrently running script jobs.
    pub max_jobs: usize,
}

impl EngineContext {
    pub fn new(providers_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            providers_dir: providers_dir.into(),
            cache_dir: cache_dir.into(),
            max_jobs: 4,
        }
    }
}

/// The timetable data engine: accepts requests, runs provider scripts,
/// normalizes and post-processes the records and emits typed events to the
/// subscriber side of the returned channel.
pub struct Engine {
    registry: Arc<ProviderRegistry>,
    scheduler: ScriptScheduler,
    processor: DepartureProcessor,
    stop_indices: Arc<Mutex<HashMap<String, usize>>>,
}

impl Engine {
    /// Builds the engine and spawns its background tasks; must be called
    /// inside a tokio runtime.
    pub fn new(ctx: EngineContext) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (subscriber_tx, subscriber_rx) = mpsc::channel(256);
        let (internal_tx, mut internal_rx) = mpsc::channel::<EngineEvent>(256);

        let registry = Arc::new(ProviderRegistry::new(&ctx.providers_dir, &ctx.cache_dir));
        let scheduler = ScriptScheduler::new(registry.clone(), internal_tx, ctx.max_jobs);
        let processor = DepartureProcessor::start(subscriber_tx.clone());

        let stop_indices: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));

        // Ready events coming out of the scheduler are both forwarded to the
        // subscriber and handed to the background processor, which applies
        // filters and alarms and re-emits the records in batches.
        let forward_processor = processor.clone();
        let forward_indices = stop_indices.clone();
        tokio::spawn(async move {
            let mut updated_sources: HashSet<String> = HashSet::new();
            while let Some(event) = internal_rx.recv().await {
                let stop_index = |source: &str| {
                    forward_indices
                        .lock()
                        .unwrap()
                        .get(source)
                        .copied()
                        .unwrap_or(0)
                };
                match &event {
                    EngineEvent::DeparturesReady(ready) | EngineEvent::ArrivalsReady(ready) => {
                        let updated = !updated_sources.insert(ready.source.clone());
                        forward_processor.enqueue(ProcessorJob::ProcessDepartures {
                            source: ready.source.clone(),
                            stop_index: stop_index(&ready.source),
                            departures: ready.records.clone(),
                            url: ready.url.clone(),
                            updated,
                            already_processed: 0,
                        });
                    }
                    EngineEvent::JourneysReady(ready) => {
                        let updated = !updated_sources.insert(ready.source.clone());
                        forward_processor.enqueue(ProcessorJob::ProcessJourneys {
                            source: ready.source.clone(),
                            journeys: ready.records.clone(),
                            url: ready.url.clone(),
                            updated,
                            already_processed: 0,
                        });
                    }
                    _ => {}
                }
                if subscriber_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        (
            Self {
                registry,
                scheduler,
                processor,
                stop_indices,
            },
            subscriber_rx,
        )
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn processor(&self) -> &DepartureProcessor {
        &self.processor
    }

    /// Issues a timetable request against a provider. At most one job per
    /// source name is in flight.
    pub async fn request(&self, provider_id: &str, request: Request) -> Result<(), EngineError> {
        self.scheduler.enqueue(provider_id, request).await
    }

    /// Binds a source name to a stop settings index so filters and alarms
    /// scoped to that stop apply.
    pub fn set_source_stop_index(&self, source: &str, stop_index: usize) {
        self.stop_indices
            .lock()
            .unwrap()
            .insert(source.to_owned(), stop_index);
    }

    /// Installs new filter, alarm and visibility settings. A processor job
    /// running while the settings change finishes its current batch and is
    /// requeued.
    pub fn update_processor_settings(&self, settings: ProcessorSettings) {
        self.processor.update_settings(settings);
    }

    /// Re-applies the current filters to an already processed record list.
    pub fn filter_departures(
        &self,
        source: &str,
        departures: Vec<model::departure::Departure>,
        shown: HashSet<u64>,
    ) {
        self.processor.enqueue(ProcessorJob::FilterDepartures {
            source: source.to_owned(),
            stop_index: self
                .stop_indices
                .lock()
                .unwrap()
                .get(source)
                .copied()
                .unwrap_or(0),
            departures,
            shown,
        });
    }

    /// Aborts queued and running script jobs matching the mask.
    pub fn abort_jobs(&self, mask: RequestTypeMask) {
        self.scheduler.abort_jobs(mask);
    }

    /// Ends a subscription: pending processor work for the source is dropped
    /// and the published record buffer is forgotten.
    pub fn remove_source(&self, source: &str) {
        self.processor.abort_source(source);
        self.scheduler.forget_source(source);
        self.stop_indices.lock().unwrap().remove(source);
    }
}
