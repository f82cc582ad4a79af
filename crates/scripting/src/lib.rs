pub mod capabilities;
pub mod convert;
pub mod error;
pub mod helper;
pub mod host;
pub mod logfile;
pub mod network;
pub mod provider;
pub mod registry;
pub mod result;
pub mod storage;

/// Events delivered to the job loop while a provider script runs.
#[derive(Debug)]
pub enum JobEvent {
    Network(network::NetworkEvent),
    /// The script asked for the buffered records to be flushed to
    /// subscribers; carries the buffer as of the publish call.
    Publish {
        records: Vec<model::info::TimetableData>,
    },
    /// A record carried a key or value the result sink could not use.
    InvalidData { message: String },
}

/// Sending half of the job event channel, shareable with the script engine.
#[derive(Debug, Clone)]
pub struct JobEventSender(std::sync::Arc<std::sync::Mutex<std::sync::mpsc::Sender<JobEvent>>>);

pub type JobEventReceiver = std::sync::mpsc::Receiver<JobEvent>;

impl JobEventSender {
    pub fn channel() -> (JobEventSender, JobEventReceiver) {
        let (tx, rx) = std::sync::mpsc::channel();
        (JobEventSender(std::sync::Arc::new(std::sync::Mutex::new(tx))), rx)
    }

    /// Sends an event; a dropped receiver is fine, the job is simply gone.
    pub fn send(&self, event: JobEvent) {
        let _ = self.0.lock().unwrap().send(event);
    }
}
