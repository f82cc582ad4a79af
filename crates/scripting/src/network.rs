use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::{JobEvent, JobEventSender};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Events emitted for asynchronous requests, delivered to the job loop.
#[derive(Debug)]
pub enum NetworkEvent {
    Started {
        id: u64,
    },
    Finished {
        id: u64,
        callback: Option<String>,
        text: String,
        size: usize,
    },
    FinishedNoDecoding {
        id: u64,
        callback: String,
        data: Vec<u8>,
    },
    ReadyRead {
        id: u64,
        callback: String,
        text: String,
    },
    Aborted {
        id: u64,
        callback: Option<String>,
    },
    AllRequestsFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
    Head,
}

#[derive(Debug, Default)]
struct RequestState {
    url: String,
    headers: Vec<(String, String)>,
    post_data: Option<Vec<u8>>,
    started: bool,
    finished: bool,
    aborted: bool,
    on_finished: Option<String>,
    on_finished_no_decoding: Option<String>,
    on_ready_read: Option<String>,
    on_aborted: Option<String>,
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(|part| part.trim())
        .find_map(|part| part.strip_prefix("charset="))
        .map(|charset| charset.trim_matches('"').to_owned())
}

fn decode_text(bytes: &[u8], content_type: Option<&str>, fallback: Option<&str>) -> String {
    let charset = content_type
        .and_then(charset_from_content_type)
        .or_else(|| fallback.map(|s| s.to_owned()));
    if let Some(charset) = charset {
        if let Some(encoding) = encoding_rs::Encoding::for_label(charset.as_bytes()) {
            let (text, _, _) = encoding.decode(bytes);
            return text.into_owned();
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

fn encode_text(text: &str, charset: &str) -> Vec<u8> {
    match encoding_rs::Encoding::for_label(charset.as_bytes()) {
        Some(encoding) => encoding.encode(text).0.into_owned(),
        None => text.as_bytes().to_vec(),
    }
}

/// A mutable, single-shot request. Headers and POST body can be set until
/// the request is started.
#[derive(Clone)]
pub struct NetworkRequest {
    id: u64,
    state: Arc<Mutex<RequestState>>,
    token: CancellationToken,
}

impl NetworkRequest {
    fn new(id: u64, url: String) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(RequestState {
                url,
                ..Default::default()
            })),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> String {
        self.state.lock().unwrap().url.clone()
    }

    pub fn is_running(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.started && !state.finished && !state.aborted
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().unwrap().finished
    }

    /// Encodes the body with the given charset (UTF-8 when omitted) and
    /// stores a matching Content-Type header if none is set.
    pub fn set_post_data(&self, data: &str, charset: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        if state.started {
            log::warn!("cannot modify an already started request");
            return;
        }
        let header_charset = state
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .and_then(|(_, value)| charset_from_content_type(value));
        let charset = charset
            .map(|c| c.to_owned())
            .or(header_charset)
            .unwrap_or_else(|| "utf-8".to_owned());
        state.post_data = Some(encode_text(data, &charset));
        let has_content_type = state
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
        if !has_content_type {
            state.headers.push((
                "Content-Type".to_owned(),
                format!("application/x-www-form-urlencoded; charset={}", charset),
            ));
        }
    }

    pub fn set_header(&self, name: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        if state.started {
            log::warn!("cannot modify an already started request");
            return;
        }
        if let Some(existing) = state
            .headers
            .iter_mut()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
        {
            existing.1 = value.to_owned();
        } else {
            state.headers.push((name.to_owned(), value.to_owned()));
        }
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn set_on_finished(&self, function: &str) {
        self.state.lock().unwrap().on_finished = Some(function.to_owned());
    }

    pub fn set_on_finished_no_decoding(&self, function: &str) {
        self.state.lock().unwrap().on_finished_no_decoding = Some(function.to_owned());
    }

    pub fn set_on_ready_read(&self, function: &str) {
        self.state.lock().unwrap().on_ready_read = Some(function.to_owned());
    }

    pub fn set_on_aborted(&self, function: &str) {
        self.state.lock().unwrap().on_aborted = Some(function.to_owned());
    }
}

struct NetworkInner {
    handle: Handle,
    client: reqwest::Client,
    fallback_charset: Option<String>,
    events: JobEventSender,
    in_flight: Mutex<HashSet<u64>>,
    running: Mutex<Vec<NetworkRequest>>,
    next_id: AtomicU64,
    last_url: Mutex<Option<String>>,
    last_url_datetime: Mutex<Option<DateTime<Local>>>,
}

/// The plugin-facing HTTP client of one job. Asynchronous requests run as
/// tasks on the shared runtime; completion is reported through the job event
/// channel.
#[derive(Clone)]
pub struct Network {
    inner: Arc<NetworkInner>,
}

impl Network {
    pub fn new(
        handle: Handle,
        fallback_charset: Option<String>,
        events: JobEventSender,
    ) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                handle,
                client: reqwest::Client::new(),
                fallback_charset,
                events,
                in_flight: Mutex::new(HashSet::new()),
                running: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                last_url: Mutex::new(None),
                last_url_datetime: Mutex::new(None),
            }),
        }
    }

    pub fn fallback_charset(&self) -> Option<String> {
        self.inner.fallback_charset.clone()
    }

    pub fn last_url(&self) -> Option<String> {
        self.inner.last_url.lock().unwrap().clone()
    }

    pub fn last_url_datetime(&self) -> Option<DateTime<Local>> {
        *self.inner.last_url_datetime.lock().unwrap()
    }

    fn record_url(&self, url: &str) {
        *self.inner.last_url.lock().unwrap() = Some(url.to_owned());
        *self.inner.last_url_datetime.lock().unwrap() = Some(Local::now());
    }

    pub fn create_request(&self, url: &str) -> NetworkRequest {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        NetworkRequest::new(id, url.to_owned())
    }

    pub fn get(&self, request: &NetworkRequest) {
        self.start(Method::Get, request);
    }

    pub fn post(&self, request: &NetworkRequest) {
        self.start(Method::Post, request);
    }

    pub fn head(&self, request: &NetworkRequest) {
        self.start(Method::Head, request);
    }

    fn start(&self, method: Method, request: &NetworkRequest) {
        let (url, headers, post_data) = {
            let mut state = request.state.lock().unwrap();
            if state.started {
                log::warn!("request {} was already started", state.url);
                return;
            }
            state.started = true;
            (state.url.clone(), state.headers.clone(), state.post_data.clone())
        };
        self.record_url(&url);
        self.inner.in_flight.lock().unwrap().insert(request.id);
        self.inner.running.lock().unwrap().push(request.clone());
        self
            .inner
            .events
            .send(JobEvent::Network(NetworkEvent::Started { id: request.id }));

        let inner = self.inner.clone();
        let request = request.clone();
        self.inner.handle.spawn(async move {
            let event = tokio::select! {
                _ = request.token.cancelled() => {
                    let state = request.state.lock().unwrap();
                    NetworkEvent::Aborted {
                        id: request.id,
                        callback: state.on_aborted.clone(),
                    }
                }
                result = fetch(&inner, method, &url, &headers, post_data, &request) => result,
            };
            let aborted = matches!(event, NetworkEvent::Aborted { .. });
            {
                let mut state = request.state.lock().unwrap();
                state.finished = !aborted;
                state.aborted = aborted;
            }
            inner.events.send(JobEvent::Network(event));
            finish_request(&inner, request.id);
        });
    }

    /// Fetches a URL, blocking the calling job thread. Timeouts and errors
    /// surface as an empty string, as does a zero byte response.
    pub fn get_synchronous(&self, url: &str, timeout_ms: u64) -> String {
        self.record_url(url);
        let client = self.inner.client.clone();
        let fallback = self.inner.fallback_charset.clone();
        let url = url.to_owned();
        let request = async move {
            let response = client.get(url.as_str()).send().await?;
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_owned());
            let bytes = response.bytes().await?;
            Ok::<String, reqwest::Error>(decode_text(
                &bytes,
                content_type.as_deref(),
                fallback.as_deref(),
            ))
        };
        let result = self
            .inner
            .handle
            .block_on(tokio::time::timeout(Duration::from_millis(timeout_ms), request));
        match result {
            Ok(Ok(text)) => text,
            Ok(Err(why)) => {
                log::warn!("synchronous request failed: {}", why);
                String::new()
            }
            Err(_) => {
                log::warn!("synchronous request timed out after {} ms", timeout_ms);
                String::new()
            }
        }
    }

    pub fn abort_all_requests(&self) {
        let running = self.inner.running.lock().unwrap().clone();
        for request in running {
            request.abort();
        }
    }

    pub fn has_running_requests(&self) -> bool {
        !self.inner.in_flight.lock().unwrap().is_empty()
    }

    pub fn running_request_count(&self) -> usize {
        self.inner.in_flight.lock().unwrap().len()
    }
}

fn finish_request(inner: &Arc<NetworkInner>, id: u64) {
    let mut in_flight = inner.in_flight.lock().unwrap();
    in_flight.remove(&id);
    inner
        .running
        .lock()
        .unwrap()
        .retain(|request| request.id != id);
    if in_flight.is_empty() {
        inner
            .events
            .send(JobEvent::Network(NetworkEvent::AllRequestsFinished));
    }
}

async fn fetch(
    inner: &Arc<NetworkInner>,
    method: Method,
    url: &str,
    headers: &[(String, String)],
    post_data: Option<Vec<u8>>,
    request: &NetworkRequest,
) -> NetworkEvent {
    let reqwest_method = match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Head => reqwest::Method::HEAD,
    };
    let mut builder = inner.client.request(reqwest_method, url);
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = post_data {
        builder = builder.body(body);
    }

    let (on_finished, on_finished_no_decoding, on_ready_read, on_aborted) = {
        let state = request.state.lock().unwrap();
        (
            state.on_finished.clone(),
            state.on_finished_no_decoding.clone(),
            state.on_ready_read.clone(),
            state.on_aborted.clone(),
        )
    };

    let response = match builder.send().await {
        Ok(response) => response,
        Err(why) => {
            log::warn!("request for {} failed: {}", url, why);
            return NetworkEvent::Aborted {
                id: request.id,
                callback: on_aborted,
            };
        }
    };
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_owned());

    let mut data = Vec::new();
    let mut response = response;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if let Some(callback) = &on_ready_read {
                    inner.events.send(JobEvent::Network(NetworkEvent::ReadyRead {
                        id: request.id,
                        callback: callback.clone(),
                        text: decode_text(
                            &chunk,
                            content_type.as_deref(),
                            inner.fallback_charset.as_deref(),
                        ),
                    }));
                }
                data.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(why) => {
                log::warn!("reading response of {} failed: {}", url, why);
                return NetworkEvent::Aborted {
                    id: request.id,
                    callback: on_aborted,
                };
            }
        }
    }

    if let Some(callback) = on_finished_no_decoding {
        inner
            .events
            .send(JobEvent::Network(NetworkEvent::FinishedNoDecoding {
                id: request.id,
                callback,
                data: data.clone(),
            }));
    }
    let size = data.len();
    NetworkEvent::Finished {
        id: request.id,
        callback: on_finished,
        text: decode_text(
            &data,
            content_type.as_deref(),
            inner.fallback_charset.as_deref(),
        ),
        size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charset_is_read_from_content_type() {
        assert_eq!(
            charset_from_content_type("text/html; charset=ISO-8859-1"),
            Some("ISO-8859-1".to_owned())
        );
        assert_eq!(charset_from_content_type("text/html"), None);
    }

    #[test]
    fn decodes_with_declared_charset() {
        // "Grüße" in latin1
        let latin1 = [b'G', b'r', 0xfc, 0xdf, b'e'];
        assert_eq!(
            decode_text(&latin1, Some("text/html; charset=iso-8859-1"), None),
            "Grüße"
        );
        // falls back to the provider charset
        assert_eq!(decode_text(&latin1, None, Some("iso-8859-1")), "Grüße");
        // utf-8 by default
        assert_eq!(decode_text("Grüße".as_bytes(), None, None), "Grüße");
    }

    #[test]
    fn encode_round_trips_via_decode() {
        let encoded = encode_text("Grüße", "iso-8859-1");
        assert_eq!(
            decode_text(&encoded, Some("x; charset=iso-8859-1"), None),
            "Grüße"
        );
    }

    #[test]
    fn request_headers_and_post_data() {
        let (events, _receiver) = crate::JobEventSender::channel();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let network = Network::new(runtime.handle().clone(), None, events);
        let request = network.create_request("http://example.com/post");
        request.set_header("X-Test", "1");
        request.set_header("x-test", "2");
        assert_eq!(request.header("X-TEST"), Some("2".to_owned()));
        request.set_post_data("a=b", None);
        assert!(request
            .header("Content-Type")
            .unwrap()
            .contains("charset=utf-8"));
        assert!(!request.is_running());
    }

    #[test]
    fn in_flight_accounting_is_empty_initially() {
        let (events, _receiver) = crate::JobEventSender::channel();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let network = Network::new(runtime.handle().clone(), None, events);
        assert!(!network.has_running_requests());
        assert_eq!(network.running_request_count(), 0);
        assert_eq!(network.last_url(), None);
    }
}
