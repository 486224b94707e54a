use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use url::Url;

use super::{BaseId, BaseManager, RequestOptions, Response, Transport, TransportError};

/// Timestamps of one physical request.
#[derive(Debug, Clone, Copy)]
pub struct RequestTiming {
    pub request_start: Instant,
    /// First response header available.
    pub download_start: Option<Instant>,
    pub download_end: Option<Instant>,
    pub bytes: u64,
}

impl RequestTiming {
    fn start() -> Self {
        Self {
            request_start: Instant::now(),
            download_start: None,
            download_end: None,
            bytes: 0,
        }
    }

    pub fn latency(&self) -> Option<Duration> {
        self.download_start
            .map(|start| start.saturating_duration_since(self.request_start))
    }

    /// Throughput in bytes per second.
    pub fn speed(&self) -> Option<f64> {
        let end = self.download_end?;
        let elapsed = end
            .saturating_duration_since(self.download_start.unwrap_or(self.request_start))
            .as_secs_f64();
        if elapsed > 0.0 {
            Some(self.bytes as f64 / elapsed)
        } else {
            None
        }
    }
}

/// One attempt of a [`Download`], bound to a single base.
#[derive(Debug, Clone)]
pub struct Request {
    pub base: BaseId,
    pub url: Url,
    pub options: RequestOptions,
}

#[derive(Debug)]
pub struct RequestOutcome {
    pub base: BaseId,
    pub url: Url,
    pub timing: RequestTiming,
    pub result: Result<Response, TransportError>,
}

impl Request {
    fn is_success(&self, status: u16) -> bool {
        status == 200 || (status == 206 && self.options.byte_range.is_some())
    }

    pub async fn run(self, transport: Arc<dyn Transport>) -> RequestOutcome {
        let mut timing = RequestTiming::start();

        let request = transport.get(&self.url, &self.options);
        let result = match self.options.timeout {
            Some(timeout) => tokio::time::timeout(timeout, request)
                .await
                .unwrap_or(Err(TransportError::Timeout)),
            None => request.await,
        };

        let now = Instant::now();
        let result = result.and_then(|response| {
            timing.download_start = Some(response.headers_at.unwrap_or(now));
            timing.download_end = Some(now);
            timing.bytes = response.body.len() as u64;

            if self.is_success(response.status) {
                Ok(response)
            } else {
                Err(TransportError::Status {
                    status: response.status,
                    url: self.url.to_string(),
                })
            }
        });

        RequestOutcome {
            base: self.base,
            url: self.url,
            timing,
            result,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Pending,
    InFlight,
    Succeeded,
    Failed,
    TimedOut,
    /// Torn down on purpose. Outcomes arriving afterwards are dropped.
    Aborted,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::InFlight)
    }
}

/// What the owner of a [`Download`] has to do next.
#[derive(Debug)]
pub enum Progress {
    /// Send this request and report its outcome back.
    Start(Request),
    Done(Result<Response, TransportError>),
    /// The download was aborted; nothing to deliver.
    Ignored,
}

/// A logical fetch of one resource, retried across bases until one of them
/// succeeds or every base has been tried once.
#[derive(Debug)]
pub struct Download {
    url: Url,
    options: RequestOptions,
    attempted: Vec<BaseId>,
    requests: Vec<RequestTiming>,
    last_failure: Option<TransportError>,
    state: DownloadState,
}

impl Download {
    pub fn new(url: Url, options: RequestOptions) -> Self {
        Self {
            url,
            options,
            attempted: Vec::new(),
            requests: Vec::new(),
            last_failure: None,
            state: DownloadState::Pending,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    /// Timings of every attempt made so far.
    pub fn requests(&self) -> &[RequestTiming] {
        &self.requests
    }

    pub fn perform(&mut self, bases: &mut BaseManager, now: Instant) -> Progress {
        if self.state == DownloadState::Aborted {
            return Progress::Ignored;
        }

        loop {
            let base = match bases.next_base(&self.attempted, now) {
                Some(base) if !self.attempted.contains(&base) => base,
                _ => return self.exhausted(),
            };
            self.attempted.push(base);

            let url = match bases.get(base).map(|b| b.apply(&self.url)) {
                Some(Ok(url)) => url,
                Some(Err(e)) => {
                    tracing::warn!(url = %self.url, %base, error = %e, "Can not rewrite url for base");
                    self.last_failure = Some(TransportError::Network(e.to_string()));
                    continue;
                }
                None => continue,
            };

            tracing::debug!(%url, %base, attempt = self.attempted.len(), "Starting request");
            self.state = DownloadState::InFlight;
            return Progress::Start(Request {
                base,
                url,
                options: self.options.clone(),
            });
        }
    }

    fn exhausted(&mut self) -> Progress {
        let failure = self.last_failure.take().unwrap_or_else(|| {
            TransportError::Network(format!("no base available for {}", self.url))
        });
        self.state = if failure.is_timeout() {
            DownloadState::TimedOut
        } else {
            DownloadState::Failed
        };
        tracing::warn!(url = %self.url, attempts = self.attempted.len(), error = %failure, "Download failed on every base");
        Progress::Done(Err(failure))
    }

    pub fn on_outcome(
        &mut self,
        outcome: RequestOutcome,
        bases: &mut BaseManager,
        now: Instant,
    ) -> Progress {
        if self.state == DownloadState::Aborted {
            return Progress::Ignored;
        }
        self.requests.push(outcome.timing);

        match outcome.result {
            Ok(response) => {
                self.state = DownloadState::Succeeded;
                self.attempted.clear();
                self.last_failure = None;
                Progress::Done(Ok(response))
            }
            Err(error) => {
                tracing::warn!(url = %outcome.url, base = %outcome.base, %error, "Request failed");
                bases.failed(outcome.base, now);
                self.last_failure = Some(error);
                self.perform(bases, now)
            }
        }
    }

    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            self.state = DownloadState::Aborted;
        }
    }
}
