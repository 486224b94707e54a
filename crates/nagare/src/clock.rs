use chrono::{DateTime, TimeDelta, Utc};
use url::Url;

use crate::{
    manifest::UtcTiming,
    net::{RequestOptions, Transport, TransportError},
    NagareError, NagareResult,
};

const SCHEME_DIRECT: &str = "urn:mpeg:dash:utc:direct:2014";
const SCHEME_HTTP_XSDATE: &str = "urn:mpeg:dash:utc:http-xsdate:2014";
const SCHEME_HTTP_ISO: &str = "urn:mpeg:dash:utc:http-iso:2014";
const SCHEME_HTTP_HEAD: &str = "urn:mpeg:dash:utc:http-head:2014";

/// Wall clock, optionally corrected against the server's `UTCTiming` source.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    /// How much time the local clock is behind the remote clock
    offset: TimeDelta,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(offset: TimeDelta) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> TimeDelta {
        self.offset
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset
    }

    /// Seconds elapsed since `origin` on this clock.
    pub fn seconds_since(&self, origin: DateTime<Utc>) -> f64 {
        (self.now() - origin).num_milliseconds() as f64 / 1000.0
    }

    fn set_time(
        &mut self,
        remote_now: DateTime<Utc>,
        before_request: DateTime<Utc>,
        after_request: DateTime<Utc>,
    ) {
        // the remote time was taken roughly halfway through the round trip
        let half_rtt = (after_request - before_request) / 2;
        self.offset = remote_now + half_rtt - after_request;
        tracing::info!(offset_milliseconds = %self.offset.num_milliseconds(), "Clock time set to {}, offset calculated", remote_now);
    }

    /// Try the timing sources in order until one of them answers.
    ///
    /// `options.timeout` bounds every HTTP timing request.
    pub async fn sync(
        &mut self,
        timing: &[UtcTiming],
        transport: &dyn Transport,
        options: &RequestOptions,
    ) -> NagareResult<()> {
        if timing.is_empty() {
            tracing::warn!("No UTCTiming elements found in MPD, using local time.");
            return Ok(());
        }

        let mut last_error = None;
        for timing in timing {
            tracing::debug!(scheme = %timing.scheme_id_uri, value = %timing.value.as_deref().unwrap_or(""), "Attempting to sync time with scheme");
            match self.sync_one(timing, transport, options).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(scheme = %timing.scheme_id_uri, error = %e, "Time sync failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            NagareError::InvalidTimingSchema("All supported time sync methods failed".to_string())
        }))
    }

    async fn sync_one(
        &mut self,
        timing: &UtcTiming,
        transport: &dyn Transport,
        options: &RequestOptions,
    ) -> NagareResult<()> {
        let scheme = timing.scheme_id_uri.as_str();
        let value = timing
            .value
            .as_deref()
            .ok_or_else(|| NagareError::InvalidTimingSchema(format!("Missing value for {scheme}")))?;

        match scheme {
            SCHEME_DIRECT => {
                let now = Utc::now();
                self.set_time(parse_iso8601(value)?, now, now);
            }
            SCHEME_HTTP_XSDATE | SCHEME_HTTP_ISO | SCHEME_HTTP_HEAD => {
                let url = Url::parse(value)?;
                let before_request = Utc::now();
                let request = transport.get(&url, options);
                let response = match options.timeout {
                    Some(timeout) => tokio::time::timeout(timeout, request)
                        .await
                        .unwrap_or(Err(TransportError::Timeout))?,
                    None => request.await?,
                };
                let after_request = Utc::now();
                if !(200..300).contains(&response.status) {
                    return Err(NagareError::RequestFailed {
                        url: url.to_string(),
                        source: TransportError::Status {
                            status: response.status,
                            url: url.to_string(),
                        },
                    });
                }

                let remote_now = if scheme == SCHEME_HTTP_HEAD {
                    let date = response.date.as_deref().ok_or_else(|| {
                        NagareError::DateTimeParsing("Missing Date header".to_string())
                    })?;
                    DateTime::parse_from_rfc2822(date)?.with_timezone(&Utc)
                } else {
                    let text = String::from_utf8_lossy(&response.body);
                    parse_iso8601(text.trim())?
                };
                self.set_time(remote_now, before_request, after_request);
            }
            "urn:mpeg:dash:utc:http-ntp:2014" | "urn:mpeg:dash:utc:ntp:2014" => {
                return Err(NagareError::InvalidTimingSchema(format!(
                    "Unsupported scheme: {scheme}"
                )));
            }
            others => return Err(NagareError::InvalidTimingSchema(others.into())),
        }
        Ok(())
    }
}

fn parse_iso8601(text: &str) -> NagareResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // xsdate allows a bare Z suffix without fractional seconds
            DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%SZ").map(|dt| dt.with_timezone(&Utc))
        })?)
}
