#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use nagare::{manifest::ContentType, sink::BufferSink, NagareError, NagareResult, PlayerEvent};
use tokio::sync::{mpsc, Mutex};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("nagare=trace,wiremock=debug")
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Create(ContentType, Option<String>),
    Append(ContentType, Bytes),
    Remove(ContentType, f64, f64),
}

/// Sink that records every call in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
    reject_appends: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            reject_appends: true,
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().await.clone()
    }

    /// Appended payloads of one source, as text.
    pub async fn appended(&self, content_type: ContentType) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                SinkCall::Append(ct, data) if *ct == content_type => {
                    Some(String::from_utf8_lossy(data).into_owned())
                }
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl BufferSink for RecordingSink {
    async fn create(
        &self,
        content_type: ContentType,
        mime_type: Option<&str>,
        _codecs: Option<&str>,
    ) -> NagareResult<()> {
        self.calls
            .lock()
            .await
            .push(SinkCall::Create(content_type, mime_type.map(str::to_string)));
        Ok(())
    }

    async fn append(&self, content_type: ContentType, data: Bytes) -> NagareResult<()> {
        if self.reject_appends {
            return Err(NagareError::Sink("quota exceeded".to_string()));
        }
        self.calls
            .lock()
            .await
            .push(SinkCall::Append(content_type, data));
        Ok(())
    }

    async fn remove(&self, content_type: ContentType, start: f64, end: f64) -> NagareResult<()> {
        self.calls
            .lock()
            .await
            .push(SinkCall::Remove(content_type, start, end));
        Ok(())
    }
}

/// Static presentation of `count` segments of 200ms each, one video
/// representation with an initialization segment.
pub fn static_mpd(count: u64, min_buffer_ms: u64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT{}S" minBufferTime="PT{}S">
  <Period id="0">
    <AdaptationSet mimeType="video/mp4" codecs="avc1.64001f">
      <SegmentTemplate media="video/seg-$Number$.m4s" initialization="video/init.mp4" timescale="1000" duration="200" />
      <Representation id="v0" bandwidth="500000" width="1280" height="720" />
    </AdaptationSet>
  </Period>
</MPD>"#,
        count as f64 * 0.2,
        min_buffer_ms as f64 / 1000.0,
    )
}

pub async fn mount_body(server: &MockServer, at: &str, body: impl Into<Vec<u8>>) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.into()))
        .mount(server)
        .await;
}

/// Manifest, init and `count` media segments whose bodies are `seg-N`.
pub async fn mount_static(server: &MockServer, count: u64, min_buffer_ms: u64) {
    mount_body(server, "/a.mpd", static_mpd(count, min_buffer_ms)).await;
    mount_body(server, "/video/init.mp4", "init").await;
    for number in 1..=count {
        mount_body(
            server,
            &format!("/video/seg-{number}.m4s"),
            format!("seg-{number}"),
        )
        .await;
    }
}

/// Collect events until `stop` matches one of them.
pub async fn events_until(
    events: &mut mpsc::UnboundedReceiver<PlayerEvent>,
    stop: impl Fn(&PlayerEvent) -> bool,
) -> Vec<PlayerEvent> {
    let mut seen = Vec::new();
    let result = tokio::time::timeout(Duration::from_secs(15), async {
        while let Some(event) = events.recv().await {
            let done = stop(&event);
            seen.push(event);
            if done {
                return;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "timed out, events so far: {seen:?}");
    seen
}
