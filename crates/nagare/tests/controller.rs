mod common;

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use common::*;
use nagare::{
    manifest::ContentType,
    net::{BaseConfig, HttpTransport},
    Controller, ControllerOptions, NagareError, PlayerEvent, PlayerState,
};
use url::Url;
use wiremock::{
    matchers::{method, path, path_regex},
    Mock, MockServer, Respond, ResponseTemplate,
};

fn options() -> ControllerOptions {
    ControllerOptions {
        tick_interval_ms: 10,
        request_timeout_secs: 5.0,
        manifest_retry_delay_ms: 10,
        ..Default::default()
    }
}

fn new_controller(
    server: &MockServer,
    sink: &RecordingSink,
    options: ControllerOptions,
) -> (
    Controller,
    tokio::sync::mpsc::UnboundedReceiver<PlayerEvent>,
) {
    let url = Url::parse(&format!("{}/a.mpd", server.uri())).unwrap();
    Controller::new(
        url,
        Arc::new(HttpTransport::default()),
        Arc::new(sink.clone()),
        options,
    )
}

fn states(events: &[PlayerEvent]) -> Vec<PlayerState> {
    events
        .iter()
        .filter_map(|event| match event {
            PlayerEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_static_presentation_is_buffered_in_order() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    mount_static(&server, 5, 500).await;

    let sink = RecordingSink::new();
    let (controller, mut events) = new_controller(&server, &sink, options());
    let handle = controller.spawn();

    let seen = events_until(&mut events, |e| *e == PlayerEvent::Ended).await;
    assert_eq!(
        states(&seen),
        [
            PlayerState::FirstMpdLoaded,
            PlayerState::SourceBuffersCreated,
            PlayerState::SourcesInitialised,
            PlayerState::BufferAvailable,
        ]
    );
    assert!(seen.contains(&PlayerEvent::Playing { position: 0.0 }));

    let appended: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::SegmentAppended { start, .. } => Some(*start),
            _ => None,
        })
        .collect();
    assert_eq!(appended.len(), 5);
    for pair in appended.windows(2) {
        assert!(pair[0] < pair[1]);
    }

    let calls = sink.calls().await;
    assert_eq!(
        calls[0],
        SinkCall::Create(ContentType::Video, Some("video/mp4".to_string()))
    );
    let data = sink.appended(ContentType::Video).await;
    assert_eq!(
        data,
        ["init", "seg-1", "seg-2", "seg-3", "seg-4", "seg-5"]
    );
    // static buffers are never trimmed
    assert!(!calls.iter().any(|c| matches!(c, SinkCall::Remove(..))));

    handle.wait().await?;
    Ok(())
}

#[tokio::test]
async fn test_failed_segment_stalls_source() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    mount_body(&server, "/a.mpd", static_mpd(5, 500)).await;
    mount_body(&server, "/video/init.mp4", "init").await;
    for number in [1, 2, 4, 5] {
        mount_body(&server, &format!("/video/seg-{number}.m4s"), format!("seg-{number}")).await;
    }

    let sink = RecordingSink::new();
    let (controller, mut events) = new_controller(&server, &sink, options());
    let handle = controller.spawn();

    let seen = events_until(&mut events, |e| matches!(e, PlayerEvent::Stalled { .. })).await;
    assert!(matches!(
        seen.last(),
        Some(PlayerEvent::Stalled {
            content_type: ContentType::Video,
            ..
        })
    ));
    assert!(!seen.contains(&PlayerEvent::StateChanged(PlayerState::BufferAvailable)));
    assert_eq!(handle.state(), PlayerState::SourcesInitialised);

    handle.destruct().await?;
    assert_eq!(sink.appended(ContentType::Video).await.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_failed_segment_skipped_when_configured() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    mount_body(&server, "/a.mpd", static_mpd(5, 500)).await;
    mount_body(&server, "/video/init.mp4", "init").await;
    for number in [1, 2, 4, 5] {
        mount_body(&server, &format!("/video/seg-{number}.m4s"), format!("seg-{number}")).await;
    }

    let sink = RecordingSink::new();
    let options = ControllerOptions {
        skip_failed_segments: true,
        ..options()
    };
    let (controller, mut events) = new_controller(&server, &sink, options);
    let handle = controller.spawn();

    let seen = events_until(&mut events, |e| *e == PlayerEvent::Ended).await;
    assert!(seen.iter().any(|e| matches!(e, PlayerEvent::Warning(_))));
    assert!(!seen.iter().any(|e| matches!(e, PlayerEvent::Stalled { .. })));

    let data = sink.appended(ContentType::Video).await;
    assert_eq!(
        data,
        ["init", "seg-1", "seg-2", "seg-4", "seg-5"]
    );
    handle.wait().await?;
    Ok(())
}

#[tokio::test]
async fn test_rejected_initialization_stalls() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    mount_static(&server, 5, 500).await;

    let sink = RecordingSink::rejecting();
    let (controller, mut events) = new_controller(&server, &sink, options());
    let handle = controller.spawn();

    events_until(&mut events, |e| matches!(e, PlayerEvent::Stalled { .. })).await;
    assert_eq!(handle.state(), PlayerState::SourceBuffersCreated);
    handle.destruct().await?;
    Ok(())
}

#[tokio::test]
async fn test_segments_fail_over_to_next_base() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    mount_static(&server, 5, 500).await;

    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&broken)
        .await;

    let options = ControllerOptions {
        bases: vec![
            BaseConfig::host(format!("127.0.0.1:{}", broken.address().port())),
            BaseConfig::host(format!("127.0.0.1:{}", server.address().port())),
        ],
        ..options()
    };
    let sink = RecordingSink::new();
    let (controller, mut events) = new_controller(&server, &sink, options);
    let handle = controller.spawn();

    let seen = events_until(&mut events, |e| *e == PlayerEvent::Ended).await;
    assert!(!seen.iter().any(|e| matches!(e, PlayerEvent::Stalled { .. })));
    assert_eq!(sink.appended(ContentType::Video).await.len(), 6);

    // the manifest itself is always fetched from its own location
    let broken_requests = broken.received_requests().await.unwrap();
    assert!(!broken_requests.is_empty());
    assert!(broken_requests.iter().all(|r| r.url.path() != "/a.mpd"));

    handle.wait().await?;
    Ok(())
}

#[tokio::test]
async fn test_unavailable_manifest_gives_up() {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.mpd"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let sink = RecordingSink::new();
    let options = ControllerOptions {
        manifest_retries: 2,
        ..options()
    };
    let (controller, _events) = new_controller(&server, &sink, options);
    let result = controller.spawn().wait().await;

    assert!(matches!(result, Err(NagareError::ManifestUnavailable(3))));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    assert!(sink.calls().await.is_empty());
}

#[tokio::test]
async fn test_empty_manifest_is_retried() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.mpd"))
        .respond_with(ResponseTemplate::new(200).set_body_string("  "))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_static(&server, 2, 200).await;

    let sink = RecordingSink::new();
    let (controller, mut events) = new_controller(&server, &sink, options());
    let handle = controller.spawn();

    events_until(&mut events, |e| *e == PlayerEvent::Ended).await;
    let manifest_requests = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/a.mpd")
        .count();
    assert_eq!(manifest_requests, 2);
    handle.wait().await?;
    Ok(())
}

#[tokio::test]
async fn test_destruct_drops_in_flight_requests() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    mount_body(&server, "/a.mpd", static_mpd(5, 500)).await;
    mount_body(&server, "/video/init.mp4", "init").await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/video/seg-\d+\.m4s$"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let sink = RecordingSink::new();
    let (controller, mut events) = new_controller(&server, &sink, options());
    let handle = controller.spawn();

    events_until(&mut events, |e| {
        *e == PlayerEvent::StateChanged(PlayerState::SourcesInitialised)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(1), handle.destruct()).await??;

    let mut remaining = Vec::new();
    while let Ok(event) = events.try_recv() {
        remaining.push(event);
    }
    assert!(
        !remaining
            .iter()
            .any(|e| matches!(e, PlayerEvent::Stalled { .. } | PlayerEvent::Warning(_))),
        "{remaining:?}"
    );
    assert_eq!(sink.appended(ContentType::Video).await.len(), 1);
    Ok(())
}

fn live_mpd(availability_start_time: &str) -> String {
    format!(
        r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic" availabilityStartTime="{availability_start_time}" minimumUpdatePeriod="PT1S" timeShiftBufferDepth="PT10S" minBufferTime="PT2S">
  <Period id="p0" start="PT0S">
    <AdaptationSet mimeType="video/mp4">
      <SegmentTemplate media="live/seg-$Number$.m4s" initialization="live/init.mp4" timescale="1" duration="1" startNumber="1" />
      <Representation id="v0" bandwidth="500000" />
    </AdaptationSet>
  </Period>
</MPD>"#
    )
}

#[tokio::test]
async fn test_live_starts_behind_live_edge_and_reloads() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    let availability_start_time =
        (Utc::now() - TimeDelta::seconds(60)).to_rfc3339_opts(SecondsFormat::Secs, true);
    mount_body(&server, "/a.mpd", live_mpd(&availability_start_time)).await;
    mount_body(&server, "/live/init.mp4", "init").await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/live/seg-\d+\.m4s$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("media"))
        .mount(&server)
        .await;

    let sink = RecordingSink::new();
    let (controller, mut events) = new_controller(&server, &sink, options());
    let handle = controller.spawn();

    let seen = events_until(&mut events, |e| matches!(e, PlayerEvent::Playing { .. })).await;
    let first = seen
        .iter()
        .find_map(|e| match e {
            PlayerEvent::SegmentAppended { start, .. } => Some(*start),
            _ => None,
        })
        .expect("a segment before playback");
    // half the time shift buffer behind a live edge of ~60s
    assert!((54.0..=56.0).contains(&first), "first segment at {first}");

    events_until(&mut events, |e| {
        *e == PlayerEvent::ManifestLoaded { reload: true }
    })
    .await;

    handle.destruct().await?;
    Ok(())
}

fn timeline_mpd(availability_start_time: &str, listed: i64, extra: &str) -> String {
    format!(
        r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic" availabilityStartTime="{availability_start_time}" minimumUpdatePeriod="PT1S" timeShiftBufferDepth="PT10S" minBufferTime="PT1S">
  <Period id="p0" start="PT0S">
    <AdaptationSet mimeType="video/mp4">
      <SegmentTemplate media="live/$Time$.m4s" initialization="live/init.mp4" timescale="1">
        <SegmentTimeline><S t="0" d="1" r="{repeat}" /></SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v0" bandwidth="500000" />
    </AdaptationSet>
  </Period>
  {extra}
</MPD>"#,
        repeat = listed - 1,
    )
}

/// Lists every segment that has ended by the time of the request.
struct GrowingTimeline {
    availability_start_time: DateTime<Utc>,
}

impl Respond for GrowingTimeline {
    fn respond(&self, _: &wiremock::Request) -> ResponseTemplate {
        let listed = (Utc::now() - self.availability_start_time).num_seconds();
        let ast = self
            .availability_start_time
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        ResponseTemplate::new(200).set_body_string(timeline_mpd(&ast, listed, ""))
    }
}

async fn mount_live_media(server: &MockServer) {
    mount_body(server, "/live/init.mp4", "init").await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/live/\d+\.m4s$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("media"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_live_timeline_keeps_buffering_past_listed_segments() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    // whole seconds, so the first manifest lists exactly up to the live edge
    let now = Utc::now();
    let availability_start_time =
        now - TimeDelta::seconds(60) - TimeDelta::nanoseconds(now.timestamp_subsec_nanos() as i64);
    Mock::given(method("GET"))
        .and(path("/a.mpd"))
        .respond_with(GrowingTimeline {
            availability_start_time,
        })
        .mount(&server)
        .await;
    mount_live_media(&server).await;

    let sink = RecordingSink::new();
    let (controller, mut events) = new_controller(&server, &sink, options());
    let handle = controller.spawn();

    // the first manifest ends at the live edge, around 60s
    let seen = events_until(&mut events, |e| {
        matches!(e, PlayerEvent::SegmentAppended { start, .. } if *start >= 61.0)
    })
    .await;
    assert!(
        matches!(seen.last(), Some(PlayerEvent::SegmentAppended { .. })),
        "{seen:?}"
    );
    assert!(!seen.contains(&PlayerEvent::Ended));
    assert!(seen.contains(&PlayerEvent::ManifestLoaded { reload: true }));
    assert!(!handle.is_finished());

    let appended: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::SegmentAppended { start, .. } => Some(*start),
            _ => None,
        })
        .collect();
    for pair in appended.windows(2) {
        assert_eq!(pair[1] - pair[0], 1.0);
    }

    // played segments leave the buffer front to back
    let removed: Vec<_> = sink
        .calls()
        .await
        .into_iter()
        .filter_map(|call| match call {
            SinkCall::Remove(ContentType::Video, start, end) => Some((start, end)),
            _ => None,
        })
        .collect();
    assert!(!removed.is_empty());
    assert_eq!(removed[0].0, appended[0]);
    for pair in removed.windows(2) {
        assert_eq!(pair[1].0, pair[0].1);
    }

    handle.destruct().await?;
    Ok(())
}

#[tokio::test]
async fn test_slow_clock_source_does_not_block_startup() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    let availability_start_time =
        (Utc::now() - TimeDelta::seconds(60)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let timing = format!(
        r#"<UTCTiming schemeIdUri="urn:mpeg:dash:utc:http-iso:2014" value="{}/time" />"#,
        server.uri()
    );
    mount_body(
        &server,
        "/a.mpd",
        timeline_mpd(&availability_start_time, 60, &timing),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/time"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(Utc::now().to_rfc3339())
                .set_delay(Duration::from_secs(60)),
        )
        .mount(&server)
        .await;
    mount_live_media(&server).await;

    let sink = RecordingSink::new();
    let options = ControllerOptions {
        request_timeout_secs: 1.0,
        ..options()
    };
    let (controller, mut events) = new_controller(&server, &sink, options);
    let started = tokio::time::Instant::now();
    let handle = controller.spawn();

    events_until(&mut events, |e| {
        *e == PlayerEvent::ManifestLoaded { reload: false }
    })
    .await;
    assert!(started.elapsed() < Duration::from_secs(5));

    events_until(&mut events, |e| matches!(e, PlayerEvent::Playing { .. })).await;
    handle.destruct().await?;
    Ok(())
}

fn two_period_mpd() -> String {
    let period = |id: u32| {
        format!(
            r#"  <Period id="{id}" duration="PT0.4S">
    <AdaptationSet mimeType="video/mp4">
      <SegmentTemplate media="p{id}/seg-$Number$.m4s" initialization="p{id}/init.mp4" timescale="1000" duration="200" />
      <Representation id="v0" bandwidth="500000" />
    </AdaptationSet>
  </Period>"#
        )
    };
    format!(
        r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT0.8S" minBufferTime="PT0.2S">
{}
{}
</MPD>"#,
        period(0),
        period(1)
    )
}

#[tokio::test]
async fn test_period_change_appends_new_initialization() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    mount_body(&server, "/a.mpd", two_period_mpd()).await;
    for id in 0..2 {
        mount_body(&server, &format!("/p{id}/init.mp4"), format!("init-{id}")).await;
        for number in 1..=2 {
            mount_body(
                &server,
                &format!("/p{id}/seg-{number}.m4s"),
                format!("p{id}-{number}"),
            )
            .await;
        }
    }

    let sink = RecordingSink::new();
    let (controller, mut events) = new_controller(&server, &sink, options());
    let handle = controller.spawn();

    events_until(&mut events, |e| *e == PlayerEvent::Ended).await;
    assert_eq!(
        sink.appended(ContentType::Video).await,
        ["init-0", "p0-1", "p0-2", "init-1", "p1-1", "p1-2"]
    );
    let creates = sink
        .calls()
        .await
        .iter()
        .filter(|c| matches!(c, SinkCall::Create(..)))
        .count();
    assert_eq!(creates, 1);

    handle.wait().await?;
    Ok(())
}
