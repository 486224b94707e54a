mod common;

use std::{sync::Arc, time::Duration};

use common::init_test_tracing;
use nagare::{
    net::{
        BaseConfig, BaseId, BaseManager, BaseOptions, Download, DownloadState, HttpTransport,
        Progress, Request, RequestOptions, Transport, TransportError,
    },
    ByteRange,
};
use tokio::time::Instant;
use url::Url;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn url(server: &MockServer, at: &str) -> Url {
    Url::parse(&format!("{}{at}", server.uri())).unwrap()
}

async fn run(url: Url, options: RequestOptions) -> Result<nagare::net::Response, TransportError> {
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::default());
    Request {
        base: BaseId::IDENTITY,
        url,
        options,
    }
    .run(transport)
    .await
    .result
}

#[tokio::test]
async fn test_byte_range_request() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media.mp4"))
        .and(header("range", "bytes=10-19"))
        .respond_with(ResponseTemplate::new(206).set_body_string("0123456789"))
        .mount(&server)
        .await;

    let options = RequestOptions::default().with_byte_range(Some(ByteRange::new(10, Some(10))));
    let response = run(url(&server, "/media.mp4"), options).await?;
    assert_eq!(response.status, 206);
    assert_eq!(&response.body[..], b"0123456789");
    assert!(response.headers_at.is_some());
    Ok(())
}

#[tokio::test]
async fn test_partial_content_without_range_is_an_error() {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media.mp4"))
        .respond_with(ResponseTemplate::new(206).set_body_string("partial"))
        .mount(&server)
        .await;

    let result = run(url(&server, "/media.mp4"), RequestOptions::default()).await;
    assert!(matches!(
        result,
        Err(TransportError::Status { status: 206, .. })
    ));

    let result = run(url(&server, "/missing.mp4"), RequestOptions::default()).await;
    assert!(matches!(
        result,
        Err(TransportError::Status { status: 404, .. })
    ));
}

#[tokio::test]
async fn test_request_timeout() {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.mp4"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let options = RequestOptions::default().with_timeout(Duration::from_millis(100));
    let result = run(url(&server, "/slow.mp4"), options).await;
    assert_eq!(result.unwrap_err(), TransportError::Timeout);
}

#[tokio::test]
async fn test_date_header_is_exposed() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/time"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Date", "Mon, 01 Jan 2024 00:00:00 GMT"),
        )
        .mount(&server)
        .await;

    let transport = HttpTransport::default();
    let response = transport
        .get(&url(&server, "/time"), &RequestOptions::default())
        .await?;
    assert_eq!(response.date.as_deref(), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
    Ok(())
}

#[tokio::test]
async fn test_forced_mime_type_overrides_content_type() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.mpd"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/plain")
                .set_body_string("<MPD />"),
        )
        .mount(&server)
        .await;

    let transport = HttpTransport::default();
    let response = transport
        .get(&url(&server, "/a.mpd"), &RequestOptions::default())
        .await?;
    assert_eq!(response.content_type.as_deref(), Some("text/plain"));

    let options = RequestOptions::default().with_mime_type("application/dash+xml");
    let response = transport.get(&url(&server, "/a.mpd"), &options).await?;
    assert_eq!(response.content_type.as_deref(), Some("application/dash+xml"));

    // the forced type only affects the response, never the request
    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|r| r.headers.get("accept").map_or(true, |v| v != "application/dash+xml")));
    Ok(())
}

#[tokio::test]
async fn test_download_fails_over_between_servers() -> anyhow::Result<()> {
    init_test_tracing();
    let good = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/seg-1.m4s"))
        .respond_with(ResponseTemplate::new(200).set_body_string("media"))
        .mount(&good)
        .await;
    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&broken)
        .await;

    let mut bases = BaseManager::new(
        vec![
            BaseConfig::host(format!("127.0.0.1:{}", broken.address().port())),
            BaseConfig::host(format!("127.0.0.1:{}", good.address().port())),
        ],
        BaseOptions::default(),
    );
    bases.set_manifest_loaded();

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::default());
    let origin = Url::parse("http://origin.invalid/seg-1.m4s")?;
    let mut download = Download::new(origin, RequestOptions::default());

    let mut progress = download.perform(&mut bases, Instant::now());
    let response = loop {
        match progress {
            Progress::Start(request) => {
                let outcome = request.run(transport.clone()).await;
                progress = download.on_outcome(outcome, &mut bases, Instant::now());
            }
            Progress::Done(result) => break result?,
            Progress::Ignored => anyhow::bail!("download ignored"),
        }
    };

    assert_eq!(&response.body[..], b"media");
    assert_eq!(download.state(), DownloadState::Succeeded);
    assert_eq!(download.requests().len(), 2);
    assert_eq!(broken.received_requests().await.unwrap().len(), 1);
    Ok(())
}
