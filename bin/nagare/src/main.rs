use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use fake_user_agent::get_chrome_rua;
use nagare::{
    net::{BaseConfig, HttpTransport},
    Controller, PlayerEvent,
};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, ClientBuilder,
};
use tracing_subscriber::EnvFilter;
use url::Url;

mod config;
mod sink;

use config::Config;
use sink::FileSink;

#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
pub struct NagareArgs {
    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,

    /// Configuration file in TOML format
    #[clap(short, long, env = "NAGARE_CONFIG")]
    config: Option<PathBuf>,

    /// Additional origin to load segments from, as `host` or `host:port`.
    ///
    /// Can be given multiple times. Requests are spread over all origins and
    /// fail over between them.
    #[clap(long = "base")]
    bases: Vec<String>,

    /// HTTP Header used to download. eg. "Referer: https://example.com/"
    #[clap(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Output directory
    #[clap(short, long, default_value = ".")]
    output: PathBuf,

    /// Stop after this many seconds
    #[clap(long)]
    duration: Option<u64>,

    /// Manifest url
    manifest: Url,
}

impl NagareArgs {
    fn client(&self, config: &Config) -> anyhow::Result<ClientBuilder> {
        let mut headers = HeaderMap::new();
        for header in config.headers.iter().chain(&self.headers) {
            let (key, value) = header
                .split_once(':')
                .with_context(|| format!("Invalid header: {header}"))?;
            headers.insert(
                HeaderName::from_str(key.trim())?,
                HeaderValue::from_str(value.trim())?,
            );
        }

        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| get_chrome_rua().to_string());
        Ok(Client::builder()
            .default_headers(headers)
            .user_agent(user_agent))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = NagareArgs::parse();

    let filter = if args.verbose {
        EnvFilter::new("nagare=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let builder = args.client(&config)?;

    let mut options = config.controller.clone();
    options
        .bases
        .extend(args.bases.iter().map(|host| BaseConfig::host(host.as_str())));

    let transport = Arc::new(HttpTransport::new(builder)?);
    let sink = Arc::new(FileSink::new(args.output.clone()));
    let (controller, mut events) =
        Controller::new(args.manifest.clone(), transport, sink, options);
    let handle = controller.spawn();

    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, stopping.");
                break;
            }
            _ = &mut deadline => {
                tracing::info!("Duration reached, stopping.");
                break;
            }
            event = events.recv() => match event {
                Some(PlayerEvent::Ended) => {
                    tracing::info!("Presentation fully buffered.");
                    break;
                }
                Some(PlayerEvent::Stalled { content_type, reason }) => {
                    tracing::error!(%content_type, "Stalled: {reason}");
                }
                Some(PlayerEvent::Warning(warning)) => tracing::warn!("{warning}"),
                Some(PlayerEvent::StateChanged(state)) => tracing::info!(%state, "State changed"),
                Some(PlayerEvent::SegmentAppended { content_type, start, end }) => {
                    tracing::debug!(%content_type, start, end, "Segment written");
                }
                Some(event) => tracing::debug!(?event, "Player event"),
                // controller stopped on its own
                None => break,
            }
        }
    }

    handle.destruct().await?;
    Ok(())
}
