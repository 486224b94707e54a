use thiserror::Error;

use crate::net::TransportError;

#[derive(Error, Debug)]
pub enum NagareError {
    #[error("Empty manifest response")]
    EmptyManifest,

    #[error("Manifest must have exactly one root element, found {0}")]
    InvalidManifestRoot(usize),

    #[error("Invalid manifest: {0}")]
    MpdParsing(String),

    #[error("Period {0} has no id, which is required in a dynamic manifest")]
    MissingPeriodId(usize),

    #[error("Inconsistent periods across manifest reload: {0}")]
    InconsistentPeriods(String),

    #[error("Missing start time for period {0}: previous period has no duration")]
    MissingPeriodStart(usize),

    #[error("Invalid format string {0:?}: {1}")]
    InvalidTemplate(String, &'static str),

    #[error("No base available for {0}")]
    NoBaseAvailable(String),

    #[error("Request for {url} failed: {source}")]
    RequestFailed {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("Invalid timing schema: {0:?}")]
    InvalidTimingSchema(String),

    #[error("Invalid date time: {0}")]
    DateTimeParsing(String),

    #[error("Buffer sink error: {0}")]
    Sink(String),

    #[error("No playable content in the first period")]
    NoPlayableContent,

    #[error("Manifest unavailable after {0} attempts")]
    ManifestUnavailable(u32),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    MpdParseError(#[from] dash_mpd::DashMpdError),

    #[error(transparent)]
    XmlError(#[from] quick_xml::Error),

    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),

    #[error(transparent)]
    ChronoParseError(#[from] chrono::ParseError),
}

pub type NagareResult<T> = Result<T, NagareError>;
