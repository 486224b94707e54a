use std::sync::Arc;

use thiserror::Error;
use url::Url;

use super::template::FormatString;
use crate::ByteRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeriodId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdaptationSetId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepresentationId(pub(crate) usize);

/// Content types the engine buffers. Text and image adaptation sets are
/// parsed but never selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentType {
    Video,
    Audio,
}

impl ContentType {
    pub const ALL: [ContentType; 2] = [ContentType::Video, ContentType::Audio];

    pub fn from_mime_type(mime_type: Option<&str>) -> Option<Self> {
        let mime_type = mime_type?;
        if mime_type.starts_with("video") {
            Some(Self::Video)
        } else if mime_type.starts_with("audio") {
            Some(Self::Audio)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `S` element of a `SegmentTimeline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineRow {
    pub t: Option<u64>,
    pub d: u64,
    /// Additional repetitions of this row. `-1` repeats until the end of the period.
    pub r: i64,
}

impl TimelineRow {
    pub fn repeats_forever(&self) -> bool {
        self.r < 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentTimeline {
    pub rows: Vec<TimelineRow>,
}

impl SegmentTimeline {
    /// A timeline is finite when no row repeats until the end of the period.
    pub fn is_finite(&self) -> bool {
        !self.rows.iter().any(TimelineRow::repeats_forever)
    }
}

/// `SegmentTemplate` attributes as declared on one element. Missing values are
/// filled from ancestors by [`SegmentTemplate::inherit_from`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentTemplate {
    pub media: Option<String>,
    pub initialization: Option<String>,
    pub index: Option<String>,
    pub bitstream_switching: Option<String>,
    pub start_number: Option<u64>,
    pub timescale: Option<u64>,
    pub duration: Option<u64>,
    pub presentation_time_offset: Option<u64>,
    pub timeline: Option<SegmentTimeline>,
}

impl SegmentTemplate {
    pub fn inherit_from(&mut self, parent: &SegmentTemplate) {
        fn fill<T: Clone>(value: &mut Option<T>, parent: &Option<T>) {
            if value.is_none() {
                value.clone_from(parent);
            }
        }

        fill(&mut self.media, &parent.media);
        fill(&mut self.initialization, &parent.initialization);
        fill(&mut self.index, &parent.index);
        fill(&mut self.bitstream_switching, &parent.bitstream_switching);
        fill(&mut self.start_number, &parent.start_number);
        fill(&mut self.timescale, &parent.timescale);
        fill(&mut self.duration, &parent.duration);
        fill(&mut self.presentation_time_offset, &parent.presentation_time_offset);
        fill(&mut self.timeline, &parent.timeline);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Initialization {
    pub source_url: Option<String>,
    pub range: Option<ByteRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentUrl {
    pub media: Option<String>,
    pub media_range: Option<ByteRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentList {
    pub timescale: Option<u64>,
    pub duration: Option<u64>,
    pub initialization: Option<Initialization>,
    pub segment_urls: Vec<SegmentUrl>,
}

impl SegmentList {
    pub fn inherit_from(&mut self, parent: &SegmentList) {
        self.timescale = self.timescale.or(parent.timescale);
        self.duration = self.duration.or(parent.duration);
        if self.initialization.is_none() {
            self.initialization.clone_from(&parent.initialization);
        }
        if self.segment_urls.is_empty() {
            self.segment_urls.clone_from(&parent.segment_urls);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Period {
    pub id: Option<String>,
    /// Offset from the presentation zero point, in seconds.
    pub start: Option<f64>,
    pub duration: Option<f64>,
    pub base_url: Url,
    pub segment_template: Option<SegmentTemplate>,
    pub segment_list: Option<SegmentList>,
    pub adaptation_sets: Vec<AdaptationSetId>,
}

#[derive(Debug, Clone)]
pub struct AdaptationSet {
    pub parent: PeriodId,
    pub id: Option<String>,
    pub content_type: Option<ContentType>,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub frame_rate: Option<String>,
    pub base_url: Url,
    /// Template after inheriting from the parent period.
    pub segment_template: Option<SegmentTemplate>,
    pub segment_list: Option<SegmentList>,
    pub representations: Vec<RepresentationId>,
}

#[derive(Debug, Clone)]
pub struct Representation {
    pub parent: AdaptationSetId,
    pub id: Option<String>,
    pub bandwidth: Option<u64>,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub frame_rate: Option<String>,
    pub base_url: Url,
    pub addressing: Result<Addressing, InvalidRepresentation>,
}

impl Representation {
    pub fn is_valid(&self) -> bool {
        self.addressing.is_ok()
    }

    pub fn addressing(&self) -> Option<&Addressing> {
        self.addressing.as_ref().ok()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidRepresentation {
    #[error("neither SegmentTemplate nor SegmentList resolves")]
    NoAddressing,
    #[error("both SegmentTemplate and SegmentList resolve")]
    AmbiguousAddressing,
    #[error("SegmentTemplate has no media attribute")]
    MissingMedia,
    #[error("segments have neither a SegmentTimeline nor a duration")]
    MissingDuration,
    #[error("{0}")]
    InvalidTemplate(String),
}

/// The addressing scheme a valid representation resolved to, with every
/// inherited attribute and default applied.
#[derive(Debug, Clone)]
pub enum Addressing {
    Template(Arc<TemplateAddressing>),
    List(Arc<ListAddressing>),
}

impl Addressing {
    pub fn timescale(&self) -> u64 {
        match self {
            Self::Template(t) => t.timescale,
            Self::List(l) => l.timescale,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateAddressing {
    pub base_url: Url,
    pub media: FormatString,
    pub initialization: Option<FormatString>,
    pub index: Option<FormatString>,
    pub bitstream_switching: Option<FormatString>,
    pub start_number: u64,
    pub timescale: u64,
    pub duration: Option<u64>,
    pub presentation_time_offset: u64,
    pub timeline: Option<SegmentTimeline>,
}

#[derive(Debug, Clone)]
pub struct ListAddressing {
    pub base_url: Url,
    pub start_number: u64,
    pub timescale: u64,
    pub duration: u64,
    pub initialization: Option<Initialization>,
    pub segment_urls: Vec<SegmentUrl>,
}
