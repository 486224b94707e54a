use url::Url;

use crate::{
    manifest::{url::merge_baseurls, Addressing},
    ByteRange, NagareResult,
};

/// Tolerance for comparisons between presentation times in seconds.
pub(crate) const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Pending,
    Downloading,
    Downloaded,
    Error,
}

/// A media segment of one representation.
#[derive(Debug, Clone)]
pub struct Segment {
    pub number: u64,
    /// Start on the representation's sample timeline, in `timescale` units.
    pub time: u64,
    pub duration: u64,
    pub timescale: u64,
    pub state: SegmentState,

    /// Start relative to the period start, in seconds.
    offset: f64,
    period_start: f64,
    addressing: Addressing,
    /// Position in the `SegmentList`, for list addressing.
    list_index: Option<usize>,
    url: Option<Url>,
}

impl Segment {
    pub(crate) fn new(
        addressing: Addressing,
        number: u64,
        time: u64,
        duration: u64,
        presentation_time_offset: u64,
        list_index: Option<usize>,
    ) -> Self {
        let timescale = addressing.timescale();
        Self {
            number,
            time,
            duration,
            timescale,
            state: SegmentState::Pending,
            offset: (time as f64 - presentation_time_offset as f64) / timescale as f64,
            period_start: 0.0,
            addressing,
            list_index,
            url: None,
        }
    }

    /// Presentation time of the first sample, in seconds.
    pub fn start(&self) -> f64 {
        self.period_start + self.offset
    }

    pub fn end(&self) -> f64 {
        self.start() + self.duration_secs()
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration as f64 / self.timescale as f64
    }

    /// End relative to the start of the owning period.
    pub(crate) fn period_end(&self) -> f64 {
        self.offset + self.duration_secs()
    }

    pub fn covers(&self, time: f64) -> bool {
        self.start() <= time + EPSILON && time < self.end() - EPSILON
    }

    pub(crate) fn set_period_start(&mut self, period_start: f64) {
        self.period_start = period_start;
    }

    /// Same position on the sample timeline.
    pub fn same_as(&self, other: &Segment) -> bool {
        self.time == other.time
            && self.duration == other.duration
            && (self.start() - other.start()).abs() < EPSILON
    }

    /// Segment following this one in a repeated run.
    pub(crate) fn generate_next(&self) -> Segment {
        let mut next = self.clone();
        next.number += 1;
        next.time += self.duration;
        next.offset += self.duration_secs();
        next.state = SegmentState::Pending;
        next.url = None;
        next
    }

    /// Jump `count` segments ahead in a repeated run.
    pub(crate) fn advance(&self, count: u64) -> Segment {
        let mut next = self.clone();
        next.number += count;
        next.time += self.duration * count;
        next.offset += self.duration_secs() * count as f64;
        next.state = SegmentState::Pending;
        next.url = None;
        next
    }

    pub fn byte_range(&self) -> Option<ByteRange> {
        match &self.addressing {
            Addressing::Template(_) => None,
            Addressing::List(list) => self
                .list_index
                .and_then(|i| list.segment_urls.get(i))
                .and_then(|s| s.media_range),
        }
    }

    /// Resolve the segment URL, caching the result.
    pub fn url(&mut self) -> NagareResult<&Url> {
        let url = match self.url.take() {
            Some(url) => url,
            None => self.resolve_url()?,
        };
        Ok(self.url.insert(url))
    }

    fn resolve_url(&self) -> NagareResult<Url> {
        match &self.addressing {
            Addressing::Template(template) => merge_baseurls(
                &template.base_url,
                &template.media.format(self.number, self.time),
            ),
            Addressing::List(list) => {
                let media = self
                    .list_index
                    .and_then(|i| list.segment_urls.get(i))
                    .and_then(|s| s.media.as_deref());
                match media {
                    Some(media) => merge_baseurls(&list.base_url, media),
                    // without @media the segment is a range of the base url itself
                    None => Ok(list.base_url.clone()),
                }
            }
        }
    }
}

/// A segment run without a known end. Further segments are generated on demand.
#[derive(Debug, Clone)]
pub struct RepeatSegment {
    first: Segment,
}

impl RepeatSegment {
    pub(crate) fn new(first: Segment) -> Self {
        Self { first }
    }

    pub fn first(&self) -> &Segment {
        &self.first
    }

    pub fn start(&self) -> f64 {
        self.first.start()
    }

    pub(crate) fn set_period_start(&mut self, period_start: f64) {
        self.first.set_period_start(period_start);
    }

    /// The generated segment covering `time`, or the first one when `time`
    /// precedes the run.
    pub fn seek_to(&self, time: f64) -> Segment {
        let duration = self.first.duration_secs();
        if time <= self.first.start() || duration <= 0.0 {
            return self.first.clone();
        }
        let index = ((time - self.first.start()) / duration + EPSILON).floor() as u64;
        self.first.advance(index)
    }
}
