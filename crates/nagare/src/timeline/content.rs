use url::Url;

use super::{
    segment::{RepeatSegment, Segment, EPSILON},
    OutOfBounds,
};
use crate::{
    manifest::{url::merge_baseurls, Addressing, ContentType, RepresentationId},
    ByteRange, NagareResult,
};

/// Segments of the selected representation of one content type inside one
/// interval.
#[derive(Debug, Clone)]
pub struct Content {
    pub content_type: ContentType,
    representation: RepresentationId,
    addressing: Addressing,
    period_start: f64,
    segments: Vec<Segment>,
    repeat: Option<RepeatSegment>,
}

impl Content {
    pub fn new(
        content_type: ContentType,
        representation: RepresentationId,
        addressing: Addressing,
    ) -> Self {
        let mut content = Self {
            content_type,
            representation,
            addressing: addressing.clone(),
            period_start: 0.0,
            segments: Vec::new(),
            repeat: None,
        };
        content.update_timeline_with(representation, addressing);
        content
    }

    pub fn representation(&self) -> RepresentationId {
        self.representation
    }

    pub fn addressing(&self) -> &Addressing {
        &self.addressing
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn repeat(&self) -> Option<&RepeatSegment> {
        self.repeat.as_ref()
    }

    /// Rebuild the segment sequence from an addressing scheme.
    pub fn update_timeline_with(&mut self, representation: RepresentationId, addressing: Addressing) {
        self.representation = representation;
        self.addressing = addressing;
        self.segments.clear();
        self.repeat = None;

        match &self.addressing {
            Addressing::Template(template) => match &template.timeline {
                Some(timeline) => {
                    let pto = template.presentation_time_offset;
                    let mut number = template.start_number;
                    let mut time = 0;

                    for (index, row) in timeline.rows.iter().enumerate() {
                        if let Some(t) = row.t {
                            time = t;
                        }
                        if row.d == 0 {
                            tracing::warn!(time, "Skipping S row without duration");
                            continue;
                        }

                        let count = if row.repeats_forever() {
                            // an open repeat ends where the next row starts, if that is known
                            match timeline.rows.get(index + 1).and_then(|next| next.t) {
                                Some(next) if next > time => (next - time).div_ceil(row.d),
                                _ => {
                                    self.repeat = Some(RepeatSegment::new(Segment::new(
                                        self.addressing.clone(),
                                        number,
                                        time,
                                        row.d,
                                        pto,
                                        None,
                                    )));
                                    break;
                                }
                            }
                        } else {
                            row.r as u64 + 1
                        };

                        for _ in 0..count {
                            self.segments.push(Segment::new(
                                self.addressing.clone(),
                                number,
                                time,
                                row.d,
                                pto,
                                None,
                            ));
                            time += row.d;
                            number += 1;
                        }
                    }
                }
                None => {
                    // validated while parsing
                    let duration = template.duration.unwrap_or(1);
                    self.repeat = Some(RepeatSegment::new(Segment::new(
                        self.addressing.clone(),
                        template.start_number,
                        template.presentation_time_offset,
                        duration,
                        template.presentation_time_offset,
                        None,
                    )));
                }
            },
            Addressing::List(list) => {
                for index in 0..list.segment_urls.len() {
                    self.segments.push(Segment::new(
                        self.addressing.clone(),
                        list.start_number + index as u64,
                        index as u64 * list.duration,
                        list.duration,
                        0,
                        Some(index),
                    ));
                }
            }
        }

        let period_start = self.period_start;
        self.set_period_start(period_start);
    }

    pub(crate) fn set_period_start(&mut self, period_start: f64) {
        self.period_start = period_start;
        for segment in &mut self.segments {
            segment.set_period_start(period_start);
        }
        if let Some(repeat) = &mut self.repeat {
            repeat.set_period_start(period_start);
        }
    }

    /// Length of a fully enumerated segment sequence, measured from the
    /// period start.
    pub fn duration(&self) -> Option<f64> {
        if self.repeat.is_some() {
            return None;
        }
        self.segments.last().map(Segment::period_end)
    }

    /// Segments overlapping `[start, end)`, with `end` clamped to `limit`.
    pub fn segments_in_range(
        &self,
        start: f64,
        end: f64,
        limit: f64,
    ) -> Result<Vec<Segment>, OutOfBounds> {
        if start >= limit - EPSILON {
            return Err(OutOfBounds);
        }
        let end = end.min(limit);

        let overlaps = |segment: &Segment| {
            segment.start() < end - EPSILON && segment.end() > start + EPSILON
        };
        let mut result: Vec<Segment> = self.segments.iter().filter(|s| overlaps(*s)).cloned().collect();

        if let Some(repeat) = &self.repeat {
            if repeat.start() < end - EPSILON {
                let cursor = result.last().map(Segment::end).unwrap_or(start);
                let mut segment = repeat.seek_to(cursor);
                while segment.start() < end - EPSILON {
                    let duplicate = result.last().is_some_and(|last| last.same_as(&segment));
                    if overlaps(&segment) && !duplicate {
                        result.push(segment.clone());
                    }
                    segment = segment.generate_next();
                }
            }
        }
        Ok(result)
    }

    /// The segment covering `time`.
    pub fn segment_at(&self, time: f64, limit: f64) -> Result<Option<Segment>, OutOfBounds> {
        if time >= limit - EPSILON {
            return Err(OutOfBounds);
        }
        if let Some(segment) = self.segments.iter().find(|s| s.covers(time)) {
            return Ok(Some(segment.clone()));
        }
        Ok(self
            .repeat
            .as_ref()
            .filter(|repeat| repeat.start() <= time + EPSILON)
            .map(|repeat| repeat.seek_to(time)))
    }

    /// The last segment starting before `limit`.
    pub fn last_segment(&self, limit: f64) -> Option<Segment> {
        if let Some(repeat) = &self.repeat {
            if repeat.start() < limit - EPSILON {
                let mut segment = repeat.seek_to(limit);
                if segment.start() >= limit - EPSILON && segment.number > repeat.first().number {
                    segment = repeat.seek_to(limit - segment.duration_secs());
                }
                return Some(segment);
            }
        }
        self.segments
            .iter()
            .rev()
            .find(|s| s.start() < limit - EPSILON)
            .cloned()
    }

    /// Location of the initialization segment, if the representation has one.
    pub fn initialization(&self) -> NagareResult<Option<(Url, Option<ByteRange>)>> {
        match &self.addressing {
            Addressing::Template(template) => template
                .initialization
                .as_ref()
                .map(|init| Ok((merge_baseurls(&template.base_url, &init.format(0, 0))?, None)))
                .transpose(),
            Addressing::List(list) => list
                .initialization
                .as_ref()
                .map(|init| {
                    let url = match &init.source_url {
                        Some(source) => merge_baseurls(&list.base_url, source)?,
                        None => list.base_url.clone(),
                    };
                    Ok((url, init.range))
                })
                .transpose(),
        }
    }
}
