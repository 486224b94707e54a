//! Presentation timeline.
//!
//! Every period of the manifest becomes an [`Interval`] with a resolved start
//! and duration, holding one [`Content`] per buffered content type. Reloads of
//! a dynamic manifest are reconciled against the existing intervals by period
//! id: intervals are only ever appended, and only the last one may change.

pub mod content;
pub mod segment;

use url::Url;

use crate::{
    manifest::{ContentType, Manifest, PeriodId},
    selector::{select_for, RepresentationSelector},
    ByteRange, NagareError, NagareResult,
};

pub use content::Content;
pub use segment::{RepeatSegment, Segment, SegmentState};
use segment::EPSILON;

/// Requested time lies past the end of the presentation, or past the live
/// edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfBounds;

impl std::fmt::Display for OutOfBounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("time out of presentation bounds")
    }
}

#[derive(Debug, Clone)]
pub struct Interval {
    pub period_id: Option<String>,
    pub start: Option<f64>,
    pub duration: Option<f64>,
    declared_start: Option<f64>,
    declared_duration: Option<f64>,
    contents: Vec<Content>,
}

impl Interval {
    fn from_period(
        manifest: &Manifest,
        period: PeriodId,
        selector: &dyn RepresentationSelector,
    ) -> Self {
        let declared = manifest.period(period);
        let mut interval = Self {
            period_id: declared.id.clone(),
            start: None,
            duration: None,
            declared_start: declared.start,
            declared_duration: declared.duration,
            contents: Vec::new(),
        };
        interval.update_contents(manifest, period, selector);
        interval
    }

    fn update_contents(
        &mut self,
        manifest: &Manifest,
        period: PeriodId,
        selector: &dyn RepresentationSelector,
    ) {
        let mut contents = Vec::with_capacity(ContentType::ALL.len());
        for content_type in ContentType::ALL {
            let Some(representation) = select_for(selector, manifest, period, content_type) else {
                continue;
            };
            let Some(addressing) = manifest.representation(representation).addressing().cloned()
            else {
                continue;
            };

            let content = match self.contents.iter().position(|c| c.content_type == content_type) {
                Some(index) => {
                    let mut content = self.contents.swap_remove(index);
                    content.update_timeline_with(representation, addressing);
                    content
                }
                None => Content::new(content_type, representation, addressing),
            };
            contents.push(content);
        }
        self.contents = contents;

        if let Some(start) = self.start {
            self.set_start(start);
        }
    }

    fn set_start(&mut self, start: f64) {
        self.start = Some(start);
        for content in &mut self.contents {
            content.set_period_start(start);
        }
    }

    pub fn content(&self, content_type: ContentType) -> Option<&Content> {
        self.contents.iter().find(|c| c.content_type == content_type)
    }

    pub fn contents(&self) -> &[Content] {
        &self.contents
    }

    pub fn end(&self) -> Option<f64> {
        Some(self.start? + self.duration?)
    }

    /// Duration derived from fully enumerated segment sequences.
    fn content_duration(&self) -> Option<f64> {
        self.contents
            .iter()
            .filter_map(Content::duration)
            .reduce(f64::max)
    }
}

#[derive(Debug, Default)]
pub struct Timeline {
    intervals: Vec<Interval>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// End of the last interval, if known.
    pub fn duration(&self) -> Option<f64> {
        self.intervals.last().and_then(Interval::end)
    }

    /// Start of the first interval still in the timeline.
    pub fn start(&self) -> f64 {
        self.intervals.first().and_then(|i| i.start).unwrap_or(0.0)
    }

    /// Merge a freshly parsed manifest into the timeline.
    ///
    /// On error the timeline is left untouched.
    pub fn update(
        &mut self,
        manifest: &Manifest,
        selector: &dyn RepresentationSelector,
    ) -> NagareResult<()> {
        let periods: Vec<_> = manifest.periods().map(|(id, _)| id).collect();

        let mut intervals = if self.intervals.is_empty() {
            periods
                .iter()
                .map(|period| Interval::from_period(manifest, *period, selector))
                .collect()
        } else {
            self.reconcile(manifest, &periods, selector)?
        };

        resolve_times(&mut intervals, manifest.media_presentation_duration)?;
        self.intervals = intervals;
        tracing::debug!(
            intervals = self.intervals.len(),
            duration = ?self.duration(),
            "Timeline updated"
        );
        Ok(())
    }

    fn reconcile(
        &self,
        manifest: &Manifest,
        periods: &[PeriodId],
        selector: &dyn RepresentationSelector,
    ) -> NagareResult<Vec<Interval>> {
        let period_id = |period: &PeriodId| manifest.period(*period).id.clone();

        // first period of the new manifest that is already known
        let (new_index, old_index) = periods
            .iter()
            .enumerate()
            .find_map(|(new_index, period)| {
                let id = period_id(period)?;
                self.intervals
                    .iter()
                    .position(|i| i.period_id.as_deref() == Some(id.as_str()))
                    .map(|old_index| (new_index, old_index))
            })
            .ok_or_else(|| {
                NagareError::InconsistentPeriods("no period in common with the previous manifest".into())
            })?;

        let retained = &self.intervals[old_index..];
        let incoming = &periods[new_index..];
        if incoming.len() < retained.len() {
            return Err(NagareError::InconsistentPeriods(format!(
                "{} known periods missing",
                retained.len() - incoming.len()
            )));
        }
        for (interval, period) in retained.iter().zip(incoming) {
            let id = period_id(period);
            if interval.period_id != id {
                return Err(NagareError::InconsistentPeriods(format!(
                    "expected period {:?}, found {:?}",
                    interval.period_id, id
                )));
            }
        }

        if old_index > 0 {
            tracing::debug!(dropped = old_index, "Dropping intervals before the first common period");
        }

        let mut intervals = retained.to_vec();
        if let Some(last) = intervals.last_mut() {
            let period = incoming[retained.len() - 1];
            last.declared_duration = manifest.period(period).duration;
            last.duration = None;
            last.update_contents(manifest, period, selector);
        }
        for period in &incoming[retained.len()..] {
            intervals.push(Interval::from_period(manifest, *period, selector));
        }
        Ok(intervals)
    }

    fn interval_limit(interval: &Interval, live_end: Option<f64>) -> f64 {
        let end = interval.end().unwrap_or(f64::INFINITY);
        end.min(live_end.unwrap_or(f64::INFINITY))
    }

    /// Presentation end, or the live edge for dynamic presentations.
    pub fn limit(&self, live_end: Option<f64>) -> f64 {
        self.duration()
            .unwrap_or(f64::INFINITY)
            .min(live_end.unwrap_or(f64::INFINITY))
    }

    /// Segments of `content_type` overlapping `[start, end)` across all intervals.
    pub fn segments_in_range(
        &self,
        content_type: ContentType,
        start: f64,
        end: f64,
        live_end: Option<f64>,
    ) -> Result<Vec<Segment>, OutOfBounds> {
        if start >= self.limit(live_end) - EPSILON {
            return Err(OutOfBounds);
        }

        let mut segments = Vec::new();
        for interval in &self.intervals {
            let Some(interval_start) = interval.start else {
                continue;
            };
            let interval_end = interval.end().unwrap_or(f64::INFINITY);
            if interval_end <= start + EPSILON || interval_start >= end - EPSILON {
                continue;
            }
            let Some(content) = interval.content(content_type) else {
                continue;
            };

            let limit = Self::interval_limit(interval, live_end);
            if let Ok(found) =
                content.segments_in_range(start.max(interval_start), end.min(interval_end), limit)
            {
                segments.extend(found);
            }
        }
        Ok(segments)
    }

    pub fn segment_at(
        &self,
        content_type: ContentType,
        time: f64,
        live_end: Option<f64>,
    ) -> Result<Option<Segment>, OutOfBounds> {
        if time >= self.limit(live_end) - EPSILON {
            return Err(OutOfBounds);
        }

        let interval = self.intervals.iter().find(|interval| {
            interval.start.is_some_and(|start| start <= time + EPSILON)
                && interval.end().map_or(true, |end| time < end - EPSILON)
        });
        let Some(interval) = interval else {
            return Ok(None);
        };
        match interval.content(content_type) {
            Some(content) => content.segment_at(time, Self::interval_limit(interval, live_end)),
            None => Ok(None),
        }
    }

    /// Last segment of `content_type` starting before `time`.
    pub fn last_segment_before(&self, content_type: ContentType, time: f64) -> Option<Segment> {
        self.intervals
            .iter()
            .rev()
            .filter(|interval| interval.start.is_some_and(|start| start < time))
            .find_map(|interval| {
                let limit = time.min(interval.end().unwrap_or(f64::INFINITY));
                interval.content(content_type)?.last_segment(limit)
            })
    }

    /// Initialization segment of the content playing at `time`.
    pub fn initialization_at(
        &self,
        content_type: ContentType,
        time: f64,
    ) -> NagareResult<Option<(Url, Option<ByteRange>)>> {
        match self.interval_at(time).and_then(|interval| interval.content(content_type)) {
            Some(content) => content.initialization(),
            None => Ok(None),
        }
    }

    /// Interval containing `time`, or the first one when `time` precedes it.
    pub fn interval_at(&self, time: f64) -> Option<&Interval> {
        self.intervals
            .iter()
            .rev()
            .find(|interval| interval.start.is_some_and(|start| start <= time + EPSILON))
            .or_else(|| self.intervals.first())
    }
}

/// Two passes: take what the periods declare (or what finite segment
/// sequences imply), then chain starts and durations from the neighbours.
fn resolve_times(intervals: &mut [Interval], presentation_duration: Option<f64>) -> NagareResult<()> {
    for interval in intervals.iter_mut() {
        if interval.start.is_none() {
            interval.start = interval.declared_start;
        }
        if interval.duration.is_none() {
            interval.duration = interval
                .declared_duration
                .or_else(|| interval.content_duration());
        }
    }
    if let Some(first) = intervals.first_mut() {
        first.start.get_or_insert(0.0);
    }

    for index in 1..intervals.len() {
        let (before, after) = intervals.split_at_mut(index);
        let previous = &mut before[index - 1];
        let current = &mut after[0];

        let previous_start = previous.start.ok_or(NagareError::MissingPeriodStart(index))?;
        if current.start.is_none() {
            let duration = previous
                .duration
                .ok_or(NagareError::MissingPeriodStart(index))?;
            current.start = Some(previous_start + duration);
        }
        if previous.duration.is_none() {
            previous.duration = current.start.map(|start| start - previous_start);
        }
    }

    if let Some(last) = intervals.last_mut() {
        if last.duration.is_none() {
            if let (Some(total), Some(start)) = (presentation_duration, last.start) {
                last.duration = Some(total - start);
            }
        }
    }

    for interval in intervals.iter_mut() {
        if let Some(start) = interval.start {
            interval.set_start(start);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::selector::BestRepresentation;

    fn parse(text: &str) -> Manifest {
        Manifest::parse(text, &Url::parse("https://example.com/live/manifest.mpd").unwrap()).unwrap()
    }

    fn live(periods: &str) -> Manifest {
        parse(&format!(
            r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic" availabilityStartTime="2024-01-01T00:00:00Z" minimumUpdatePeriod="PT2S">{periods}</MPD>"#
        ))
    }

    fn period(id: &str, start: Option<&str>, rows: &str) -> String {
        let start = start.map(|s| format!(r#" start="{s}""#)).unwrap_or_default();
        format!(
            r#"<Period id="{id}"{start}>
  <AdaptationSet mimeType="video/mp4">
    <SegmentTemplate media="{id}/$Time$.m4s" timescale="1">
      <SegmentTimeline>{rows}</SegmentTimeline>
    </SegmentTemplate>
    <Representation id="v" bandwidth="1" />
  </AdaptationSet>
</Period>"#
        )
    }

    #[test]
    fn test_static_periods_chain() {
        let manifest = parse(
            r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT30S">
  <Period duration="PT10S">
    <AdaptationSet mimeType="video/mp4">
      <SegmentTemplate media="a/$Number$.m4s" duration="2" />
      <Representation id="v" bandwidth="1" />
    </AdaptationSet>
  </Period>
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <SegmentTemplate media="b/$Number$.m4s" duration="2" />
      <Representation id="v" bandwidth="1" />
    </AdaptationSet>
  </Period>
</MPD>"#,
        );
        let mut timeline = Timeline::new();
        timeline.update(&manifest, &BestRepresentation).unwrap();

        let intervals = timeline.intervals();
        assert_eq!(intervals[0].start, Some(0.0));
        assert_eq!(intervals[0].duration, Some(10.0));
        assert_eq!(intervals[1].start, Some(10.0));
        assert_eq!(intervals[1].duration, Some(20.0));
        assert_eq!(timeline.duration(), Some(30.0));

        let mut segments = timeline
            .segments_in_range(ContentType::Video, 6.0, 14.0, None)
            .unwrap();
        let urls: Vec<_> = segments
            .iter_mut()
            .map(|s| s.url().unwrap().path().to_string())
            .collect();
        assert_eq!(
            urls,
            ["/live/a/4.m4s", "/live/a/5.m4s", "/live/b/1.m4s", "/live/b/2.m4s"]
        );
        assert_eq!(segments[2].start(), 10.0);

        assert!(timeline
            .segments_in_range(ContentType::Video, 30.0, 40.0, None)
            .is_err());
        assert!(timeline
            .segments_in_range(ContentType::Audio, 0.0, 10.0, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_duration_from_timeline() {
        let manifest = live(&(period("p0", Some("PT0S"), r#"<S t="0" d="2" r="4" />"#)
            + &period("p1", None, r#"<S t="0" d="3" r="1" />"#)));
        let mut timeline = Timeline::new();
        timeline.update(&manifest, &BestRepresentation).unwrap();

        let intervals = timeline.intervals();
        assert_eq!(intervals[0].duration, Some(10.0));
        assert_eq!(intervals[1].start, Some(10.0));
        assert_eq!(intervals[1].duration, Some(6.0));
    }

    #[test]
    fn test_missing_start_is_fatal() {
        let manifest = live(&(period("p0", Some("PT0S"), r#"<S t="0" d="2" r="-1" />"#)
            + &period("p1", None, r#"<S t="0" d="2" />"#)));
        let mut timeline = Timeline::new();
        assert!(matches!(
            timeline.update(&manifest, &BestRepresentation),
            Err(NagareError::MissingPeriodStart(1))
        ));
    }

    #[test]
    fn test_reload_extends_last_interval() {
        let first = live(&(period("p0", Some("PT0S"), r#"<S t="0" d="2" r="4" />"#)
            + &period("p1", Some("PT10S"), r#"<S t="0" d="2" r="1" />"#)));
        let mut timeline = Timeline::new();
        timeline.update(&first, &BestRepresentation).unwrap();
        assert_eq!(timeline.duration(), Some(14.0));

        let second = live(&(period("p1", Some("PT10S"), r#"<S t="0" d="2" r="3" />"#)
            + &period("p2", None, r#"<S t="0" d="2" r="1" />"#)));
        timeline.update(&second, &BestRepresentation).unwrap();

        let ids: Vec<_> = timeline
            .intervals()
            .iter()
            .map(|i| i.period_id.clone().unwrap())
            .collect();
        assert_eq!(ids, ["p1", "p2"]);
        assert_eq!(timeline.intervals()[0].duration, Some(8.0));
        assert_eq!(timeline.intervals()[1].start, Some(18.0));
        assert_eq!(timeline.start(), 10.0);
    }

    #[test]
    fn test_reload_with_mismatched_periods_is_rejected() {
        let first = live(&(period("p0", Some("PT0S"), r#"<S t="0" d="2" r="4" />"#)
            + &period("p1", Some("PT10S"), r#"<S t="0" d="2" />"#)));
        let mut timeline = Timeline::new();
        timeline.update(&first, &BestRepresentation).unwrap();

        // p1 vanished while p0 is still present
        let reordered = live(&(period("p0", Some("PT0S"), r#"<S t="0" d="2" r="4" />"#)
            + &period("p9", Some("PT10S"), r#"<S t="0" d="2" />"#)));
        assert!(matches!(
            timeline.update(&reordered, &BestRepresentation),
            Err(NagareError::InconsistentPeriods(_))
        ));

        let unrelated = live(&period("x", Some("PT0S"), r#"<S t="0" d="2" />"#));
        assert!(matches!(
            timeline.update(&unrelated, &BestRepresentation),
            Err(NagareError::InconsistentPeriods(_))
        ));

        // previous state is kept
        assert_eq!(timeline.intervals().len(), 2);
        assert_eq!(timeline.duration(), Some(12.0));
    }

    #[test]
    fn test_segment_at_live_end() {
        let manifest = live(&period("p0", Some("PT0S"), r#"<S t="0" d="2" r="-1" />"#));
        let mut timeline = Timeline::new();
        timeline.update(&manifest, &BestRepresentation).unwrap();

        let segment = timeline
            .segment_at(ContentType::Video, 99.0, Some(100.0))
            .unwrap()
            .unwrap();
        assert_eq!(segment.start(), 98.0);
        assert!(matches!(
            timeline.segment_at(ContentType::Video, 100.0, Some(100.0)),
            Err(OutOfBounds)
        ));
        let last = timeline
            .last_segment_before(ContentType::Video, 100.0)
            .unwrap();
        assert_eq!(last.start(), 98.0);
    }
}
