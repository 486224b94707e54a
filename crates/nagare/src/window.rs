//! Buffering window of one source.
//!
//! The window holds the queue of segments between the playback position and
//! the newest known segment. `play_index` points at the segment under the
//! playhead, `load_index` at the next one to fetch. For live presentations the
//! window slides: new segments are appended on every manifest reload and
//! played segments are dropped from the front.

use url::Url;

use crate::{
    manifest::ContentType,
    timeline::{segment::EPSILON, Segment, SegmentState, Timeline},
    ByteRange,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId(u64);

#[derive(Debug, Clone)]
pub struct WindowSegment {
    pub id: SegmentId,
    pub segment: Segment,
}

/// What the window knows about the presentation at the time of a call.
#[derive(Debug, Clone, Copy)]
pub struct WindowContext<'a> {
    pub timeline: &'a Timeline,
    /// Seconds since `availabilityStartTime`. `None` for static presentations.
    pub live_edge: Option<f64>,
    pub time_shift_buffer_depth: Option<f64>,
    pub suggested_presentation_delay: Option<f64>,
}

impl WindowContext<'_> {
    pub fn is_dynamic(&self) -> bool {
        self.live_edge.is_some()
    }

    fn range_end(&self) -> f64 {
        self.timeline.limit(self.live_edge)
    }

    fn available(&self, segment: &Segment) -> bool {
        match self.live_edge {
            Some(live_edge) => segment.end() <= live_edge + EPSILON,
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub id: SegmentId,
    pub url: Url,
    pub byte_range: Option<ByteRange>,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone)]
pub enum WindowAction {
    Download(SegmentRequest),
    /// The next segment is in flight or not yet available.
    Wait,
    /// The queue is exhausted and the manifest has nothing more to offer.
    ReloadManifest,
    /// Every segment of the presentation has been handled.
    Finished,
}

#[derive(Debug)]
pub struct SegmentWindow {
    content_type: ContentType,
    segments: Vec<WindowSegment>,
    play_index: usize,
    load_index: usize,
    next_range_start: Option<f64>,
    next_id: u64,
}

impl SegmentWindow {
    pub fn new(content_type: ContentType) -> Self {
        Self {
            content_type,
            segments: Vec::new(),
            play_index: 0,
            load_index: 0,
            next_range_start: None,
            next_id: 0,
        }
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn segments(&self) -> &[WindowSegment] {
        &self.segments
    }

    pub fn play_index(&self) -> usize {
        self.play_index
    }

    pub fn load_index(&self) -> usize {
        self.load_index
    }

    pub fn next_range_start(&self) -> Option<f64> {
        self.next_range_start
    }

    /// Queue whatever the current manifest adds to the window.
    pub fn update(&mut self, ctx: &WindowContext) {
        let range_start = match self.next_range_start {
            Some(start) => start,
            None if ctx.is_dynamic() => match self.initial_range_start(ctx) {
                Some(start) => start,
                None => return,
            },
            None => ctx.timeline.start(),
        };
        let range_end = ctx.range_end();

        if !ctx.is_dynamic() && range_end.is_infinite() {
            tracing::error!(content_type = %self.content_type, "Static presentation without a known duration");
            return;
        }
        self.queue(range_start, range_end, ctx);
    }

    /// Where a live presentation starts buffering: the segment at the live
    /// edge, stepped back by the presentation delay.
    fn initial_range_start(&self, ctx: &WindowContext) -> Option<f64> {
        let live_edge = ctx.live_edge?;
        let timeline = ctx.timeline;

        let reference = timeline
            .segment_at(self.content_type, live_edge, None)
            .ok()
            .flatten()
            .or_else(|| timeline.last_segment_before(self.content_type, live_edge))
            .or_else(|| {
                timeline
                    .duration()
                    .and_then(|end| timeline.last_segment_before(self.content_type, end))
            });
        let Some(reference) = reference else {
            tracing::warn!(content_type = %self.content_type, live_edge, "No segment near the live edge");
            return None;
        };

        let delay = ctx
            .suggested_presentation_delay
            .or_else(|| ctx.time_shift_buffer_depth.map(|depth| depth / 2.0))
            .unwrap_or(0.0);
        let mut start = (reference.start() - delay).min(live_edge);
        if let Some(depth) = ctx.time_shift_buffer_depth {
            start = start.max(live_edge - depth);
        }
        let start = start.max(0.0);

        tracing::debug!(
            content_type = %self.content_type,
            live_edge,
            reference = reference.start(),
            delay,
            start,
            "Initial live range"
        );
        Some(start)
    }

    /// Append the segments in `[range_start, range_end)`. Returns the number
    /// of segments added.
    fn queue(&mut self, range_start: f64, range_end: f64, ctx: &WindowContext) -> usize {
        if range_end <= range_start + EPSILON {
            return 0;
        }
        let found = match ctx.timeline.segments_in_range(
            self.content_type,
            range_start,
            range_end,
            ctx.live_edge,
        ) {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(content_type = %self.content_type, range_start, range_end, "{e}");
                return 0;
            }
        };

        let mut found = found.into_iter().peekable();
        if let Some(last) = self.segments.last() {
            while found.next_if(|s| s.same_as(&last.segment)).is_some() {}
            if let Some(first) = found.peek() {
                let gap = first.start() - last.segment.end();
                if gap.abs() > EPSILON {
                    tracing::error!(
                        content_type = %self.content_type,
                        previous_end = last.segment.end(),
                        next_start = first.start(),
                        "Discontinuity between queued segments"
                    );
                }
            }
        }

        let mut added = 0;
        for segment in found {
            self.next_range_start = Some(segment.end());
            let id = SegmentId(self.next_id);
            self.next_id += 1;
            self.segments.push(WindowSegment { id, segment });
            added += 1;
        }
        if self.next_range_start.is_none() {
            self.next_range_start = Some(range_start);
        }
        if added > 0 {
            tracing::debug!(content_type = %self.content_type, added, queued = self.segments.len(), "Segments queued");
        }
        added
    }

    /// Pick the next segment to fetch.
    pub fn download_next_segment(&mut self, ctx: &WindowContext) -> WindowAction {
        loop {
            if self.load_index >= self.segments.len() {
                let range_start = self
                    .next_range_start
                    .unwrap_or_else(|| ctx.timeline.start());
                if self.queue(range_start, ctx.range_end(), ctx) > 0 {
                    continue;
                }

                // a live timeline only ends when the manifest turns static
                return if ctx.is_dynamic() {
                    WindowAction::ReloadManifest
                } else {
                    WindowAction::Finished
                };
            }

            let entry = &mut self.segments[self.load_index];
            match entry.segment.state {
                SegmentState::Downloaded | SegmentState::Error => {
                    self.load_index += 1;
                }
                SegmentState::Downloading => return WindowAction::Wait,
                SegmentState::Pending => {
                    if !ctx.available(&entry.segment) {
                        return WindowAction::Wait;
                    }
                    let url = match entry.segment.url() {
                        Ok(url) => url.clone(),
                        Err(e) => {
                            tracing::error!(content_type = %self.content_type, error = %e, "Can not resolve segment url");
                            entry.segment.state = SegmentState::Error;
                            continue;
                        }
                    };
                    entry.segment.state = SegmentState::Downloading;
                    return WindowAction::Download(SegmentRequest {
                        id: entry.id,
                        url,
                        byte_range: entry.segment.byte_range(),
                        start: entry.segment.start(),
                        end: entry.segment.end(),
                    });
                }
            }
        }
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| &entry.segment)
    }

    pub fn mark(&mut self, id: SegmentId, state: SegmentState) {
        if let Some(entry) = self.segments.iter_mut().find(|s| s.id == id) {
            entry.segment.state = state;
        }
    }

    /// Put a segment back into the queue after an aborted request.
    pub fn reset_downloading(&mut self) {
        for entry in &mut self.segments {
            if entry.segment.state == SegmentState::Downloading {
                entry.segment.state = SegmentState::Pending;
            }
        }
    }

    /// Drop played segments of a live presentation. Returns the time ranges
    /// to remove from the buffer, one per dropped segment.
    pub fn truncate(&mut self, dynamic: bool) -> Vec<(f64, f64)> {
        if !dynamic || self.play_index < 2 {
            return Vec::new();
        }
        let count = self.play_index - 1;
        let removed: Vec<_> = self
            .segments
            .drain(..count)
            .map(|entry| (entry.segment.start(), entry.segment.end()))
            .collect();
        self.play_index -= count;
        self.load_index = self.load_index.saturating_sub(count);
        tracing::trace!(content_type = %self.content_type, removed = removed.len(), "Window truncated");
        removed
    }

    /// Move the playhead.
    pub fn set_time(&mut self, time: f64) {
        if self
            .segments
            .get(self.play_index)
            .is_some_and(|entry| entry.segment.covers(time))
        {
            return;
        }
        if let Some(index) = self
            .segments
            .iter()
            .position(|entry| entry.segment.covers(time))
            .or_else(|| {
                self.segments
                    .iter()
                    .position(|entry| entry.segment.start() > time)
            })
        {
            self.play_index = index;
        }
    }

    /// End of the contiguous run of downloaded segments starting at the playhead.
    pub fn buffered_end(&self) -> Option<f64> {
        let mut end = None;
        for entry in self.segments.iter().skip(self.play_index) {
            if entry.segment.state != SegmentState::Downloaded {
                break;
            }
            if end.is_some_and(|end: f64| (entry.segment.start() - end).abs() > EPSILON) {
                break;
            }
            end = Some(entry.segment.end());
        }
        end
    }

    /// Start of the first downloaded segment.
    pub fn buffer_start(&self) -> Option<f64> {
        self.segments
            .iter()
            .find(|entry| entry.segment.state == SegmentState::Downloaded)
            .map(|entry| entry.segment.start())
    }

    pub fn has_error(&self) -> bool {
        self.segments
            .iter()
            .any(|entry| entry.segment.state == SegmentState::Error)
    }
}
