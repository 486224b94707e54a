//! Typed MPD model.
//!
//! The XML is deserialised by `dash-mpd` and then converted, one build
//! function per element kind, into an arena of periods, adaptation sets and
//! representations. Children refer to their parent by index, and every
//! inheritable attribute is resolved while building so later stages never
//! walk the tree upwards.

pub mod model;
pub mod template;
pub(crate) mod url;

use chrono::{DateTime, Utc};
use quick_xml::{events::Event, Reader};
use std::sync::Arc;
use ::url::Url;

pub use model::*;
use template::{FormatString, TemplateField};

use crate::{NagareError, NagareResult};

/// Used when `MPD@minBufferTime` is absent.
pub const DEFAULT_MIN_BUFFER_TIME: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationType {
    Static,
    Dynamic,
}

/// How the presentation is driven by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    /// On-demand presentation with a fixed duration.
    Static,
    /// Live presentation without scheduled manifest reloads.
    Dynamic,
    /// Live presentation reloaded every `minimumUpdatePeriod`.
    SimpleLive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtcTiming {
    pub scheme_id_uri: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    pub presentation_type: PresentationType,
    pub availability_start_time: Option<DateTime<Utc>>,
    /// All durations are in seconds.
    pub minimum_update_period: Option<f64>,
    pub min_buffer_time: f64,
    pub time_shift_buffer_depth: Option<f64>,
    pub suggested_presentation_delay: Option<f64>,
    pub media_presentation_duration: Option<f64>,
    pub base_url: Url,
    pub utc_timing: Vec<UtcTiming>,

    periods: Vec<Period>,
    adaptation_sets: Vec<AdaptationSet>,
    representations: Vec<Representation>,
}

impl Manifest {
    /// Parse a manifest fetched from `manifest_url`.
    pub fn parse(text: &str, manifest_url: &Url) -> NagareResult<Self> {
        check_document_root(text)?;
        let mpd = dash_mpd::parse(text)?;
        Self::from_mpd(mpd, manifest_url)
    }

    pub fn from_mpd(mpd: dash_mpd::MPD, manifest_url: &Url) -> NagareResult<Self> {
        let presentation_type = match mpd.mpdtype.as_deref() {
            Some("dynamic") => PresentationType::Dynamic,
            _ => PresentationType::Static,
        };

        let base_url = match mpd.base_url.first() {
            Some(base) => url::merge_baseurls(manifest_url, &base.base)?,
            None => manifest_url.clone(),
        };

        let mut manifest = Self {
            presentation_type,
            availability_start_time: mpd.availabilityStartTime,
            minimum_update_period: mpd.minimumUpdatePeriod.map(|d| d.as_secs_f64()),
            min_buffer_time: mpd
                .minBufferTime
                .map(|d| d.as_secs_f64())
                .unwrap_or(DEFAULT_MIN_BUFFER_TIME),
            time_shift_buffer_depth: mpd.timeShiftBufferDepth.map(|d| d.as_secs_f64()),
            suggested_presentation_delay: mpd
                .suggestedPresentationDelay
                .map(|d| d.as_secs_f64()),
            media_presentation_duration: mpd.mediaPresentationDuration.map(|d| d.as_secs_f64()),
            base_url,
            utc_timing: mpd
                .UTCTiming
                .iter()
                .map(|t| UtcTiming {
                    scheme_id_uri: t.schemeIdUri.clone(),
                    value: t.value.clone(),
                })
                .collect(),
            periods: Vec::with_capacity(mpd.periods.len()),
            adaptation_sets: Vec::new(),
            representations: Vec::new(),
        };

        for (index, period) in mpd.periods.iter().enumerate() {
            if manifest.is_dynamic() && period.id.is_none() {
                return Err(NagareError::MissingPeriodId(index));
            }
            manifest.build_period(period)?;
        }

        let invalid = manifest
            .representations
            .iter()
            .filter(|r| !r.is_valid())
            .count();
        tracing::debug!(
            periods = manifest.periods.len(),
            adaptation_sets = manifest.adaptation_sets.len(),
            representations = manifest.representations.len(),
            invalid,
            "Manifest parsed"
        );
        Ok(manifest)
    }

    pub fn is_dynamic(&self) -> bool {
        self.presentation_type == PresentationType::Dynamic
    }

    pub fn operation_mode(&self) -> OperationMode {
        match (self.presentation_type, self.minimum_update_period) {
            (PresentationType::Static, _) => OperationMode::Static,
            (PresentationType::Dynamic, Some(_)) => OperationMode::SimpleLive,
            (PresentationType::Dynamic, None) => OperationMode::Dynamic,
        }
    }

    pub fn periods(&self) -> impl Iterator<Item = (PeriodId, &Period)> {
        self.periods
            .iter()
            .enumerate()
            .map(|(i, p)| (PeriodId(i), p))
    }

    pub fn period(&self, id: PeriodId) -> &Period {
        &self.periods[id.0]
    }

    pub fn adaptation_set(&self, id: AdaptationSetId) -> &AdaptationSet {
        &self.adaptation_sets[id.0]
    }

    pub fn representation(&self, id: RepresentationId) -> &Representation {
        &self.representations[id.0]
    }

    pub fn adaptation_sets_of(
        &self,
        period: PeriodId,
    ) -> impl Iterator<Item = (AdaptationSetId, &AdaptationSet)> {
        self.period(period)
            .adaptation_sets
            .iter()
            .map(|id| (*id, self.adaptation_set(*id)))
    }

    /// Valid representations of an adaptation set. Invalid ones are never
    /// candidates for selection.
    pub fn selectable(
        &self,
        adaptation_set: AdaptationSetId,
    ) -> impl Iterator<Item = (RepresentationId, &Representation)> {
        self.adaptation_set(adaptation_set)
            .representations
            .iter()
            .map(|id| (*id, self.representation(*id)))
            .filter(|(_, r)| r.is_valid())
    }

    /// Content type of a representation, falling back to its adaptation set.
    pub fn content_type(&self, representation: RepresentationId) -> Option<ContentType> {
        let representation = self.representation(representation);
        ContentType::from_mime_type(representation.mime_type.as_deref())
            .or_else(|| self.adaptation_set(representation.parent).content_type)
    }

    fn build_period(&mut self, period: &dash_mpd::Period) -> NagareResult<PeriodId> {
        let id = PeriodId(self.periods.len());

        let mut base_url = self.base_url.clone();
        if let Some(base) = period.BaseURL.first() {
            base_url = url::merge_baseurls(&base_url, &base.base)?;
        }

        self.periods.push(Period {
            id: period.id.clone(),
            start: period.start.map(|d| d.as_secs_f64()),
            duration: period.duration.map(|d| d.as_secs_f64()),
            base_url,
            segment_template: period.SegmentTemplate.as_ref().map(segment_template),
            segment_list: period.SegmentList.as_ref().map(segment_list).transpose()?,
            adaptation_sets: Vec::with_capacity(period.adaptations.len()),
        });

        for adaptation_set in &period.adaptations {
            let child = self.build_adaptation_set(id, adaptation_set)?;
            self.periods[id.0].adaptation_sets.push(child);
        }
        Ok(id)
    }

    fn build_adaptation_set(
        &mut self,
        parent: PeriodId,
        adaptation_set: &dash_mpd::AdaptationSet,
    ) -> NagareResult<AdaptationSetId> {
        let id = AdaptationSetId(self.adaptation_sets.len());
        let period = &self.periods[parent.0];

        let mut base_url = period.base_url.clone();
        if let Some(base) = adaptation_set.BaseURL.first() {
            base_url = url::merge_baseurls(&base_url, &base.base)?;
        }

        let segment_template = inherit_template(
            adaptation_set.SegmentTemplate.as_ref().map(segment_template),
            period.segment_template.as_ref(),
        );
        let segment_list = inherit_list(
            adaptation_set
                .SegmentList
                .as_ref()
                .map(segment_list)
                .transpose()?,
            period.segment_list.as_ref(),
        );

        let content_type = match adaptation_set.contentType.as_deref() {
            Some("video") => Some(ContentType::Video),
            Some("audio") => Some(ContentType::Audio),
            _ => ContentType::from_mime_type(adaptation_set.mimeType.as_deref()),
        };

        self.adaptation_sets.push(AdaptationSet {
            parent,
            id: adaptation_set.id.clone(),
            content_type,
            mime_type: adaptation_set.mimeType.clone(),
            codecs: adaptation_set.codecs.clone(),
            width: adaptation_set.width,
            height: adaptation_set.height,
            frame_rate: adaptation_set.frameRate.clone(),
            base_url,
            segment_template,
            segment_list,
            representations: Vec::with_capacity(adaptation_set.representations.len()),
        });

        for representation in &adaptation_set.representations {
            let child = self.build_representation(id, representation)?;
            self.adaptation_sets[id.0].representations.push(child);
        }
        Ok(id)
    }

    fn build_representation(
        &mut self,
        parent: AdaptationSetId,
        representation: &dash_mpd::Representation,
    ) -> NagareResult<RepresentationId> {
        let id = RepresentationId(self.representations.len());
        let adaptation_set = &self.adaptation_sets[parent.0];

        let mut base_url = adaptation_set.base_url.clone();
        if let Some(base) = representation.BaseURL.first() {
            base_url = url::merge_baseurls(&base_url, &base.base)?;
        }

        let segment_template = inherit_template(
            representation.SegmentTemplate.as_ref().map(segment_template),
            adaptation_set.segment_template.as_ref(),
        );
        let segment_list = inherit_list(
            representation
                .SegmentList
                .as_ref()
                .map(segment_list)
                .transpose()?,
            adaptation_set.segment_list.as_ref(),
        );

        let addressing = resolve_addressing(
            &base_url,
            representation.id.as_deref(),
            representation.bandwidth,
            segment_template,
            segment_list,
        );
        if let Err(reason) = &addressing {
            tracing::warn!(
                representation = representation.id.as_deref().unwrap_or_default(),
                %reason,
                "Representation excluded"
            );
        }

        self.representations.push(Representation {
            parent,
            id: representation.id.clone(),
            bandwidth: representation.bandwidth,
            mime_type: representation
                .mimeType
                .clone()
                .or_else(|| adaptation_set.mime_type.clone()),
            codecs: representation
                .codecs
                .clone()
                .or_else(|| adaptation_set.codecs.clone()),
            width: representation.width.or(adaptation_set.width),
            height: representation.height.or(adaptation_set.height),
            frame_rate: representation
                .frameRate
                .clone()
                .or_else(|| adaptation_set.frame_rate.clone()),
            base_url,
            addressing,
        });
        Ok(id)
    }
}

/// Reject documents that are empty or do not have exactly one root element
/// before handing them to the MPD deserialiser.
fn check_document_root(text: &str) -> NagareResult<()> {
    if text.trim().is_empty() {
        return Err(NagareError::EmptyManifest);
    }

    let mut reader = Reader::from_str(text);
    let mut depth = 0usize;
    let mut roots = 0usize;
    loop {
        match reader.read_event()? {
            Event::Start(_) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Empty(_) if depth == 0 => roots += 1,
            Event::Eof => break,
            _ => {}
        }
    }

    if roots != 1 {
        return Err(NagareError::InvalidManifestRoot(roots));
    }
    Ok(())
}

fn inherit_template(
    own: Option<SegmentTemplate>,
    parent: Option<&SegmentTemplate>,
) -> Option<SegmentTemplate> {
    match (own, parent) {
        (Some(mut own), Some(parent)) => {
            own.inherit_from(parent);
            Some(own)
        }
        (Some(own), None) => Some(own),
        (None, parent) => parent.cloned(),
    }
}

fn inherit_list(own: Option<SegmentList>, parent: Option<&SegmentList>) -> Option<SegmentList> {
    match (own, parent) {
        (Some(mut own), Some(parent)) => {
            own.inherit_from(parent);
            Some(own)
        }
        (Some(own), None) => Some(own),
        (None, parent) => parent.cloned(),
    }
}

fn segment_template(template: &dash_mpd::SegmentTemplate) -> SegmentTemplate {
    SegmentTemplate {
        media: template.media.clone(),
        initialization: template.initialization.clone(),
        index: template.index.clone(),
        bitstream_switching: template.bitstreamSwitching.clone(),
        start_number: template.startNumber,
        timescale: template.timescale,
        duration: template.duration.map(|d| d.round() as u64),
        presentation_time_offset: template.presentationTimeOffset,
        timeline: template.SegmentTimeline.as_ref().map(|timeline| SegmentTimeline {
            rows: timeline
                .segments
                .iter()
                .map(|s| TimelineRow {
                    t: s.t,
                    d: s.d,
                    r: s.r.unwrap_or(0),
                })
                .collect(),
        }),
    }
}

fn segment_list(list: &dash_mpd::SegmentList) -> NagareResult<SegmentList> {
    let initialization = list
        .Initialization
        .as_ref()
        .map(|init| -> NagareResult<Initialization> {
            Ok(Initialization {
                source_url: init.sourceURL.clone(),
                range: init.range.as_deref().map(url::parse_media_range).transpose()?,
            })
        })
        .transpose()?;

    let segment_urls = list
        .segment_urls
        .iter()
        .map(|segment| -> NagareResult<SegmentUrl> {
            Ok(SegmentUrl {
                media: segment.media.clone(),
                media_range: segment
                    .mediaRange
                    .as_deref()
                    .map(url::parse_media_range)
                    .transpose()?,
            })
        })
        .collect::<NagareResult<Vec<_>>>()?;

    Ok(SegmentList {
        timescale: list.timescale,
        duration: list.duration,
        initialization,
        segment_urls,
    })
}

fn resolve_addressing(
    base_url: &Url,
    representation_id: Option<&str>,
    bandwidth: Option<u64>,
    template: Option<SegmentTemplate>,
    list: Option<SegmentList>,
) -> Result<Addressing, InvalidRepresentation> {
    // a template without `media` only carries attributes for descendants
    let has_media = template.as_ref().is_some_and(|t| t.media.is_some());
    match (template, list) {
        (Some(_), Some(_)) if has_media => Err(InvalidRepresentation::AmbiguousAddressing),
        (None, None) => Err(InvalidRepresentation::NoAddressing),
        (Some(template), None) => {
            let compile = |source: &Option<String>, field| {
                source
                    .as_deref()
                    .map(|s| FormatString::compile(s, field, representation_id, bandwidth))
                    .transpose()
                    .map_err(|e| InvalidRepresentation::InvalidTemplate(e.to_string()))
            };

            let media = compile(&template.media, TemplateField::Media)?
                .ok_or(InvalidRepresentation::MissingMedia)?;
            let initialization = compile(&template.initialization, TemplateField::Initialization)?;
            let index = compile(&template.index, TemplateField::Index)?;
            let bitstream_switching =
                compile(&template.bitstream_switching, TemplateField::BitstreamSwitching)?;

            if template.timeline.is_none() && template.duration.unwrap_or(0) == 0 {
                return Err(InvalidRepresentation::MissingDuration);
            }

            Ok(Addressing::Template(Arc::new(TemplateAddressing {
                base_url: base_url.clone(),
                media,
                initialization,
                index,
                bitstream_switching,
                start_number: template.start_number.unwrap_or(1),
                timescale: template.timescale.filter(|t| *t > 0).unwrap_or(1),
                duration: template.duration,
                presentation_time_offset: template.presentation_time_offset.unwrap_or(0),
                timeline: template.timeline,
            })))
        }
        (_, Some(list)) => {
            let duration = list
                .duration
                .filter(|d| *d > 0)
                .ok_or(InvalidRepresentation::MissingDuration)?;
            Ok(Addressing::List(Arc::new(ListAddressing {
                base_url: base_url.clone(),
                // dash-mpd does not expose SegmentList@startNumber
                start_number: 1,
                timescale: list.timescale.filter(|t| *t > 0).unwrap_or(1),
                duration,
                initialization: list.initialization,
                segment_urls: list.segment_urls,
            })))
        }
    }
}
