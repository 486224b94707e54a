use std::cmp::Ordering;

use crate::manifest::{AdaptationSetId, ContentType, Manifest, PeriodId, Representation, RepresentationId};

/// Chooses the representation to buffer from an adaptation set.
pub trait RepresentationSelector: Send + Sync {
    fn select(&self, manifest: &Manifest, adaptation_set: AdaptationSetId) -> Option<RepresentationId>;
}

/// Picks the representation with the largest resolution, then bandwidth.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestRepresentation;

impl RepresentationSelector for BestRepresentation {
    fn select(&self, manifest: &Manifest, adaptation_set: AdaptationSetId) -> Option<RepresentationId> {
        manifest
            .selectable(adaptation_set)
            .max_by_key(|(_, representation)| best_representation(representation))
            .map(|(id, _)| id)
    }
}

/// Picks the representation with the lowest bandwidth.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowestBandwidth;

impl RepresentationSelector for LowestBandwidth {
    fn select(&self, manifest: &Manifest, adaptation_set: AdaptationSetId) -> Option<RepresentationId> {
        manifest
            .selectable(adaptation_set)
            .min_by_key(|(_, representation)| representation.bandwidth.unwrap_or(u64::MAX))
            .map(|(id, _)| id)
    }
}

/// The first adaptation set of `content_type` in a period that has a
/// selectable representation, together with the selected one.
pub fn select_for(
    selector: &dyn RepresentationSelector,
    manifest: &Manifest,
    period: PeriodId,
    content_type: ContentType,
) -> Option<RepresentationId> {
    manifest
        .adaptation_sets_of(period)
        .filter(|(_, set)| set.content_type == Some(content_type))
        .find_map(|(id, _)| selector.select(manifest, id))
}

pub fn best_representation(representation: &Representation) -> impl Ord {
    BestRepresentationSelector {
        width: representation.width,
        height: representation.height,
        bandwidth: representation.bandwidth,
    }
}

#[derive(PartialEq, Eq)]
struct BestRepresentationSelector {
    width: Option<u64>,
    height: Option<u64>,
    bandwidth: Option<u64>,
}

impl PartialOrd for BestRepresentationSelector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BestRepresentationSelector {
    fn cmp(&self, other: &Self) -> Ordering {
        self.width
            .cmp(&other.width)
            .then(self.height.cmp(&other.height))
            .then(self.bandwidth.cmp(&other.bandwidth))
    }
}
