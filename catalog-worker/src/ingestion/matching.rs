//! Targeted mode: pairing SKU text occurrences with detected regions.

use tracing::debug;

use super::detection::CandidateRegion;
use super::geometry::{Rectangle, distance};
use super::reconcile::CoordinateReconciler;

/// One occurrence of a queried SKU string, in top-left-origin vector space.
#[derive(Debug, Clone, PartialEq)]
pub struct TextHit {
    pub sku: String,
    pub rect: Rectangle,
}

/// A candidate region confirmed as the image for a SKU occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRegion {
    pub region: CandidateRegion,
    pub assigned_sku: String,
    pub match_distance: f64,
}

/// Result of matching a single text hit.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Accepted(MatchedRegion),
    /// Nearest candidate was at or beyond the distance limit
    TooFar { distance: f64 },
    NoCandidates,
}

/// Nearest-center matcher with a distance limit relative to page height.
#[derive(Debug, Clone, Copy)]
pub struct TargetMatcher {
    max_distance_ratio: f64,
}

impl TargetMatcher {
    pub fn new(max_distance_ratio: f64) -> Self {
        Self { max_distance_ratio }
    }

    /// Match one text hit against the page's candidates.
    ///
    /// The nearest candidate by center-to-center distance wins; on a tie the
    /// first one in candidate order (learned before contour) is kept. The
    /// match is accepted only when strictly closer than
    /// `max_distance_ratio * page_height` pixels.
    pub fn match_hit(
        &self,
        hit: &TextHit,
        reconciler: &CoordinateReconciler,
        candidates: &[CandidateRegion],
        page_height: u32,
    ) -> MatchOutcome {
        let hit_center = reconciler.to_pixels(&hit.rect).center();

        let mut nearest: Option<(&CandidateRegion, f64)> = None;
        for candidate in candidates {
            let d = distance(hit_center, candidate.bounds.center());
            if nearest.is_none_or(|(_, best)| d < best) {
                nearest = Some((candidate, d));
            }
        }

        let Some((region, match_distance)) = nearest else {
            return MatchOutcome::NoCandidates;
        };

        let limit = self.max_distance_ratio * f64::from(page_height);
        if match_distance < limit {
            MatchOutcome::Accepted(MatchedRegion {
                region: *region,
                assigned_sku: hit.sku.clone(),
                match_distance,
            })
        } else {
            MatchOutcome::TooFar {
                distance: match_distance,
            }
        }
    }

    /// Match every hit on a page, keeping accepted matches in hit order.
    pub fn match_page(
        &self,
        hits: &[TextHit],
        reconciler: &CoordinateReconciler,
        candidates: &[CandidateRegion],
        page_height: u32,
    ) -> Vec<MatchedRegion> {
        hits.iter()
            .filter_map(
                |hit| match self.match_hit(hit, reconciler, candidates, page_height) {
                    MatchOutcome::Accepted(matched) => {
                        debug!(
                            sku = %matched.assigned_sku,
                            distance = matched.match_distance,
                            "Matched SKU to region"
                        );
                        Some(matched)
                    }
                    MatchOutcome::TooFar { distance } => {
                        debug!(sku = %hit.sku, distance, "Nearest region too far from SKU text");
                        None
                    }
                    MatchOutcome::NoCandidates => {
                        debug!(sku = %hit.sku, "No candidate regions on page");
                        None
                    }
                },
            )
            .collect()
    }
}
