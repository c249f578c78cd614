//! Consolidation of overlapping candidate regions on one page.

use std::cmp::Ordering;

use tracing::{debug, trace};

use crate::config::{ConflictPolicy, MergeConfig};
use crate::geometry::{CandidateRegion, ContentType};

/// Collapses overlapping and duplicate candidates into canonical regions.
#[derive(Debug, Clone)]
pub struct RegionMerger {
    config: MergeConfig,
}

impl RegionMerger {
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Merge the candidates of one page.
    ///
    /// Candidates are swept in `(x, y)` order; each one either folds into the
    /// first accumulated region it overlaps enough, or is kept as is. Sweeps
    /// repeat until nothing changes, so the output has no pair of regions
    /// that would merge and `merge(merge(x)) == merge(x)`. Output is ordered
    /// by position.
    pub fn merge(&self, candidates: &[CandidateRegion]) -> Vec<CandidateRegion> {
        let mut regions = candidates.to_vec();
        let mut sweeps = 0;

        loop {
            sort_by_position(&mut regions);
            let (merged, changed) = self.sweep(regions);
            regions = merged;
            sweeps += 1;
            if !changed {
                break;
            }
        }

        debug!(
            candidates = candidates.len(),
            regions = regions.len(),
            sweeps,
            "Merged candidate regions"
        );
        regions
    }

    /// One ordered pass. Returns the accumulated regions and whether any
    /// merge happened.
    fn sweep(&self, sorted: Vec<CandidateRegion>) -> (Vec<CandidateRegion>, bool) {
        let mut accumulated: Vec<CandidateRegion> = Vec::with_capacity(sorted.len());
        let mut changed = false;

        for candidate in sorted {
            match accumulated
                .iter()
                .position(|existing| self.should_merge(existing, &candidate))
            {
                Some(index) => {
                    let existing = accumulated[index];
                    let merged = CandidateRegion::new(
                        existing.bounds.union(&candidate.bounds),
                        self.resolve_type(&existing, &candidate),
                        existing.page,
                    );
                    trace!(
                        existing = %existing.bounds,
                        candidate = %candidate.bounds,
                        merged = %merged.bounds,
                        content_type = ?merged.content_type,
                        "Merged overlapping regions"
                    );
                    accumulated[index] = merged;
                    changed = true;
                }
                None => accumulated.push(candidate),
            }
        }

        (accumulated, changed)
    }

    fn should_merge(&self, existing: &CandidateRegion, candidate: &CandidateRegion) -> bool {
        if existing.page != candidate.page {
            return false;
        }
        if self.config.conflict_policy == ConflictPolicy::KeepBoth
            && existing.content_type != candidate.content_type
        {
            return false;
        }

        let intersection = existing.bounds.intersection_area(&candidate.bounds) as f64;
        let smaller = existing.bounds.area().min(candidate.bounds.area()) as f64;
        intersection > self.config.overlap_ratio * smaller
    }

    /// The larger box keeps its type; equal areas go to the higher priority.
    fn resolve_type(&self, a: &CandidateRegion, b: &CandidateRegion) -> ContentType {
        match a.bounds.area().cmp(&b.bounds.area()) {
            Ordering::Greater => a.content_type,
            Ordering::Less => b.content_type,
            Ordering::Equal => {
                if self.priority(a.content_type) <= self.priority(b.content_type) {
                    a.content_type
                } else {
                    b.content_type
                }
            }
        }
    }

    fn priority(&self, content_type: ContentType) -> usize {
        self.config
            .type_priority
            .iter()
            .position(|t| *t == content_type)
            .unwrap_or(self.config.type_priority.len())
    }
}

fn sort_by_position(regions: &mut [CandidateRegion]) {
    regions.sort_by_key(|r| (r.bounds.x, r.bounds.y, r.bounds.width, r.bounds.height));
}
