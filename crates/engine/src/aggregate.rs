//! Feature aggregation for candidate scoring.
//!
//! For one candidate and the two labeled reference sets, this module
//! computes the mean of each feature over the distance records linking the
//! candidate to the liked set and, separately, to the disliked set. The
//! result is the fixed-width input vector the trained scorer expects.
//!
//! Missing data is strict: a slot with zero contributing values stays
//! absent and reaches the model as NaN. Zero is a real similarity value
//! and is never substituted for missing.

use data_loader::{DistanceTable, Feature, LocationId, MODEL_INPUT_WIDTH, Side};
use std::collections::BTreeSet;

/// Per-candidate aggregated means: one nullable slot per (side, feature).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregatedVector {
    pub liked: [Option<f64>; Feature::COUNT],
    pub disliked: [Option<f64>; Feature::COUNT],
}

impl AggregatedVector {
    fn side_slice(&self, side: Side) -> &[Option<f64>; Feature::COUNT] {
        match side {
            Side::Liked => &self.liked,
            Side::Disliked => &self.disliked,
        }
    }

    /// Mean for one (side, feature) slot, if any value contributed
    pub fn value(&self, side: Side, feature: Feature) -> Option<f64> {
        self.side_slice(side)[feature.index()]
    }

    /// Model input in training order: liked-side block first, then
    /// disliked-side; missing slots become NaN.
    pub fn to_model_input(&self) -> [f64; MODEL_INPUT_WIDTH] {
        let mut input = [f64::NAN; MODEL_INPUT_WIDTH];
        for feature in Feature::ALL {
            if let Some(v) = self.liked[feature.index()] {
                input[feature.index()] = v;
            }
            if let Some(v) = self.disliked[feature.index()] {
                input[Feature::COUNT + feature.index()] = v;
            }
        }
        input
    }

    /// Present slots in fixed (side, feature) order
    pub fn present_slots(&self) -> impl Iterator<Item = (Side, Feature, f64)> + '_ {
        Side::ALL.into_iter().flat_map(move |side| {
            Feature::ALL
                .into_iter()
                .filter_map(move |feature| self.value(side, feature).map(|v| (side, feature, v)))
        })
    }

    /// True when no slot on either side has a value
    pub fn is_fully_missing(&self) -> bool {
        self.present_slots().next().is_none()
    }
}

/// Outcome of aggregating one candidate.
///
/// `Insufficient` means no distance record links the candidate to either
/// reference set; the candidate cannot be scored and is excluded upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Vector(AggregatedVector),
    Insufficient,
}

/// Running mean accumulator per (side, feature) slot
#[derive(Default, Clone, Copy)]
struct SlotAccumulator {
    sum: f64,
    count: u32,
}

impl SlotAccumulator {
    fn push(&mut self, value: f64) {
        // Null cells never reach here; NaN stored in the table is dropped
        if value.is_finite() {
            self.sum += value;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Aggregate one candidate against the labeled reference sets.
///
/// Pure function over its inputs: selects every record touching
/// `candidate`, partitions by whether the other endpoint is liked or
/// disliked, and averages each feature per partition. A record whose other
/// endpoint is in neither set contributes nothing. A candidate appearing
/// in a reference set itself is a caller error prevented upstream.
pub fn aggregate(
    table: &DistanceTable,
    candidate: &str,
    liked: &BTreeSet<LocationId>,
    disliked: &BTreeSet<LocationId>,
) -> Aggregation {
    let mut liked_acc = [SlotAccumulator::default(); Feature::COUNT];
    let mut disliked_acc = [SlotAccumulator::default(); Feature::COUNT];
    let mut liked_records = 0usize;
    let mut disliked_records = 0usize;

    for record in table.records_touching(candidate) {
        let Some(other) = record.other_endpoint(candidate) else {
            continue;
        };
        let (acc, counter) = if liked.contains(other) {
            (&mut liked_acc, &mut liked_records)
        } else if disliked.contains(other) {
            (&mut disliked_acc, &mut disliked_records)
        } else {
            continue;
        };
        *counter += 1;
        for feature in Feature::ALL {
            if let Some(value) = record.value(feature) {
                acc[feature.index()].push(value);
            }
        }
    }

    // No relation to either reference set at all: cannot score
    if liked_records == 0 && disliked_records == 0 {
        return Aggregation::Insufficient;
    }

    let mut vector = AggregatedVector::default();
    for feature in Feature::ALL {
        vector.liked[feature.index()] = liked_acc[feature.index()].mean();
        vector.disliked[feature.index()] = disliked_acc[feature.index()].mean();
    }
    Aggregation::Vector(vector)
}
