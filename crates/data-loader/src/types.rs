//! Core domain types for the distance table.
//!
//! This module defines the fundamental data structures shared by the
//! aggregator, the trained scorer, and the explanation layer:
//! - Type aliases for domain clarity (LocationId, Region)
//! - The closed, ordered Feature vocabulary
//! - DistanceRecord and the indexed DistanceTable

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// =============================================================================
// Type Aliases
// =============================================================================

/// Opaque identifier for a location (a CBSA city name or a zip-level area code)
pub type LocationId = String;

/// Region tag a location belongs to (e.g., which metro area a zip code is in).
/// Irrelevant to scoring; used only for candidate-set filtering upstream.
pub type Region = String;

// =============================================================================
// Feature Vocabulary
// =============================================================================

/// The fixed, ordered set of pairwise distance/similarity dimensions.
///
/// The vocabulary is closed: it is shared between the distance table, the
/// aggregator, and the trained scorer, whose input schema is exactly
/// `2 * Feature::COUNT` columns in this order. It must never be re-derived
/// from data at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    /// Cultural-scene similarity
    Scenes,
    /// Venue-type cosine similarity
    VenueMix,
    Geographic,
    Population,
    Education,
    Demographics,
    Income,
    Employment,
    Political,
}

impl Feature {
    /// Number of features in the vocabulary
    pub const COUNT: usize = 9;

    /// All features in the fixed training order
    pub const ALL: [Feature; Feature::COUNT] = [
        Feature::Scenes,
        Feature::VenueMix,
        Feature::Geographic,
        Feature::Population,
        Feature::Education,
        Feature::Demographics,
        Feature::Income,
        Feature::Employment,
        Feature::Political,
    ];

    /// Column name used by the distance table and the trained artifact
    pub fn column_name(&self) -> &'static str {
        match self {
            Feature::Scenes => "scenesDistance",
            Feature::VenueMix => "frequencyCosine",
            Feature::Geographic => "geographicDistance",
            Feature::Population => "populationDistance",
            Feature::Education => "bachelorDistance",
            Feature::Demographics => "raceDistance",
            Feature::Income => "incomeDistance",
            Feature::Employment => "employmentDistance",
            Feature::Political => "votingDistance",
        }
    }

    /// Position of this feature in [`Feature::ALL`]
    pub fn index(&self) -> usize {
        Feature::ALL
            .iter()
            .position(|f| f == self)
            .expect("feature is in ALL")
    }

    /// Look up a feature by its table/artifact column name
    pub fn from_column_name(name: &str) -> Option<Feature> {
        Feature::ALL.iter().copied().find(|f| f.column_name() == name)
    }
}

/// Width of the trained scorer's input schema: one liked-side mean and one
/// disliked-side mean per feature, liked block first.
pub const MODEL_INPUT_WIDTH: usize = Feature::COUNT * 2;

/// Which reference set an aggregated value was computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// "More of" reference set
    Liked,
    /// "Less of" reference set
    Disliked,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Liked, Side::Disliked];

    /// Qualified column name as the artifact was trained with
    /// (`mean_top_*` / `mean_bottom_*`)
    pub fn qualified_name(&self, feature: Feature) -> String {
        match self {
            Side::Liked => format!("mean_top_{}", feature.column_name()),
            Side::Disliked => format!("mean_bottom_{}", feature.column_name()),
        }
    }

    /// Key used for raw per-feature means in caller-facing output
    /// (`top_*` / `bottom_*`)
    pub fn raw_key(&self, feature: Feature) -> String {
        match self {
            Side::Liked => format!("top_{}", feature.column_name()),
            Side::Disliked => format!("bottom_{}", feature.column_name()),
        }
    }
}

// =============================================================================
// Distance Records
// =============================================================================

/// Precomputed per-feature distances between one unordered pair of locations.
///
/// The pair is symmetric: `(a, b)` and `(b, a)` mean the same thing. The
/// relation is sparse; any feature value may be absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistanceRecord {
    pub a: LocationId,
    pub b: LocationId,
    pub region_a: Region,
    pub region_b: Region,
    /// One nullable value per feature, in `Feature::ALL` order
    pub values: [Option<f64>; Feature::COUNT],
}

impl DistanceRecord {
    /// Given one endpoint, return the other; `None` if `loc` is not an endpoint.
    pub fn other_endpoint(&self, loc: &str) -> Option<&LocationId> {
        if self.a == loc {
            Some(&self.b)
        } else if self.b == loc {
            Some(&self.a)
        } else {
            None
        }
    }

    /// Whether this record touches the given location on either side
    pub fn touches(&self, loc: &str) -> bool {
        self.a == loc || self.b == loc
    }

    /// Value for one feature (may be absent)
    pub fn value(&self, feature: Feature) -> Option<f64> {
        self.values[feature.index()]
    }
}

// =============================================================================
// DistanceTable - The Core In-Memory Relation
// =============================================================================

/// Read-only relation of precomputed pairwise distances between all known
/// locations, indexed for fast per-candidate lookups.
///
/// Loaded once at startup and shared immutably across all requests.
#[derive(Debug, Default)]
pub struct DistanceTable {
    pub(crate) records: Vec<DistanceRecord>,
    /// For each location, indices of the records that touch it
    pub(crate) by_location: HashMap<LocationId, Vec<usize>>,
    /// Region tag per location
    pub(crate) regions: HashMap<LocationId, Region>,
}

impl DistanceTable {
    /// Creates a new, empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record and update the per-location index
    pub fn insert_record(&mut self, record: DistanceRecord) {
        let idx = self.records.len();
        self.by_location
            .entry(record.a.clone())
            .or_default()
            .push(idx);
        self.by_location
            .entry(record.b.clone())
            .or_default()
            .push(idx);
        self.regions
            .entry(record.a.clone())
            .or_insert_with(|| record.region_a.clone());
        self.regions
            .entry(record.b.clone())
            .or_insert_with(|| record.region_b.clone());
        self.records.push(record);
    }

    /// All records that have `loc` as either endpoint
    pub fn records_touching<'a>(
        &'a self,
        loc: &'a str,
    ) -> impl Iterator<Item = &'a DistanceRecord> + 'a {
        self.by_location
            .get(loc)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&i| &self.records[i])
    }

    /// All known locations, sorted for deterministic iteration
    pub fn locations(&self) -> BTreeSet<LocationId> {
        self.by_location.keys().cloned().collect()
    }

    /// Known locations restricted to one region, sorted
    pub fn locations_in_region(&self, region: &str) -> BTreeSet<LocationId> {
        self.regions
            .iter()
            .filter(|(_, r)| r.as_str() == region)
            .map(|(loc, _)| loc.clone())
            .collect()
    }

    /// Region tag of a known location
    pub fn region_of(&self, loc: &str) -> Option<&Region> {
        self.regions.get(loc)
    }

    /// Whether the table knows this location at all
    pub fn contains(&self, loc: &str) -> bool {
        self.by_location.contains_key(loc)
    }

    /// Number of distance records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(a: &str, b: &str, scenes: Option<f64>) -> DistanceRecord {
        let mut values = [None; Feature::COUNT];
        values[Feature::Scenes.index()] = scenes;
        DistanceRecord {
            a: a.to_string(),
            b: b.to_string(),
            region_a: "US".to_string(),
            region_b: "US".to_string(),
            values,
        }
    }

    #[test]
    fn test_feature_order_is_fixed() {
        assert_eq!(Feature::ALL.len(), Feature::COUNT);
        assert_eq!(Feature::Scenes.index(), 0);
        assert_eq!(Feature::Political.index(), 8);
        assert_eq!(MODEL_INPUT_WIDTH, 18);
    }

    #[test]
    fn test_feature_column_name_round_trip() {
        for feature in Feature::ALL {
            assert_eq!(Feature::from_column_name(feature.column_name()), Some(feature));
        }
        assert_eq!(Feature::from_column_name("unknownColumn"), None);
    }

    #[test]
    fn test_side_naming() {
        assert_eq!(
            Side::Liked.qualified_name(Feature::Scenes),
            "mean_top_scenesDistance"
        );
        assert_eq!(
            Side::Disliked.qualified_name(Feature::VenueMix),
            "mean_bottom_frequencyCosine"
        );
        assert_eq!(Side::Liked.raw_key(Feature::Income), "top_incomeDistance");
        assert_eq!(Side::Disliked.raw_key(Feature::Income), "bottom_incomeDistance");
    }

    #[test]
    fn test_record_endpoints_are_symmetric() {
        let rec = record("Austin", "Boston", Some(0.4));
        assert_eq!(rec.other_endpoint("Austin"), Some(&"Boston".to_string()));
        assert_eq!(rec.other_endpoint("Boston"), Some(&"Austin".to_string()));
        assert_eq!(rec.other_endpoint("Denver"), None);
        assert!(rec.touches("Austin"));
        assert!(!rec.touches("Denver"));
    }

    #[test]
    fn test_table_index_by_location() {
        let mut table = DistanceTable::new();
        table.insert_record(record("Austin", "Boston", Some(0.4)));
        table.insert_record(record("Austin", "Denver", Some(0.7)));
        table.insert_record(record("Boston", "Denver", None));

        assert_eq!(table.len(), 3);
        assert_eq!(table.records_touching("Austin").count(), 2);
        assert_eq!(table.records_touching("Denver").count(), 2);
        assert_eq!(table.records_touching("Reno").count(), 0);

        let locations = table.locations();
        assert_eq!(locations.len(), 3);
        assert!(locations.contains("Boston"));
    }

    #[test]
    fn test_region_lookup() {
        let mut table = DistanceTable::new();
        let mut rec = record("78701", "78702", Some(0.2));
        rec.region_a = "Austin".to_string();
        rec.region_b = "Austin".to_string();
        table.insert_record(rec);

        assert_eq!(table.region_of("78701"), Some(&"Austin".to_string()));
        assert_eq!(table.locations_in_region("Austin").len(), 2);
        assert!(table.locations_in_region("Boston").is_empty());
    }
}
