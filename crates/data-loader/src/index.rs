//! DistanceTable loading and validation.
//!
//! Builds the indexed [`DistanceTable`] from a parsed CSV and loads the two
//! granularities (city-level and area-level) in parallel. Tables are
//! process-wide, load-once resources; nothing here runs per request.

use crate::error::{DataLoadError, Result};
use crate::parser;
use crate::types::DistanceTable;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// The two granularities the system recommends at. Same engine, different
/// table and trained artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    City,
    Area,
}

impl Granularity {
    /// Conventional table file name under the data directory
    pub fn table_file_name(&self) -> &'static str {
        match self {
            Granularity::City => "similar_city_pairs.csv",
            Granularity::Area => "similar_area_pairs.csv",
        }
    }

    /// Conventional trained-artifact file name under the data directory
    pub fn model_file_name(&self) -> &'static str {
        match self {
            Granularity::City => "city_match_model.txt",
            Granularity::Area => "area_match_model.txt",
        }
    }
}

impl DistanceTable {
    /// Load and index one distance table from a CSV file.
    pub fn load_from_csv(path: &Path) -> Result<Self> {
        let records = parser::parse_distance_csv(path)?;
        info!(
            path = %path.display(),
            records = records.len(),
            "Loaded distance records"
        );

        let mut table = DistanceTable::new();
        for record in records {
            table.insert_record(record);
        }
        table.validate()?;
        info!(
            locations = table.locations().len(),
            "Distance table built and validated"
        );
        Ok(table)
    }

    /// Validate table integrity: every unordered pair appears at most once.
    ///
    /// Self-pairs are already rejected at parse time; a duplicated pair
    /// would silently double-weight one reference location in the means.
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashSet<(&str, &str)> = HashSet::with_capacity(self.records.len());
        for record in &self.records {
            let key = if record.a <= record.b {
                (record.a.as_str(), record.b.as_str())
            } else {
                (record.b.as_str(), record.a.as_str())
            };
            if !seen.insert(key) {
                return Err(DataLoadError::ValidationError(format!(
                    "Duplicate pair ({}, {})",
                    key.0, key.1
                )));
            }
        }
        Ok(())
    }
}

/// Load the city-level and area-level tables from a data directory in
/// parallel. Both must load; a broken table is fatal at startup.
pub fn load_tables(data_dir: &Path) -> Result<(DistanceTable, DistanceTable)> {
    let city_path = data_dir.join(Granularity::City.table_file_name());
    let area_path = data_dir.join(Granularity::Area.table_file_name());

    let (city, area) = rayon::join(
        || DistanceTable::load_from_csv(&city_path),
        || DistanceTable::load_from_csv(&area_path),
    );
    Ok((city?, area?))
}
