//! # Data Loader Crate
//!
//! This crate handles loading and indexing the pairwise distance tables
//! that back the preference-matching engine.
//!
//! ## Main Components
//!
//! - **types**: Core domain types (LocationId, Feature, DistanceRecord,
//!   DistanceTable)
//! - **parser**: Parse distance-table CSVs into records
//! - **index**: Build the indexed table, validation, per-granularity loading
//! - **error**: Error types for data loading
//!
//! ## Example Usage
//!
//! ```ignore
//! use data_loader::{DistanceTable, Feature};
//! use std::path::Path;
//!
//! let table = DistanceTable::load_from_csv(Path::new("data/similar_city_pairs.csv"))?;
//!
//! for record in table.records_touching("Austin") {
//!     println!("{} <-> {}: {:?}", record.a, record.b, record.value(Feature::Scenes));
//! }
//! ```

// Public modules
pub mod error;
pub mod types;
pub mod parser;
pub mod index;

// Re-export commonly used types for convenience
pub use error::{DataLoadError, Result};
pub use index::{Granularity, load_tables};
pub use types::{
    // Type aliases
    LocationId,
    Region,
    // Core types
    DistanceRecord,
    DistanceTable,
    // Enums and schema constants
    Feature,
    Side,
    MODEL_INPUT_WIDTH,
};
