//! Parser for the pairwise distance table CSV.
//!
//! Expected shape (column order free, header-driven):
//! `location_a,location_b,region_a,region_b,scenesDistance,...,votingDistance`
//!
//! Location names may contain commas ("New York-Newark, NY-NJ-PA"), so
//! fields are split with a minimal quote-aware scanner rather than a plain
//! `split(',')`. Feature cells may be empty or literal `NaN`/`null`; both
//! parse to an absent value, never to zero.

use crate::error::{DataLoadError, Result};
use crate::types::{DistanceRecord, Feature};
use std::fs;
use std::path::Path;

/// Column positions resolved from the header line.
struct ColumnMap {
    location_a: usize,
    location_b: usize,
    region_a: usize,
    region_b: usize,
    /// Position per feature, in `Feature::ALL` order; a feature column may
    /// be absent from the file entirely (all values treated as missing)
    features: [Option<usize>; Feature::COUNT],
}

/// Split one CSV line into fields, honoring double-quoted fields and
/// doubled-quote escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    // Escaped quote inside a quoted field
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Parse one feature cell. Empty cells and literal NaN/null markers are
/// missing data; 0.0 has a real similarity meaning and is kept.
fn parse_feature_cell(raw: &str) -> Result<Option<f64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "nan" | "null" | "na" | "none" => return Ok(None),
        _ => {}
    }
    let value: f64 = trimmed
        .parse()
        .map_err(|_| DataLoadError::InvalidValue {
            field: "feature".to_string(),
            value: trimmed.to_string(),
        })?;
    if value.is_nan() {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}

fn resolve_columns(file: &str, header: &[String]) -> Result<ColumnMap> {
    let find = |name: &str| -> Result<usize> {
        header
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| DataLoadError::MissingColumn {
                file: file.to_string(),
                column: name.to_string(),
            })
    };

    let mut features = [None; Feature::COUNT];
    for feature in Feature::ALL {
        features[feature.index()] = header
            .iter()
            .position(|h| h.trim() == feature.column_name());
    }

    Ok(ColumnMap {
        location_a: find("location_a")?,
        location_b: find("location_b")?,
        region_a: find("region_a")?,
        region_b: find("region_b")?,
        features,
    })
}

fn parse_record(
    file: &str,
    line_no: usize,
    fields: &[String],
    columns: &ColumnMap,
) -> Result<DistanceRecord> {
    let field = |idx: usize, name: &str| -> Result<&str> {
        fields
            .get(idx)
            .map(|s| s.trim())
            .ok_or_else(|| DataLoadError::ParseError {
                file: file.to_string(),
                line: line_no,
                reason: format!("Missing {name}"),
            })
    };

    let a = field(columns.location_a, "location_a")?.to_string();
    let b = field(columns.location_b, "location_b")?.to_string();
    let region_a = field(columns.region_a, "region_a")?.to_string();
    let region_b = field(columns.region_b, "region_b")?.to_string();

    if a.is_empty() || b.is_empty() {
        return Err(DataLoadError::ParseError {
            file: file.to_string(),
            line: line_no,
            reason: "Empty location id".to_string(),
        });
    }
    // A location paired with itself carries no preference signal and would
    // poison both partitions downstream.
    if a == b {
        return Err(DataLoadError::ValidationError(format!(
            "Self-pair '{a}' at line {line_no} in {file}"
        )));
    }

    let mut values = [None; Feature::COUNT];
    for feature in Feature::ALL {
        if let Some(col) = columns.features[feature.index()] {
            let raw = fields.get(col).map(|s| s.as_str()).unwrap_or("");
            values[feature.index()] =
                parse_feature_cell(raw).map_err(|_| DataLoadError::ParseError {
                    file: file.to_string(),
                    line: line_no,
                    reason: format!(
                        "Invalid {} value: {}",
                        feature.column_name(),
                        raw.trim()
                    ),
                })?;
        }
    }

    Ok(DistanceRecord {
        a,
        b,
        region_a,
        region_b,
        values,
    })
}

/// Parse a distance table CSV into records.
///
/// The first non-empty line is the header; every subsequent non-empty line
/// is one unordered location pair.
pub fn parse_distance_csv(path: &Path) -> Result<Vec<DistanceRecord>> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DataLoadError::FileNotFound {
                path: path.display().to_string(),
            }
        } else {
            DataLoadError::IoError(e)
        }
    })?;

    parse_distance_csv_str(&file_name, &content)
}

/// Parse distance table CSV content. Split out from [`parse_distance_csv`]
/// so tests can feed literal text.
pub fn parse_distance_csv_str(file: &str, content: &str) -> Result<Vec<DistanceRecord>> {
    let mut lines = content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty());

    let (_, header_line) = lines.next().ok_or_else(|| DataLoadError::ParseError {
        file: file.to_string(),
        line: 1,
        reason: "Empty file".to_string(),
    })?;
    let header = split_csv_line(header_line);
    let columns = resolve_columns(file, &header)?;

    let mut records = Vec::new();
    for (idx, line) in lines {
        let fields = split_csv_line(line);
        records.push(parse_record(file, idx + 1, &fields, &columns)?);
    }
    Ok(records)
}
