//! Questionnaire profiles loaded from CSV
//!
//! A pool file and a query file share one layout: a header row naming the
//! questionnaire fields, then one row per person. Column position is the
//! join key between the two files; names are only carried through for the
//! audit output.
//!
//! Missing answers become the literal [`MISSING`] sentinel so that every
//! field is embedded as text, never skipped.

use std::path::Path;

use tracing::{debug, warn};

use crate::{Error, Result};

/// Placeholder embedded in place of a missing answer.
pub const MISSING: &str = "N/A";

/// Cell contents treated as a missing answer (after trimming).
const MISSING_TOKENS: &[&str] = &[
    "", "NA", "N/A", "n/a", "#N/A", "NaN", "nan", "null", "NULL", "None",
];

/// One person's answers, in field order.
pub type Profile = Vec<String>;

/// A header plus fixed-width rows of answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileTable {
    header: Vec<String>,
    rows: Vec<Profile>,
    /// Cells exactly as read, before missing values were normalized
    raw_rows: Vec<Profile>,
}

impl ProfileTable {
    /// Build a table, normalizing missing cells.
    ///
    /// Every row must have exactly `header.len()` cells.
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        if header.is_empty() {
            return Err(Error::DataFormat("table has no columns".to_string()));
        }

        let width = header.len();
        let raw_rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                if row.len() != width {
                    return Err(Error::DataFormat(format!(
                        "row {} has {} fields, header has {width}",
                        i + 1,
                        row.len()
                    )));
                }
                Ok(row)
            })
            .collect::<Result<Vec<Profile>>>()?;
        let rows = raw_rows
            .iter()
            .map(|row| row.iter().map(|cell| normalize_cell(cell)).collect())
            .collect();

        Ok(Self {
            header,
            rows,
            raw_rows,
        })
    }

    /// Read a CSV file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            Error::DataFormat(format!("failed to read {}: {e}", path.display()))
        })?;

        Self::from_bytes(&bytes).map_err(|e| with_path(e, path))
    }

    /// Parse CSV from raw bytes.
    ///
    /// Input that is not valid UTF-8 is decoded as ISO-8859-1, which is what
    /// spreadsheet exports on some platforms produce.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = decode(bytes);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| Error::DataFormat(format!("invalid header: {e}")))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| Error::DataFormat(format!("invalid row: {e}")))?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Self::new(header, rows)
    }

    /// Column names, in field order.
    #[must_use]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    #[must_use]
    pub fn rows(&self) -> &[Profile] {
        &self.rows
    }

    #[must_use]
    pub fn row(&self, index: usize) -> Option<&Profile> {
        self.rows.get(index)
    }

    /// A row as it appeared in the source, without missing-value normalization.
    #[must_use]
    pub fn raw_row(&self, index: usize) -> Option<&Profile> {
        self.raw_rows.get(index)
    }

    /// Number of fields per profile.
    #[must_use]
    pub fn width(&self) -> usize {
        self.header.len()
    }

    /// Number of profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a named column, if present.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// All cells in row-major order: candidate 0 fields, candidate 1 fields, ...
    #[must_use]
    pub fn flattened(&self) -> Vec<String> {
        self.rows.iter().flatten().cloned().collect()
    }
}

/// The pool, its raw bytes (for hashing) and the querying profile.
#[derive(Debug, Clone)]
pub struct LoadedProfiles {
    pub pool: ProfileTable,
    pub pool_bytes: Vec<u8>,
    pub query: Profile,
}

/// Load a candidate pool and a single-row query with the same field layout.
pub fn load_pair(pool_path: impl AsRef<Path>, query_path: impl AsRef<Path>) -> Result<LoadedProfiles> {
    let pool_path = pool_path.as_ref();
    let query_path = query_path.as_ref();

    let pool_bytes = std::fs::read(pool_path).map_err(|e| {
        Error::DataFormat(format!("failed to read {}: {e}", pool_path.display()))
    })?;
    let pool = ProfileTable::from_bytes(&pool_bytes).map_err(|e| with_path(e, pool_path))?;
    let query_table = ProfileTable::load(query_path)?;

    let query = single_row(query_table, query_path)?;

    if query.len() != pool.width() {
        return Err(Error::DataFormat(format!(
            "query has {} fields but pool has {}",
            query.len(),
            pool.width()
        )));
    }

    debug!(
        pool = %pool_path.display(),
        candidates = pool.len(),
        fields = pool.width(),
        "loaded profiles"
    );

    Ok(LoadedProfiles {
        pool,
        pool_bytes,
        query,
    })
}

fn single_row(table: ProfileTable, path: &Path) -> Result<Profile> {
    if table.len() > 1 {
        warn!(
            query = %path.display(),
            rows = table.len(),
            "query file has more than one row; using the first"
        );
    }

    table
        .rows
        .into_iter()
        .next()
        .ok_or_else(|| Error::DataFormat(format!("{}: query file has no rows", path.display())))
}

fn with_path(err: Error, path: &Path) -> Error {
    match err {
        Error::DataFormat(msg) => Error::DataFormat(format!("{}: {msg}", path.display())),
        other => other,
    }
}

fn normalize_cell(cell: &str) -> String {
    if MISSING_TOKENS.contains(&cell.trim()) {
        MISSING.to_string()
    } else {
        cell.to_string()
    }
}

fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}
