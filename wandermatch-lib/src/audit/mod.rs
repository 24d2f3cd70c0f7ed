//! Audit artifacts for every matching run
//!
//! Each run leaves two CSV files so a ranking can be inspected afterwards:
//!
//! - `similarity_matrix_<ts>.csv`: one row per candidate (`Candidate 1`..),
//!   one column per field (`Field 1`..)
//! - `top_matches_<ts>.csv`: the selected candidates' original answers plus
//!   a `match_score` column
//!
//! Files are never overwritten: a name that already exists gets a `-<n>`
//! suffix.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::info;

use crate::profile::ProfileTable;
use crate::rank::Match;
use crate::similarity::SimilarityMatrix;
use crate::{Error, Result};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Paths of the files written for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditArtifacts {
    pub similarity_matrix: PathBuf,
    pub top_matches: PathBuf,
}

/// Writes audit CSVs into a directory.
#[derive(Debug, Clone)]
pub struct AuditWriter {
    dir: PathBuf,
}

impl AuditWriter {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write both artifacts, stamped with the current local time.
    pub fn write(
        &self,
        matrix: &SimilarityMatrix,
        matches: &[Match],
        pool: &ProfileTable,
    ) -> Result<AuditArtifacts> {
        let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        self.write_stamped(&stamp, matrix, matches, pool)
    }

    /// Write both artifacts with an explicit timestamp suffix.
    pub fn write_stamped(
        &self,
        stamp: &str,
        matrix: &SimilarityMatrix,
        matches: &[Match],
        pool: &ProfileTable,
    ) -> Result<AuditArtifacts> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Persistence(format!("failed to create {}: {e}", self.dir.display()))
        })?;

        let pair = self.create_pair(stamp)?;
        let similarity_matrix = write_similarity(pair.similarity, matrix)?;
        let top_matches = write_top_matches(pair.top_matches, matches, pool)?;

        info!(
            similarity_matrix = %similarity_matrix.display(),
            top_matches = %top_matches.display(),
            "saved audit artifacts"
        );

        Ok(AuditArtifacts {
            similarity_matrix,
            top_matches,
        })
    }

    /// Create both files under one shared suffix: `<name>_<stamp>.csv`, or
    /// `<name>_<stamp>-<n>.csv` with the first `n` free for both names.
    fn create_pair(&self, stamp: &str) -> Result<FilePair> {
        for n in 0u32.. {
            let suffix = if n == 0 {
                String::new()
            } else {
                format!("-{n}")
            };

            let Some(similarity) =
                self.create_new(&format!("similarity_matrix_{stamp}{suffix}.csv"))?
            else {
                continue;
            };
            match self.create_new(&format!("top_matches_{stamp}{suffix}.csv")) {
                Ok(Some(top_matches)) => {
                    return Ok(FilePair {
                        similarity,
                        top_matches,
                    })
                }
                other => {
                    let _ = std::fs::remove_file(&similarity.0);
                    other?;
                }
            }
        }
        Err(Error::Persistence(format!(
            "no free file name for {stamp} in {}",
            self.dir.display()
        )))
    }

    /// Open a file that must not exist yet; `None` if the name is taken.
    fn create_new(&self, name: &str) -> Result<Option<(PathBuf, File)>> {
        let path = self.dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => Ok(Some((path, file))),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(persist(&path, e)),
        }
    }
}

struct FilePair {
    similarity: (PathBuf, File),
    top_matches: (PathBuf, File),
}

fn write_similarity((path, file): (PathBuf, File), matrix: &SimilarityMatrix) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_writer(file);

    let mut header = vec![String::new()];
    header.extend((1..=matrix.fields()).map(|j| format!("Field {j}")));
    writer.write_record(&header).map_err(|e| persist(&path, e))?;

    for (i, row) in matrix.rows().enumerate() {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(format!("Candidate {}", i + 1));
        record.extend(row.iter().map(f32::to_string));
        writer.write_record(&record).map_err(|e| persist(&path, e))?;
    }

    writer.flush().map_err(|e| persist(&path, e))?;
    Ok(path)
}

/// Selected candidates with their answers as they appear in the pool file.
fn write_top_matches(
    (path, file): (PathBuf, File),
    matches: &[Match],
    pool: &ProfileTable,
) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_writer(file);

    let mut header: Vec<&str> = pool.header().iter().map(String::as_str).collect();
    header.push("match_score");
    writer.write_record(&header).map_err(|e| persist(&path, e))?;

    for m in matches {
        let row = pool.raw_row(m.index).ok_or_else(|| {
            Error::Persistence(format!(
                "match refers to candidate {} but pool has {}",
                m.index,
                pool.len()
            ))
        })?;

        let mut record: Vec<String> = row.clone();
        record.push(m.score.to_string());
        writer.write_record(&record).map_err(|e| persist(&path, e))?;
    }

    writer.flush().map_err(|e| persist(&path, e))?;
    Ok(path)
}

fn persist(path: &Path, err: impl std::fmt::Display) -> Error {
    Error::Persistence(format!("failed to write {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ProfileTable {
        ProfileTable::new(
            vec!["style".into(), "activity".into()],
            vec![
                vec!["".into(), "hiking".into()],
                vec!["beach".into(), "diving".into()],
                vec!["hiking".into(), "diving".into()],
            ],
        )
        .unwrap()
    }

    fn matrix() -> SimilarityMatrix {
        SimilarityMatrix::from_rows(vec![vec![0.1, 0.2], vec![0.3, 1.0], vec![1.0, 1.0]]).unwrap()
    }

    fn matches() -> Vec<Match> {
        vec![
            Match { index: 2, score: 1.0 },
            Match { index: 1, score: 0.65 },
        ]
    }

    #[test]
    fn test_similarity_matrix_layout() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AuditWriter::new(dir.path());

        let out = writer
            .write_stamped("20250101_120000_000", &matrix(), &matches(), &pool())
            .unwrap();

        assert_eq!(
            out.similarity_matrix.file_name().unwrap(),
            "similarity_matrix_20250101_120000_000.csv"
        );
        let text = std::fs::read_to_string(&out.similarity_matrix).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], ",Field 1,Field 2");
        assert_eq!(lines[1], "Candidate 1,0.1,0.2");
        assert_eq!(lines[3], "Candidate 3,1,1");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_top_matches_layout() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AuditWriter::new(dir.path());

        let out = writer
            .write_stamped("stamp", &matrix(), &matches(), &pool())
            .unwrap();

        let text = std::fs::read_to_string(&out.top_matches).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "style,activity,match_score");
        assert_eq!(lines[1], "hiking,diving,1");
        assert_eq!(lines[2], "beach,diving,0.65");
    }

    #[test]
    fn test_missing_values_written_as_read() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ProfileTable::new(
            vec!["style".into(), "activity".into()],
            vec![vec!["None".into(), "".into()], vec!["".into(), "hiking".into()]],
        )
        .unwrap();
        let matrix = SimilarityMatrix::from_rows(vec![vec![0.0, 0.0], vec![0.0, 0.4]]).unwrap();
        let ranked = [Match { index: 1, score: 0.2 }, Match { index: 0, score: 0.0 }];

        let out = AuditWriter::new(dir.path())
            .write_stamped("stamp", &matrix, &ranked, &pool)
            .unwrap();

        let text = std::fs::read_to_string(&out.top_matches).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], ",hiking,0.2");
        assert_eq!(lines[2], "None,,0");
    }

    #[test]
    fn test_repeated_runs_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AuditWriter::new(dir.path());

        let first = writer.write_stamped("same", &matrix(), &matches(), &pool()).unwrap();
        let second = writer.write_stamped("same", &matrix(), &matches(), &pool()).unwrap();

        assert_ne!(first.similarity_matrix, second.similarity_matrix);
        assert_ne!(first.top_matches, second.top_matches);
        assert_eq!(
            second.top_matches.file_name().unwrap(),
            "top_matches_same-1.csv"
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 4);
    }

    #[test]
    fn test_partial_collision_keeps_pair_together() {
        let dir = tempfile::tempdir().unwrap();
        // only the matches name is taken for the bare stamp
        std::fs::write(dir.path().join("top_matches_same.csv"), b"old").unwrap();

        let out = AuditWriter::new(dir.path())
            .write_stamped("same", &matrix(), &matches(), &pool())
            .unwrap();

        assert_eq!(
            out.similarity_matrix.file_name().unwrap(),
            "similarity_matrix_same-1.csv"
        );
        assert_eq!(out.top_matches.file_name().unwrap(), "top_matches_same-1.csv");
        assert!(!dir.path().join("similarity_matrix_same.csv").exists());
        assert_eq!(
            std::fs::read(dir.path().join("top_matches_same.csv")).unwrap(),
            b"old"
        );
    }

    #[test]
    fn test_creates_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("results").join("partner_matches");
        let writer = AuditWriter::new(&nested);

        let out = writer.write(&matrix(), &matches(), &pool()).unwrap();
        assert!(out.similarity_matrix.starts_with(&nested));
        assert!(out.top_matches.exists());
    }

    #[test]
    fn test_unwritable_dir_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_a_dir");
        std::fs::write(&file, b"x").unwrap();

        let err = AuditWriter::new(&file)
            .write(&matrix(), &matches(), &pool())
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }

    #[test]
    fn test_out_of_range_match() {
        let dir = tempfile::tempdir().unwrap();
        let err = AuditWriter::new(dir.path())
            .write_stamped("x", &matrix(), &[Match { index: 9, score: 0.0 }], &pool())
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }
}
