// metadata.rs - Date-indexed sample metadata store with CSV import

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ArgrowError, Result};

const DB_MAGIC: &[u8; 8] = b"ARGROWM1";

pub const UNKNOWN_LINEAGE: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRow {
    pub strain: String,
    /// ISO-8601 day; lexicographic order equals chronological order.
    pub date: String,
    pub pango_lineage: Option<String>,
    /// Free-form extra columns, preserved verbatim.
    pub extra: BTreeMap<String, String>,
}

impl MetadataRow {
    pub fn lineage(&self) -> &str {
        self.pango_lineage.as_deref().unwrap_or(UNKNOWN_LINEAGE)
    }
}

/// Row-oriented store keyed by date. Rows within a date are sorted by
/// strain, so iteration order is reproducible.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MetadataDb {
    #[serde(skip)]
    path: PathBuf,
    rows: BTreeMap<String, Vec<MetadataRow>>,
}

impl MetadataDb {
    /// Convert a CSV file into a metadata database. `strain` and `date`
    /// columns are required; everything else is carried as extras. The
    /// optional regex filters include/exclude strains before storage.
    pub fn import_csv<P: AsRef<Path>, Q: AsRef<Path>>(
        csv_path: P,
        db_path: Q,
        separator: u8,
        include: Option<&Regex>,
        exclude: Option<&Regex>,
    ) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(separator)
            .from_path(csv_path.as_ref())
            .map_err(ArgrowError::store_io)?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(ArgrowError::store_io)?
            .iter()
            .map(|h| h.to_string())
            .collect();
        let strain_col = headers
            .iter()
            .position(|h| h == "strain")
            .ok_or_else(|| ArgrowError::Config("metadata CSV has no 'strain' column".into()))?;
        let date_col = headers
            .iter()
            .position(|h| h == "date")
            .ok_or_else(|| ArgrowError::Config("metadata CSV has no 'date' column".into()))?;
        let pango_col = headers.iter().position(|h| h == "pango_lineage");

        let mut db = MetadataDb {
            path: db_path.as_ref().to_path_buf(),
            rows: BTreeMap::new(),
        };
        for record in reader.records() {
            let record = record.map_err(ArgrowError::store_io)?;
            let strain = record.get(strain_col).unwrap_or("").to_string();
            let date = record.get(date_col).unwrap_or("").to_string();
            if strain.is_empty() || date.is_empty() {
                continue;
            }
            if let Some(pattern) = include {
                if !pattern.is_match(&strain) {
                    continue;
                }
            }
            if let Some(pattern) = exclude {
                if pattern.is_match(&strain) {
                    continue;
                }
            }
            let pango_lineage = pango_col
                .and_then(|c| record.get(c))
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string());
            let mut extra = BTreeMap::new();
            for (i, header) in headers.iter().enumerate() {
                if i == strain_col || i == date_col || Some(i) == pango_col {
                    continue;
                }
                if let Some(value) = record.get(i) {
                    if !value.is_empty() {
                        extra.insert(header.clone(), value.to_string());
                    }
                }
            }
            db.rows.entry(date.clone()).or_default().push(MetadataRow {
                strain,
                date,
                pango_lineage,
                extra,
            });
        }
        for rows in db.rows.values_mut() {
            rows.sort_by(|a, b| a.strain.cmp(&b.strain));
        }
        db.save()?;
        Ok(db)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(&path)?;
        if bytes.len() < DB_MAGIC.len() || &bytes[..DB_MAGIC.len()] != DB_MAGIC {
            return Err(ArgrowError::StoreIo(format!(
                "{} is not a metadata database",
                path.as_ref().display()
            )));
        }
        let decompressed = lz4_flex::decompress_size_prepended(&bytes[DB_MAGIC.len()..])
            .map_err(ArgrowError::store_io)?;
        let mut db: MetadataDb =
            bincode::deserialize(&decompressed).map_err(ArgrowError::store_io)?;
        db.path = path.as_ref().to_path_buf();
        Ok(db)
    }

    fn save(&self) -> Result<()> {
        let encoded = bincode::serialize(self).map_err(ArgrowError::store_io)?;
        let compressed = lz4_flex::compress_prepend_size(&encoded);
        let mut bytes = Vec::with_capacity(DB_MAGIC.len() + compressed.len());
        bytes.extend_from_slice(DB_MAGIC);
        bytes.extend_from_slice(&compressed);
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    /// Rows for one date, strain-sorted. Empty when the date has no data.
    pub fn get(&self, date: &str) -> &[MetadataRow] {
        self.rows.get(date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn date_sample_counts(&self) -> BTreeMap<String, usize> {
        self.rows
            .iter()
            .map(|(date, rows)| (date.clone(), rows.len()))
            .collect()
    }

    pub fn dates(&self) -> Vec<String> {
        self.rows.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl std::fmt::Display for MetadataDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MetadataDb({}, {} rows over {} dates)",
            self.path.display(),
            self.len(),
            self.rows.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn example_db(dir: &tempfile::TempDir) -> MetadataDb {
        let csv_path = dir.path().join("metadata.csv");
        let mut file = std::fs::File::create(&csv_path).unwrap();
        writeln!(file, "strain,date,pango_lineage,submitter").unwrap();
        writeln!(file, "s3,2020-02-02,B.1,lab2").unwrap();
        writeln!(file, "s1,2020-02-01,A,lab1").unwrap();
        writeln!(file, "s2,2020-02-01,,lab1").unwrap();
        MetadataDb::import_csv(&csv_path, dir.path().join("metadata.db"), b',', None, None)
            .unwrap()
    }

    #[test]
    fn test_import_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let db = example_db(&dir);
        let rows = db.get("2020-02-01");
        assert_eq!(rows.len(), 2);
        // Strain-sorted within a date
        assert_eq!(rows[0].strain, "s1");
        assert_eq!(rows[1].strain, "s2");
        assert_eq!(rows[0].lineage(), "A");
        assert_eq!(rows[1].lineage(), UNKNOWN_LINEAGE);
        assert_eq!(rows[0].extra.get("submitter").unwrap(), "lab1");
        assert!(db.get("2020-03-01").is_empty());
    }

    #[test]
    fn test_date_sample_counts() {
        let dir = tempfile::tempdir().unwrap();
        let db = example_db(&dir);
        let counts = db.date_sample_counts();
        assert_eq!(counts.get("2020-02-01"), Some(&2));
        assert_eq!(counts.get("2020-02-02"), Some(&1));
        // Dates iterate chronologically
        assert_eq!(db.dates(), vec!["2020-02-01", "2020-02-02"]);
    }

    #[test]
    fn test_reopen() {
        let dir = tempfile::tempdir().unwrap();
        example_db(&dir);
        let db = MetadataDb::open(dir.path().join("metadata.db")).unwrap();
        assert_eq!(db.len(), 3);
    }

    #[test]
    fn test_missing_required_column() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("bad.csv");
        let mut file = std::fs::File::create(&csv_path).unwrap();
        writeln!(file, "name,when").unwrap();
        writeln!(file, "s1,2020-01-01").unwrap();
        let err =
            MetadataDb::import_csv(&csv_path, dir.path().join("bad.db"), b',', None, None)
                .unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }

    #[test]
    fn test_strain_filters() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("metadata.csv");
        let mut file = std::fs::File::create(&csv_path).unwrap();
        writeln!(file, "strain,date").unwrap();
        writeln!(file, "SRR1,2020-02-01").unwrap();
        writeln!(file, "ERR1,2020-02-01").unwrap();
        let include = Regex::new("^SRR").unwrap();
        let db = MetadataDb::import_csv(
            &csv_path,
            dir.path().join("metadata.db"),
            b',',
            Some(&include),
            None,
        )
        .unwrap();
        assert_eq!(db.len(), 1);
        assert_eq!(db.get("2020-02-01")[0].strain, "SRR1");
    }
}
