// matches.rs - Durable cache of HMM matches keyed by (strain, direction, k)

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::hmm::HmmMatch;
use crate::error::{ArgrowError, Result};

const DB_MAGIC: &[u8; 8] = b"ARGROWD1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Reverse,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Reverse => write!(f, "reverse"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = ArgrowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "forward" => Ok(Direction::Forward),
            "reverse" => Ok(Direction::Reverse),
            other => Err(ArgrowError::Config(format!(
                "unknown direction '{}', expected forward or reverse",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub strain: String,
    pub date: String,
    pub direction: Direction,
    pub num_mismatches: u32,
    pub hmm_cost: f64,
    /// MessagePack-serialized `HmmMatch`.
    pub match_blob: Vec<u8>,
}

impl MatchRecord {
    pub fn new(
        strain: String,
        date: String,
        direction: Direction,
        num_mismatches: u32,
        hmm_cost: f64,
        hmm_match: &HmmMatch,
    ) -> Result<Self> {
        let match_blob = rmp_serde::to_vec(hmm_match).map_err(ArgrowError::store_io)?;
        Ok(Self {
            strain,
            date,
            direction,
            num_mismatches,
            hmm_cost,
            match_blob,
        })
    }

    pub fn hmm_match(&self) -> Result<HmmMatch> {
        rmp_serde::from_slice(&self.match_blob).map_err(ArgrowError::store_io)
    }
}

type MatchKey = (String, Direction, u32);

/// Durable match cache over a single LZ4-compressed file. Rows load at open;
/// writes mark the store dirty and are persisted by `flush`. Writers are
/// serialized through exclusive ownership of the handle.
pub struct MatchDb {
    path: PathBuf,
    rows: BTreeMap<MatchKey, MatchRecord>,
    dirty: bool,
}

impl MatchDb {
    pub fn initialise<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Self {
            path: path.as_ref().to_path_buf(),
            rows: BTreeMap::new(),
            dirty: true,
        };
        db.save()?;
        Ok(Self {
            dirty: false,
            ..db
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(&path)?;
        if bytes.len() < DB_MAGIC.len() || &bytes[..DB_MAGIC.len()] != DB_MAGIC {
            return Err(ArgrowError::StoreIo(format!(
                "{} is not a match database",
                path.as_ref().display()
            )));
        }
        let decompressed = lz4_flex::decompress_size_prepended(&bytes[DB_MAGIC.len()..])
            .map_err(ArgrowError::store_io)?;
        let records: Vec<MatchRecord> =
            bincode::deserialize(&decompressed).map_err(ArgrowError::store_io)?;
        let mut rows = BTreeMap::new();
        for record in records {
            rows.insert(
                (record.strain.clone(), record.direction, record.num_mismatches),
                record,
            );
        }
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            rows,
            dirty: false,
        })
    }

    fn save(&self) -> Result<()> {
        let records: Vec<&MatchRecord> = self.rows.values().collect();
        let encoded = bincode::serialize(&records).map_err(ArgrowError::store_io)?;
        let compressed = lz4_flex::compress_prepend_size(&encoded);
        let mut bytes = Vec::with_capacity(DB_MAGIC.len() + compressed.len());
        bytes.extend_from_slice(DB_MAGIC);
        bytes.extend_from_slice(&compressed);
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    /// Persist pending writes, if any.
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty {
            self.save()?;
            self.dirty = false;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Insert or replace a row.
    pub fn put(&mut self, record: MatchRecord) {
        self.rows.insert(
            (record.strain.clone(), record.direction, record.num_mismatches),
            record,
        );
        self.dirty = true;
    }

    pub fn get(&self, strain: &str, direction: Direction, num_mismatches: u32) -> Option<&MatchRecord> {
        self.rows
            .get(&(strain.to_string(), direction, num_mismatches))
    }

    /// Rows with a date strictly after `date`.
    pub fn count_newer(&self, date: &str) -> usize {
        self.rows.values().filter(|r| r.date.as_str() > date).count()
    }

    /// Delete rows with a date strictly after `date`; earlier committed
    /// history is never touched.
    pub fn delete_newer(&mut self, date: &str) -> usize {
        let before = self.rows.len();
        self.rows.retain(|_, r| r.date.as_str() <= date);
        let removed = before - self.rows.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Rows with start <= date < end, in key order.
    pub fn iter_between<'a>(
        &'a self,
        start: &'a str,
        end: &'a str,
    ) -> impl Iterator<Item = &'a MatchRecord> {
        self.rows
            .values()
            .filter(move |r| r.date.as_str() >= start && r.date.as_str() < end)
    }

    pub fn last_date(&self) -> Option<String> {
        self.rows.values().map(|r| r.date.clone()).max()
    }

    /// Flat TSV view of the cache, one row per match.
    pub fn as_dataframe(&self) -> String {
        let mut out = String::from("strain\tdate\tdirection\tnum_mismatches\thmm_cost\n");
        for record in self.rows.values() {
            let _ = writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}",
                record.strain, record.date, record.direction, record.num_mismatches, record.hmm_cost
            );
        }
        out
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()
    }
}

impl std::fmt::Display for MatchDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MatchDb({}, {} rows)",
            self.path.display(),
            self.rows.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hmm::{HmmMatch, PathSegment};

    fn example_match() -> HmmMatch {
        HmmMatch {
            path: vec![PathSegment {
                left: 0,
                right: 100,
                parent: 1,
            }],
            mutations: vec![],
            likelihood_floored: false,
        }
    }

    fn record(strain: &str, date: &str, direction: Direction, cost: f64) -> MatchRecord {
        MatchRecord::new(
            strain.to_string(),
            date.to_string(),
            direction,
            3,
            cost,
            &example_match(),
        )
        .unwrap()
    }

    #[test]
    fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = MatchDb::initialise(dir.path().join("match.db")).unwrap();
        db.put(record("s1", "2020-02-01", Direction::Forward, 2.0));
        let row = db.get("s1", Direction::Forward, 3).unwrap();
        assert_eq!(row.hmm_cost, 2.0);
        assert_eq!(row.hmm_match().unwrap(), example_match());
        assert!(db.get("s1", Direction::Reverse, 3).is_none());
        assert!(db.get("s1", Direction::Forward, 2).is_none());
    }

    #[test]
    fn test_durability() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("match.db");
        {
            let mut db = MatchDb::initialise(&path).unwrap();
            db.put(record("s1", "2020-02-01", Direction::Forward, 2.0));
            db.flush().unwrap();
        }
        let db = MatchDb::open(&path).unwrap();
        assert_eq!(db.len(), 1);
        assert_eq!(db.last_date(), Some("2020-02-01".to_string()));
    }

    #[test]
    fn test_delete_newer_is_strict() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = MatchDb::initialise(dir.path().join("match.db")).unwrap();
        db.put(record("s1", "2020-02-01", Direction::Forward, 0.0));
        db.put(record("s2", "2020-02-02", Direction::Forward, 1.0));
        db.put(record("s3", "2020-02-03", Direction::Forward, 1.0));
        assert_eq!(db.count_newer("2020-02-01"), 2);
        assert_eq!(db.delete_newer("2020-02-01"), 2);
        // The row on the boundary date survives
        assert_eq!(db.len(), 1);
        assert!(db.get("s1", Direction::Forward, 3).is_some());
    }

    #[test]
    fn test_iter_between_half_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = MatchDb::initialise(dir.path().join("match.db")).unwrap();
        for (strain, date) in [
            ("s1", "2020-02-01"),
            ("s2", "2020-02-05"),
            ("s3", "2020-02-10"),
        ] {
            db.put(record(strain, date, Direction::Forward, 1.0));
        }
        let strains: Vec<&str> = db
            .iter_between("2020-02-01", "2020-02-10")
            .map(|r| r.strain.as_str())
            .collect();
        assert_eq!(strains, vec!["s1", "s2"]);
    }

    #[test]
    fn test_as_dataframe() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = MatchDb::initialise(dir.path().join("match.db")).unwrap();
        db.put(record("s1", "2020-02-01", Direction::Forward, 2.0));
        let frame = db.as_dataframe();
        assert!(frame.starts_with("strain\tdate\tdirection"));
        assert!(frame.contains("s1\t2020-02-01\tforward\t3\t2"));
    }
}
