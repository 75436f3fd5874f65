// alignments.rs - Content-addressed store of aligned genomes, keyed by strain

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use bio::io::fasta;
use indicatif::{ProgressBar, ProgressStyle};

use crate::data::arg::pad_alignment;
use crate::error::{ArgrowError, Result};

const STORE_MAGIC: &[u8; 8] = b"ARGROWA1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Read,
    ReadWrite,
    Create,
}

/// Single-file blob store for reference-aligned genomes. Every blob has the
/// reference length; records are CRC32-checked LZ4 frames appended in
/// arrival order. The whole store is held in memory after open so that
/// worker threads can fetch concurrently.
pub struct AlignmentStore {
    path: PathBuf,
    reference_length: usize,
    blobs: HashMap<String, (u32, Vec<u8>)>,
    order: Vec<String>,
    writable: bool,
}

impl AlignmentStore {
    /// Create a new empty store for the given reference length.
    pub fn initialise<P: AsRef<Path>>(path: P, reference_length: usize) -> Result<Self> {
        let mut file = File::create(&path)?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&(reference_length as u32).to_le_bytes())?;
        file.flush()?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            reference_length,
            blobs: HashMap::new(),
            order: Vec::new(),
            writable: true,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P, mode: StoreMode) -> Result<Self> {
        if mode == StoreMode::Create {
            return Self::initialise(path, crate::data::arg::DEFAULT_SEQUENCE_LENGTH);
        }
        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(ArgrowError::StoreIo(format!(
                "{} is not an alignment store",
                path.as_ref().display()
            )));
        }
        let mut word = [0u8; 4];
        reader.read_exact(&mut word)?;
        let reference_length = u32::from_le_bytes(word) as usize;

        let mut blobs = HashMap::new();
        let mut order = Vec::new();
        loop {
            let mut len_word = [0u8; 4];
            match reader.read_exact(&mut len_word) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let strain_len = u32::from_le_bytes(len_word) as usize;
            let mut strain_bytes = vec![0u8; strain_len];
            reader.read_exact(&mut strain_bytes)?;
            let strain = String::from_utf8(strain_bytes)
                .map_err(|e| ArgrowError::StoreIo(format!("bad strain name: {}", e)))?;
            reader.read_exact(&mut word)?;
            let crc = u32::from_le_bytes(word);
            reader.read_exact(&mut word)?;
            let blob_len = u32::from_le_bytes(word) as usize;
            let mut blob = vec![0u8; blob_len];
            reader.read_exact(&mut blob)?;
            if !blobs.contains_key(&strain) {
                order.push(strain.clone());
            }
            blobs.insert(strain, (crc, blob));
        }
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            reference_length,
            blobs,
            order,
            writable: mode == StoreMode::ReadWrite,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn reference_length(&self) -> usize {
        self.reference_length
    }

    pub fn contains(&self, strain: &str) -> bool {
        self.blobs.contains_key(strain)
    }

    /// Strains in first-appended order.
    pub fn strains(&self) -> &[String] {
        &self.order
    }

    /// Fetch and integrity-check one alignment.
    pub fn get(&self, strain: &str) -> Result<Vec<u8>> {
        let (stored_crc, blob) =
            self.blobs
                .get(strain)
                .ok_or_else(|| ArgrowError::AlignmentNotFound {
                    strain: strain.to_string(),
                })?;
        let raw = lz4_flex::decompress_size_prepended(blob).map_err(|e| {
            ArgrowError::AlignmentCorrupt {
                strain: strain.to_string(),
                reason: e.to_string(),
            }
        })?;
        if crc32fast::hash(&raw) != *stored_crc {
            return Err(ArgrowError::AlignmentCorrupt {
                strain: strain.to_string(),
                reason: "checksum mismatch".to_string(),
            });
        }
        if raw.len() != self.reference_length {
            return Err(ArgrowError::AlignmentCorrupt {
                strain: strain.to_string(),
                reason: format!(
                    "length {} != reference length {}",
                    raw.len(),
                    self.reference_length
                ),
            });
        }
        Ok(raw)
    }

    /// Append alignments. Re-appending an identical blob is a no-op; a
    /// different blob for a stored strain is a conflict.
    pub fn append<I>(&mut self, alignments: I) -> Result<usize>
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        if !self.writable {
            return Err(ArgrowError::StoreIo(format!(
                "{} opened read-only",
                self.path.display()
            )));
        }
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        let mut appended = 0;
        for (strain, raw) in alignments {
            if raw.len() != self.reference_length {
                return Err(ArgrowError::AlignmentCorrupt {
                    strain,
                    reason: format!(
                        "length {} != reference length {}",
                        raw.len(),
                        self.reference_length
                    ),
                });
            }
            let crc = crc32fast::hash(&raw);
            if let Some((stored_crc, blob)) = self.blobs.get(&strain) {
                let stored = lz4_flex::decompress_size_prepended(blob)
                    .map_err(|e| ArgrowError::AlignmentCorrupt {
                        strain: strain.clone(),
                        reason: e.to_string(),
                    })?;
                if *stored_crc == crc && stored == raw {
                    continue;
                }
                return Err(ArgrowError::StrainConflict { strain });
            }
            let blob = lz4_flex::compress_prepend_size(&raw);
            file.write_all(&(strain.len() as u32).to_le_bytes())?;
            file.write_all(strain.as_bytes())?;
            file.write_all(&crc.to_le_bytes())?;
            file.write_all(&(blob.len() as u32).to_le_bytes())?;
            file.write_all(&blob)?;
            self.order.push(strain.clone());
            self.blobs.insert(strain, (crc, blob));
            appended += 1;
        }
        file.flush()?;
        Ok(appended)
    }

    /// Import a FASTA file, padding each record so that genome position p
    /// indexes alignment[p].
    pub fn append_fasta<P: AsRef<Path>>(&mut self, path: P, show_progress: bool) -> Result<usize> {
        let file = File::open(&path)?;
        let reader = fasta::Reader::new(BufReader::new(file));
        let bar = if show_progress {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg} ({pos} records)")
                    .unwrap(),
            );
            bar.set_message(format!("Importing {}", path.as_ref().display()));
            bar
        } else {
            ProgressBar::hidden()
        };
        let mut batch = Vec::new();
        for record in reader.records() {
            let record = record.map_err(ArgrowError::store_io)?;
            let mut sequence = record.seq().to_ascii_uppercase();
            if sequence.len() + 1 == self.reference_length {
                sequence = pad_alignment(&sequence);
            }
            batch.push((record.id().to_string(), sequence));
            bar.inc(1);
        }
        bar.finish_and_clear();
        self.append(batch)
    }

    pub fn close(self) {}
}

impl std::fmt::Display for AlignmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AlignmentStore({}, {} alignments, reference length {})",
            self.path.display(),
            self.len(),
            self.reference_length
        )
    }
}
