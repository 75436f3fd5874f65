// preprocess.rs - Build matchable sample objects from the alignment store

use std::collections::BTreeMap;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::core::alleles::{deletions_as_missing, encode_allele, DELETION, MISSING};
use crate::core::hmm::HmmMatch;
use crate::data::alignments::AlignmentStore;
use crate::data::metadata::{MetadataRow, UNKNOWN_LINEAGE};
use crate::error::Result;

/// One sample prepared for matching: the haplotype restricted to the ARG's
/// site grid, plus the bookkeeping the attachment stage needs.
#[derive(Debug, Clone)]
pub struct Sample {
    pub strain: String,
    pub date: String,
    pub pango_lineage: String,
    /// Allele per ARG site, deletions kept, -1 for missing.
    pub haplotype: Vec<i8>,
    /// Site indexes where the haplotype is missing.
    pub missing_site_indexes: Vec<usize>,
    /// Site indexes where the haplotype carries a deletion.
    pub deletion_site_indexes: Vec<usize>,
    pub alignment_composition: BTreeMap<String, usize>,
    pub num_missing_sites: usize,
    pub hmm_match: Option<HmmMatch>,
    pub hmm_reruns: BTreeMap<String, HmmMatch>,
}

impl Sample {
    /// The haplotype fed to the matcher, with deletions optionally masked.
    pub fn match_haplotype(&self, mask_deletions: bool) -> Vec<i8> {
        let mut haplotype = self.haplotype.clone();
        if mask_deletions {
            deletions_as_missing(&mut haplotype);
        }
        haplotype
    }
}

fn build_sample(
    row: &MetadataRow,
    store: &AlignmentStore,
    sites_position: &[usize],
) -> Result<Sample> {
    let alignment = store.get(&row.strain)?;
    let mut haplotype = Vec::with_capacity(sites_position.len());
    let mut missing_site_indexes = Vec::new();
    let mut deletion_site_indexes = Vec::new();
    let mut composition: BTreeMap<String, usize> = BTreeMap::new();
    for (site, &position) in sites_position.iter().enumerate() {
        let state = encode_allele(alignment[position]);
        if state == MISSING {
            missing_site_indexes.push(site);
        } else if state == DELETION {
            deletion_site_indexes.push(site);
        }
        let letter = crate::core::alleles::decode_allele(state) as char;
        *composition.entry(letter.to_string()).or_insert(0) += 1;
        haplotype.push(state);
    }
    Ok(Sample {
        strain: row.strain.clone(),
        date: row.date.clone(),
        pango_lineage: row.lineage().to_string(),
        num_missing_sites: missing_site_indexes.len(),
        haplotype,
        missing_site_indexes,
        deletion_site_indexes,
        alignment_composition: composition,
        hmm_match: None,
        hmm_reruns: BTreeMap::new(),
    })
}

/// Load and encode the requested strains in parallel. Output order matches
/// the input rows; per-strain failures are reported in place so callers
/// decide whether a missing alignment aborts the run or just the strain.
pub fn preprocess(
    rows: &[MetadataRow],
    store: &AlignmentStore,
    sites_position: &[usize],
    show_progress: bool,
) -> Vec<Result<Sample>> {
    let bar = if show_progress {
        let bar = ProgressBar::new(rows.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} samples encoded")
                .unwrap(),
        );
        bar
    } else {
        ProgressBar::hidden()
    };
    let samples: Vec<Result<Sample>> = rows
        .par_iter()
        .map(|row| {
            let sample = build_sample(row, store, sites_position);
            bar.inc(1);
            sample
        })
        .collect();
    bar.finish_and_clear();
    samples
}

/// Convenience for ad-hoc matching of named strains with no metadata rows.
pub fn preprocess_strains(
    strains: &[String],
    store: &AlignmentStore,
    sites_position: &[usize],
    show_progress: bool,
) -> Vec<Result<Sample>> {
    let rows: Vec<MetadataRow> = strains
        .iter()
        .map(|strain| MetadataRow {
            strain: strain.clone(),
            date: String::new(),
            pango_lineage: Some(UNKNOWN_LINEAGE.to_string()),
            extra: BTreeMap::new(),
        })
        .collect();
    preprocess(&rows, store, sites_position, show_progress)
}
