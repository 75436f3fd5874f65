// extend.rs - Date-by-date orchestration of the extension engine

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::core::attach::{add_matching_results, GroupGates};
use crate::core::hmm::{
    match_haplotypes, solve_num_mismatches, HmmMatch, DEFAULT_LIKELIHOOD_THRESHOLD,
};
use crate::core::preprocess::{preprocess, Sample};
use crate::data::alignments::AlignmentStore;
use crate::data::arg::Arg;
use crate::data::matches::{Direction, MatchDb, MatchRecord};
use crate::data::metadata::{MetadataDb, MetadataRow};
use crate::error::{ArgrowError, Result};

/// All tunables of one daily extension.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendOptions {
    /// Mismatches traded against one recombination.
    pub num_mismatches: u32,
    /// Maximum HMM cost for unconditional same-day inclusion.
    pub hmm_cost_threshold: f64,
    pub min_group_size: usize,
    pub min_root_mutations: usize,
    pub min_different_dates: usize,
    /// `None` disables the gate.
    pub max_mutations_per_sample: Option<f64>,
    /// `None` disables the gate.
    pub max_recurrent_mutations: Option<u32>,
    /// Days in the past to reconsider cached matches.
    pub retrospective_window: u32,
    pub deletions_as_missing: bool,
    pub max_daily_samples: Option<usize>,
    pub max_missing_sites: Option<usize>,
    pub random_seed: u64,
    pub likelihood_threshold: f64,
    pub show_progress: bool,
}

impl Default for ExtendOptions {
    fn default() -> Self {
        Self {
            num_mismatches: 3,
            hmm_cost_threshold: 5.0,
            min_group_size: 10,
            min_root_mutations: 2,
            min_different_dates: 3,
            max_mutations_per_sample: Some(10.0),
            max_recurrent_mutations: Some(10),
            retrospective_window: 30,
            deletions_as_missing: true,
            max_daily_samples: None,
            max_missing_sites: None,
            random_seed: 42,
            likelihood_threshold: DEFAULT_LIKELIHOOD_THRESHOLD,
            show_progress: false,
        }
    }
}

impl ExtendOptions {
    fn gates(&self) -> GroupGates {
        GroupGates {
            min_group_size: self.min_group_size,
            min_root_mutations: self.min_root_mutations,
            min_different_dates: self.min_different_dates,
            max_recurrent_mutations: self.max_recurrent_mutations,
            max_mutations_per_sample: self.max_mutations_per_sample,
        }
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| ArgrowError::Config(format!("bad date '{}': {}", value, e)))
}

fn days_between(earlier: &str, later: &str) -> Result<i64> {
    Ok((parse_date(later)? - parse_date(earlier)?).num_days())
}

fn subtract_days(date: &str, days: u32) -> Result<String> {
    let day = parse_date(date)? - chrono::Duration::days(days as i64);
    Ok(day.format("%Y-%m-%d").to_string())
}

/// Uniform subsample of the day's rows, seeded by the run seed mixed with
/// the date so each day draws independently but reproducibly. The selection
/// keeps the strain-lexicographic input order.
fn subsample_rows(rows: Vec<MetadataRow>, max: usize, seed: u64, date: &str) -> Vec<MetadataRow> {
    let digest = md5::compute(date.as_bytes());
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest.0[..8]);
    let mut rng = StdRng::seed_from_u64(seed ^ u64::from_le_bytes(word));
    let mut chosen = rand::seq::index::sample(&mut rng, rows.len(), max).into_vec();
    chosen.sort_unstable();
    let keep: HashSet<usize> = chosen.into_iter().collect();
    rows.into_iter()
        .enumerate()
        .filter(|(i, _)| keep.contains(i))
        .map(|(_, row)| row)
        .collect()
}

/// Extend `base` with the samples of `date`: preprocess, match, cache,
/// attach, then reconsider the retrospective window. Returns the new ARG;
/// the base is never mutated, so a failed day leaves no trace beyond cached
/// matches (which `MatchDb::delete_newer` can reset).
pub fn extend(
    alignment_store: &AlignmentStore,
    metadata_db: &MetadataDb,
    base: &Arg,
    date: &str,
    match_db: &mut MatchDb,
    options: &ExtendOptions,
) -> Result<Arg> {
    let base_date = base.date()?;
    let delta = days_between(&base_date, date)?;
    if delta <= 0 {
        return Err(ArgrowError::Config(format!(
            "date {} is not after the base ARG date {}",
            date, base_date
        )));
    }
    let mut arg = base.clone();
    arg.shift_times(delta as f64);

    let mut rows: Vec<MetadataRow> = metadata_db.get(date).to_vec();
    info!("{}: {} metadata rows", date, rows.len());
    if let Some(max) = options.max_daily_samples {
        if rows.len() > max {
            rows = subsample_rows(rows, max, options.random_seed, date);
            info!("{}: subsampled to {} rows", date, rows.len());
        }
    }

    let sites_position = arg.sites_position();
    let mut samples: Vec<Sample> = Vec::new();
    for outcome in preprocess(&rows, alignment_store, &sites_position, options.show_progress) {
        match outcome {
            Ok(sample) => {
                if let Some(max) = options.max_missing_sites {
                    if sample.num_missing_sites > max {
                        info!(
                            "dropping {}: {} missing sites over limit {}",
                            sample.strain, sample.num_missing_sites, max
                        );
                        continue;
                    }
                }
                samples.push(sample);
            }
            Err(err @ ArgrowError::AlignmentNotFound { .. }) => {
                warn!("skipping strain: {}", err);
            }
            Err(err) => return Err(err),
        }
    }

    let (mu, rho) = solve_num_mismatches(options.num_mismatches);
    let haplotypes: Vec<Vec<i8>> = samples
        .iter()
        .map(|s| s.match_haplotype(options.deletions_as_missing))
        .collect();
    let forward = match_haplotypes(
        &arg,
        &haplotypes,
        mu,
        rho,
        options.likelihood_threshold,
        false,
    );
    for (sample, hmm_match) in samples.iter_mut().zip(forward) {
        sample.hmm_match = Some(hmm_match);
    }

    // Characterise the poor fits with reverse and forced-single-parent runs.
    let high_cost: Vec<usize> = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| {
            sample_cost(s, options.num_mismatches, arg.sequence_length)
                > options.hmm_cost_threshold
        })
        .map(|(i, _)| i)
        .collect();
    if !high_cost.is_empty() {
        info!(
            "{}: {} samples over the cost threshold, rerunning",
            date,
            high_cost.len()
        );
        let subset: Vec<Vec<i8>> = high_cost.iter().map(|&i| haplotypes[i].clone()).collect();
        let reverse = match_haplotypes(&arg, &subset, mu, rho, options.likelihood_threshold, true);
        let no_recombination =
            match_haplotypes(&arg, &subset, mu, 0.0, options.likelihood_threshold, false);
        for ((&i, rev), flat) in high_cost.iter().zip(reverse).zip(no_recombination) {
            let mut reruns: BTreeMap<String, HmmMatch> = BTreeMap::new();
            if let Some(fwd) = &samples[i].hmm_match {
                reruns.insert("forward".to_string(), fwd.clone());
            }
            reruns.insert("reverse".to_string(), rev);
            reruns.insert("no_recombination".to_string(), flat);
            samples[i].hmm_reruns = reruns;
        }
    }

    for sample in &samples {
        if let Some(hmm_match) = &sample.hmm_match {
            match_db.put(MatchRecord::new(
                sample.strain.clone(),
                sample.date.clone(),
                Direction::Forward,
                options.num_mismatches,
                hmm_match.cost(options.num_mismatches, arg.sequence_length),
                hmm_match,
            )?);
        }
        if let Some(rev) = sample.hmm_reruns.get("reverse") {
            match_db.put(MatchRecord::new(
                sample.strain.clone(),
                sample.date.clone(),
                Direction::Reverse,
                options.num_mismatches,
                rev.cost(options.num_mismatches, arg.sequence_length),
                rev,
            )?);
        }
    }
    match_db.flush()?;

    // Same-day attachment of everything under the cost threshold.
    let eligible: Vec<Sample> = samples
        .iter()
        .filter(|s| {
            sample_cost(s, options.num_mismatches, arg.sequence_length)
                <= options.hmm_cost_threshold
        })
        .cloned()
        .collect();
    add_matching_results(&mut arg, &eligible, date, &GroupGates::relaxed(), false)?;

    retrospective_pass(&mut arg, alignment_store, metadata_db, match_db, date, options)?;

    let mut metadata = arg.metadata()?;
    metadata.core.date = Some(date.to_string());
    arg.set_metadata(&metadata);
    arg.validate_tables()?;
    Ok(arg)
}

fn sample_cost(sample: &Sample, num_mismatches: u32, sequence_length: usize) -> f64 {
    sample
        .hmm_match
        .as_ref()
        .map(|m| {
            if m.likelihood_floored {
                f64::INFINITY
            } else {
                m.cost(num_mismatches, sequence_length)
            }
        })
        .unwrap_or(f64::INFINITY)
}

/// Reconsider the uncommitted cached matches of the trailing window under
/// the strict gates. High-cost strains left out on their own day are
/// exactly the ones that can later assemble into an admissible group
/// against the grown ARG.
fn retrospective_pass(
    arg: &mut Arg,
    alignment_store: &AlignmentStore,
    metadata_db: &MetadataDb,
    match_db: &MatchDb,
    date: &str,
    options: &ExtendOptions,
) -> Result<()> {
    if options.retrospective_window == 0 {
        return Ok(());
    }
    let start = subtract_days(date, options.retrospective_window)?;
    let committed: HashSet<String> = arg.samples_strain()?.into_iter().collect();
    let mut candidates: Vec<&MatchRecord> = match_db
        .iter_between(&start, date)
        .filter(|r| r.direction == Direction::Forward)
        .filter(|r| r.num_mismatches == options.num_mismatches)
        .filter(|r| r.hmm_cost > 0.0)
        .filter(|r| !committed.contains(&r.strain))
        .filter(|r| alignment_store.contains(&r.strain))
        .collect();
    candidates.sort_by(|a, b| a.strain.cmp(&b.strain));
    if candidates.is_empty() {
        return Ok(());
    }
    info!(
        "{}: reconsidering {} cached matches since {}",
        date,
        candidates.len(),
        start
    );

    let rows: Vec<MetadataRow> = candidates
        .iter()
        .map(|record| {
            metadata_db
                .get(&record.date)
                .iter()
                .find(|row| row.strain == record.strain)
                .cloned()
                .unwrap_or_else(|| MetadataRow {
                    strain: record.strain.clone(),
                    date: record.date.clone(),
                    pango_lineage: None,
                    extra: BTreeMap::new(),
                })
        })
        .collect();
    let sites_position = arg.sites_position();
    let mut samples = Vec::with_capacity(candidates.len());
    for (record, outcome) in candidates.iter().zip(preprocess(
        &rows,
        alignment_store,
        &sites_position,
        options.show_progress,
    )) {
        let mut sample = outcome?;
        sample.hmm_match = Some(record.hmm_match()?);
        if let Some(rev) =
            match_db.get(&record.strain, Direction::Reverse, options.num_mismatches)
        {
            sample
                .hmm_reruns
                .insert("reverse".to_string(), rev.hmm_match()?);
        }
        samples.push(sample);
    }

    add_matching_results(arg, &samples, date, &options.gates(), true)?;
    Ok(())
}

/// Check that the ARG reproduces the stored alignment of every committed
/// sample at every non-missing site. Returns the number of samples checked.
pub fn validate(
    arg: &Arg,
    alignment_store: &AlignmentStore,
    deletions_as_missing: bool,
) -> Result<usize> {
    let matrix = arg.haplotype_matrix();
    let positions = arg.sites_position();
    let mut checked = 0;
    for &node in &arg.samples() {
        let metadata = arg.node_metadata(node)?;
        let strain = match metadata.strain {
            Some(strain) => strain,
            None => continue,
        };
        if !alignment_store.contains(&strain) {
            continue;
        }
        let alignment = alignment_store.get(&strain)?;
        for (site, &position) in positions.iter().enumerate() {
            let mut expected = crate::core::alleles::encode_allele(alignment[position]);
            if deletions_as_missing && expected == crate::core::alleles::DELETION {
                expected = crate::core::alleles::MISSING;
            }
            if expected == crate::core::alleles::MISSING {
                continue;
            }
            if matrix[node as usize][site] != expected {
                return Err(ArgrowError::ArgInvariantViolation(format!(
                    "strain {} disagrees with the ARG at position {}",
                    strain, position
                )));
            }
        }
        checked += 1;
    }
    Ok(checked)
}
