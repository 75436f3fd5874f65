// hmm.rs - Li-Stephens haplotype matching against the ARG panel

use std::collections::HashMap;

use log::warn;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::alleles::{decode_allele, MISSING};
use crate::core::mirror::{mirror_arg, mirror_position};
use crate::data::arg::{Arg, NodeId, NULL};

/// Fixed per-site mutation rate of the matching model.
pub const DEFAULT_MU: f64 = 0.0125;

/// Default likelihood floor; matches below it are degenerate.
pub const DEFAULT_LIKELIHOOD_THRESHOLD: f64 = 1e-200;

/// A switch must beat staying by this relative margin. Equal-likelihood
/// alternatives keep the earliest recorded switch, so forward scans place
/// breakpoints leftmost and mirrored scans rightmost.
const SWITCH_TOLERANCE: f64 = 1e-12;

/// Solve for (mu, rho) such that the cost of one recombination equals the
/// cost of `num_mismatches` point mutations under the five-allele emission
/// model: rho(1-rho)^(k-1)(1-4mu)^k = mu^k(1-rho)^k, giving
/// rho = mu^k / (mu^k + (1-4mu)^k). Saturates to rho = 0 once mu^k
/// underflows. Bit-for-bit deterministic in k.
pub fn solve_num_mismatches(num_mismatches: u32) -> (f64, f64) {
    let k = num_mismatches.max(1) as i32;
    let mu = DEFAULT_MU;
    let mismatch = mu.powi(k);
    let matched = (1.0 - 4.0 * mu).powi(k);
    let rho = if mismatch == 0.0 {
        0.0
    } else {
        mismatch / (mismatch + matched)
    };
    (mu, rho)
}

/// One segment of a match path: the sample copies from `parent` over
/// [left, right).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    pub left: usize,
    pub right: usize,
    pub parent: NodeId,
}

/// A residual mutation of a match: the sample differs from its copied parent
/// at `site_position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HmmMutation {
    pub site_position: usize,
    pub inherited_state: i8,
    pub derived_state: i8,
    pub is_reversion: bool,
    pub is_immediate_reversion: bool,
}

/// The result of matching one sample haplotype against the ARG.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HmmMatch {
    pub path: Vec<PathSegment>,
    /// Sorted by site position, unique per site.
    pub mutations: Vec<HmmMutation>,
    /// True when the likelihood hit the floor and the match is the
    /// degenerate root attachment.
    #[serde(default)]
    pub likelihood_floored: bool,
}

impl HmmMatch {
    /// Mismatch/recombination cost: #mutations + (#segments - 1) * k, with
    /// reversions weighted 1 - 1/L so that at equal base cost matches
    /// re-using existing reversions win.
    pub fn cost(&self, num_mismatches: u32, sequence_length: usize) -> f64 {
        let eps = 1.0 / sequence_length as f64;
        let switches = self.path.len().saturating_sub(1);
        let mut cost = switches as f64 * num_mismatches as f64;
        for mutation in &self.mutations {
            cost += if mutation.is_reversion { 1.0 - eps } else { 1.0 };
        }
        cost
    }

    pub fn parents(&self) -> Vec<NodeId> {
        self.path.iter().map(|s| s.parent).collect()
    }

    /// Interval boundaries of the path, [0, b1, ..., L].
    pub fn breakpoints(&self) -> Vec<usize> {
        let mut points: Vec<usize> = self.path.iter().map(|s| s.left).collect();
        if let Some(last) = self.path.last() {
            points.push(last.right);
        }
        points
    }

    pub fn is_exact(&self) -> bool {
        self.path.len() == 1 && self.mutations.is_empty()
    }

    pub fn to_metadata(&self) -> HmmMatchMetadata {
        HmmMatchMetadata {
            mutations: self
                .mutations
                .iter()
                .map(|m| HmmMutationMetadata {
                    derived_state: (decode_allele(m.derived_state) as char).to_string(),
                    inherited_state: (decode_allele(m.inherited_state) as char).to_string(),
                    site_position: m.site_position,
                })
                .collect(),
            path: self
                .path
                .iter()
                .map(|s| HmmPathMetadata {
                    left: s.left,
                    parent: s.parent,
                    right: s.right,
                })
                .collect(),
        }
    }
}

/// JSON metadata form of a match, with allele states as letters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HmmMatchMetadata {
    pub mutations: Vec<HmmMutationMetadata>,
    pub path: Vec<HmmPathMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HmmMutationMetadata {
    pub derived_state: String,
    pub inherited_state: String,
    pub site_position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HmmPathMetadata {
    pub left: usize,
    pub parent: NodeId,
    pub right: usize,
}

// ---------------------------------------------------------------------------
// Bit rows for the per-site switch decisions. One row per site over all
// panel states keeps the traceback memory at S * N / 8 bytes.
// ---------------------------------------------------------------------------

fn bit_row(num_states: usize) -> Vec<u64> {
    vec![0u64; (num_states + 63) / 64]
}

#[inline]
fn set_bit(row: &mut [u64], j: usize) {
    row[j / 64] |= 1u64 << (j % 64);
}

#[inline]
fn get_bit(row: &[u64], j: usize) -> bool {
    row[j / 64] & (1u64 << (j % 64)) != 0
}

/// Viterbi matcher over the haplotype panel of every ARG node. Pure with
/// respect to its inputs: the ARG is read once at construction and never
/// mutated; samples are scored independently on the rayon pool.
pub struct Matcher {
    mu: f64,
    rho: f64,
    likelihood_threshold: f64,
    sequence_length: usize,
    positions: Vec<usize>,
    ancestral: Vec<i8>,
    panel: Vec<Vec<i8>>,
    trees: Vec<(usize, usize, Vec<NodeId>)>,
    /// site index -> index into `trees`
    site_tree: Vec<usize>,
    mutation_map: HashMap<(usize, NodeId), i8>,
    root: NodeId,
}

impl Matcher {
    pub fn new(arg: &Arg, mu: f64, rho: f64, likelihood_threshold: f64) -> Self {
        let trees = arg.tree_parents();
        let positions = arg.sites_position();
        let mut site_tree = Vec::with_capacity(positions.len());
        let mut tree_idx = 0;
        for &position in &positions {
            while position >= trees[tree_idx].1 {
                tree_idx += 1;
            }
            site_tree.push(tree_idx);
        }
        Self {
            mu,
            rho,
            likelihood_threshold,
            sequence_length: arg.sequence_length,
            positions,
            ancestral: arg.sites.iter().map(|s| s.ancestral_state).collect(),
            panel: arg.haplotype_matrix(),
            trees,
            site_tree,
            mutation_map: arg.mutation_map(),
            root: arg.first_tree_root(),
        }
    }

    /// Score a batch of haplotypes in parallel; output order matches input.
    pub fn run(&self, haplotypes: &[Vec<i8>]) -> Vec<HmmMatch> {
        haplotypes.par_iter().map(|h| self.run_one(h)).collect()
    }

    /// Whether adding `derived` at `site` below `parent` reverts an existing
    /// mutation further up the lineage; the second flag marks the direct
    /// parent edge.
    fn reversion_status(&self, site: usize, parent: NodeId, derived: i8) -> (bool, bool) {
        let parents = &self.trees[self.site_tree[site]].2;
        let mut node = parent;
        while node != NULL {
            if self.mutation_map.contains_key(&(site, node)) {
                let above = parents[node as usize];
                let inherited = if above == NULL {
                    self.ancestral[site]
                } else {
                    self.panel[above as usize][site]
                };
                return (derived == inherited, node == parent);
            }
            node = parents[node as usize];
        }
        (false, false)
    }

    fn residual_mutation(&self, site: usize, parent: NodeId, sample_allele: i8) -> HmmMutation {
        let (is_reversion, is_immediate_reversion) =
            self.reversion_status(site, parent, sample_allele);
        HmmMutation {
            site_position: self.positions[site],
            inherited_state: self.panel[parent as usize][site],
            derived_state: sample_allele,
            is_reversion,
            is_immediate_reversion,
        }
    }

    /// Degenerate single-segment match to the panel root with one mutation
    /// per differing site, returned when the likelihood floors out.
    fn floored_match(&self, haplotype: &[i8]) -> HmmMatch {
        let mut mutations = Vec::new();
        for site in 0..self.positions.len() {
            let a = haplotype[site];
            if a != MISSING && a != self.panel[self.root as usize][site] {
                mutations.push(self.residual_mutation(site, self.root, a));
            }
        }
        HmmMatch {
            path: vec![PathSegment {
                left: 0,
                right: self.sequence_length,
                parent: self.root,
            }],
            mutations,
            likelihood_floored: true,
        }
    }

    pub fn run_one(&self, haplotype: &[i8]) -> HmmMatch {
        let num_states = self.panel.len();
        let num_sites = self.positions.len();
        assert_eq!(haplotype.len(), num_sites);
        if num_sites == 0 || num_states < 2 {
            return HmmMatch {
                path: vec![PathSegment {
                    left: 0,
                    right: self.sequence_length,
                    parent: self.root,
                }],
                ..Default::default()
            };
        }

        let mut values = vec![1.0f64; num_states];
        let mut log_likelihood = 0.0f64;
        // Per-site traceback state: which states were entered by a switch,
        // and the pre-transition argmax they switched from.
        let mut switched: Vec<Vec<u64>> = Vec::with_capacity(num_sites);
        let mut prev_best: Vec<u32> = Vec::with_capacity(num_sites);

        for site in 0..num_sites {
            let sample_allele = haplotype[site];
            let (best_state, best_value) = argmax(&values);
            prev_best.push(best_state as u32);
            let switch_value = best_value * self.rho / (num_states - 1) as f64;

            let mut row = bit_row(num_states);
            for j in 0..num_states {
                let stay = values[j] * (1.0 - self.rho);
                let transition = if switch_value > stay * (1.0 + SWITCH_TOLERANCE) {
                    set_bit(&mut row, j);
                    switch_value
                } else {
                    stay
                };
                let panel_allele = self.panel[j][site];
                let emission = if sample_allele == MISSING || sample_allele == panel_allele {
                    1.0
                } else {
                    self.mu
                };
                values[j] = transition * emission;
            }
            switched.push(row);

            let scale = values.iter().cloned().fold(0.0f64, f64::max);
            if scale <= 0.0 {
                log_likelihood = f64::NEG_INFINITY;
                break;
            }
            log_likelihood += scale.ln();
            for value in values.iter_mut() {
                *value /= scale;
                if *value < self.likelihood_threshold {
                    *value = self.likelihood_threshold;
                }
            }
        }

        if log_likelihood < self.likelihood_threshold.ln() {
            warn!(
                "MatchUnderflow: likelihood floored at {:.3e}, returning degenerate root match",
                log_likelihood.exp()
            );
            return self.floored_match(haplotype);
        }

        // Traceback, right to left. A switch recorded at a site means the
        // current state was entered there from the pre-transition argmax.
        let (mut state, _) = argmax(&values);
        let mut segments: Vec<(usize, usize, NodeId)> = Vec::new();
        let mut right_idx = num_sites;
        for site in (0..num_sites).rev() {
            if get_bit(&switched[site], state) {
                segments.push((site, right_idx, state as NodeId));
                state = prev_best[site] as usize;
                right_idx = site;
            }
        }
        segments.push((0, right_idx, state as NodeId));
        segments.reverse();

        let path: Vec<PathSegment> = segments
            .iter()
            .map(|&(l, r, parent)| PathSegment {
                left: if l == 0 { 0 } else { self.positions[l] },
                right: if r == num_sites {
                    self.sequence_length
                } else {
                    self.positions[r]
                },
                parent,
            })
            .collect();

        let mut mutations = Vec::new();
        for &(l, r, parent) in &segments {
            for site in l..r {
                let a = haplotype[site];
                if a != MISSING && a != self.panel[parent as usize][site] {
                    mutations.push(self.residual_mutation(site, parent, a));
                }
            }
        }

        HmmMatch {
            path,
            mutations,
            likelihood_floored: false,
        }
    }
}

#[inline]
fn argmax(values: &[f64]) -> (usize, f64) {
    let mut best = 0;
    let mut best_value = values[0];
    for (j, &value) in values.iter().enumerate().skip(1) {
        if value > best_value {
            best = j;
            best_value = value;
        }
    }
    (best, best_value)
}

/// Map a match produced against the mirrored ARG back to forward
/// coordinates.
fn unmirror_match(m: HmmMatch, sequence_length: usize) -> HmmMatch {
    let mut path: Vec<PathSegment> = m
        .path
        .into_iter()
        .map(|s| PathSegment {
            left: sequence_length - s.right,
            right: sequence_length - s.left,
            parent: s.parent,
        })
        .collect();
    path.reverse();
    let mut mutations: Vec<HmmMutation> = m
        .mutations
        .into_iter()
        .map(|mut mutation| {
            mutation.site_position = mirror_position(sequence_length, mutation.site_position);
            mutation
        })
        .collect();
    mutations.reverse();
    HmmMatch {
        path,
        mutations,
        likelihood_floored: m.likelihood_floored,
    }
}

/// Match a batch of sample haplotypes against the ARG. With `mirror` set the
/// scan runs right-to-left (breakpoint ties resolve rightmost) and results
/// are reported back in forward coordinates.
pub fn match_haplotypes(
    arg: &Arg,
    haplotypes: &[Vec<i8>],
    mu: f64,
    rho: f64,
    likelihood_threshold: f64,
    mirror: bool,
) -> Vec<HmmMatch> {
    if mirror {
        let mirrored = mirror_arg(arg);
        let matcher = Matcher::new(&mirrored, mu, rho, likelihood_threshold);
        let reversed: Vec<Vec<i8>> = haplotypes
            .iter()
            .map(|h| {
                let mut r = h.clone();
                r.reverse();
                r
            })
            .collect();
        matcher
            .run(&reversed)
            .into_iter()
            .map(|m| unmirror_match(m, arg.sequence_length))
            .collect()
    } else {
        let matcher = Matcher::new(arg, mu, rho, likelihood_threshold);
        matcher.run(haplotypes)
    }
}
