// config.rs - TOML configuration file for the extend command

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::extend::ExtendOptions;
use crate::error::{ArgrowError, Result};

/// Optional file-based counterpart of the extend options. Command line
/// arguments override anything set here.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExtendConfig {
    pub num_mismatches: Option<u32>,
    pub hmm_cost_threshold: Option<f64>,
    pub min_group_size: Option<usize>,
    pub min_root_mutations: Option<usize>,
    pub min_different_dates: Option<usize>,
    pub max_mutations_per_sample: Option<f64>,
    pub max_recurrent_mutations: Option<u32>,
    pub retrospective_window: Option<u32>,
    pub deletions_as_missing: Option<bool>,
    pub max_daily_samples: Option<usize>,
    pub max_missing_sites: Option<usize>,
    pub random_seed: Option<u64>,
    pub num_threads: Option<usize>,
}

impl ExtendConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ArgrowError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| ArgrowError::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Overlay the set values onto a set of options.
    pub fn apply_to(&self, options: &mut ExtendOptions) {
        if let Some(v) = self.num_mismatches {
            options.num_mismatches = v;
        }
        if let Some(v) = self.hmm_cost_threshold {
            options.hmm_cost_threshold = v;
        }
        if let Some(v) = self.min_group_size {
            options.min_group_size = v;
        }
        if let Some(v) = self.min_root_mutations {
            options.min_root_mutations = v;
        }
        if let Some(v) = self.min_different_dates {
            options.min_different_dates = v;
        }
        if let Some(v) = self.max_mutations_per_sample {
            options.max_mutations_per_sample = Some(v);
        }
        if let Some(v) = self.max_recurrent_mutations {
            options.max_recurrent_mutations = Some(v);
        }
        if let Some(v) = self.retrospective_window {
            options.retrospective_window = v;
        }
        if let Some(v) = self.deletions_as_missing {
            options.deletions_as_missing = v;
        }
        if let Some(v) = self.max_daily_samples {
            options.max_daily_samples = Some(v);
        }
        if let Some(v) = self.max_missing_sites {
            options.max_missing_sites = Some(v);
        }
        if let Some(v) = self.random_seed {
            options.random_seed = v;
        }
    }

    /// Generate a sample configuration file with comments.
    pub fn generate_sample() -> String {
        r#"# argrow.toml - Configuration file for argrow extend
# Command line arguments will override these settings

# Number of mismatches to accept in favour of recombination
num_mismatches = 3

# Maximum HMM cost for unconditional same-day inclusion
hmm_cost_threshold = 5.0

# Gates for retrospective sample groups
min_group_size = 10
min_root_mutations = 2
min_different_dates = 3
max_mutations_per_sample = 10.0
max_recurrent_mutations = 10

# Days in the past to reconsider cached matches
retrospective_window = 30

# Treat deletions as missing data when matching
deletions_as_missing = true

# Daily subsampling (omit for no limit)
# max_daily_samples = 1000
# max_missing_sites = 5000

random_seed = 42

# Worker threads for matching (omit for all cores)
# num_threads = 8
"#
        .to_string()
    }
}
