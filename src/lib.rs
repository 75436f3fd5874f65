// lib.rs - argrow library root

//! # argrow - Incremental ARG inference for dated viral genome collections
//!
//! This library grows an ancestral recombination graph (ARG) one day at a
//! time from dated, reference-aligned viral genomes. New samples are placed
//! with a Li-Stephens HMM that trades point mutations against recombination,
//! then attached to the graph as samples, sample groups, recombinant nodes
//! or reversion pushes. The graph only ever grows forward in time.
//!
//! ## Features
//!
//! - **Incremental**: each day extends the previous day's ARG atomically
//! - **Recombination aware**: multi-parent placements become explicit
//!   recombinant nodes with genome-partitioning edges
//! - **Durable match cache**: HMM results persist across runs and feed the
//!   retrospective re-matcher
//! - **Deterministic**: a fixed seed reproduces the ARG bit for bit
//! - **Parallel**: samples are scored independently on a worker pool
//!
//! ## Basic usage
//!
//! ```rust,no_run
//! use argrow::prelude::*;
//!
//! let alignments = AlignmentStore::open("alignments.db", StoreMode::Read)?;
//! let metadata = MetadataDb::open("metadata.db")?;
//! let mut matches = MatchDb::open("match.db")?;
//! let base = Arg::load("2020-02-01.arg")?;
//!
//! let arg = extend(
//!     &alignments,
//!     &metadata,
//!     &base,
//!     "2020-02-02",
//!     &mut matches,
//!     &ExtendOptions::default(),
//! )?;
//! arg.dump("2020-02-02.arg")?;
//! # Ok::<(), argrow::ArgrowError>(())
//! ```

pub mod cli;
pub mod core;
pub mod data;
pub mod error;
pub mod output;

// Convenience prelude for common imports
pub mod prelude {
    pub use crate::core::attach::{add_matching_results, compute_group_id, GroupGates};
    pub use crate::core::extend::{extend, validate, ExtendOptions};
    pub use crate::core::hmm::{match_haplotypes, solve_num_mismatches, HmmMatch};
    pub use crate::core::mirror::mirror_arg;
    pub use crate::core::preprocess::{preprocess, preprocess_strains, Sample};
    pub use crate::data::alignments::{AlignmentStore, StoreMode};
    pub use crate::data::arg::{node_flags, Arg, NodeId};
    pub use crate::data::matches::{Direction, MatchDb, MatchRecord};
    pub use crate::data::metadata::MetadataDb;
    pub use crate::error::{ArgrowError, Result};
}

// Re-export the main types at the root level for convenience
pub use crate::core::extend::{extend, validate, ExtendOptions};
pub use crate::data::alignments::{AlignmentStore, StoreMode};
pub use crate::data::arg::Arg;
pub use crate::data::matches::MatchDb;
pub use crate::data::metadata::MetadataDb;
pub use crate::error::{ArgrowError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn get_info() -> String {
    format!("argrow v{} - Incremental ARG inference for viral genomes", VERSION)
}
