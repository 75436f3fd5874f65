// mod.rs - Core matching and attachment algorithms

pub mod alleles;
pub mod attach;
pub mod extend;
pub mod hmm;
pub mod mirror;
pub mod preprocess;

pub use attach::{add_matching_results, compute_group_id, GroupGates};
pub use extend::{extend, validate, ExtendOptions};
pub use hmm::{match_haplotypes, solve_num_mismatches, HmmMatch, HmmMutation, PathSegment};
pub use mirror::mirror_arg;
pub use preprocess::{preprocess, preprocess_strains, Sample};
