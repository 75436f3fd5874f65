// mod.rs - On-disk stores and the ARG table set

pub mod alignments;
pub mod arg;
pub mod matches;
pub mod metadata;

pub use alignments::{AlignmentStore, StoreMode};
pub use arg::{node_flags, Arg, NodeId};
pub use matches::{Direction, MatchDb, MatchRecord};
pub use metadata::{MetadataDb, MetadataRow};
