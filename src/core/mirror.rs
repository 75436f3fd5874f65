// mirror.rs - Reversible reflection of an ARG about its sequence length

use crate::data::arg::{Arg, Site};

/// Mirror an interval coordinate (edge endpoints).
#[inline]
pub fn mirror_coordinate(sequence_length: usize, x: usize) -> usize {
    sequence_length - x
}

/// Mirror a site position.
#[inline]
pub fn mirror_position(sequence_length: usize, position: usize) -> usize {
    sequence_length - 1 - position
}

/// Reflect all site positions and edge intervals of an ARG. The topology,
/// node table and all metadata are unchanged; haplotypes of the result read
/// left-to-right equal haplotypes of the input read right-to-left. The
/// operation is an involution.
pub fn mirror_arg(arg: &Arg) -> Arg {
    let length = arg.sequence_length;
    let num_sites = arg.sites.len();

    let mut mirrored = arg.clone();
    mirrored.sites = arg
        .sites
        .iter()
        .rev()
        .map(|site| Site {
            position: mirror_position(length, site.position),
            ancestral_state: site.ancestral_state,
            metadata: site.metadata.clone(),
        })
        .collect();
    for mutation in &mut mirrored.mutations {
        mutation.site = num_sites - 1 - mutation.site;
    }
    for edge in &mut mirrored.edges {
        let (left, right) = (edge.left, edge.right);
        edge.left = mirror_coordinate(length, right);
        edge.right = mirror_coordinate(length, left);
    }
    mirrored
}
