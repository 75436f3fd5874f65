// alleles.rs - Allele codec for aligned viral genomes

use std::collections::BTreeMap;

/// Canonical allele order. Indices 0..4 are meaningful states, everything
/// else (N, IUPAC ambiguity codes, garbage) is missing data.
pub const ALLELES: [u8; 5] = [b'A', b'C', b'G', b'T', b'-'];

/// Missing data marker in encoded haplotypes.
pub const MISSING: i8 = -1;

/// Index of the deletion state in `ALLELES`.
pub const DELETION: i8 = 4;

/// Encode one alignment byte to its allele index, or -1 if missing.
#[inline]
pub fn encode_allele(byte: u8) -> i8 {
    match byte {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' => 3,
        b'-' => 4,
        _ => MISSING,
    }
}

/// Decode an allele index back to its alignment byte. Missing becomes N.
#[inline]
pub fn decode_allele(state: i8) -> u8 {
    if (0..5).contains(&state) {
        ALLELES[state as usize]
    } else {
        b'N'
    }
}

/// Encode a full alignment into a haplotype of allele indices.
pub fn encode(alignment: &[u8]) -> Vec<i8> {
    alignment.iter().map(|&b| encode_allele(b)).collect()
}

/// Decode a haplotype back into alignment bytes.
pub fn decode(haplotype: &[i8]) -> Vec<u8> {
    haplotype.iter().map(|&s| decode_allele(s)).collect()
}

/// Count the letters of an alignment over the {A,C,G,T,-,N} alphabet.
/// Anything outside the five canonical states counts as N.
pub fn alignment_composition(alignment: &[u8]) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for &b in alignment {
        let letter = decode_allele(encode_allele(b)) as char;
        *counts.entry(letter.to_string()).or_insert(0) += 1;
    }
    counts
}

/// Replace deletion states with missing data. Applied before matching when
/// deletions are not trusted as phylogenetic signal.
pub fn deletions_as_missing(haplotype: &mut [i8]) {
    for state in haplotype.iter_mut() {
        if *state == DELETION {
            *state = MISSING;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_canonical() {
        let alignment = b"ACGT-NACGT";
        let haplotype = encode(alignment);
        assert_eq!(haplotype, vec![0, 1, 2, 3, 4, -1, 0, 1, 2, 3]);
        assert_eq!(decode(&haplotype), alignment.to_vec());
    }

    #[test]
    fn test_non_canonical_maps_to_missing() {
        // Lower case and IUPAC ambiguity codes are all missing data
        for b in [b'a', b'c', b'R', b'Y', b'W', b'?', b'X', b'n'] {
            assert_eq!(encode_allele(b), MISSING);
        }
        // ... and decode back as N
        assert_eq!(decode(&encode(b"aRn")), b"NNN".to_vec());
    }

    #[test]
    fn test_composition() {
        let counts = alignment_composition(b"AACGT-NR");
        assert_eq!(counts.get("A"), Some(&2));
        assert_eq!(counts.get("C"), Some(&1));
        assert_eq!(counts.get("G"), Some(&1));
        assert_eq!(counts.get("T"), Some(&1));
        assert_eq!(counts.get("-"), Some(&1));
        // R folds into N
        assert_eq!(counts.get("N"), Some(&2));
        assert_eq!(counts.values().sum::<usize>(), 8);
    }

    #[test]
    fn test_deletions_as_missing() {
        let mut h = encode(b"AC-T-");
        deletions_as_missing(&mut h);
        assert_eq!(h, vec![0, 1, -1, 3, -1]);
    }
}
