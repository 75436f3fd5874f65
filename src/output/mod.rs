// mod.rs - Report writers for the info and export commands

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::core::attach::get_recombinant_strains;
use crate::data::arg::{node_flags, Arg};
use crate::data::matches::MatchDb;
use crate::error::Result;

/// One-line-per-fact summary of an ARG.
pub fn arg_summary(arg: &Arg) -> Result<String> {
    let metadata = arg.metadata()?;
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for node in &arg.nodes {
        if node.flags & node_flags::RECOMBINANT != 0 {
            *counts.entry("recombinant").or_insert(0) += 1;
        } else if node.flags & node_flags::REVERSION_PUSH != 0 {
            *counts.entry("reversion_push").or_insert(0) += 1;
        } else if node.flags & node_flags::RETROSPECTIVE_SAMPLE != 0 {
            *counts.entry("retrospective_sample").or_insert(0) += 1;
        } else if node.flags & node_flags::SAMPLE != 0 {
            *counts.entry("sample").or_insert(0) += 1;
        } else if node.flags & node_flags::IN_SAMPLE_GROUP != 0 {
            *counts.entry("group_root").or_insert(0) += 1;
        } else {
            *counts.entry("ancestor").or_insert(0) += 1;
        }
    }
    let mut out = String::new();
    let _ = writeln!(out, "date\t{}", metadata.core.date.as_deref().unwrap_or("-"));
    let _ = writeln!(out, "nodes\t{}", arg.num_nodes());
    let _ = writeln!(out, "edges\t{}", arg.num_edges());
    let _ = writeln!(out, "sites\t{}", arg.num_sites());
    let _ = writeln!(out, "mutations\t{}", arg.num_mutations());
    for (kind, count) in counts {
        let _ = writeln!(out, "nodes[{}]\t{}", kind, count);
    }
    let _ = writeln!(out, "exact_matches\t{}", metadata.core.exact_matches.total());
    let _ = writeln!(out, "retro_groups\t{}", metadata.core.retro_groups.len());
    Ok(out)
}

/// Cost histogram of the match cache, one row per integer cost.
pub fn match_cost_histogram(db: &MatchDb) -> String {
    let frame = db.as_dataframe();
    let mut counter: BTreeMap<u64, usize> = BTreeMap::new();
    let mut total = 0usize;
    for line in frame.lines().skip(1) {
        if let Some(cost) = line.split('\t').nth(4).and_then(|v| v.parse::<f64>().ok()) {
            *counter.entry(cost as u64).or_insert(0) += 1;
            total += 1;
        }
    }
    let mut out = String::from("cost\tpercent\tcount\n");
    for (cost, count) in counter {
        let percent = count as f64 / total as f64 * 100.0;
        let _ = writeln!(out, "{}\t{:.1}\t{}", cost, percent, count);
    }
    out
}

/// TSV table of recombinant nodes and their causal sample groups.
pub fn recombinants_summary(arg: &Arg) -> Result<String> {
    let strains = get_recombinant_strains(arg)?;
    let mut out = String::from("recombinant\tgroup_id\tdate_added\tparents\tdescendants\tstrains\n");
    for (node, group_strains) in strains {
        let metadata = arg.node_metadata(node)?;
        let parents = arg.edges.iter().filter(|e| e.child == node).count();
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            node,
            metadata.core.group_id.as_deref().unwrap_or("-"),
            metadata.core.date_added.as_deref().unwrap_or("-"),
            parents,
            group_strains.len(),
            group_strains.join(",")
        );
    }
    Ok(out)
}

/// Sample metadata as TSV, one row per sample node.
pub fn export_metadata_tsv(arg: &Arg) -> Result<String> {
    let mut out = String::from("strain\tdate\tpango_lineage\tgroup_id\tnum_missing_sites\n");
    for &node in &arg.samples() {
        let metadata = arg.node_metadata(node)?;
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            metadata.strain.as_deref().unwrap_or("-"),
            metadata.date.as_deref().unwrap_or("-"),
            metadata.pango_lineage.as_deref().unwrap_or("-"),
            metadata.core.group_id.as_deref().unwrap_or("-"),
            metadata
                .core
                .num_missing_sites
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::arg::pad_alignment;
    use crate::data::matches::{Direction, MatchRecord};
    use std::collections::HashSet;

    #[test]
    fn test_arg_summary_counts() {
        let arg = Arg::initial(&pad_alignment(b"ACGTACGTA"), &HashSet::new()).unwrap();
        let summary = arg_summary(&arg).unwrap();
        assert!(summary.contains("date\t2019-12-26"));
        assert!(summary.contains("nodes\t2"));
        assert!(summary.contains("nodes[sample]\t1"));
        assert!(summary.contains("nodes[ancestor]\t1"));
    }

    #[test]
    fn test_match_cost_histogram() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = crate::data::matches::MatchDb::initialise(dir.path().join("m.db")).unwrap();
        let m = crate::core::hmm::HmmMatch::default();
        for (strain, cost) in [("a", 0.0), ("b", 2.0), ("c", 2.0), ("d", 5.0)] {
            db.put(
                MatchRecord::new(
                    strain.to_string(),
                    "2020-02-01".to_string(),
                    Direction::Forward,
                    3,
                    cost,
                    &m,
                )
                .unwrap(),
            );
        }
        let histogram = match_cost_histogram(&db);
        assert!(histogram.contains("0\t25.0\t1"));
        assert!(histogram.contains("2\t50.0\t2"));
        assert!(histogram.contains("5\t25.0\t1"));
    }
}
