// attach.rs - Convert batches of matched samples into new ARG topology

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::{debug, info};

use crate::core::hmm::{HmmMutation, PathSegment};
use crate::core::preprocess::Sample;
use crate::data::arg::{
    node_flags, Arg, NodeCoreMetadata, NodeId, NodeMetadata, RetroGroupRecord,
};
use crate::error::{ArgrowError, Result};

/// Fractional node times within a day: internal nodes slot strictly between
/// the day's samples (time 0) and the youngest pre-existing node (time >= 1).
const RECOMBINANT_TIME: f64 = 0.5;
const GROUP_ROOT_TIME: f64 = 0.25;

/// Admission thresholds for a sample group. The max-gates are disabled when
/// `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupGates {
    pub min_group_size: usize,
    pub min_root_mutations: usize,
    pub min_different_dates: usize,
    pub max_recurrent_mutations: Option<u32>,
    pub max_mutations_per_sample: Option<f64>,
}

impl GroupGates {
    /// The gates applied to the daily batch: everything under the HMM cost
    /// threshold is admitted.
    pub fn relaxed() -> Self {
        Self {
            min_group_size: 1,
            min_root_mutations: 0,
            min_different_dates: 1,
            max_recurrent_mutations: None,
            max_mutations_per_sample: None,
        }
    }
}

/// Stable group identifier: hex MD5 over the member strains in
/// lexicographic order.
pub fn compute_group_id(strains: &[String]) -> String {
    let mut sorted: Vec<&String> = strains.iter().collect();
    sorted.sort();
    let mut joined = String::new();
    for strain in sorted {
        joined.push_str(strain);
    }
    format!("{:x}", md5::compute(joined.as_bytes()))
}

#[derive(Debug, Default)]
pub struct AttachmentSummary {
    /// Strains committed this call, in node-creation order.
    pub added_strains: Vec<String>,
    pub num_exact_matches: usize,
    pub groups_added: usize,
    pub groups_skipped: usize,
    pub retro_records: Vec<RetroGroupRecord>,
}

type MutationKey = (usize, i8, i8);

fn mutation_key(m: &HmmMutation) -> MutationKey {
    (m.site_position, m.inherited_state, m.derived_state)
}

fn sample_metadata(sample: &Sample, group_id: &str, date_added: Option<&str>) -> NodeMetadata {
    NodeMetadata {
        strain: Some(sample.strain.clone()),
        date: Some(sample.date.clone()),
        pango_lineage: Some(sample.pango_lineage.clone()),
        core: NodeCoreMetadata {
            group_id: Some(group_id.to_string()),
            date_added: date_added.map(|d| d.to_string()),
            hmm_match: sample.hmm_match.as_ref().map(|m| m.to_metadata()),
            hmm_reruns: Some(
                sample
                    .hmm_reruns
                    .iter()
                    .map(|(k, m)| (k.clone(), m.to_metadata()))
                    .collect(),
            ),
            num_missing_sites: Some(sample.num_missing_sites),
            alignment_composition: Some(sample.alignment_composition.clone()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Attach one batch of matched samples for `date`. Exact matches hang
/// directly off their parent; the rest partition by path, share root
/// mutations through a group root node, route multi-segment paths through a
/// recombinant node and push immediate reversions above the parent. The
/// gates run per group; failures are skipped, not errors. Top-level
/// metadata (samples_strain, exact_matches, retro_groups) is updated in
/// place.
pub fn add_matching_results(
    arg: &mut Arg,
    samples: &[Sample],
    date: &str,
    gates: &GroupGates,
    retrospective: bool,
) -> Result<AttachmentSummary> {
    let mut summary = AttachmentSummary::default();
    let mut metadata = arg.metadata()?;

    // Exact matches first, in input order.
    for sample in samples {
        let hmm_match = match &sample.hmm_match {
            Some(m) if m.is_exact() && !retrospective => m.clone(),
            _ => continue,
        };
        let parent = hmm_match.path[0].parent;
        let group_id = compute_group_id(std::slice::from_ref(&sample.strain));
        let node = arg.add_node(
            0.0,
            node_flags::SAMPLE,
            &sample_metadata(sample, &group_id, None),
        );
        arg.add_edge(0, arg.sequence_length, parent, node);
        bump_site_counters(arg, sample)?;
        summary.added_strains.push(sample.strain.clone());
        summary.num_exact_matches += 1;
        let counts = &mut metadata.core.exact_matches;
        *counts.node.entry(parent.to_string()).or_insert(0) += 1;
        *counts.date.entry(sample.date.clone()).or_insert(0) += 1;
        *counts
            .pango
            .entry(sample.pango_lineage.clone())
            .or_insert(0) += 1;
    }

    // Partition the rest by identical path, preserving first-seen order.
    let mut partitions: Vec<(Vec<PathSegment>, Vec<&Sample>)> = Vec::new();
    let mut partition_index: HashMap<Vec<(usize, usize, NodeId)>, usize> = HashMap::new();
    for sample in samples {
        let hmm_match = match &sample.hmm_match {
            Some(m) if !(m.is_exact() && !retrospective) => m,
            _ => continue,
        };
        let key: Vec<(usize, usize, NodeId)> = hmm_match
            .path
            .iter()
            .map(|s| (s.left, s.right, s.parent))
            .collect();
        match partition_index.get(&key) {
            Some(&i) => partitions[i].1.push(sample),
            None => {
                partition_index.insert(key, partitions.len());
                partitions.push((hmm_match.path.clone(), vec![sample]));
            }
        }
    }

    for (path, members) in partitions {
        match attach_group(arg, &path, &members, date, gates, retrospective)? {
            Some(outcome) => {
                summary.added_strains.extend(outcome.strains.clone());
                summary.groups_added += 1;
                if retrospective {
                    summary.retro_records.push(outcome.record);
                }
            }
            None => summary.groups_skipped += 1,
        }
    }

    metadata
        .core
        .samples_strain
        .extend(summary.added_strains.iter().cloned());
    metadata
        .core
        .retro_groups
        .extend(summary.retro_records.iter().cloned());
    arg.set_metadata(&metadata);
    info!(
        "attached {} samples ({} exact, {} groups, {} skipped) for {}",
        summary.added_strains.len(),
        summary.num_exact_matches,
        summary.groups_added,
        summary.groups_skipped,
        date
    );
    Ok(summary)
}

struct GroupOutcome {
    strains: Vec<String>,
    record: RetroGroupRecord,
}

fn attach_group(
    arg: &mut Arg,
    path: &[PathSegment],
    members: &[&Sample],
    date: &str,
    gates: &GroupGates,
    retrospective: bool,
) -> Result<Option<GroupOutcome>> {
    let size = members.len();
    let strains: Vec<String> = members.iter().map(|s| s.strain.clone()).collect();
    let group_id = compute_group_id(&strains);

    // Mutations shared by every member become root mutations.
    let shared: Vec<HmmMutation> = if size >= 2 {
        let mut common: Vec<HmmMutation> = members[0]
            .hmm_match
            .as_ref()
            .map(|m| m.mutations.clone())
            .unwrap_or_default();
        for member in &members[1..] {
            let keys: HashSet<MutationKey> = member
                .hmm_match
                .as_ref()
                .map(|m| m.mutations.iter().map(mutation_key).collect())
                .unwrap_or_default();
            common.retain(|m| keys.contains(&mutation_key(m)));
        }
        common
    } else {
        Vec::new()
    };

    // Gate checks, cheapest first.
    if size < gates.min_group_size {
        debug!("Skipping size={} < threshold group_id={}", size, group_id);
        return Ok(None);
    }
    if shared.len() < gates.min_root_mutations {
        debug!(
            "Skipping root_mutations={} < threshold group_id={}",
            shared.len(),
            group_id
        );
        return Ok(None);
    }
    let dates: BTreeSet<String> = members.iter().map(|s| s.date.clone()).collect();
    if dates.len() < gates.min_different_dates {
        debug!(
            "Skipping num_dates={} < threshold group_id={}",
            dates.len(),
            group_id
        );
        return Ok(None);
    }
    let shared_keys: HashSet<MutationKey> = shared.iter().map(mutation_key).collect();
    let mut total_mutations = shared.len();
    for member in members {
        if let Some(m) = &member.hmm_match {
            total_mutations += m
                .mutations
                .iter()
                .filter(|mu| !shared_keys.contains(&mutation_key(mu)))
                .count();
        }
    }
    let mutated = arg.mutated_sites();
    let mutated_positions: HashSet<usize> =
        mutated.iter().map(|&s| arg.sites[s].position).collect();
    // Count every mutation the group would add (root ones once, residuals
    // per member) whose site is already mutated somewhere in the ARG.
    let mut num_recurrent = 0u32;
    for mutation in &shared {
        if mutated_positions.contains(&mutation.site_position) {
            num_recurrent += 1;
        }
    }
    for member in members {
        if let Some(m) = &member.hmm_match {
            for mutation in &m.mutations {
                if !shared_keys.contains(&mutation_key(mutation))
                    && mutated_positions.contains(&mutation.site_position)
                {
                    num_recurrent += 1;
                }
            }
        }
    }
    if let Some(max) = gates.max_recurrent_mutations {
        if num_recurrent > max {
            debug!(
                "Skipping num_recurrent_mutations={} exceeds threshold group_id={}",
                num_recurrent, group_id
            );
            return Ok(None);
        }
    }
    let mean_mutations = total_mutations as f64 / size as f64;
    if let Some(max) = gates.max_mutations_per_sample {
        if mean_mutations > max {
            debug!(
                "Skipping mean_mutations_per_sample={} exceeds threshold group_id={}",
                mean_mutations, group_id
            );
            return Ok(None);
        }
    }

    let nodes_before = arg.num_nodes();
    let mutations_before = arg.num_mutations();
    let multi_segment = path.len() >= 2;
    let date_added = Some(date);

    // Recombinant node replicating the path segments.
    let mut attach_parent: NodeId;
    if multi_segment {
        let recombinant = arg.add_node(
            RECOMBINANT_TIME,
            node_flags::RECOMBINANT,
            &NodeMetadata {
                core: NodeCoreMetadata {
                    group_id: Some(group_id.clone()),
                    date_added: date_added.map(|d| d.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        for segment in path {
            arg.add_edge(segment.left, segment.right, segment.parent, recombinant);
        }
        attach_parent = recombinant;
    } else {
        attach_parent = path[0].parent;
    }

    // Reversion push for a shared attachment unit: immediate reversions
    // among the root mutations lift a new node in between the matched
    // parent and its own parent.
    let use_group_root = size >= 2 && !shared.is_empty();
    let mut pushed_keys: HashSet<MutationKey> = HashSet::new();
    let mut pushed = false;
    if !multi_segment && use_group_root {
        let immediate: Vec<HmmMutation> = shared
            .iter()
            .filter(|m| m.is_immediate_reversion)
            .copied()
            .collect();
        if !immediate.is_empty() {
            if let Some(push_node) = insert_push_node(arg, attach_parent, date, &immediate) {
                pushed_keys = immediate.iter().map(mutation_key).collect();
                attach_parent = push_node;
                pushed = true;
            }
        }
    }

    // Group root carrying the shared mutations.
    let sample_parent = if use_group_root {
        let root = arg.add_node(
            GROUP_ROOT_TIME,
            node_flags::IN_SAMPLE_GROUP,
            &NodeMetadata {
                core: NodeCoreMetadata {
                    group_id: Some(group_id.clone()),
                    date_added: date_added.map(|d| d.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        arg.add_edge(0, arg.sequence_length, attach_parent, root);
        for mutation in &shared {
            if pushed_keys.contains(&mutation_key(mutation)) {
                continue;
            }
            let site = site_of(arg, mutation.site_position)?;
            arg.add_mutation(site, root, mutation.derived_state);
        }
        root
    } else {
        attach_parent
    };

    let mut flags = node_flags::SAMPLE;
    if size >= 2 {
        flags |= node_flags::IN_SAMPLE_GROUP;
    }
    if retrospective {
        flags |= node_flags::IN_SAMPLE_GROUP | node_flags::RETROSPECTIVE_SAMPLE;
    }
    // Without a group root every member is its own attachment unit, so its
    // immediate reversions push individually; members with an identical
    // reversion set share one push node.
    let mut member_push_nodes: HashMap<Vec<usize>, NodeId> = HashMap::new();
    for member in members {
        let mut member_parent = sample_parent;
        let mut member_pushed: HashSet<MutationKey> = HashSet::new();
        if !multi_segment && !use_group_root {
            let immediate: Vec<HmmMutation> = member
                .hmm_match
                .as_ref()
                .map(|m| {
                    m.mutations
                        .iter()
                        .filter(|mu| mu.is_immediate_reversion)
                        .copied()
                        .collect()
                })
                .unwrap_or_default();
            if !immediate.is_empty() {
                let positions: Vec<usize> = immediate.iter().map(|m| m.site_position).collect();
                let push_node = match member_push_nodes.get(&positions) {
                    Some(&node) => Some(node),
                    None => {
                        let node = insert_push_node(arg, sample_parent, date, &immediate);
                        if let Some(node) = node {
                            member_push_nodes.insert(positions, node);
                        }
                        node
                    }
                };
                if let Some(node) = push_node {
                    member_parent = node;
                    member_pushed = immediate.iter().map(mutation_key).collect();
                    pushed = true;
                }
            }
        }
        let node = arg.add_node(
            0.0,
            flags,
            &sample_metadata(member, &group_id, if retrospective { date_added } else { None }),
        );
        arg.add_edge(0, arg.sequence_length, member_parent, node);
        if let Some(m) = &member.hmm_match {
            for mutation in &m.mutations {
                let key = mutation_key(mutation);
                if pushed_keys.contains(&key) || member_pushed.contains(&key) {
                    continue;
                }
                if use_group_root && shared_keys.contains(&key) {
                    continue;
                }
                let site = site_of(arg, mutation.site_position)?;
                arg.add_mutation(site, node, mutation.derived_state);
            }
        }
        bump_site_counters(arg, member)?;
    }

    let pango_lineages: BTreeSet<String> =
        members.iter().map(|s| s.pango_lineage.clone()).collect();
    let record = RetroGroupRecord {
        group_id,
        date_added: date.to_string(),
        strains: strains.clone(),
        dates: dates.into_iter().collect(),
        pango_lineages: pango_lineages.into_iter().collect(),
        num_nodes: arg.num_nodes() - nodes_before,
        num_mutations: arg.num_mutations() - mutations_before,
        num_root_mutations: shared.len(),
        num_recurrent_mutations: num_recurrent as usize,
        depth: 1 + usize::from(use_group_root) + usize::from(multi_segment) + usize::from(pushed),
    };
    Ok(Some(GroupOutcome { strains, record }))
}

/// Insert a reversion-push node between `parent` and its own parent,
/// recording the pushed site positions. The parent's spanning inbound edge
/// is rewired through the new node (the only edge rewiring in the system);
/// the reverted mutation stays on the parent's own edge. Returns `None`
/// when the parent has no single spanning inbound edge.
fn insert_push_node(
    arg: &mut Arg,
    parent: NodeId,
    date: &str,
    reversions: &[HmmMutation],
) -> Option<NodeId> {
    let edge_index = arg
        .edges
        .iter()
        .position(|e| e.child == parent && e.left == 0 && e.right == arg.sequence_length)?;
    let grandparent = arg.edges[edge_index].parent;
    let time = (arg.nodes[parent as usize].time + arg.nodes[grandparent as usize].time) / 2.0;
    let push_node = arg.add_node(
        time,
        node_flags::REVERSION_PUSH,
        &NodeMetadata {
            core: NodeCoreMetadata {
                date_added: Some(date.to_string()),
                sites: Some(reversions.iter().map(|m| m.site_position).collect()),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    arg.edges[edge_index].child = push_node;
    arg.add_edge(0, arg.sequence_length, push_node, parent);
    Some(push_node)
}

fn site_of(arg: &Arg, position: usize) -> Result<usize> {
    arg.site_index(position).ok_or_else(|| {
        ArgrowError::ArgInvariantViolation(format!("no site at position {}", position))
    })
}

/// Track per-site missing/deletion counters for one committed sample.
fn bump_site_counters(arg: &mut Arg, sample: &Sample) -> Result<()> {
    for &site in &sample.missing_site_indexes {
        let mut md = arg.site_metadata(site)?;
        md.core.missing_samples += 1;
        arg.set_site_metadata(site, &md);
    }
    for &site in &sample.deletion_site_indexes {
        let mut md = arg.site_metadata(site)?;
        md.core.deletion_samples += 1;
        arg.set_site_metadata(site, &md);
    }
    Ok(())
}

/// Map each recombinant node to the strains of its causal sample group.
pub fn get_recombinant_strains(arg: &Arg) -> Result<BTreeMap<NodeId, Vec<String>>> {
    let mut group_of_recombinant: HashMap<String, NodeId> = HashMap::new();
    for (u, node) in arg.nodes.iter().enumerate() {
        if node.flags & node_flags::RECOMBINANT != 0 {
            if let Some(group_id) = arg.node_metadata(u as NodeId)?.core.group_id {
                group_of_recombinant.insert(group_id, u as NodeId);
            }
        }
    }
    let mut result: BTreeMap<NodeId, Vec<String>> = BTreeMap::new();
    for &u in arg.samples().iter() {
        let md = arg.node_metadata(u)?;
        if let (Some(group_id), Some(strain)) = (md.core.group_id, md.strain) {
            if let Some(&recombinant) = group_of_recombinant.get(&group_id) {
                result.entry(recombinant).or_default().push(strain);
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::arg::{pad_alignment, Edge, Mutation};
    use std::collections::HashSet as StdHashSet;

    /// Root/reference over ACGTACGTA plus a divergent left parent (node 2,
    /// mutations at positions 1-3) and right parent (node 3, positions 7-9).
    fn fixture_arg() -> Arg {
        let mut arg =
            Arg::initial(&pad_alignment(b"ACGTACGTA"), &StdHashSet::new()).unwrap();
        arg.nodes[0].time = 3.0;
        arg.nodes[1].time = 2.0;
        let left = arg.add_node(1.0, node_flags::SAMPLE, &NodeMetadata::default());
        arg.add_edge(0, 10, 1, left);
        arg.add_mutation(0, left, 3);
        arg.add_mutation(1, left, 3);
        arg.add_mutation(2, left, 0);
        let right = arg.add_node(1.0, node_flags::SAMPLE, &NodeMetadata::default());
        arg.add_edge(0, 10, 1, right);
        arg.add_mutation(6, right, 1);
        arg.add_mutation(7, right, 2);
        arg.add_mutation(8, right, 1);
        arg.validate_tables().unwrap();
        arg
    }

    fn make_sample(strain: &str, date: &str, hmm_match: HmmMatch) -> Sample {
        Sample {
            strain: strain.to_string(),
            date: date.to_string(),
            pango_lineage: "B.1".to_string(),
            haplotype: vec![],
            missing_site_indexes: vec![],
            deletion_site_indexes: vec![],
            alignment_composition: Default::default(),
            num_missing_sites: 0,
            hmm_match: Some(hmm_match),
            hmm_reruns: Default::default(),
        }
    }

    fn single_path(parent: NodeId) -> Vec<PathSegment> {
        vec![PathSegment {
            left: 0,
            right: 10,
            parent,
        }]
    }

    fn plain_mutation(position: usize, inherited: i8, derived: i8) -> HmmMutation {
        HmmMutation {
            site_position: position,
            inherited_state: inherited,
            derived_state: derived,
            is_reversion: false,
            is_immediate_reversion: false,
        }
    }

    #[test]
    fn test_exact_match_adds_no_internal_nodes() {
        let mut arg = fixture_arg();
        let nodes_before = arg.num_nodes();
        let sample = make_sample(
            "s1",
            "2020-02-01",
            HmmMatch {
                path: single_path(2),
                mutations: vec![],
                likelihood_floored: false,
            },
        );
        let summary = add_matching_results(
            &mut arg,
            &[sample],
            "2020-02-01",
            &GroupGates::relaxed(),
            false,
        )
        .unwrap();
        assert_eq!(summary.num_exact_matches, 1);
        assert_eq!(arg.num_nodes(), nodes_before + 1);
        let node = (arg.num_nodes() - 1) as NodeId;
        assert_eq!(arg.nodes[node as usize].flags, node_flags::SAMPLE);
        let md = arg.metadata().unwrap();
        assert_eq!(md.core.exact_matches.node.get("2"), Some(&1));
        assert_eq!(md.core.exact_matches.pango.get("B.1"), Some(&1));
        assert_eq!(md.core.exact_matches.total(), 1);
        assert_eq!(md.core.samples_strain.last().unwrap(), "s1");
        let node_md = arg.node_metadata(node).unwrap();
        assert_eq!(node_md.core.hmm_reruns, Some(Default::default()));
        arg.validate_tables().unwrap();
    }

    #[test]
    fn test_singleton_attaches_with_own_mutations() {
        let mut arg = fixture_arg();
        let sample = make_sample(
            "s1",
            "2020-02-01",
            HmmMatch {
                path: single_path(3),
                mutations: vec![plain_mutation(5, 1, 3)],
                likelihood_floored: false,
            },
        );
        let mutations_before = arg.num_mutations();
        add_matching_results(
            &mut arg,
            &[sample],
            "2020-02-01",
            &GroupGates::relaxed(),
            false,
        )
        .unwrap();
        assert_eq!(arg.num_mutations(), mutations_before + 1);
        let node = (arg.num_nodes() - 1) as NodeId;
        let added = arg.mutations.last().unwrap();
        assert_eq!(added.node, node);
        assert_eq!(arg.sites[added.site].position, 5);
        // No group flag for a singleton day batch
        assert_eq!(arg.nodes[node as usize].flags, node_flags::SAMPLE);
        arg.validate_tables().unwrap();
    }

    #[test]
    fn test_group_root_carries_shared_mutations() {
        let mut arg = fixture_arg();
        let shared = plain_mutation(4, 3, 0);
        let s1 = make_sample(
            "s1",
            "2020-02-01",
            HmmMatch {
                path: single_path(3),
                mutations: vec![shared, plain_mutation(5, 1, 3)],
                likelihood_floored: false,
            },
        );
        let s2 = make_sample(
            "s2",
            "2020-02-01",
            HmmMatch {
                path: single_path(3),
                mutations: vec![shared],
                likelihood_floored: false,
            },
        );
        let nodes_before = arg.num_nodes();
        add_matching_results(
            &mut arg,
            &[s1, s2],
            "2020-02-01",
            &GroupGates::relaxed(),
            false,
        )
        .unwrap();
        // One group root and two samples
        assert_eq!(arg.num_nodes(), nodes_before + 3);
        let root = nodes_before as NodeId;
        assert_eq!(arg.nodes[root as usize].flags, node_flags::IN_SAMPLE_GROUP);
        let root_md = arg.node_metadata(root).unwrap();
        assert_eq!(root_md.core.date_added.as_deref(), Some("2020-02-01"));
        assert!(root_md.core.group_id.is_some());
        // Shared mutation on the root, residual on the first sample only
        let on_root: Vec<&Mutation> =
            arg.mutations.iter().filter(|m| m.node == root).collect();
        assert_eq!(on_root.len(), 1);
        assert_eq!(arg.sites[on_root[0].site].position, 4);
        let s1_node = root + 1;
        let on_s1: Vec<&Mutation> =
            arg.mutations.iter().filter(|m| m.node == s1_node).collect();
        assert_eq!(on_s1.len(), 1);
        assert_eq!(arg.sites[on_s1[0].site].position, 5);
        let s2_node = root + 2;
        assert!(arg.mutations.iter().all(|m| m.node != s2_node));
        // Samples carry the group flag and share the root's group id
        assert_eq!(
            arg.nodes[s1_node as usize].flags,
            node_flags::SAMPLE | node_flags::IN_SAMPLE_GROUP
        );
        assert_eq!(
            arg.node_metadata(s1_node).unwrap().core.group_id,
            root_md.core.group_id
        );
        arg.validate_tables().unwrap();
    }

    #[test]
    fn test_recombinant_group() {
        let mut arg = fixture_arg();
        let path = vec![
            PathSegment {
                left: 0,
                right: 4,
                parent: 2,
            },
            PathSegment {
                left: 4,
                right: 10,
                parent: 3,
            },
        ];
        let s1 = make_sample(
            "r1",
            "2020-02-01",
            HmmMatch {
                path: path.clone(),
                mutations: vec![],
                likelihood_floored: false,
            },
        );
        let s2 = make_sample(
            "r2",
            "2020-02-01",
            HmmMatch {
                path,
                mutations: vec![plain_mutation(5, 1, 3)],
                likelihood_floored: false,
            },
        );
        let nodes_before = arg.num_nodes();
        let edges_before = arg.num_edges();
        add_matching_results(
            &mut arg,
            &[s1, s2],
            "2020-02-01",
            &GroupGates::relaxed(),
            false,
        )
        .unwrap();
        // No shared mutations, so just the recombinant plus two samples
        assert_eq!(arg.num_nodes(), nodes_before + 3);
        assert_eq!(arg.num_edges(), edges_before + 4);
        let recombinant = nodes_before as NodeId;
        assert_eq!(
            arg.nodes[recombinant as usize].flags,
            node_flags::RECOMBINANT
        );
        let inbound: Vec<&Edge> = arg
            .edges
            .iter()
            .filter(|e| e.child == recombinant)
            .collect();
        assert_eq!(inbound.len(), 2);
        assert_eq!((inbound[0].left, inbound[0].right, inbound[0].parent), (0, 4, 2));
        assert_eq!((inbound[1].left, inbound[1].right, inbound[1].parent), (4, 10, 3));
        // Both samples hang off the recombinant over the whole genome
        let outbound: Vec<&Edge> = arg
            .edges
            .iter()
            .filter(|e| e.parent == recombinant)
            .collect();
        assert_eq!(outbound.len(), 2);
        assert!(outbound.iter().all(|e| e.left == 0 && e.right == 10));
        // The recombinants map resolves the causal strains
        let strains = get_recombinant_strains(&arg).unwrap();
        assert_eq!(strains.get(&recombinant).unwrap(), &vec!["r1", "r2"]);
        arg.validate_tables().unwrap();
    }

    #[test]
    fn test_reversion_push() {
        let mut arg = fixture_arg();
        // Reverts the left parent's own A->T at position 1 back to A
        let reversion = HmmMutation {
            site_position: 1,
            inherited_state: 3,
            derived_state: 0,
            is_reversion: true,
            is_immediate_reversion: true,
        };
        let sample = make_sample(
            "s1",
            "2020-02-08",
            HmmMatch {
                path: single_path(2),
                mutations: vec![reversion],
                likelihood_floored: false,
            },
        );
        let mutations_before = arg.num_mutations();
        add_matching_results(
            &mut arg,
            &[sample],
            "2020-02-08",
            &GroupGates::relaxed(),
            false,
        )
        .unwrap();
        // A push node and the sample, no new mutations
        assert_eq!(arg.num_mutations(), mutations_before);
        let push_node = (arg.num_nodes() - 2) as NodeId;
        let sample_node = (arg.num_nodes() - 1) as NodeId;
        assert_eq!(
            arg.nodes[push_node as usize].flags,
            node_flags::REVERSION_PUSH
        );
        let md = arg.node_metadata(push_node).unwrap();
        assert_eq!(md.core.sites, Some(vec![1]));
        assert_eq!(md.core.date_added.as_deref(), Some("2020-02-08"));
        // The push node sits between the old grandparent and the parent,
        // and the new sample is a sibling of the parent below it.
        assert!(arg
            .edges
            .iter()
            .any(|e| e.parent == 1 && e.child == push_node));
        assert!(arg
            .edges
            .iter()
            .any(|e| e.parent == push_node && e.child == 2));
        assert!(arg
            .edges
            .iter()
            .any(|e| e.parent == push_node && e.child == sample_node));
        assert!(!arg.edges.iter().any(|e| e.parent == 1 && e.child == 2));
        // The sample itself carries no mutations
        assert!(arg.mutations.iter().all(|m| m.node != sample_node));
        // The parent's reverted mutation is untouched
        assert!(arg
            .mutations
            .iter()
            .any(|m| m.node == 2 && arg.sites[m.site].position == 1));
        arg.validate_tables().unwrap();
    }

    #[test]
    fn test_member_reversion_push_without_shared_mutations() {
        let mut arg = fixture_arg();
        // Two same-day siblings under the left parent, no shared mutation:
        // one reverts the parent's own position-1 change, the other carries
        // an unrelated ordinary mutation.
        let reversion = HmmMutation {
            site_position: 1,
            inherited_state: 3,
            derived_state: 0,
            is_reversion: true,
            is_immediate_reversion: true,
        };
        let s1 = make_sample(
            "s1",
            "2020-02-08",
            HmmMatch {
                path: single_path(2),
                mutations: vec![reversion],
                likelihood_floored: false,
            },
        );
        let s2 = make_sample(
            "s2",
            "2020-02-08",
            HmmMatch {
                path: single_path(2),
                mutations: vec![plain_mutation(5, 1, 3)],
                likelihood_floored: false,
            },
        );
        let mutations_before = arg.num_mutations();
        add_matching_results(
            &mut arg,
            &[s1, s2],
            "2020-02-08",
            &GroupGates::relaxed(),
            false,
        )
        .unwrap();
        // No group root; the push node comes first, then the two samples.
        // Only the ordinary mutation lands in the tables.
        assert_eq!(arg.num_mutations(), mutations_before + 1);
        let push_node: NodeId = 4;
        let s1_node: NodeId = 5;
        let s2_node: NodeId = 6;
        assert_eq!(
            arg.nodes[push_node as usize].flags,
            node_flags::REVERSION_PUSH
        );
        assert_eq!(
            arg.node_metadata(push_node).unwrap().core.sites,
            Some(vec![1])
        );
        // The reverting member hangs off the push node with zero mutations,
        // and the matched parent is re-routed through it.
        assert!(arg
            .edges
            .iter()
            .any(|e| e.parent == push_node && e.child == s1_node));
        assert!(arg
            .edges
            .iter()
            .any(|e| e.parent == push_node && e.child == 2));
        assert!(!arg.edges.iter().any(|e| e.parent == 1 && e.child == 2));
        assert!(arg.mutations.iter().all(|m| m.node != s1_node));
        // The other member still attaches to the matched parent directly,
        // keeping its own mutation.
        assert!(arg
            .edges
            .iter()
            .any(|e| e.parent == 2 && e.child == s2_node));
        let on_s2: Vec<&Mutation> =
            arg.mutations.iter().filter(|m| m.node == s2_node).collect();
        assert_eq!(on_s2.len(), 1);
        assert_eq!(arg.sites[on_s2[0].site].position, 5);
        arg.validate_tables().unwrap();
    }

    #[test]
    fn test_shared_reversion_members_share_push_node() {
        let mut arg = fixture_arg();
        // Both members revert the same parent mutation and share nothing
        // else; exactly one push node is created for the pair.
        let reversion = HmmMutation {
            site_position: 1,
            inherited_state: 3,
            derived_state: 0,
            is_reversion: true,
            is_immediate_reversion: true,
        };
        let s1 = make_sample(
            "s1",
            "2020-02-08",
            HmmMatch {
                path: single_path(2),
                mutations: vec![reversion, plain_mutation(5, 1, 3)],
                likelihood_floored: false,
            },
        );
        let s2 = make_sample(
            "s2",
            "2020-02-08",
            HmmMatch {
                path: single_path(2),
                mutations: vec![reversion, plain_mutation(4, 0, 2)],
                likelihood_floored: false,
            },
        );
        let nodes_before = arg.num_nodes();
        add_matching_results(
            &mut arg,
            &[s1, s2],
            "2020-02-08",
            &GroupGates::relaxed(),
            false,
        )
        .unwrap();
        // The shared reversion forms a group root; the push lifts above the
        // parent once and the root carries no reverted mutation.
        let push_nodes: Vec<NodeId> = (0..arg.num_nodes() as NodeId)
            .filter(|&u| arg.nodes[u as usize].flags == node_flags::REVERSION_PUSH)
            .collect();
        assert_eq!(push_nodes.len(), 1);
        assert_eq!(arg.num_nodes(), nodes_before + 4);
        // Neither sample carries the reversion
        assert!(arg
            .mutations
            .iter()
            .all(|m| arg.sites[m.site].position != 1 || m.node == 2));
        arg.validate_tables().unwrap();
    }

    #[test]
    fn test_group_size_gate_skips() {
        let mut arg = fixture_arg();
        let nodes_before = arg.num_nodes();
        let sample = make_sample(
            "s1",
            "2020-02-13",
            HmmMatch {
                path: single_path(3),
                mutations: vec![plain_mutation(5, 1, 3)],
                likelihood_floored: false,
            },
        );
        let gates = GroupGates {
            min_group_size: 100,
            ..GroupGates::relaxed()
        };
        let summary =
            add_matching_results(&mut arg, &[sample], "2020-02-15", &gates, true).unwrap();
        assert_eq!(summary.groups_skipped, 1);
        assert_eq!(summary.groups_added, 0);
        assert!(summary.retro_records.is_empty());
        assert_eq!(arg.num_nodes(), nodes_before);
        assert!(arg.metadata().unwrap().core.retro_groups.is_empty());
    }

    #[test]
    fn test_retrospective_group_record_and_flags() {
        let mut arg = fixture_arg();
        let sample = make_sample(
            "s1",
            "2020-02-10",
            HmmMatch {
                path: single_path(3),
                mutations: vec![plain_mutation(5, 1, 3)],
                likelihood_floored: false,
            },
        );
        let summary = add_matching_results(
            &mut arg,
            &[sample],
            "2020-02-15",
            &GroupGates::relaxed(),
            true,
        )
        .unwrap();
        assert_eq!(summary.retro_records.len(), 1);
        let record = &summary.retro_records[0];
        assert_eq!(record.date_added, "2020-02-15");
        assert_eq!(record.strains, vec!["s1"]);
        assert_eq!(record.dates, vec!["2020-02-10"]);
        assert_eq!(record.num_nodes, 1);
        assert_eq!(record.num_mutations, 1);
        assert_eq!(record.num_root_mutations, 0);
        assert_eq!(record.depth, 1);
        let node = (arg.num_nodes() - 1) as NodeId;
        assert_eq!(
            arg.nodes[node as usize].flags,
            node_flags::SAMPLE | node_flags::IN_SAMPLE_GROUP | node_flags::RETROSPECTIVE_SAMPLE
        );
        let md = arg.node_metadata(node).unwrap();
        assert_eq!(md.core.date_added.as_deref(), Some("2020-02-15"));
        // The record also lands in the top-level metadata
        assert_eq!(arg.metadata().unwrap().core.retro_groups.len(), 1);
        arg.validate_tables().unwrap();
    }

    #[test]
    fn test_group_id_is_order_independent() {
        let a = compute_group_id(&["s2".to_string(), "s1".to_string()]);
        let b = compute_group_id(&["s1".to_string(), "s2".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, compute_group_id(&["s1".to_string()]));
    }

    #[test]
    fn test_recurrent_mutation_gate() {
        let mut arg = fixture_arg();
        // Position 1 is already mutated on the left parent
        let sample = make_sample(
            "s1",
            "2020-02-10",
            HmmMatch {
                path: single_path(3),
                mutations: vec![plain_mutation(1, 0, 2)],
                likelihood_floored: false,
            },
        );
        let gates = GroupGates {
            max_recurrent_mutations: Some(0),
            ..GroupGates::relaxed()
        };
        let summary =
            add_matching_results(&mut arg, &[sample], "2020-02-15", &gates, true).unwrap();
        assert_eq!(summary.groups_skipped, 1);
    }
}
