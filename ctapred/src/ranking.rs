//! Top-k target ranking.
//!
//! A query's match records are joined against the CTA dataset to find the targets each matched
//! reference compound evidences. Per target, the k highest similarities are averaged and the
//! targets are ordered by that score, then by how many compounds support it, then by id.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::Serialize;

use crate::cta::CtaDataset;
use crate::data::MatchRecord;
use crate::error::{Error, Result};
use crate::fingerprint::FingerprintSpec;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTarget {
    pub target_id: String,
    pub score: f64,
    pub supporting_compound_count: usize,
}

/// reference compound -> targets, for one fingerprint spec of a CTA dataset.
#[derive(Debug, Clone, Default)]
pub struct TargetIndex {
    spec: Option<FingerprintSpec>,
    targets: HashMap<String, BTreeSet<String>>,
}

impl TargetIndex {

    pub fn from_dataset(dataset: &CtaDataset, spec: &FingerprintSpec) -> Self {

        return Self {
            spec: Some(*spec),
            targets: dataset.targets_by_reference(spec),
        }
    }

    pub fn spec(&self) -> Option<&FingerprintSpec> {
        self.spec.as_ref()
    }

    pub fn targets_of(&self, reference_compound_id: &str) -> Option<&BTreeSet<String>> {
        self.targets.get(reference_compound_id)
    }

    pub fn contains(&self, reference_compound_id: &str) -> bool {
        self.targets.contains_key(reference_compound_id)
    }

    pub fn num_references(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

pub fn validate_k(k: usize) -> Result<usize> {

    match k {
        0 => Err(Error::Parameter("k must be at least 1".to_string())),
        k => Ok(k),
    }
}

fn compare_ranked(a: &RankedTarget, b: &RankedTarget) -> Ordering {

    b.score
        .total_cmp(&a.score)
        .then_with(|| b.supporting_compound_count.cmp(&a.supporting_compound_count))
        .then_with(|| a.target_id.cmp(&b.target_id))
}

/// Ranks targets for a single query compound.
///
/// `matches` must all belong to the same query compound. No matches means an empty ranking. A
/// target with fewer than `k` supporting compounds is scored on what it has.
pub fn rank(matches: &[MatchRecord], index: &TargetIndex, k: usize) -> Result<Vec<RankedTarget>> {

    let k = validate_k(k)?;

    if let Some(first) = matches.first() {
        if let Some(other) = matches.iter().find(|m| m.query_compound_id != first.query_compound_id) {
            return Err(Error::Parameter(format!(
                "rank expects matches of a single query compound, got {} and {}",
                first.query_compound_id, other.query_compound_id
            )));
        }
    }

    // target -> reference compound -> best similarity
    let mut evidence: HashMap<&str, HashMap<&str, f64>> = HashMap::new();

    for record in matches {
        let targets = match index.targets_of(&record.reference_compound_id) {
            Some(t) => t,
            None => continue,
        };
        for target in targets {
            let best = evidence
                .entry(target.as_str())
                .or_default()
                .entry(record.reference_compound_id.as_str())
                .or_insert(record.tanimoto);
            if record.tanimoto > *best {
                *best = record.tanimoto;
            }
        }
    }

    let mut ranked: Vec<RankedTarget> = evidence
        .into_iter()
        .map(|(target_id, by_reference)| {
            let mut values: Vec<f64> = by_reference.into_values().collect();
            values.sort_by(|a, b| b.total_cmp(a));
            values.truncate(k);

            let score = values.iter().sum::<f64>() / values.len() as f64;

            RankedTarget {
                target_id: target_id.to_string(),
                score,
                supporting_compound_count: values.len(),
            }
        })
        .collect();

    ranked.sort_by(compare_ranked);

    return Ok(ranked);
}

/// Ranks every query compound found in `matches`, keyed by query id.
pub fn rank_all(matches: &[MatchRecord], index: &TargetIndex, k: usize) -> Result<BTreeMap<String, Vec<RankedTarget>>> {

    validate_k(k)?;

    let mut by_query: BTreeMap<&str, Vec<MatchRecord>> = BTreeMap::new();
    for record in matches {
        by_query.entry(record.query_compound_id.as_str()).or_default().push(record.clone());
    }

    let mut rankings: BTreeMap<String, Vec<RankedTarget>> = BTreeMap::new();
    for (query_id, records) in by_query {
        let ranked = rank(&records, index, k)?;
        if !ranked.is_empty() {
            rankings.insert(query_id.to_string(), ranked);
        }
    }

    return Ok(rankings);
}

#[derive(Debug, Serialize)]
struct RankedRow<'a> {
    np_id: &'a str,
    rank: usize,
    target_id: &'a str,
    score: f64,
    supporting_compound_count: usize,
}

/// Writes rankings as CSV: `np_id,rank,target_id,score,supporting_compound_count`.
pub fn write_rankings(path: &Path, rankings: &BTreeMap<String, Vec<RankedTarget>>) -> Result<()> {

    // header even when nothing was ranked
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(["np_id", "rank", "target_id", "score", "supporting_compound_count"])?;

    for (np_id, ranked) in rankings {
        for (i, target) in ranked.iter().enumerate() {
            writer.serialize(RankedRow {
                np_id,
                rank: i + 1,
                target_id: &target.target_id,
                score: target.score,
                supporting_compound_count: target.supporting_compound_count,
            })?;
        }
    }

    writer.flush()?;
    Ok(())
}

pub fn rankings_to_json(rankings: &BTreeMap<String, Vec<RankedTarget>>) -> Result<String> {
    Ok(serde_json::to_string_pretty(rankings)?)
}
