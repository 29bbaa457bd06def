//! Compound-target association (CTA) dataset and its builder.
//!
//! The dataset is a map keyed by the full entry tuple (reference compound, target, NP compound,
//! fingerprint spec) holding the Tanimoto similarity. Merging a fresh build into an existing
//! dataset is an upsert where the newer similarity wins, so rebuilding never duplicates keys.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::info;
use serde::Serialize;

use crate::data::{Compound, Fingerprinter, ReferenceCompound};
use crate::error::Result;
use crate::fingerprint::FingerprintSpec;
use crate::matcher::Matcher;
use crate::pool::CancelToken;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CtaKey {
    pub reference_compound_id: String,
    pub target_id: String,
    pub np_compound_id: String,
    pub fingerprint_spec: FingerprintSpec,
}

/// One row of the CTA dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CtaEntry {
    pub reference_compound_id: String,
    pub target_id: String,
    pub np_compound_id: String,
    pub tanimoto: f64,
    pub fingerprint_spec: FingerprintSpec,
}

impl CtaEntry {

    pub fn key(&self) -> CtaKey {

        return CtaKey {
            reference_compound_id: self.reference_compound_id.clone(),
            target_id: self.target_id.clone(),
            np_compound_id: self.np_compound_id.clone(),
            fingerprint_spec: self.fingerprint_spec,
        }
    }

    fn from_pair(key: &CtaKey, tanimoto: f64) -> Self {

        return Self {
            reference_compound_id: key.reference_compound_id.clone(),
            target_id: key.target_id.clone(),
            np_compound_id: key.np_compound_id.clone(),
            tanimoto,
            fingerprint_spec: key.fingerprint_spec,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CtaDataset {
    entries: BTreeMap<CtaKey, f64>,
}

impl CtaDataset {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I: IntoIterator<Item = CtaEntry>>(entries: I) -> Self {

        let mut dataset = Self::new();
        for entry in entries {
            dataset.upsert(entry);
        }
        return dataset;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts an entry, or overwrites the stored similarity when the key already exists.
    pub fn upsert(&mut self, entry: CtaEntry) -> Upsert {

        let tanimoto = entry.tanimoto;
        match self.entries.insert(entry.key(), tanimoto) {
            None => Upsert::Inserted,
            Some(old) if old.to_bits() == tanimoto.to_bits() => Upsert::Unchanged,
            Some(_) => Upsert::Updated,
        }
    }

    /// Unions `newer` into this dataset; on key collision the value from `newer` wins.
    pub fn merge(&mut self, newer: CtaDataset) -> MergeStats {

        let mut stats = MergeStats::default();

        for (key, tanimoto) in newer.entries {
            match self.entries.insert(key, tanimoto) {
                None => stats.inserted += 1,
                Some(old) if old.to_bits() == tanimoto.to_bits() => stats.unchanged += 1,
                Some(_) => stats.updated += 1,
            }
        }

        return stats;
    }

    pub fn get(&self, key: &CtaKey) -> Option<f64> {
        self.entries.get(key).copied()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = CtaEntry> + '_ {
        self.entries.iter().map(|(key, tanimoto)| CtaEntry::from_pair(key, *tanimoto))
    }

    pub fn entries(&self) -> Vec<CtaEntry> {
        self.iter().collect()
    }

    pub fn specs(&self) -> BTreeSet<FingerprintSpec> {
        self.entries.keys().map(|k| k.fingerprint_spec).collect()
    }

    /// The entries generated under `spec` only.
    pub fn restrict(&self, spec: &FingerprintSpec) -> CtaDataset {

        let entries = self
            .entries
            .iter()
            .filter(|(k, _)| &k.fingerprint_spec == spec)
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        return CtaDataset { entries };
    }

    /// Reference compounds that take part in the dataset under `spec`.
    pub fn reference_ids(&self, spec: &FingerprintSpec) -> BTreeSet<String> {

        self.entries
            .keys()
            .filter(|k| &k.fingerprint_spec == spec)
            .map(|k| k.reference_compound_id.clone())
            .collect()
    }

    /// Targets evidenced for each reference compound under `spec`.
    pub fn targets_by_reference(&self, spec: &FingerprintSpec) -> HashMap<String, BTreeSet<String>> {

        let mut map: HashMap<String, BTreeSet<String>> = HashMap::new();

        for key in self.entries.keys().filter(|k| &k.fingerprint_spec == spec) {
            map.entry(key.reference_compound_id.clone())
                .or_default()
                .insert(key.target_id.clone());
        }

        return map;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    pub reference_compounds: usize,
    pub np_compounds: usize,
    pub skipped_reference: usize,
    pub skipped_np: usize,
    pub matches: usize,
    pub new_entries: usize,
    pub merge: MergeStats,
    pub total_entries: usize,
}

/// Builds CTA entries by matching a reference library (with targets) against an NP library.
pub struct CtaBuilder<'f, F: Fingerprinter> {
    matcher: Matcher<'f, F>,
}

impl<'f, F: Fingerprinter> CtaBuilder<'f, F> {

    pub fn new(fingerprinter: &'f F, spec: FingerprintSpec, tc: f64, workers: usize) -> Result<Self> {

        let matcher = Matcher::new(fingerprinter, spec, tc, workers)?;
        return Ok(Self { matcher });
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.matcher = self.matcher.verbose(verbose);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.matcher = self.matcher.with_cancel(token);
        self
    }

    pub fn spec(&self) -> &FingerprintSpec {
        self.matcher.spec()
    }

    /// Matches the two libraries and emits one entry per (match, target of the matched reference
    /// compound). With `existing`, the fresh entries are merged into it and newer values win.
    pub fn build(&self, reference: &[ReferenceCompound], np: &[Compound], existing: Option<CtaDataset>) -> Result<(CtaDataset, BuildReport)> {

        let spec = *self.matcher.spec();

        // only compounds with at least one target can produce entries
        let linked: Vec<&ReferenceCompound> = reference.iter().filter(|r| !r.targets.is_empty()).collect();
        let targets: HashMap<&str, &[String]> = linked.iter().map(|r| (r.id(), r.targets.as_slice())).collect();

        info!(
            "matching {} reference compounds ({} with targets) against {} NP compounds, {} Tc={} on {} worker(s)",
            reference.len(),
            linked.len(),
            np.len(),
            spec,
            self.matcher.tc(),
            self.matcher.workers()
        );

        let outcome = self.matcher.run(&linked, np)?;

        let mut fresh = CtaDataset::new();
        for record in outcome.records.iter() {
            let linked_targets = match targets.get(record.reference_compound_id.as_str()) {
                Some(t) => *t,
                None => continue,
            };
            for target_id in linked_targets {
                fresh.upsert(CtaEntry {
                    reference_compound_id: record.reference_compound_id.clone(),
                    target_id: target_id.clone(),
                    np_compound_id: record.query_compound_id.clone(),
                    tanimoto: record.tanimoto,
                    fingerprint_spec: spec,
                });
            }
        }

        let new_entries = fresh.len();

        let (dataset, merge) = match existing {
            Some(mut dataset) => {
                let stats = dataset.merge(fresh);
                (dataset, stats)
            },
            None => {
                let stats = MergeStats { inserted: new_entries, ..MergeStats::default() };
                (fresh, stats)
            },
        };

        let report = BuildReport {
            reference_compounds: reference.len(),
            np_compounds: np.len(),
            skipped_reference: outcome.skipped_reference,
            skipped_np: outcome.skipped_query,
            matches: outcome.records.len(),
            new_entries,
            merge,
            total_entries: dataset.len(),
        };

        info!(
            "{} matches -> {} entries ({} inserted, {} updated), dataset now holds {}",
            report.matches, report.new_entries, merge.inserted, merge.updated, report.total_entries
        );

        return Ok((dataset, report));
    }
}
