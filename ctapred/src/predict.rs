//! Target prediction for batches of query compounds against a built CTA dataset.

use std::collections::BTreeMap;

use log::info;

use crate::cta::CtaDataset;
use crate::data::{Compound, Fingerprinter, ReferenceCompound};
use crate::error::{Error, Result};
use crate::fingerprint::FingerprintSpec;
use crate::matcher::Matcher;
use crate::pool::CancelToken;
use crate::ranking::{rank_all, validate_k, RankedTarget, TargetIndex};

/// Rankings per k value, each keyed by query compound id.
#[derive(Debug, Clone, Default)]
pub struct Prediction {
    pub rankings: BTreeMap<usize, BTreeMap<String, Vec<RankedTarget>>>,
    pub queries: usize,
    pub skipped_query: usize,
    pub matches: usize,
}

pub struct Predictor<'f, F: Fingerprinter> {
    matcher: Matcher<'f, F>,
    index: TargetIndex,
    members: Vec<ReferenceCompound>,
}

impl<'f, F: Fingerprinter> Predictor<'f, F> {

    /// Keeps the part of `dataset` built under `spec` and the reference compounds that take part
    /// in it. A dataset with nothing for `spec` cannot predict anything and is refused.
    pub fn new(fingerprinter: &'f F, dataset: &CtaDataset, reference: Vec<ReferenceCompound>, spec: FingerprintSpec, tc: f64, workers: usize) -> Result<Self> {

        let matcher = Matcher::new(fingerprinter, spec, tc, workers)?;

        let index = TargetIndex::from_dataset(dataset, &spec);
        if index.is_empty() {
            return Err(Error::DatasetIo(format!("CTA dataset has no entries for {}", spec)));
        }

        let library_size = reference.len();
        let members: Vec<ReferenceCompound> = reference.into_iter().filter(|r| index.contains(r.id())).collect();

        if members.is_empty() {
            return Err(Error::DatasetIo(format!(
                "none of the {} compounds in the CTA dataset were found in the reference library",
                index.num_references()
            )));
        }
        if members.len() < index.num_references() {
            info!(
                "{} of {} CTA reference compounds missing from the reference library",
                index.num_references() - members.len(),
                index.num_references()
            );
        }

        info!("{} of {} reference compounds take part in prediction", members.len(), library_size);

        return Ok(Self { matcher, index, members });
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

    pub fn num_members(&self) -> usize {
        self.members.len()
    }

    /// Matches `queries` once and ranks the result for every k in `ks`.
    pub fn predict(&self, queries: &[Compound], ks: &[usize]) -> Result<Prediction> {

        for k in ks {
            validate_k(*k)?;
        }

        let outcome = self.matcher.run(&self.members, queries)?;

        let mut rankings = BTreeMap::new();
        for k in ks {
            rankings.insert(*k, rank_all(&outcome.records, &self.index, *k)?);
        }

        return Ok(Prediction {
            rankings,
            queries: queries.len(),
            skipped_query: outcome.skipped_query,
            matches: outcome.records.len(),
        });
    }
}

/// `<list>_using_dataset_id_<id>_include_with_k_value_of_<k>.csv`
pub fn ranking_filename(list_name: &str, dataset_id: usize, k: usize) -> String {
    format!("{}_using_dataset_id_{}_include_with_k_value_of_{}.csv", list_name, dataset_id, k)
}

/// The N of a `QueryList<N>_smiles.csv` file name.
pub fn query_list_number(file_name: &str) -> Option<u64> {

    file_name
        .strip_prefix("QueryList")?
        .strip_suffix("_smiles.csv")?
        .parse::<u64>()
        .ok()
}

/// The list name used in output files: the file name without `_smiles.csv`, so that
/// `QueryList01` and `QueryList1` stay apart.
pub fn query_list_name(file_name: &str) -> Option<&str> {

    query_list_number(file_name)?;
    file_name.strip_suffix("_smiles.csv")
}
