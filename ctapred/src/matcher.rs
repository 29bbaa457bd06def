//! Exhaustive pairwise Tanimoto matching between a reference set and a query set.
//!
//! The larger of the two sets is cut into contiguous ranges, one per worker, and every worker
//! compares its slice against the whole of the other set. A [`MatchRecord`] is emitted for every
//! pair at or above the threshold. The set of records does not depend on the worker count.

use log::{info, warn};

use crate::data::{Compound, Fingerprinter, MatchRecord};
use crate::error::{Error, Result};
use crate::fingerprint::{similarity, Fingerprint, FingerprintSpec};
use crate::pool::{CancelToken, WorkerPool};

pub const MIN_TC: f64 = 0.1;
pub const MAX_TC: f64 = 1.0;

pub fn validate_tc(tc: f64) -> Result<f64> {

    match (MIN_TC..=MAX_TC).contains(&tc) {
        true => Ok(tc),
        false => Err(Error::Parameter(format!("Tc must be within [{}, {}], got {}", MIN_TC, MAX_TC, tc))),
    }
}

/// Result of one matching job.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub records: Vec<MatchRecord>,
    pub skipped_reference: usize,
    pub skipped_query: usize,
    pub comparisons: u64,
}

/// A compound that made it through fingerprinting.
struct Fingerprinted<'a> {
    id: &'a str,
    fingerprint: Fingerprint,
}

pub struct Matcher<'f, F: Fingerprinter> {
    fingerprinter: &'f F,
    spec: FingerprintSpec,
    tc: f64,
    pool: WorkerPool,
    verbose: bool,
    cancel: Option<CancelToken>,
}

impl<'f, F: Fingerprinter> Matcher<'f, F> {

    pub fn new(fingerprinter: &'f F, spec: FingerprintSpec, tc: f64, workers: usize) -> Result<Self> {

        let tc = validate_tc(tc)?;
        let pool = WorkerPool::new(workers)?;

        return Ok(Self {
            fingerprinter,
            spec,
            tc,
            pool,
            verbose: false,
            cancel: None,
        });
    }

    /// Report every skipped compound individually instead of only a count.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn spec(&self) -> &FingerprintSpec {
        &self.spec
    }

    pub fn tc(&self) -> f64 {
        self.tc
    }

    pub fn workers(&self) -> usize {
        self.pool.workers()
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }

    /// Fingerprints a library, skipping compounds whose fingerprint cannot be produced.
    fn fingerprint_all<'a, C: AsRef<Compound> + Sync>(&self, compounds: &'a [C], label: &str) -> Result<(Vec<Fingerprinted<'a>>, usize)> {

        let parts = self.pool.map_partitions(compounds.len(), |range| {
            let mut done: Vec<Fingerprinted<'a>> = Vec::with_capacity(range.len());
            let mut skipped: Vec<(String, String)> = Vec::new();

            for compound in compounds[range].iter().map(|c| c.as_ref()) {
                match self.fingerprinter.fingerprint(compound, &self.spec) {
                    Ok(fingerprint) => {
                        if fingerprint.spec() != &self.spec {
                            return Err(Error::IncompatibleFingerprint {
                                left: self.spec.to_string(),
                                right: fingerprint.spec().to_string(),
                            });
                        }
                        done.push(Fingerprinted { id: compound.id.as_str(), fingerprint });
                    },
                    Err(e) if e.is_recoverable() => skipped.push((compound.id.clone(), e.to_string())),
                    Err(e) => return Err(e),
                }
            }

            Ok((done, skipped))
        })?;

        let mut fingerprinted: Vec<Fingerprinted<'a>> = Vec::with_capacity(compounds.len());
        let mut skipped_count = 0;

        for (done, skipped) in parts {
            fingerprinted.extend(done);
            skipped_count += skipped.len();
            if self.verbose {
                for (id, reason) in skipped {
                    warn!("skipping {} compound {}: {}", label, id, reason);
                }
            }
        }

        if skipped_count > 0 {
            info!("{} {} compound(s) skipped: fingerprint could not be computed", skipped_count, label);
        }

        return Ok((fingerprinted, skipped_count));
    }

    /// Compares every query compound against every reference compound.
    pub fn run<R, Q>(&self, reference: &[R], query: &[Q]) -> Result<MatchOutcome>
    where
        R: AsRef<Compound> + Sync,
        Q: AsRef<Compound> + Sync,
    {
        self.check_cancelled()?;

        let (reference_fps, skipped_reference) = self.fingerprint_all(reference, "reference")?;
        let (query_fps, skipped_query) = self.fingerprint_all(query, "query")?;

        self.check_cancelled()?;

        let comparisons = reference_fps.len() as u64 * query_fps.len() as u64;

        // split whichever side is larger
        let split_query = query_fps.len() >= reference_fps.len();
        let (outer, inner) = match split_query {
            true => (&query_fps, &reference_fps),
            false => (&reference_fps, &query_fps),
        };

        let parts = self.pool.map_partitions(outer.len(), |range| {
            let mut records: Vec<MatchRecord> = Vec::new();

            for a in &outer[range] {
                self.check_cancelled()?;

                for b in inner.iter() {
                    let tanimoto = similarity(&a.fingerprint, &b.fingerprint)?;
                    if tanimoto >= self.tc {
                        let (q, r) = match split_query {
                            true => (a, b),
                            false => (b, a),
                        };
                        records.push(MatchRecord {
                            query_compound_id: q.id.to_string(),
                            reference_compound_id: r.id.to_string(),
                            tanimoto,
                        });
                    }
                }
            }

            Ok(records)
        })?;

        // a job cancelled while the last partitions finished still counts as cancelled
        self.check_cancelled()?;

        let records: Vec<MatchRecord> = parts.into_iter().flatten().collect();

        return Ok(MatchOutcome {
            records,
            skipped_reference,
            skipped_query,
            comparisons,
        });
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::data::PrecomputedFingerprints;
    use crate::fingerprint::FingerprintKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn spec() -> FingerprintSpec {
        FingerprintSpec::new(FingerprintKind::Ecfp, 256, Some(2)).unwrap()
    }

    fn random_library(prefix: &str, n: usize, seed: u64) -> Vec<Compound> {

        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                let fp = Fingerprint::random(spec(), 0.3, &mut rng);
                Compound::new(&format!("{}{}", prefix, i), "C", &fp.encode())
            })
            .collect()
    }

    fn sorted(mut records: Vec<MatchRecord>) -> Vec<(String, String, u64)> {

        let mut v: Vec<_> = records
            .drain(..)
            .map(|r| (r.query_compound_id, r.reference_compound_id, r.tanimoto.to_bits()))
            .collect();
        v.sort();
        return v;
    }

    #[test]
    fn tc_bounds() {
        assert!(validate_tc(0.1).is_ok());
        assert!(validate_tc(1.0).is_ok());
        assert!(validate_tc(0.05).is_err());
        assert!(validate_tc(1.01).is_err());
        assert!(Matcher::new(&PrecomputedFingerprints, spec(), 0.0, 1).is_err());
    }

    #[test]
    fn records_do_not_depend_on_worker_count() {

        let reference = random_library("R", 40, 1);
        let query = random_library("Q", 25, 2);

        let baseline = Matcher::new(&PrecomputedFingerprints, spec(), 0.2, 1).unwrap().run(&reference, &query).unwrap();
        assert!(!baseline.records.is_empty());
        assert_eq!(baseline.comparisons, 40 * 25);

        for workers in [2, 3, 7, 64] {
            let outcome = Matcher::new(&PrecomputedFingerprints, spec(), 0.2, workers).unwrap().run(&reference, &query).unwrap();
            assert_eq!(sorted(outcome.records), sorted(baseline.records.clone()));
        }

        // and when the reference side is the larger one
        let small_query = random_library("Q", 3, 3);
        let a = Matcher::new(&PrecomputedFingerprints, spec(), 0.2, 1).unwrap().run(&reference, &small_query).unwrap();
        let b = Matcher::new(&PrecomputedFingerprints, spec(), 0.2, 5).unwrap().run(&reference, &small_query).unwrap();
        assert_eq!(sorted(a.records), sorted(b.records));
    }

    #[test]
    fn raising_tc_never_adds_records() {

        let reference = random_library("R", 30, 4);
        let query = random_library("Q", 30, 5);

        let mut last = usize::MAX;
        for tc in [0.1, 0.2, 0.3, 0.5, 0.8, 1.0] {
            let n = Matcher::new(&PrecomputedFingerprints, spec(), tc, 4).unwrap().run(&reference, &query).unwrap().records.len();
            assert!(n <= last);
            last = n;
        }
    }

    #[test]
    fn tc_one_only_matches_identical_vectors() {

        let reference = random_library("R", 10, 6);
        let mut query = random_library("Q", 10, 7);
        query.push(Compound::new("COPY", "C", &reference[3].fingerprint));

        let outcome = Matcher::new(&PrecomputedFingerprints, spec(), 1.0, 2).unwrap().run(&reference, &query).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].query_compound_id, "COPY");
        assert_eq!(outcome.records[0].reference_compound_id, "R3");
        assert_eq!(outcome.records[0].tanimoto, 1.0);
    }

    #[test]
    fn bad_structures_are_skipped_and_counted() {

        let mut reference = random_library("R", 5, 8);
        reference.push(Compound::new("BROKEN_R", "C(C", ""));
        let mut query = random_library("Q", 5, 9);
        query.push(Compound::new("BROKEN_Q1", "?", "10"));
        query.push(Compound::new("BROKEN_Q2", "?", "not a fingerprint"));

        let outcome = Matcher::new(&PrecomputedFingerprints, spec(), 0.1, 3)
            .unwrap()
            .verbose(true)
            .run(&reference, &query)
            .unwrap();

        assert_eq!(outcome.skipped_reference, 1);
        assert_eq!(outcome.skipped_query, 2);
        assert_eq!(outcome.comparisons, 25);
        assert!(outcome.records.iter().all(|r| !r.query_compound_id.starts_with("BROKEN")));
    }

    #[test]
    fn cancelled_job_returns_nothing() {

        let reference = random_library("R", 10, 10);
        let query = random_library("Q", 10, 11);

        let token = CancelToken::new();
        token.cancel();

        let result = Matcher::new(&PrecomputedFingerprints, spec(), 0.1, 2).unwrap().with_cancel(token).run(&reference, &query);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn empty_inputs() {

        let reference = random_library("R", 10, 12);
        let empty: Vec<Compound> = Vec::new();

        let outcome = Matcher::new(&PrecomputedFingerprints, spec(), 0.1, 4).unwrap().run(&reference, &empty).unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.comparisons, 0);
    }
}
