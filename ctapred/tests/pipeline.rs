use std::fs;
use std::path::Path;

use assert_approx_eq::assert_approx_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ctapred::cta::{BuildReport, CtaBuilder, CtaDataset};
use ctapred::data::{self, Compound, PrecomputedFingerprints, ReferenceCompound};
use ctapred::fingerprint::{Fingerprint, FingerprintKind, FingerprintSpec};
use ctapred::io::{BuildRecord, CtaStore};
use ctapred::predict::Predictor;

fn spec() -> FingerprintSpec {
    FingerprintSpec::new(FingerprintKind::Ecfp, 128, Some(2)).unwrap()
}

/// Reference compounds come in families sharing a core, so that NPs drawn near a core match them.
fn libraries(seed: u64) -> (Vec<ReferenceCompound>, Vec<Compound>) {

    let mut rng = StdRng::seed_from_u64(seed);
    let cores: Vec<Fingerprint> = (0..6).map(|_| Fingerprint::random(spec(), 0.25, &mut rng)).collect();

    let perturb = |core: &Fingerprint, rng: &mut StdRng| -> String {
        let mut text: Vec<char> = core.encode().chars().collect();
        for _ in 0..4 {
            let i = rng.gen_range(0..text.len());
            text[i] = if text[i] == '1' { '0' } else { '1' };
        }
        text.into_iter().collect()
    };

    let mut reference = Vec::new();
    for (c, core) in cores.iter().enumerate() {
        for j in 0..5 {
            let id = format!("CHEMBL{}{}", c, j);
            let targets = vec![format!("TARGET{}", c), format!("TARGET{}", (c + j) % 6)];
            reference.push(ReferenceCompound::new(Compound::new(&id, "C", &perturb(core, &mut rng)), targets));
        }
    }

    let mut np = Vec::new();
    for i in 0..30 {
        let core = &cores[i % cores.len()];
        np.push(Compound::new(&format!("CNP{:04}", i), "C", &perturb(core, &mut rng)));
    }

    return (reference, np);
}

fn build(reference: &[ReferenceCompound], np: &[Compound], tc: f64, workers: usize, existing: Option<CtaDataset>) -> CtaDataset {

    CtaBuilder::new(&PrecomputedFingerprints, spec(), tc, workers)
        .unwrap()
        .build(reference, np, existing)
        .unwrap()
        .0
}

fn save(store: &CtaStore, dataset: &CtaDataset, tc: f64) {

    let build = store.read_meta().unwrap().next_build_number();
    let report = BuildReport::default();
    store.save(dataset, BuildRecord::from_report(build, spec(), tc, None, 2, &report)).unwrap();
}

#[test]
fn build_persist_reload_predict() {

    let dir = tempfile::tempdir().unwrap();
    let (reference, np) = libraries(1);

    // go through the csv readers like the binaries do
    let reference_path = dir.path().join("reference.csv");
    let np_path = dir.path().join("np.csv");
    data::write_reference_library(&reference_path, &reference).unwrap();
    data::write_np_library(&np_path, &np).unwrap();
    let reference = data::read_reference_library(&reference_path).unwrap();
    let np = data::read_np_library(&np_path).unwrap();

    let dataset = build(&reference, &np, 0.6, 4, None);
    assert!(!dataset.is_empty());

    let store = CtaStore::create(dir.path().join("cta")).unwrap();
    save(&store, &dataset, 0.6);

    let reloaded = CtaStore::open(dir.path().join("cta")).unwrap().load().unwrap();
    assert_eq!(reloaded, dataset);

    // an NP from the library must rank the targets it was linked to
    let query = np[0].clone();
    let predictor = Predictor::new(&PrecomputedFingerprints, &reloaded, reference.clone(), spec(), 0.1, 3).unwrap();
    let prediction = predictor.predict(&[query.clone()], &[1, 3]).unwrap();

    let top = &prediction.rankings[&1][&query.id];
    assert!(!top.is_empty());
    for pair in top.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert!(top.iter().all(|t| t.score > 0.0 && t.score <= 1.0));
}

#[test]
fn rebuild_is_idempotent() {

    let (reference, np) = libraries(2);

    let first = build(&reference, &np, 0.7, 2, None);
    let second = build(&reference, &np, 0.7, 5, Some(first.clone()));
    assert_eq!(first, second);
}

#[test]
fn stricter_rebuild_keeps_older_entries() {

    let (reference, np) = libraries(3);

    let loose = build(&reference, &np, 0.6, 3, None);
    let strict = build(&reference, &np, 0.8, 3, None);
    let merged = build(&reference, &np, 0.8, 3, Some(loose.clone()));

    // nothing is lost and nothing is duplicated
    assert_eq!(merged.len(), loose.len());
    for entry in strict.iter() {
        assert_approx_eq!(merged.get(&entry.key()).unwrap(), entry.tanimoto);
    }
    for entry in loose.iter() {
        assert!(merged.get(&entry.key()).is_some());
    }
}

#[test]
fn stored_bytes_do_not_depend_on_worker_count() {

    let dir = tempfile::tempdir().unwrap();
    let (reference, np) = libraries(4);

    let mut files: Vec<Vec<u8>> = Vec::new();
    for workers in [1, 2, 7] {
        let dataset = build(&reference, &np, 0.6, workers, None);
        let store = CtaStore::create(dir.path().join(format!("w{}", workers))).unwrap();
        save(&store, &dataset, 0.6);
        files.push(fs::read(store.entries_path()).unwrap());
    }

    assert_eq!(files[0], files[1]);
    assert_eq!(files[0], files[2]);
}

#[test]
fn rankings_do_not_depend_on_worker_count() {

    let (reference, np) = libraries(5);
    let dataset = build(&reference, &np, 0.6, 2, None);
    let queries: Vec<Compound> = np.iter().take(8).cloned().collect();

    let single = Predictor::new(&PrecomputedFingerprints, &dataset, reference.clone(), spec(), 0.1, 1)
        .unwrap()
        .predict(&queries, &[1, 2, 5])
        .unwrap();
    let many = Predictor::new(&PrecomputedFingerprints, &dataset, reference.clone(), spec(), 0.1, 6)
        .unwrap()
        .predict(&queries, &[1, 2, 5])
        .unwrap();

    assert_eq!(single.rankings, many.rankings);
}

#[test]
fn ranking_files_are_written() {

    let dir = tempfile::tempdir().unwrap();
    let (reference, np) = libraries(6);
    let dataset = build(&reference, &np, 0.6, 2, None);

    let batch_path = dir.path().join("QueryList1_smiles.csv");
    data::write_query_batch(&batch_path, &np[..5]).unwrap();
    let queries = data::read_query_batch(&batch_path).unwrap();
    assert_eq!(queries.len(), 5);

    let prediction = Predictor::new(&PrecomputedFingerprints, &dataset, reference, spec(), 0.1, 2)
        .unwrap()
        .predict(&queries, &[3])
        .unwrap();

    let out = dir.path().join(ctapred::predict::ranking_filename("QueryList1", 1, 3));
    ctapred::ranking::write_rankings(&out, &prediction.rankings[&3]).unwrap();

    let text = fs::read_to_string(&out).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("np_id,rank,target_id,score,supporting_compound_count"));
    assert!(lines.next().is_some());
    assert!(Path::new(&out).is_file());
}
