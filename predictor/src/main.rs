use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use glob::glob;
use kdam::tqdm;
use log::info;

use ctapred::config::RunConfig;
use ctapred::data::{self, PrecomputedFingerprints};
use ctapred::fingerprint::FingerprintKind;
use ctapred::io::CtaStore;
use ctapred::layout;
use ctapred::logging;
use ctapred::predict::{query_list_name, query_list_number, ranking_filename, Predictor};
use ctapred::ranking::{rankings_to_json, write_rankings};

#[derive(Parser, Debug)]
#[command(author, version, about = "Ranks likely targets for lists of query compounds", long_about = None)]
struct Args {

    //Directory holding QueryList<N>_smiles.csv files
    #[arg(short, long)]
    input_dir: PathBuf,

    //Directory for the ranking files
    #[arg(short, long)]
    output_dir: PathBuf,

    //CTA dataset directory written by the builder
    #[arg(short, long)]
    dataset: PathBuf,

    //Reference library csv the dataset was built from
    #[arg(short, long)]
    reference: PathBuf,

    //YAML run config; flags below override its fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    fingerprint: Option<FingerprintKind>,

    #[arg(long)]
    n_bits: Option<usize>,

    #[arg(long)]
    radius: Option<u32>,

    //One or more k values
    #[arg(short, long, num_args = 1..)]
    k: Vec<usize>,

    #[arg(long)]
    tc: Option<f64>,

    #[arg(short, long, allow_negative_numbers = true)]
    workers: Option<i64>,

    #[arg(short, long)]
    verbose: bool,

    //Also write each ranking as json
    #[arg(long)]
    json: bool,
}

fn run_config(args: &Args) -> Result<RunConfig> {

    let mut config = match &args.config {
        Some(path) => RunConfig::from_file(path).with_context(|| format!("reading {}", path.display()))?,
        None => RunConfig::predict_default(),
    };

    if let Some(fingerprint) = args.fingerprint {
        config.fingerprint = fingerprint;
    }
    if let Some(n_bits) = args.n_bits {
        config.n_bits = n_bits;
    }
    if args.radius.is_some() {
        config.radius = args.radius;
    }
    if !args.k.is_empty() {
        config.k = args.k.clone();
    }
    if let Some(tc) = args.tc {
        config.tc = tc;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.verbose |= args.verbose;

    return Ok(config);
}

/// Query lists in `dir` as (number, name, path), in ascending list number.
fn find_query_lists(dir: &Path) -> Result<Vec<(u64, String, PathBuf)>> {

    let pattern = dir.join("QueryList*_smiles.csv");
    let pattern = pattern.to_str().ok_or_else(|| anyhow!("non UTF-8 path {}", dir.display()))?;

    let mut lists: Vec<(u64, String, PathBuf)> = Vec::new();
    for entry in glob(pattern)? {
        let path = entry?;
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        if let (Some(n), Some(name)) = (query_list_number(&file_name), query_list_name(&file_name)) {
            lists.push((n, name.to_string(), path));
        }
    }
    lists.sort();

    return Ok(lists);
}

fn main() -> Result<()> {

    let args = Args::parse();

    fs::create_dir_all(&args.output_dir)?;
    logging::init(Some(&args.output_dir.join("predictor_log.txt")))?;
    logging::log_command_line();
    let start = Instant::now();

    let result = run(&args);
    logging::log_finish(start.elapsed(), &result.as_ref().map_err(|e| format!("{:#}", e)));

    result
}

fn run(args: &Args) -> Result<()> {

    let config = run_config(args)?;
    let params = config.validate().context("invalid parameters")?;

    let lists = find_query_lists(&args.input_dir)?;
    if lists.is_empty() {
        bail!("no QueryList<N>_smiles.csv files in {}", args.input_dir.display());
    }

    let store = CtaStore::open(&args.dataset)?;
    let dataset = store.load()?;
    let dataset_id = store
        .read_meta()?
        .latest_build_for(&params.spec)
        .map(|b| b.build)
        .ok_or_else(|| anyhow!("no build for {} recorded in {}", params.spec, store.directory().display()))?;

    let reference = data::read_reference_library(&args.reference)
        .with_context(|| format!("reading reference library {}", args.reference.display()))?;

    let predictor = Predictor::new(&PrecomputedFingerprints, &dataset, reference, params.spec, params.tc, params.workers)?
        .verbose(params.verbose);

    info!("{} query list(s), dataset id {}, k = {:?}", lists.len(), dataset_id, params.k);

    for (_, list_name, path) in tqdm!(lists.into_iter()) {

        let queries = data::read_query_batch(&path).with_context(|| format!("reading {}", path.display()))?;
        let prediction = predictor.predict(&queries, &params.k)?;

        info!(
            "{}: {} queries, {} skipped, {} matches",
            list_name, prediction.queries, prediction.skipped_query, prediction.matches
        );

        for (k, rankings) in prediction.rankings.iter() {
            let filename = args.output_dir.join(ranking_filename(&list_name, dataset_id, *k));
            write_rankings(&filename, rankings)?;

            if args.json {
                fs::write(filename.with_extension("json"), rankings_to_json(rankings)?)?;
            }
        }
    }

    config.to_file(&args.output_dir.join(layout::CONFIG_FILENAME))?;

    Ok(())
}
