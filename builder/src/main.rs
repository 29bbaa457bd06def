use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use kdam::tqdm;
use log::{info, warn};

use ctapred::config::RunConfig;
use ctapred::cta::CtaBuilder;
use ctapred::data::{self, Compound, PrecomputedFingerprints};
use ctapred::fingerprint::FingerprintKind;
use ctapred::io::{BuildRecord, CtaStore};
use ctapred::layout;
use ctapred::logging;

#[derive(Parser, Debug)]
#[command(author, version, about = "Builds or extends a CTA dataset", long_about = None)]
struct Args {

    //Reference library csv: compound_id,standardized_structure,target_id,fingerprint
    #[arg(short, long)]
    reference: PathBuf,

    //NP library csv file(s): np_id,standardized_structure,fingerprint
    #[arg(short, long, num_args = 1.., required = true)]
    np: Vec<PathBuf>,

    //Dataset directory, created if missing
    #[arg(short, long)]
    dataset: PathBuf,

    //YAML run config; flags below override its fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    //avalon, ecfp, fcfp or maccs
    #[arg(long)]
    fingerprint: Option<FingerprintKind>,

    #[arg(long)]
    n_bits: Option<usize>,

    #[arg(long)]
    radius: Option<u32>,

    //Similarity threshold, within [0.1, 1.0]
    #[arg(long)]
    tc: Option<f64>,

    //Bioactivity cutoff (nM) the reference library was curated with
    #[arg(long)]
    sv: Option<f64>,

    //Worker count, -1 for all processing units
    #[arg(short, long, allow_negative_numbers = true)]
    workers: Option<i64>,

    //Log every skipped compound
    #[arg(short, long)]
    verbose: bool,

    //Discard the stored entries instead of merging into them
    #[arg(long)]
    fresh: bool,
}

fn run_config(args: &Args) -> Result<RunConfig> {

    let mut config = match &args.config {
        Some(path) => RunConfig::from_file(path).with_context(|| format!("reading {}", path.display()))?,
        None => RunConfig::default(),
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
    if let Some(tc) = args.tc {
        config.tc = tc;
    }
    if let Some(sv) = args.sv {
        config.sv = sv;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.verbose |= args.verbose;

    return Ok(config);
}

/// Reads every NP library file; an id seen in an earlier file wins.
fn read_np_libraries(paths: &[PathBuf]) -> Result<Vec<Compound>> {

    let mut seen: HashSet<String> = HashSet::new();
    let mut compounds: Vec<Compound> = Vec::new();

    for path in tqdm!(paths.iter()) {
        let library = data::read_np_library(path).with_context(|| format!("reading NP library {}", path.display()))?;
        for compound in library {
            match seen.insert(compound.id.clone()) {
                true => compounds.push(compound),
                false => warn!("NP compound {} appears in more than one library file, keeping the first", compound.id),
            }
        }
    }

    return Ok(compounds);
}

fn main() -> Result<()> {

    let args = Args::parse();

    logging::init(Some(&args.dataset.join("builder_log.txt")))?;
    logging::log_command_line();
    let start = Instant::now();

    let result = run(&args);
    logging::log_finish(start.elapsed(), &result.as_ref().map_err(|e| format!("{:#}", e)));

    result
}

fn run(args: &Args) -> Result<()> {

    let config = run_config(args)?;
    let params = config.validate().context("invalid parameters")?;

    let store = CtaStore::create(&args.dataset)?;
    let _lock = store.lock()?;

    let reference = data::read_reference_library(&args.reference)
        .with_context(|| format!("reading reference library {}", args.reference.display()))?;
    let np = read_np_libraries(&args.np)?;
    info!("{} reference compounds, {} NP compounds", reference.len(), np.len());

    let existing = match args.fresh {
        true => None,
        false => store.load_existing()?,
    };

    let builder = CtaBuilder::new(&PrecomputedFingerprints, params.spec, params.tc, params.workers)?.verbose(params.verbose);
    let (dataset, report) = builder.build(&reference, &np, existing)?;

    let build = store.read_meta()?.next_build_number();
    let record = BuildRecord::from_report(build, params.spec, params.tc, Some(params.sv), params.workers, &report);
    store.save(&dataset, record)?;

    config.to_file(&store.directory().join(layout::CONFIG_FILENAME))?;

    info!(
        "build {}: {} skipped reference, {} skipped NP, {} entries",
        build,
        report.skipped_reference,
        report.skipped_np,
        report.total_entries
    );

    Ok(())
}
