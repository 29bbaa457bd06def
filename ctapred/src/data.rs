//! Compound records, library loading and match records.
//!
//! Libraries are CSV files. Structure standardization and fingerprint generation happen upstream,
//! so every record already carries its fingerprint text; turning that text into a vector goes
//! through the [`Fingerprinter`] trait.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;

use ascii::AsciiStr;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, FingerprintSpec};
use crate::layout;

#[derive(Debug, PartialEq, Clone)]
pub struct Compound {
    pub id: String,
    pub structure: String,
    pub fingerprint: String,
}

impl Compound {

    pub fn new(id: &str, structure: &str, fingerprint: &str) -> Self {

        return Self {
            id: id.to_string(),
            structure: structure.to_string(),
            fingerprint: fingerprint.to_string(),
        }
    }
}

impl AsRef<Compound> for Compound {
    fn as_ref(&self) -> &Compound {
        self
    }
}

/// A bioactivity-annotated compound and the targets it is known to hit.
#[derive(Debug, PartialEq, Clone)]
pub struct ReferenceCompound {
    pub compound: Compound,
    pub targets: Vec<String>,
}

impl ReferenceCompound {

    pub fn new(compound: Compound, targets: Vec<String>) -> Self {

        let mut targets: Vec<String> = targets.into_iter().filter(|t| !t.is_empty()).collect();
        targets.sort();
        targets.dedup();

        return Self { compound, targets };
    }

    pub fn id(&self) -> &str {
        &self.compound.id
    }
}

impl AsRef<Compound> for ReferenceCompound {
    fn as_ref(&self) -> &Compound {
        &self.compound
    }
}

/// A query/reference pair whose similarity reached the threshold.
#[derive(Debug, PartialEq, Clone)]
pub struct MatchRecord {
    pub query_compound_id: String,
    pub reference_compound_id: String,
    pub tanimoto: f64,
}

/// Seam to the chemistry toolkit that turns a compound into a fingerprint vector.
///
/// A compound that cannot be fingerprinted must fail with `Error::Structure`; the matcher skips
/// and counts those. Any other error aborts the job.
pub trait Fingerprinter: Sync {

    fn fingerprint(&self, compound: &Compound, spec: &FingerprintSpec) -> Result<Fingerprint>;
}

/// Uses the fingerprint text carried on each record.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrecomputedFingerprints;

impl Fingerprinter for PrecomputedFingerprints {

    fn fingerprint(&self, compound: &Compound, spec: &FingerprintSpec) -> Result<Fingerprint> {
        Fingerprint::parse(*spec, &compound.fingerprint).map_err(|reason| Error::structure(&compound.id, reason))
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct ReferenceRow {
    compound_id: String,
    standardized_structure: String,
    #[serde(default)]
    target_id: Option<String>,
    #[serde(default)]
    fingerprint: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct NpRow {
    np_id: String,
    standardized_structure: String,
    #[serde(default)]
    fingerprint: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct QueryRow {
    np_id: String,
    smiles: String,
    #[serde(default)]
    fingerprint: Option<String>,
}

fn open_csv(path: &Path) -> Result<csv::Reader<File>> {

    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    return Ok(reader);
}

/// Identifiers that end up in the CTA entry table must be short ASCII strings.
fn check_id(id: &str, path: &Path) -> Result<()> {

    if AsciiStr::from_ascii(id.as_bytes()).is_err() {
        return Err(Error::Parameter(format!("{}: identifier {:?} is not ASCII", path.display(), id)));
    }
    if id.len() > layout::MAX_ID_LENGTH {
        return Err(Error::Parameter(format!("{}: identifier longer than {} bytes", path.display(), layout::MAX_ID_LENGTH)));
    }

    Ok(())
}

/// Reads a reference library. Rows sharing a `compound_id` are folded into one compound with
/// all of their targets.
pub fn read_reference_library(path: &Path) -> Result<Vec<ReferenceCompound>> {

    let mut reader = open_csv(path)?;

    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, (Compound, Vec<String>)> = HashMap::new();

    for row in reader.deserialize() {
        let row: ReferenceRow = row?;
        check_id(&row.compound_id, path)?;
        if let Some(target_id) = &row.target_id {
            check_id(target_id, path)?;
        }
        let fingerprint = row.fingerprint.unwrap_or_default();

        match by_id.get_mut(&row.compound_id) {
            Some((compound, targets)) => {
                if compound.fingerprint != fingerprint {
                    debug!("compound {} listed with differing fingerprints, keeping the first", row.compound_id);
                }
                targets.extend(row.target_id);
            },
            None => {
                order.push(row.compound_id.clone());
                let compound = Compound::new(&row.compound_id, &row.standardized_structure, &fingerprint);
                by_id.insert(row.compound_id, (compound, row.target_id.into_iter().collect()));
            },
        }
    }

    let library = order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .map(|(compound, targets)| ReferenceCompound::new(compound, targets))
        .collect();

    return Ok(library);
}

/// Reads a natural-product library (`np_id,standardized_structure,fingerprint`).
pub fn read_np_library(path: &Path) -> Result<Vec<Compound>> {

    let mut reader = open_csv(path)?;
    let mut compounds: Vec<Compound> = Vec::new();

    for row in reader.deserialize() {
        let row: NpRow = row?;
        check_id(&row.np_id, path)?;
        compounds.push(Compound::new(&row.np_id, &row.standardized_structure, &row.fingerprint.unwrap_or_default()));
    }

    return Ok(dedup_compounds(compounds, path));
}

/// Reads one query batch (`np_id,smiles,fingerprint`).
pub fn read_query_batch(path: &Path) -> Result<Vec<Compound>> {

    let mut reader = open_csv(path)?;
    let mut compounds: Vec<Compound> = Vec::new();

    for row in reader.deserialize() {
        let row: QueryRow = row?;
        compounds.push(Compound::new(&row.np_id, &row.smiles, &row.fingerprint.unwrap_or_default()));
    }

    return Ok(dedup_compounds(compounds, path));
}

/// Keeps the first record for every id.
fn dedup_compounds(compounds: Vec<Compound>, path: &Path) -> Vec<Compound> {

    let mut seen: HashSet<String> = HashSet::with_capacity(compounds.len());
    let mut kept: Vec<Compound> = Vec::with_capacity(compounds.len());

    for compound in compounds {
        match seen.insert(compound.id.clone()) {
            true => kept.push(compound),
            false => warn!("duplicate compound id {} in {}, keeping the first", compound.id, path.display()),
        }
    }

    return kept;
}

pub fn write_reference_library(path: &Path, library: &[ReferenceCompound]) -> Result<()> {

    let mut writer = csv::Writer::from_path(path)?;

    for reference in library {
        let rows: Vec<Option<String>> = match reference.targets.is_empty() {
            true => vec![None],
            false => reference.targets.iter().cloned().map(Some).collect(),
        };
        for target_id in rows {
            writer.serialize(ReferenceRow {
                compound_id: reference.compound.id.clone(),
                standardized_structure: reference.compound.structure.clone(),
                target_id,
                fingerprint: Some(reference.compound.fingerprint.clone()),
            })?;
        }
    }

    writer.flush()?;
    Ok(())
}

pub fn write_np_library(path: &Path, library: &[Compound]) -> Result<()> {

    let mut writer = csv::Writer::from_path(path)?;

    for compound in library {
        writer.serialize(NpRow {
            np_id: compound.id.clone(),
            standardized_structure: compound.structure.clone(),
            fingerprint: Some(compound.fingerprint.clone()),
        })?;
    }

    writer.flush()?;
    Ok(())
}

pub fn write_query_batch(path: &Path, batch: &[Compound]) -> Result<()> {

    let mut writer = csv::Writer::from_path(path)?;

    for compound in batch {
        writer.serialize(QueryRow {
            np_id: compound.id.clone(),
            smiles: compound.structure.clone(),
            fingerprint: Some(compound.fingerprint.clone()),
        })?;
    }

    writer.flush()?;
    Ok(())
}
