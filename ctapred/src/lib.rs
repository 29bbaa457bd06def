//! Similarity-based target prediction for natural products via compound-target associations.
//!
//! A CTA dataset links reference compounds with known protein targets to natural products (NPs)
//! that are structurally similar to them. It is built by exhaustive pairwise Tanimoto matching of
//! a reference library against an NP library, and grows by upsert across builds. Query compounds
//! are then matched against the reference compounds that take part in the dataset, and each
//! candidate target is scored by the mean of its k best similarities.
//!
//! Fingerprints are computed upstream by a chemistry toolkit; here they are fixed-length bit or
//! count vectors tagged with the spec (kind, nBits, radius) they were generated under.
//!
//! - [`matcher`]: parallel pairwise matching above a similarity threshold
//! - [`cta`]: the dataset and its builder
//! - [`ranking`]: top-k target ranking
//! - [`io`]: on-disk dataset store
//! - [`predict`]: query batches against a stored dataset
//!
//! TODO
//! - [ ] plug in a toolkit-backed [`data::Fingerprinter`] that computes vectors from structures
pub mod error;
pub mod fingerprint;
pub mod data;
pub mod pool;
pub mod matcher;
pub mod cta;
pub mod layout;
pub mod io;
pub mod ranking;
pub mod predict;
pub mod config;
pub mod logging;
