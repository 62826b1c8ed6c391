//! pmlsync core: portal protocol, artifact handling, normalization, publishing.
//!
//! This crate contains every stage of the PML MDA pipeline:
//! - Domain types (subsystems, canonical hours, price records)
//! - The three-round portal export exchange with VIEWSTATE threading
//! - Archive extraction and the pre-merge consistency gate
//! - Table normalization into one combined, dated price table
//! - Batched publishing to the ingestion API
//!
//! Network and ingestion endpoints sit behind the [`portal::PortalTransport`]
//! and [`publish::IngestSink`] traits so every stage can run against
//! scripted doubles.

pub mod artifact;
pub mod domain;
pub mod normalize;
pub mod portal;
pub mod publish;
