//! hedoc: homomorphic-encryption context management and encrypted document
//! processing.
//!
//! Key components:
//! - Context manager: validated CKKS parameters, prime chain, key lifecycle
//! - Ciphertext store: leased handles tied to a context generation
//! - Compute engine: homomorphic primitives and balanced reduction trees
//! - Document pipeline: chunk → encrypt → compute → decrypt jobs
//!
//! Everything above [`math`] and [`ckks`] treats those two modules as the
//! HE backend.

pub mod ckks;
pub mod codec;
pub mod context;
pub mod engine;
pub mod error;
pub mod keys;
pub mod math;
pub mod params;
pub mod pipeline;
pub mod service;
pub mod store;

pub use context::{Context, ContextId, ContextManager};
pub use engine::ComputeEngine;
pub use error::{ErrorClass, HeError, Result};
pub use params::{HeConfig, SecurityLevel};
pub use pipeline::{DocumentPipeline, DocumentReport, JobId, JobSnapshot, JobState, PipelineConfig};
pub use service::{ComputeOp, ContextSummary, HeService};
pub use store::{CiphertextStore, EntryStats, Handle};
