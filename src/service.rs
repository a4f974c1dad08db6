//! Service facade over the context manager, engine and pipeline.
//!
//! [`HeService`] wires one [`ContextManager`], one [`CiphertextStore`], the
//! [`ComputeEngine`] and the [`DocumentPipeline`] together. Each service owns
//! a single shared context; independent services are fully isolated.
//!
//! # Example
//!
//! ```
//! use hedoc::params::HeConfig;
//! use hedoc::pipeline::PipelineConfig;
//! use hedoc::service::{ComputeOp, HeService};
//!
//! let service = HeService::new(PipelineConfig::default()).unwrap();
//! service.initialize(HeConfig { seed: Some(1), ..HeConfig::insecure_test(256) }).unwrap();
//!
//! let a = service.encrypt_value(2.5).unwrap();
//! let b = service.encrypt_value(4.0).unwrap();
//! let sum = service.compute(&ComputeOp::Add, &[a, b]).unwrap();
//! assert!((service.decrypt_value(&sum).unwrap() - 6.5).abs() < 1e-6);
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::{Context, ContextId, ContextManager};
use crate::engine::ComputeEngine;
use crate::error::{HeError, Result};
use crate::params::{HeConfig, SecurityLevel};
use crate::pipeline::{DocumentPipeline, JobId, JobObserver, JobSnapshot, PipelineConfig};
use crate::store::{CiphertextStore, EntryStats, Handle};

/// Operation requested through [`HeService::compute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ComputeOp {
    Add,
    Subtract,
    Negate,
    /// Multiply, relinearize and rescale
    Multiply,
    /// Tensor product only; the result has size 3
    MultiplyRaw,
    MultiplyPlain { values: Vec<f64> },
    Relinearize,
    Rescale,
    Rotate { steps: i64 },
    Sum,
    Product,
    SlotTotal { width: usize },
    InnerProduct { weights: Vec<f64> },
}

/// Public description of the live context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub id: ContextId,
    pub poly_degree: usize,
    pub slot_count: usize,
    pub max_level: usize,
    pub scale_bits: u32,
    pub coeff_modulus_bits: Vec<u32>,
    pub security_level: SecurityLevel,
    pub max_value: f64,
    pub precision: f64,
}

impl From<&Context> for ContextSummary {
    fn from(ctx: &Context) -> Self {
        let config = ctx.config();
        Self {
            id: ctx.id(),
            poly_degree: config.poly_degree,
            slot_count: ctx.slot_count(),
            max_level: ctx.max_level(),
            scale_bits: config.scale_bits,
            coeff_modulus_bits: config.coeff_modulus_bits.clone(),
            security_level: config.security_level,
            max_value: ctx.codec().max_value(),
            precision: ctx.codec().precision(),
        }
    }
}

/// HE context lifecycle, compute and document processing behind one type.
pub struct HeService {
    manager: Arc<ContextManager>,
    engine: Arc<ComputeEngine>,
    pipeline: DocumentPipeline,
}

impl HeService {
    pub fn new(pipeline: PipelineConfig) -> Result<Self> {
        let (manager, engine) = Self::core();
        let pipeline = DocumentPipeline::new(pipeline, Arc::clone(&engine))?;
        Ok(Self {
            manager,
            engine,
            pipeline,
        })
    }

    /// Service whose pipeline reports progress to `observer`.
    pub fn with_observer(pipeline: PipelineConfig, observer: Arc<dyn JobObserver>) -> Result<Self> {
        let (manager, engine) = Self::core();
        let pipeline = DocumentPipeline::with_observer(pipeline, Arc::clone(&engine), observer)?;
        Ok(Self {
            manager,
            engine,
            pipeline,
        })
    }

    fn core() -> (Arc<ContextManager>, Arc<ComputeEngine>) {
        let store = Arc::new(CiphertextStore::new());
        let manager = Arc::new(ContextManager::new(store));
        let engine = Arc::new(ComputeEngine::new(Arc::clone(&manager)));
        (manager, engine)
    }

    pub fn store(&self) -> &Arc<CiphertextStore> {
        self.manager.store()
    }

    pub fn pipeline(&self) -> &DocumentPipeline {
        &self.pipeline
    }

    /// Build the context, checking the chain covers the pipeline's depth.
    pub fn initialize(&self, config: HeConfig) -> Result<ContextSummary> {
        let ctx = self.manager.initialize(config, self.pipeline.required_depth())?;
        Ok(ContextSummary::from(ctx.as_ref()))
    }

    /// Replace the context: drain the pipeline, install the new context and
    /// resume. A failed build keeps the old context.
    pub fn reinitialize(&self, config: HeConfig) -> Result<ContextSummary> {
        self.pipeline.drain();
        let result = self.initialize(config);
        self.pipeline.resume();
        if let Ok(summary) = &result {
            info!(context = %summary.id, "re-initialized HE service");
        }
        result
    }

    /// Drop the context; every outstanding handle becomes stale.
    pub fn teardown(&self) {
        self.manager.teardown();
    }

    pub fn is_initialized(&self) -> bool {
        self.manager.is_initialized()
    }

    pub fn context_summary(&self) -> Result<ContextSummary> {
        Ok(ContextSummary::from(self.manager.current()?.as_ref()))
    }

    pub fn encrypt(&self, values: &[f64]) -> Result<Handle> {
        self.engine.encrypt(values)
    }

    /// Encrypt a single value into slot 0.
    pub fn encrypt_value(&self, value: f64) -> Result<Handle> {
        self.engine.encrypt(&[value])
    }

    pub fn decrypt(&self, handle: &Handle) -> Result<Vec<f64>> {
        self.engine.decrypt(handle)
    }

    pub fn decrypt_prefix(&self, handle: &Handle, len: usize) -> Result<Vec<f64>> {
        self.engine.decrypt_prefix(handle, len)
    }

    /// Slot 0 of `handle`.
    pub fn decrypt_value(&self, handle: &Handle) -> Result<f64> {
        self.engine
            .decrypt_prefix(handle, 1)?
            .first()
            .copied()
            .ok_or_else(|| HeError::Internal("decryption produced no slots".into()))
    }

    pub fn stats(&self, handle: &Handle) -> Result<EntryStats> {
        self.engine.stats(handle)
    }

    pub fn release(&self, handle: &Handle) -> Result<()> {
        self.engine.release(handle)
    }

    /// Run `op` on `handles` and return the result handle.
    pub fn compute(&self, op: &ComputeOp, handles: &[Handle]) -> Result<Handle> {
        let e = &self.engine;
        match op {
            ComputeOp::Add => with_two(op, handles, |a, b| e.add(a, b)),
            ComputeOp::Subtract => with_two(op, handles, |a, b| e.subtract(a, b)),
            ComputeOp::Multiply => with_two(op, handles, |a, b| e.multiply_relin_rescale(a, b)),
            ComputeOp::MultiplyRaw => with_two(op, handles, |a, b| e.multiply(a, b)),
            ComputeOp::Negate => with_one(op, handles, |a| e.negate(a)),
            ComputeOp::MultiplyPlain { values } => with_one(op, handles, |a| e.multiply_plain(a, values)),
            ComputeOp::Relinearize => with_one(op, handles, |a| e.relinearize(a)),
            ComputeOp::Rescale => with_one(op, handles, |a| e.rescale(a)),
            ComputeOp::Rotate { steps } => with_one(op, handles, |a| e.rotate(a, *steps)),
            ComputeOp::SlotTotal { width } => with_one(op, handles, |a| e.slot_total(a, *width)),
            ComputeOp::InnerProduct { weights } => with_one(op, handles, |a| e.inner_product(a, weights)),
            ComputeOp::Sum => e.encrypted_sum(handles),
            ComputeOp::Product => e.encrypted_product(handles),
        }
    }

    pub fn submit_document(&self, document: Vec<u8>) -> Result<JobId> {
        self.pipeline.submit(document)
    }

    pub fn get_job(&self, id: &JobId) -> Result<JobSnapshot> {
        self.pipeline.get(id)
    }

    pub fn cancel_job(&self, id: &JobId) -> Result<()> {
        self.pipeline.cancel(id)
    }

    /// Drop a finished job once its result has been collected.
    pub fn forget_job(&self, id: &JobId) -> Result<()> {
        self.pipeline.forget(id)
    }

    pub fn wait_job(&self, id: &JobId, timeout: Duration) -> Result<JobSnapshot> {
        self.pipeline.wait(id, timeout)
    }
}

fn arity_error(op: &ComputeOp, want: usize, got: usize) -> HeError {
    HeError::InvalidArgument(format!("{:?} takes {} handle(s), got {}", op, want, got))
}

fn with_one<F>(op: &ComputeOp, handles: &[Handle], f: F) -> Result<Handle>
where
    F: FnOnce(&Handle) -> Result<Handle>,
{
    match handles {
        [a] => f(a),
        _ => Err(arity_error(op, 1, handles.len())),
    }
}

fn with_two<F>(op: &ComputeOp, handles: &[Handle], f: F) -> Result<Handle>
where
    F: FnOnce(&Handle, &Handle) -> Result<Handle>,
{
    match handles {
        [a, b] => f(a, b),
        _ => Err(arity_error(op, 2, handles.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> HeService {
        let service = HeService::new(PipelineConfig::default()).unwrap();
        service
            .initialize(HeConfig {
                seed: Some(4),
                ..HeConfig::insecure_test(256)
            })
            .unwrap();
        service
    }

    #[test]
    fn test_uninitialized_service() {
        let service = HeService::new(PipelineConfig::default()).unwrap();
        let err = service.encrypt_value(1.0).unwrap_err();
        assert!(matches!(err, HeError::NotInitialized));
        assert_eq!(err.status_code(), 409);
        assert!(service.submit_document(b"x".to_vec()).is_err());
    }

    #[test]
    fn test_single_value_flow() {
        let s = service();
        let a = s.encrypt_value(3.0).unwrap();
        let b = s.encrypt_value(1.25).unwrap();

        let diff = s.compute(&ComputeOp::Subtract, &[a, b]).unwrap();
        assert!((s.decrypt_value(&diff).unwrap() - 1.75).abs() < 1e-6);

        let prod = s.compute(&ComputeOp::Multiply, &[a, b]).unwrap();
        assert_eq!(s.stats(&prod).unwrap().size, 2);
        assert!((s.decrypt_value(&prod).unwrap() - 3.75).abs() < 1e-4);
    }

    #[test]
    fn test_arity_checked() {
        let s = service();
        let a = s.encrypt_value(1.0).unwrap();
        let err = s.compute(&ComputeOp::Add, &[a]).unwrap_err();
        assert!(matches!(err, HeError::InvalidArgument(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_compute_op_json() {
        let op: ComputeOp = serde_json::from_str(r#"{"op": "rotate", "steps": -3}"#).unwrap();
        assert_eq!(op, ComputeOp::Rotate { steps: -3 });
        let op: ComputeOp = serde_json::from_str(r#"{"op": "multiply_raw"}"#).unwrap();
        assert_eq!(op, ComputeOp::MultiplyRaw);
    }

    #[test]
    fn test_summary() {
        let s = service();
        let summary = s.context_summary().unwrap();
        assert_eq!(summary.slot_count, 128);
        assert_eq!(summary.max_level, 2);
        assert_eq!(summary.security_level, SecurityLevel::None);
    }
}
