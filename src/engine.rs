//! Encrypted compute engine.
//!
//! Runs homomorphic operations on store handles. Primitives lease their
//! inputs, evaluate under the current context and store the result under a
//! new handle. Composed operations build balanced trees of primitives and
//! keep their intermediates in the store until they finish.
//!
//! # Composed Operations
//!
//! | operation | tree | depth |
//! |---|---|---|
//! | [`encrypted_sum`](ComputeEngine::encrypted_sum) | add | 0 |
//! | [`encrypted_product`](ComputeEngine::encrypted_product) | multiply → relinearize → rescale | ⌈log2 k⌉ |
//! | [`slot_total`](ComputeEngine::slot_total) | rotate-and-add | 0 |
//! | [`inner_product`](ComputeEngine::inner_product) | multiply_plain → rescale → slot_total | 1 |
//!
//! On success only the result handle survives. On failure after at least one
//! intermediate was stored, the error is [`HeError::Partial`] listing the
//! handles the caller must release.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::ckks::{Ciphertext, Evaluator};
use crate::context::{Context, ContextManager};
use crate::error::{HeError, Result};
use crate::store::{CiphertextStore, EntryStats, Handle};

/// Homomorphic operations over the shared store.
pub struct ComputeEngine {
    manager: Arc<ContextManager>,
    store: Arc<CiphertextStore>,
}

impl ComputeEngine {
    pub fn new(manager: Arc<ContextManager>) -> Self {
        let store = Arc::clone(manager.store());
        Self { manager, store }
    }

    pub fn manager(&self) -> &Arc<ContextManager> {
        &self.manager
    }

    pub fn store(&self) -> &Arc<CiphertextStore> {
        &self.store
    }

    /// Encrypt `values` under the current context.
    pub fn encrypt(&self, values: &[f64]) -> Result<Handle> {
        let ctx = self.manager.current()?;
        self.store.put(ctx.encrypt_values(values)?)
    }

    /// Decrypt every slot of `handle`.
    pub fn decrypt(&self, handle: &Handle) -> Result<Vec<f64>> {
        let lease = self.store.get(handle)?;
        let ctx = self.manager.current()?;
        ctx.decrypt(&lease)
    }

    /// Decrypt the first `len` slots of `handle`.
    pub fn decrypt_prefix(&self, handle: &Handle, len: usize) -> Result<Vec<f64>> {
        let mut values = self.decrypt(handle)?;
        values.truncate(len);
        Ok(values)
    }

    pub fn stats(&self, handle: &Handle) -> Result<EntryStats> {
        self.store.stats(handle)
    }

    pub fn release(&self, handle: &Handle) -> Result<()> {
        self.store.release(handle)
    }

    fn unary<F>(&self, handle: &Handle, op: F) -> Result<Handle>
    where
        F: FnOnce(&Evaluator<'_>, &Ciphertext) -> Result<Ciphertext>,
    {
        let lease = self.store.get(handle)?;
        let ctx = self.manager.current()?;
        let out = op(&ctx.evaluator(), &lease)?;
        drop(lease);
        self.store.put(out)
    }

    fn binary<F>(&self, a: &Handle, b: &Handle, op: F) -> Result<Handle>
    where
        F: FnOnce(&Evaluator<'_>, &Ciphertext, &Ciphertext) -> Result<Ciphertext>,
    {
        let lease_a = self.store.get(a)?;
        let lease_b = self.store.get(b)?;
        let ctx = self.manager.current()?;
        let out = op(&ctx.evaluator(), &lease_a, &lease_b)?;
        drop((lease_a, lease_b));
        self.store.put(out)
    }

    pub fn add(&self, a: &Handle, b: &Handle) -> Result<Handle> {
        self.binary(a, b, |ev, x, y| ev.add(x, y))
    }

    pub fn subtract(&self, a: &Handle, b: &Handle) -> Result<Handle> {
        self.binary(a, b, |ev, x, y| ev.sub(x, y))
    }

    pub fn negate(&self, a: &Handle) -> Result<Handle> {
        self.unary(a, |ev, x| ev.negate(x))
    }

    /// Raw tensor product (size 3, squared scale).
    pub fn multiply(&self, a: &Handle, b: &Handle) -> Result<Handle> {
        self.binary(a, b, |ev, x, y| ev.multiply(x, y))
    }

    /// Multiply, relinearize and rescale in one step; one level consumed.
    pub fn multiply_relin_rescale(&self, a: &Handle, b: &Handle) -> Result<Handle> {
        self.binary(a, b, |ev, x, y| {
            let product = ev.relinearize(&ev.multiply(x, y)?)?;
            ev.rescale(&product)
        })
    }

    pub fn multiply_plain(&self, a: &Handle, values: &[f64]) -> Result<Handle> {
        self.unary(a, |ev, x| ev.multiply_plain(x, values))
    }

    pub fn relinearize(&self, a: &Handle) -> Result<Handle> {
        self.unary(a, |ev, x| ev.relinearize(x))
    }

    pub fn rescale(&self, a: &Handle) -> Result<Handle> {
        self.unary(a, |ev, x| ev.rescale(x))
    }

    pub fn rotate(&self, a: &Handle, steps: i64) -> Result<Handle> {
        self.unary(a, |ev, x| ev.rotate(x, steps))
    }

    /// Fresh copy of `a` under a new handle.
    fn copy(&self, a: &Handle) -> Result<Handle> {
        self.unary(a, |_, x| Ok(x.clone()))
    }

    /// Sum of all `handles` through a balanced addition tree.
    pub fn encrypted_sum(&self, handles: &[Handle]) -> Result<Handle> {
        self.reduce_tree("sum", handles, |a, b| self.add(a, b))
    }

    /// Product of all `handles`; consumes ⌈log2 k⌉ levels.
    pub fn encrypted_product(&self, handles: &[Handle]) -> Result<Handle> {
        let required = handles.len().next_power_of_two().trailing_zeros() as usize;
        for handle in handles {
            let level = self.store.stats(handle)?.level;
            if level < required {
                return Err(HeError::DepthExceeded(format!(
                    "product of {} ciphertexts needs {} levels, {} has {}",
                    handles.len(),
                    required,
                    handle,
                    level
                )));
            }
        }
        self.reduce_tree("product", handles, |a, b| self.multiply_relin_rescale(a, b))
    }

    fn reduce_tree<F>(&self, name: &str, handles: &[Handle], combine: F) -> Result<Handle>
    where
        F: Fn(&Handle, &Handle) -> Result<Handle> + Sync,
    {
        match handles {
            [] => {
                return Err(HeError::InvalidArgument(format!(
                    "{} of zero ciphertexts",
                    name
                )))
            }
            [single] => return self.copy(single),
            _ => {}
        }

        let mut scratch = Scratch::new(&self.store);
        let mut layer = handles.to_vec();
        let mut depth = 0;
        while layer.len() > 1 {
            let results: Vec<Result<Handle>> = layer
                .par_chunks(2)
                .map(|pair| match pair {
                    [a, b] => combine(a, b),
                    _ => Ok(pair[0]),
                })
                .collect();

            let mut next = Vec::with_capacity(results.len());
            let mut failure = None;
            for (result, pair) in results.into_iter().zip(layer.chunks(2)) {
                match result {
                    Ok(handle) => {
                        if pair.len() == 2 {
                            scratch.track(handle);
                        }
                        next.push(handle);
                    }
                    Err(e) => failure = failure.or(Some(e)),
                }
            }
            if let Some(e) = failure {
                return Err(scratch.fail(e));
            }
            layer = next;
            depth += 1;
        }

        debug!(op = name, inputs = handles.len(), layers = depth, "reduced ciphertext tree");
        Ok(scratch.finish(layer[0]))
    }

    /// Total of the first `width` slots, left in slot 0.
    ///
    /// `width` must be a power of two no larger than the slot count.
    pub fn slot_total(&self, handle: &Handle, width: usize) -> Result<Handle> {
        let ctx = self.context_for(handle)?;
        Self::check_width(&ctx, width)?;
        if width == 1 {
            return self.copy(handle);
        }

        let mut scratch = Scratch::new(&self.store);
        let mut acc = *handle;
        let mut step = 1;
        while step < width {
            let rotated = self.rotate(&acc, step as i64).map_err(|e| scratch.fail_ref(e))?;
            scratch.track(rotated);
            acc = self.add(&acc, &rotated).map_err(|e| scratch.fail_ref(e))?;
            scratch.track(acc);
            step <<= 1;
        }
        Ok(scratch.finish(acc))
    }

    /// Current context, after checking `handle` still belongs to it.
    fn context_for(&self, handle: &Handle) -> Result<Arc<Context>> {
        self.store.stats(handle)?;
        self.manager.current()
    }

    fn check_width(ctx: &Context, width: usize) -> Result<()> {
        if !width.is_power_of_two() || width > ctx.slot_count() {
            return Err(HeError::InvalidArgument(format!(
                "slot total width must be a power of two up to {}, got {}",
                ctx.slot_count(),
                width
            )));
        }
        Ok(())
    }

    /// `Σ_i weights[i] · slot_i`, left in slot 0.
    pub fn inner_product(&self, handle: &Handle, weights: &[f64]) -> Result<Handle> {
        if weights.is_empty() {
            return Err(HeError::InvalidArgument("inner product with no weights".into()));
        }
        let width = weights.len().next_power_of_two();
        let ctx = self.context_for(handle)?;
        Self::check_width(&ctx, width)?;

        let mut scratch = Scratch::new(&self.store);
        let weighted = self.multiply_plain(handle, weights)?;
        scratch.track(weighted);
        let rescaled = self.rescale(&weighted).map_err(|e| scratch.fail_ref(e))?;
        scratch.track(rescaled);

        match self.slot_total(&rescaled, width) {
            Ok(total) => {
                scratch.track(total);
                Ok(scratch.finish(total))
            }
            Err(HeError::Partial { intermediates, source }) => {
                scratch.created.extend(intermediates);
                Err(scratch.fail(*source))
            }
            Err(e) => Err(scratch.fail(e)),
        }
    }
}

/// Intermediate handles created by one composed operation.
struct Scratch<'a> {
    store: &'a CiphertextStore,
    created: Vec<Handle>,
}

impl<'a> Scratch<'a> {
    fn new(store: &'a CiphertextStore) -> Self {
        Self {
            store,
            created: Vec::new(),
        }
    }

    fn track(&mut self, handle: Handle) {
        self.created.push(handle);
    }

    fn fail_ref(&mut self, source: HeError) -> HeError {
        let intermediates = std::mem::take(&mut self.created);
        Self::partial(intermediates, source)
    }

    fn fail(mut self, source: HeError) -> HeError {
        self.fail_ref(source)
    }

    fn partial(intermediates: Vec<Handle>, source: HeError) -> HeError {
        if intermediates.is_empty() {
            source
        } else {
            warn!(left = intermediates.len(), error = %source, "composed operation failed");
            HeError::Partial {
                intermediates,
                source: Box::new(source),
            }
        }
    }

    /// Release everything but `result`.
    fn finish(mut self, result: Handle) -> Handle {
        for handle in std::mem::take(&mut self.created) {
            if handle != result {
                if let Err(e) = self.store.release(&handle) {
                    warn!(%handle, error = %e, "failed to release intermediate");
                }
            }
        }
        result
    }
}
