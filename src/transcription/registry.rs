//! # Model Registry
//!
//! Owns the single cached recognition-engine instance and hands out shared
//! handles to it. The registry holds at most one engine at a time, keyed by
//! model identifier: requesting the cached identifier is a cheap cache hit,
//! requesting a different one loads a new engine and replaces the slot.
//!
//! ## Known limitation (kept on purpose):
//! Because there is exactly one slot, concurrent requests for two different
//! identifiers thrash: each load replaces the other's engine, and every
//! request pays the load cost again. That matches the original single-model
//! design; a bounded multi-slot cache would change the memory profile and is
//! deliberately not done here.
//!
//! ## Concurrency:
//! No lock is held while an engine loads, so two racing loads both finish
//! and the last replacement wins. Handles are `Arc`s: a request holding an
//! engine keeps using it safely even after the registry's reference has
//! been replaced. Staleness, not corruption, is the only race outcome.

use crate::transcription::engine::{EngineLoader, RecognitionEngine};
use anyhow::Result;
use std::sync::{Arc, RwLock};
use tracing::info;

struct CachedEngine {
    model_id: String,
    engine: Arc<dyn RecognitionEngine>,
}

/// Single-slot cache of the loaded recognition engine.
pub struct ModelRegistry {
    loader: Box<dyn EngineLoader>,
    current: RwLock<Option<CachedEngine>>,
}

impl ModelRegistry {
    pub fn new(loader: Box<dyn EngineLoader>) -> Self {
        Self {
            loader,
            current: RwLock::new(None),
        }
    }

    /// Get an engine for `model_id`, loading and caching one if the slot
    /// holds a different identifier (or nothing).
    ///
    /// A load failure is returned to the caller and leaves the previously
    /// cached engine untouched; other requests for the old identifier keep
    /// hitting the cache, and there is no silent fallback for the new one.
    pub fn get(&self, model_id: &str) -> Result<Arc<dyn RecognitionEngine>> {
        {
            let current = self.current.read().unwrap();
            if let Some(cached) = current.as_ref() {
                if cached.model_id == model_id {
                    return Ok(cached.engine.clone());
                }
            }
        }

        info!("Model '{}' not cached, loading", model_id);
        let engine = self.loader.load(model_id)?;

        let mut current = self.current.write().unwrap();
        if let Some(previous) = current.as_ref() {
            info!(
                "Replacing cached model '{}' with '{}'",
                previous.model_id, model_id
            );
        }
        *current = Some(CachedEngine {
            model_id: model_id.to_string(),
            engine: engine.clone(),
        });

        Ok(engine)
    }

    /// Identifier of the currently cached engine, if any.
    pub fn current_model_id(&self) -> Option<String> {
        self.current
            .read()
            .unwrap()
            .as_ref()
            .map(|cached| cached.model_id.clone())
    }

    /// Eagerly load `model_id` into the slot. Called at startup when
    /// preloading is configured; a failure here is fatal to startup.
    pub fn warm_up(&self, model_id: &str) -> Result<()> {
        info!("Warming up model '{}'", model_id);
        self.get(model_id).map(|_| ())
    }
}
