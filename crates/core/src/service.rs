// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `Service`: the top-level aggregator a caller builds first. Owns an
//! ordered list of backends and fans their provider events out on its own
//! signals, performing no deduplication across backends.

use std::sync::Arc;

use tracing::info;

use crate::backend::Backend;
use crate::error::Result;
use crate::provider::Provider;
use crate::signal::Signal;

/// Aggregates every configured [`Backend`] behind one pair of signals.
pub struct Service {
    backends: Vec<Arc<dyn Backend>>,
    provider_available: Signal<Arc<Provider>>,
    provider_unavailable: Signal<Arc<Provider>>,
}

impl Service {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            provider_available: Signal::new(),
            provider_unavailable: Signal::new(),
        }
    }

    /// Append `backend`, wiring its `provider_available`/`provider_unavailable`
    /// signals into this service's own signals of the same name. Events a
    /// backend emits after this call are forwarded unchanged; this spawns
    /// one forwarding task per signal, alive for as long as `backend` itself
    /// (dropping the service does not un-wire a still-running backend).
    pub fn add_backend(&mut self, backend: Arc<dyn Backend>) {
        forward(backend.provider_available(), self.provider_available.clone());
        forward(backend.provider_unavailable(), self.provider_unavailable.clone());
        self.backends.push(backend);
    }

    /// Remove `backend` by pointer identity. Does not synthesise
    /// `provider_unavailable` events for anything it had published; callers
    /// that want tidy teardown should `stop()` the backend first.
    pub fn remove_backend(&mut self, backend: &Arc<dyn Backend>) {
        self.backends.retain(|b| !Arc::ptr_eq(b, backend));
    }

    pub fn provider_available(&self) -> &Signal<Arc<Provider>> {
        &self.provider_available
    }

    pub fn provider_unavailable(&self) -> &Signal<Arc<Provider>> {
        &self.provider_unavailable
    }

    pub fn backends(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    /// Start every backend in registration order, sequentially. The first
    /// failure stops the sequence and is returned; backends started before
    /// it remain started.
    pub async fn start(&self) -> Result<()> {
        for backend in &self.backends {
            info!(backend = backend.name(), "starting backend");
            backend.start().await?;
        }
        Ok(())
    }

    /// Stop every backend in registration order, sequentially. Unlike
    /// `start`, a failure does not abort the sequence — every backend gets a
    /// chance to stop, and the first error encountered is returned after all
    /// have been attempted.
    pub async fn stop(&self) -> Result<()> {
        let mut first_error = None;
        for backend in &self.backends {
            info!(backend = backend.name(), "stopping backend");
            if let Err(error) = backend.stop().await {
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for Service {
    fn default() -> Self {
        Self::new()
    }
}

fn forward(source: &Signal<Arc<Provider>>, sink: Signal<Arc<Provider>>) {
    let mut rx = source.subscribe();
    tokio::spawn(async move {
        while let Ok(provider) = rx.recv().await {
            sink.emit(provider);
        }
    });
}
