// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backends: independent sources of [`Provider`] availability events, one
//! per transport family (local OS, USB tether, TCP).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;
use crate::provider::Provider;
use crate::signal::Signal;

/// A pluggable source of providers for one transport family.
///
/// Object-safe for use as `Box<dyn Backend>` inside [`crate::service::Service`].
/// `start`/`stop` return boxed futures rather than using `async fn` directly,
/// since async trait methods are not themselves object-safe. Backends are
/// otherwise opaque: callers only ever see `start`/`stop` and the two
/// signals.
pub trait Backend: Send + Sync {
    /// A stable, human-readable identifier for logging (e.g. `"local"`,
    /// `"tcp"`, `"usb"`).
    fn name(&self) -> &str;

    /// Begin discovering providers. Must be safe to call at most once per
    /// instance; a second call is a logic error the caller is expected to
    /// avoid.
    fn start(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Stop discovering providers and retract any still-published ones.
    fn stop(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn provider_available(&self) -> &Signal<Arc<Provider>>;

    fn provider_unavailable(&self) -> &Signal<Arc<Provider>>;
}
