// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The opaque scripting-runtime capability.
//!
//! Per scope, the concrete scripting runtime is out of bounds: a `Script` is
//! whatever a compiler produces and a `Tracer` is whatever can report GC
//! progress. Both are object-safe traits so [`crate::script_engine::ScriptEngine`]
//! can be built and tested without any real instrumentation engine behind
//! them.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::Result;

/// A compiled, loadable unit of instrumentation logic running inside the
/// target.
pub trait Script: Send + Sync {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn post_message(&self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Tell the script to exclude the agent's own memory range from
    /// instrumentation, so the agent never instruments itself.
    fn exclude_own_memory_range(&self);

    /// Install the callback invoked whenever the script posts a message back
    /// out to the host. `data` carries an optional raw byte payload
    /// alongside the JSON `message`.
    fn set_message_callback(&self, callback: Box<dyn Fn(Value, Option<Vec<u8>>) + Send + Sync>);

    fn destroy(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Narrowing hook so test/demo harnesses driving a [`NullScript`] can
    /// simulate an instrumentation callback firing. Real scripting runtimes
    /// have no reason to support this beyond the default `self`.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Compiles script source into a [`Script`].
pub trait ScriptCompiler: Send + Sync {
    fn compile(
        &self,
        source: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Script>>> + Send + '_>>;
}

/// The code-tracing engine's garbage collector, as seen by
/// [`crate::script_instance::ScriptInstance::destroy`].
pub trait Tracer: Send + Sync {
    /// Perform one GC pass. Returns `true` if residual work remains and the
    /// caller should retry after the drain-poll interval.
    fn garbage_collect(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}

/// No-op [`Script`] used as the engine's default until a real compiler is
/// wired in — there is none in this workspace. Forwards whatever message is
/// posted to it via [`NullScript::fire`], which the agent-side test/demo
/// harness uses to simulate instrumentation callbacks firing.
pub struct NullScript {
    callback: std::sync::Mutex<Option<Box<dyn Fn(Value, Option<Vec<u8>>) + Send + Sync>>>,
}

impl NullScript {
    pub fn new() -> Self {
        Self { callback: std::sync::Mutex::new(None) }
    }

    pub fn fire(&self, message: Value, data: Option<Vec<u8>>) {
        if let Some(callback) = self.callback.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            callback(message, data);
        }
    }
}

impl Default for NullScript {
    fn default() -> Self {
        Self::new()
    }
}

impl Script for NullScript {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn post_message(&self, _message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn exclude_own_memory_range(&self) {}

    fn set_message_callback(&self, callback: Box<dyn Fn(Value, Option<Vec<u8>>) + Send + Sync>) {
        *self.callback.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    fn destroy(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Default compiler producing [`NullScript`] instances.
pub struct NullCompiler;

impl ScriptCompiler for NullCompiler {
    fn compile(
        &self,
        _source: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Script>>> + Send + '_>> {
        Box::pin(async { Ok(Box::new(NullScript::new()) as Box<dyn Script>) })
    }
}

/// Tracer that always reports no residual work. Default until a real
/// code-tracing engine is wired in.
pub struct IdleTracer;

impl Tracer for IdleTracer {
    fn garbage_collect(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async { false })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A tracer that reports residual work for a fixed number of passes
    /// before going idle, so tests can observe the drain barrier actually
    /// loop.
    pub struct CountdownTracer {
        remaining: AtomicUsize,
    }

    impl CountdownTracer {
        pub fn new(passes_with_residual_work: usize) -> Self {
            Self { remaining: AtomicUsize::new(passes_with_residual_work) }
        }
    }

    impl Tracer for CountdownTracer {
        fn garbage_collect(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
            Box::pin(async move {
                let prev = self.remaining.load(Ordering::SeqCst);
                if prev == 0 {
                    false
                } else {
                    self.remaining.fetch_sub(1, Ordering::SeqCst);
                    true
                }
            })
        }
    }
}
