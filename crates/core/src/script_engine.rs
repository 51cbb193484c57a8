// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent-side script registry: owns every script instance in the
//! target, fans asynchronous messages out to the host, and hosts the
//! process-wide debugger hook.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ids::AgentScriptId;
use crate::script::{NullCompiler, IdleTracer, ScriptCompiler, Tracer};
use crate::script_instance::ScriptInstance;
use crate::signal::Signal;

/// Owns the script table for one agent session. Every operation the host's
/// RPC proxy exposes is serviced here.
pub struct ScriptEngine {
    instances: RwLock<HashMap<AgentScriptId, ScriptInstance>>,
    next_sid: AtomicU32,
    compiler: Box<dyn ScriptCompiler>,
    tracer: Arc<dyn Tracer>,
    drain_poll: Duration,
    debugger_enabled: AtomicBool,
    message_from_script: Signal<(AgentScriptId, Value, Option<Vec<u8>>)>,
    message_from_debugger: Signal<Value>,
}

impl ScriptEngine {
    pub fn new() -> Self {
        Self::with_capabilities(Box::new(NullCompiler), Arc::new(IdleTracer), Duration::from_millis(50))
    }

    pub fn with_capabilities(
        compiler: Box<dyn ScriptCompiler>,
        tracer: Arc<dyn Tracer>,
        drain_poll: Duration,
    ) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            next_sid: AtomicU32::new(0),
            compiler,
            tracer,
            drain_poll,
            debugger_enabled: AtomicBool::new(false),
            message_from_script: Signal::new(),
            message_from_debugger: Signal::new(),
        }
    }

    pub fn message_from_script(&self) -> &Signal<(AgentScriptId, Value, Option<Vec<u8>>)> {
        &self.message_from_script
    }

    pub fn message_from_debugger(&self) -> &Signal<Value> {
        &self.message_from_debugger
    }

    /// Compile `source`, exclude the agent's own memory range from it, wire
    /// its message callback to `message_from_script`, and register it.
    /// `name` defaults to `"script" + sid`.
    pub async fn create_script(&self, name: Option<String>, source: String) -> Result<AgentScriptId> {
        let script = self.compiler.compile(&source).await?;
        script.exclude_own_memory_range();

        let sid = AgentScriptId::new(self.next_sid.fetch_add(1, Ordering::SeqCst) + 1);
        let _name = name.unwrap_or_else(|| format!("script{sid}"));

        let message_from_script = self.message_from_script.clone();
        script.set_message_callback(Box::new(move |message, data| {
            message_from_script.emit((sid, message, data));
        }));

        debug!(sid = %sid, "script created");
        self.instances.write().await.insert(sid, ScriptInstance::new(sid, script));
        Ok(sid)
    }

    pub async fn destroy_script(&self, sid: AgentScriptId) -> Result<()> {
        let instance = {
            let mut instances = self.instances.write().await;
            instances.remove(&sid).ok_or_else(|| Error::failed("invalid script id"))?
        };
        instance.destroy(&self.tracer, self.drain_poll).await?;
        debug!(sid = %sid, "script destroyed");
        Ok(())
    }

    pub async fn load_script(&self, sid: AgentScriptId) -> Result<()> {
        let instances = self.instances.read().await;
        let instance = instances.get(&sid).ok_or_else(|| Error::failed("invalid script id"))?;
        instance.script().load().await
    }

    pub async fn post_message_to_script(&self, sid: AgentScriptId, message: Value) -> Result<()> {
        let instances = self.instances.read().await;
        let instance = instances.get(&sid).ok_or_else(|| Error::failed("invalid script id"))?;
        instance.script().post_message(message).await
    }

    pub fn enable_debugger(&self) {
        self.debugger_enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable_debugger(&self) {
        self.debugger_enabled.store(false, Ordering::SeqCst);
    }

    /// Forward `message` on `message_from_debugger` iff the debugger hook is
    /// currently enabled. `enable_debugger`/`disable_debugger` install and
    /// remove this forwarding path itself, not just a flag nothing reads —
    /// posting after `disable_debugger` must have no observable effect on
    /// `message_from_debugger` subscribers.
    pub fn post_message_to_debugger(&self, message: Value) {
        if self.debugger_enabled() {
            self.message_from_debugger.emit(message);
        }
    }

    pub fn debugger_enabled(&self) -> bool {
        self.debugger_enabled.load(Ordering::SeqCst)
    }

    /// Destroy every instance and clear the table.
    pub async fn shutdown(&self) {
        let instances: Vec<ScriptInstance> = {
            let mut table = self.instances.write().await;
            table.drain().map(|(_, instance)| instance).collect()
        };
        for instance in instances {
            let _ = instance.destroy(&self.tracer, self.drain_poll).await;
        }
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl ScriptEngine {
    /// Simulate the script for `sid` firing an instrumentation callback,
    /// as if instrumented code in the target had posted a message.
    pub(crate) async fn post_message_to_script_from_agent(
        &self,
        sid: AgentScriptId,
        message: Value,
    ) -> Result<()> {
        let instances = self.instances.read().await;
        let instance = instances.get(&sid).ok_or(Error::NotFound)?;
        let script = instance
            .script()
            .as_any()
            .downcast_ref::<crate::script::NullScript>()
            .ok_or_else(|| Error::failed("not a NullScript"))?;
        script.fire(message, None);
        Ok(())
    }
}
