// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-script lifecycle. `destroy` is a two-phase barrier: unload, then
//! wait for the tracer's GC to actually drain before releasing anything.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;
use crate::ids::AgentScriptId;
use crate::script::{Script, Tracer};

/// One loaded (or loadable) script instance, owned by a
/// [`crate::script_engine::ScriptEngine`].
pub struct ScriptInstance {
    sid: AgentScriptId,
    script: Box<dyn Script>,
}

impl ScriptInstance {
    pub(crate) fn new(sid: AgentScriptId, script: Box<dyn Script>) -> Self {
        Self { sid, script }
    }

    pub fn sid(&self) -> AgentScriptId {
        self.sid
    }

    pub(crate) fn script(&self) -> &dyn Script {
        self.script.as_ref()
    }

    /// Unload the script, then block until the tracer reports a fully
    /// drained GC pass. `drain_poll` is the interval between retries
    /// (50 ms by default; tests may shrink it).
    pub(crate) async fn destroy(&self, tracer: &Arc<dyn Tracer>, drain_poll: Duration) -> Result<()> {
        self.script.destroy().await?;

        loop {
            let residual = tracer.garbage_collect().await;
            if !residual {
                debug!(sid = %self.sid, "tracer GC drained, releasing script instance");
                return Ok(());
            }
            tokio::time::sleep(drain_poll).await;
        }
    }
}
