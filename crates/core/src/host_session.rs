// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `HostSession`: the capability-shaped surface a `Provider` hands
//! callers. Enumerate/spawn/resume/kill are backend-specific; attach/obtain/
//! close are implemented once, reusably, by [`crate::attach_manager::AttachManager`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;
use crate::ids::AgentSessionId;
use crate::provider::ProcessInfo;
use crate::rpc::RpcConnection;

/// One reachable target system's process/session surface.
///
/// Methods that need to run concurrently with the attach table's internals
/// (`attach_to`, `close`) take `Arc<Self>` so they can clone themselves into
/// a spawned routing task; everything else takes `&self`. Object-safe: the
/// only caller-visible form is `Arc<dyn HostSession>`.
pub trait HostSession: Send + Sync {
    fn enumerate_processes(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ProcessInfo>>> + Send + '_>>;

    fn spawn(
        &self,
        program: String,
        argv: Vec<String>,
        envp: Vec<(String, String)>,
    ) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + '_>>;

    fn resume(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn kill(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn attach_to(self: Arc<Self>, pid: u32) -> Pin<Box<dyn Future<Output = Result<AgentSessionId>> + Send>>;

    fn obtain_agent_session(
        &self,
        id: AgentSessionId,
    ) -> Pin<Box<dyn Future<Output = Result<RpcConnection>> + Send + '_>>;

    fn close(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}
