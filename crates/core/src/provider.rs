// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Providers: one reachable target system each, and the process metadata
//! they enumerate.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::host_session::HostSession;
use crate::icon::Icon;
use crate::ids::AgentSessionId;
use crate::rpc::RpcConnection;
use crate::signal::Signal;

/// Which transport family a [`Provider`] was published by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    LocalSystem,
    LocalTether,
    RemoteSystem,
}

/// One process as reported by [`HostSession::enumerate_processes`].
///
/// `parameters` is an open string-keyed bag (`started`, `user`, and whatever
/// else the backend's platform surface offers) rather than a fixed struct,
/// since the set of useful metadata varies by backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub parameters: HashMap<String, Value>,
}

impl ProcessInfo {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// A reachable target system. Factory for a [`HostSession`]; emits
/// `agent_session_closed` whenever one of the sessions it created
/// terminates.
pub struct Provider {
    name: String,
    icon: Option<Icon>,
    kind: ProviderKind,
    agent_session_closed: Signal<(AgentSessionId, Option<String>)>,
    create_session: Box<dyn Fn() -> Arc<dyn HostSession> + Send + Sync>,
}

impl Provider {
    pub fn new(
        name: impl Into<String>,
        icon: Option<Icon>,
        kind: ProviderKind,
        create_session: impl Fn() -> Arc<dyn HostSession> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            icon,
            kind,
            agent_session_closed: Signal::new(),
            create_session: Box::new(create_session),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn icon(&self) -> Option<&Icon> {
        self.icon.as_ref()
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Build a fresh `HostSession` for this provider.
    pub fn create(&self) -> Arc<dyn HostSession> {
        (self.create_session)()
    }

    /// Obtain the `RpcConnection` proxy for an already-attached agent
    /// session. `create_session` closures (see `backends.rs`) clone a
    /// handle to the same live session table on every call, so a fresh
    /// `self.create()` here reaches the same `HostSession` that attached
    /// `id` in the first place rather than a new, empty one.
    pub fn obtain_agent_session(
        &self,
        id: AgentSessionId,
    ) -> Pin<Box<dyn Future<Output = Result<RpcConnection>> + Send>> {
        let session = self.create();
        Box::pin(async move { session.obtain_agent_session(id).await })
    }

    pub fn agent_session_closed(&self) -> &Signal<(AgentSessionId, Option<String>)> {
        &self.agent_session_closed
    }

    /// Forward a closure notification from one of this provider's sessions.
    pub fn notify_agent_session_closed(&self, id: AgentSessionId, error: Option<String>) {
        self.agent_session_closed.emit((id, error));
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach_manager::AttachManager;
    use crate::config::Config;

    #[test]
    fn process_info_carries_open_parameter_bag() {
        let info = ProcessInfo::new(42, "target")
            .with_parameter("user", "nobody")
            .with_parameter("started", true);
        assert_eq!(info.pid, 42);
        assert_eq!(info.parameters.get("user").unwrap(), "nobody");
    }

    #[test]
    fn provider_exposes_name_kind_and_icon() {
        let provider = Provider::new("Local System", None, ProviderKind::LocalSystem, || {
            Arc::new(AttachManager::new(Config::default(), false))
        });
        assert_eq!(provider.name(), "Local System");
        assert_eq!(provider.kind(), ProviderKind::LocalSystem);
        assert!(provider.icon().is_none());
    }

    #[tokio::test]
    async fn obtain_agent_session_reaches_a_session_attached_through_create() {
        let manager = Arc::new(AttachManager::new(Config::default(), false));
        let shared = manager.clone();
        let provider = Provider::new("Local System", None, ProviderKind::LocalSystem, move || {
            shared.clone() as Arc<dyn HostSession>
        });

        let id = manager.clone().attach_to(std::process::id()).await.unwrap();
        provider.obtain_agent_session(id).await.unwrap();
    }

    #[tokio::test]
    async fn obtain_agent_session_for_unknown_id_fails_not_found() {
        let provider = Provider::new("Local System", None, ProviderKind::LocalSystem, || {
            Arc::new(AttachManager::new(Config::default(), false))
        });
        let err = provider.obtain_agent_session(AgentSessionId::new(9999)).await.unwrap_err();
        assert_eq!(err, crate::error::Error::NotFound);
    }

    #[tokio::test]
    async fn closed_session_notification_reaches_subscribers() {
        let provider = Provider::new("Local System", None, ProviderKind::LocalSystem, || {
            Arc::new(AttachManager::new(Config::default(), false))
        });
        let mut rx = provider.agent_session_closed().subscribe();
        provider.notify_agent_session_closed(AgentSessionId::new(1), Some("vanished".into()));
        let (id, error) = rx.recv().await.unwrap();
        assert_eq!(id, AgentSessionId::new(1));
        assert_eq!(error.as_deref(), Some("vanished"));
    }
}
