// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control plane of a dynamic instrumentation framework.
//!
//! A host process discovers targets ([`service`], [`backend`], [`provider`]),
//! attaches to one by pid ([`attach_manager`], [`session_entry`]), and drives
//! a per-agent script registry ([`script_engine`], [`script_instance`])
//! over an RPC transport ([`rpc`]). This module only wires the pieces
//! together; see each module's own doc comment for its responsibilities.

pub mod attach_manager;
pub mod backend;
pub mod backends;
pub mod config;
pub mod error;
pub mod host_session;
pub mod icon;
pub mod ids;
pub mod provider;
pub mod reexport;
pub mod rpc;
pub mod script;
pub mod script_engine;
pub mod script_instance;
pub mod service;
pub mod session_entry;
pub mod signal;

pub use attach_manager::{AttachHooks, AttachManager, LocalAttachHooks};
pub use backend::Backend;
pub use config::Config;
pub use error::{Error, Result};
pub use host_session::HostSession;
pub use ids::{AgentScriptId, AgentSessionId};
pub use provider::{ProcessInfo, Provider, ProviderKind};
pub use rpc::RpcConnection;
pub use script_engine::ScriptEngine;
pub use service::Service;
pub use session_entry::SessionEntry;
pub use signal::Signal;
