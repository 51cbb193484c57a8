// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration surface.
//!
//! The only functional knob this system exposes is `forward_agent_sessions`
//! (see [`crate::attach_manager::AttachManager`]); the two numeric constants
//! below are specified as fixed defaults (2000 ms bring-up deadline, 50 ms GC
//! drain poll) but kept as struct fields rather than bare literals so tests
//! can shrink them instead of racing the real clock.

use std::time::Duration;

/// Default RPC bring-up deadline, per the attach manager contract.
const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default poll interval while waiting for the tracer GC to drain.
const DEFAULT_GC_DRAIN_POLL: Duration = Duration::from_millis(50);

/// Default starting port for agent session ids / re-export listeners.
pub const DEFAULT_BASE_PORT: u16 = 27043;

/// Tunable timing knobs, isolated from the agent-visible configuration.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    attach_timeout: Duration,
    gc_drain_poll: Duration,
    base_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            attach_timeout: DEFAULT_ATTACH_TIMEOUT,
            gc_drain_poll: DEFAULT_GC_DRAIN_POLL,
            base_port: DEFAULT_BASE_PORT,
        }
    }
}

impl Config {
    pub fn attach_timeout(&self) -> Duration {
        self.attach_timeout
    }

    pub fn gc_drain_poll(&self) -> Duration {
        self.gc_drain_poll
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Override the RPC bring-up deadline. Intended for tests that want to
    /// exercise [`crate::error::Error::TimedOut`] without waiting 2 real seconds.
    pub fn with_attach_timeout(mut self, timeout: Duration) -> Self {
        self.attach_timeout = timeout;
        self
    }

    /// Override the GC drain poll interval.
    pub fn with_gc_drain_poll(mut self, poll: Duration) -> Self {
        self.gc_drain_poll = poll;
        self
    }

    /// Override the starting port for id allocation / re-export.
    pub fn with_base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }
}
