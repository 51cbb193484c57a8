// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness shared by the scenario suite in `tests/`.

use std::path::{Path, PathBuf};

/// Resolve the path to the compiled `tether-loader` binary, built as part of
/// this workspace.
pub fn loader_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("tether-loader")
}

/// Find a free TCP port by binding to :0 then releasing it. Racy in
/// principle (another process can grab it first) but good enough for tests,
/// matching the same approach the attach manager's own forwarding-mode probe
/// uses in production.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
