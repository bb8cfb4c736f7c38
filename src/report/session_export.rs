//! Session files: a repository snapshot plus run metadata

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::engine::Session;

/// Metadata about the run that wrote the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Timestamp of the export (ISO 8601 format)
    pub timestamp: String,
    /// Tiering version
    pub tiering_version: String,
    /// Dataset the iterations were built on
    pub input_file: String,
    /// Number of iterations in the session
    pub iterations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub metadata: SessionMetadata,
    pub session: Session,
}

impl SessionExport {
    pub fn new(session: Session, input: &Path) -> Self {
        Self {
            metadata: SessionMetadata {
                timestamp: Utc::now().to_rfc3339(),
                tiering_version: env!("CARGO_PKG_VERSION").to_string(),
                input_file: input.display().to_string(),
                iterations: session.iterations.len(),
            },
            session,
        }
    }
}

/// Write a session with metadata as pretty-printed JSON
pub fn export_session(session: Session, input: &Path, output_path: &Path) -> Result<()> {
    let export = SessionExport::new(session, input);
    let json = serde_json::to_string_pretty(&export).context("Failed to serialize session to JSON")?;

    std::fs::write(output_path, json)
        .with_context(|| format!("Failed to write session to {}", output_path.display()))?;

    Ok(())
}

/// Read a session written by `export_session`
pub fn read_session(path: &Path) -> Result<SessionExport> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read session file: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid session file: {}", path.display()))
}
