//! Wire protocol between the verification supervisor and its worker.
//!
//! Messages travel as one JSON object per line over the worker's stdin
//! (supervisor to worker) and stdout (worker to supervisor). Every object
//! carries a `type` tag:
//!
//! ```json
//! {"type": "start", "binary_path": "/opt/bin/libaccel.so", "backend_kind": "cuda"}
//! {"type": "run_test", "binary_path": "/opt/bin/libaccel.so", "backend_kind": "cuda"}
//! {"type": "exit"}
//! {"type": "ready"}
//! {"type": "loaded"}
//! {"type": "done"}
//! {"type": "failed", "stage": "backend_identity", "reason": "expected cuda, got vulkan"}
//! ```
//!
//! Worker messages must arrive in the order `ready`, `loaded`, then `done`
//! or `failed`.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendKind;

// ============================================================================
// Exit codes
// ============================================================================

/// Worker exit code after processing `Exit`.
pub const CLEAN_EXIT_CODE: i32 = 0;

/// Worker exit code when the candidate binary cannot be loaded.
pub const LOAD_FAILURE_EXIT_CODE: i32 = 3;

/// Worker exit code when its stdin closes before `Exit` arrives.
pub const ORPHANED_EXIT_CODE: i32 = 4;

/// Worker exit code when the supervisor sends something unexpected.
pub const PROTOCOL_ERROR_EXIT_CODE: i32 = 5;

/// Worker exit code after a panic inside a test step.
pub const PANIC_EXIT_CODE: i32 = 101;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when encoding or parsing protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Empty protocol line")]
    Empty,
}

// ============================================================================
// Messages
// ============================================================================

/// Messages sent by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorMessage {
    /// Load the candidate binary.
    Start {
        binary_path: PathBuf,
        backend_kind: Option<BackendKind>,
    },
    /// Exercise the loaded binary.
    RunTest {
        binary_path: PathBuf,
        backend_kind: Option<BackendKind>,
    },
    /// Shut down cleanly.
    Exit,
}

/// Test step that produced a graceful failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// A required native function is missing.
    Bind,
    LoadBackends,
    Initialize,
    MemoryInfo,
    DeviceInfo,
    /// The binary reports a different backend than requested.
    BackendIdentity,
    DeviceSupport,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bind => "bind",
            Self::LoadBackends => "load backends",
            Self::Initialize => "initialize",
            Self::MemoryInfo => "memory info",
            Self::DeviceInfo => "device info",
            Self::BackendIdentity => "backend identity",
            Self::DeviceSupport => "device support",
        };
        write!(f, "{name}")
    }
}

/// Messages sent by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Worker process is up and reading commands.
    Ready,
    /// Candidate binary loaded.
    Loaded,
    /// Functional test completed.
    Done,
    /// Functional test failed without taking the process down.
    Failed { stage: FailureStage, reason: String },
}

impl WorkerMessage {
    /// Short tag used in log lines.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Loaded => "loaded",
            Self::Done => "done",
            Self::Failed { .. } => "failed",
        }
    }
}

// ============================================================================
// Encoding / Parsing
// ============================================================================

/// Encode a message as a single newline-terminated JSON line.
pub fn encode_line<M: Serialize>(message: &M) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line written by the worker.
pub fn parse_worker_line(line: &str) -> Result<WorkerMessage, ProtocolError> {
    parse_trimmed(line)
}

/// Parse one line written by the supervisor.
pub fn parse_supervisor_line(line: &str) -> Result<SupervisorMessage, ProtocolError> {
    parse_trimmed(line)
}

fn parse_trimmed<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T, ProtocolError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(serde_json::from_str(trimmed)?)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ------------------------------------------------------------------------
    // Worker messages
    // ------------------------------------------------------------------------

    #[test]
    fn test_parse_unit_worker_messages() {
        assert_eq!(
            parse_worker_line(r#"{"type": "ready"}"#).unwrap(),
            WorkerMessage::Ready
        );
        assert_eq!(
            parse_worker_line(r#"{"type": "loaded"}"#).unwrap(),
            WorkerMessage::Loaded
        );
        assert_eq!(
            parse_worker_line("{\"type\":\"done\"}\n").unwrap(),
            WorkerMessage::Done
        );
    }

    #[test]
    fn test_parse_failed_message() {
        let line = r#"{"type": "failed", "stage": "backend_identity", "reason": "expected cuda, got vulkan"}"#;
        let message = parse_worker_line(line).unwrap();

        assert_eq!(
            message,
            WorkerMessage::Failed {
                stage: FailureStage::BackendIdentity,
                reason: "expected cuda, got vulkan".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_unknown_worker_tag() {
        let err = parse_worker_line(r#"{"type": "progress"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn test_parse_non_json_output() {
        let err = parse_worker_line("ggml_vulkan: Found 1 Vulkan devices").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn test_parse_blank_line() {
        assert!(matches!(
            parse_worker_line("   ").unwrap_err(),
            ProtocolError::Empty
        ));
    }

    // ------------------------------------------------------------------------
    // Supervisor messages
    // ------------------------------------------------------------------------

    #[test]
    fn test_encode_start_message() {
        let line = encode_line(&SupervisorMessage::Start {
            binary_path: PathBuf::from("good.bin"),
            backend_kind: Some(BackendKind::Vulkan),
        })
        .unwrap();

        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["type"], "start");
        assert_eq!(value["backend_kind"], "vulkan");
    }

    #[test]
    fn test_parse_run_test_with_no_backend() {
        let message =
            parse_supervisor_line(r#"{"type": "run_test", "binary_path": "cpu.bin", "backend_kind": null}"#)
                .unwrap();

        assert_eq!(
            message,
            SupervisorMessage::RunTest {
                binary_path: PathBuf::from("cpu.bin"),
                backend_kind: None,
            }
        );
    }

    #[test]
    fn test_parse_exit() {
        assert_eq!(
            parse_supervisor_line(r#"{"type": "exit"}"#).unwrap(),
            SupervisorMessage::Exit
        );
    }

    // ------------------------------------------------------------------------
    // Display
    // ------------------------------------------------------------------------

    #[test]
    fn test_failure_stage_display() {
        assert_eq!(FailureStage::DeviceSupport.to_string(), "device support");
        assert_eq!(WorkerMessage::Done.tag(), "done");
    }
}
