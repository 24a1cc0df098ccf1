//! Log Message Tool
//!
//! Writes an arbitrary message to the system audit log.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use agent_core::tool::{ParamType, ParameterSchema, ToolArguments};
use agent_core::{Tool, ToolOutput, ToolResult, ToolSchema};
use async_trait::async_trait;
use chrono::Utc;

use crate::model::{AuditEntry, Severity};

pub const NAME: &str = "log_message";

/// In-memory audit trail shared with whoever wants to inspect it
pub type AuditLog = Arc<Mutex<Vec<AuditEntry>>>;

/// Tool for writing audit log entries
pub struct LogMessageTool {
    audit: AuditLog,
    latency: Duration,
}

impl Default for LogMessageTool {
    fn default() -> Self {
        Self::new()
    }
}

impl LogMessageTool {
    pub fn new() -> Self {
        Self::with_audit_log(AuditLog::default())
    }

    /// Record entries into an existing audit log
    pub fn with_audit_log(audit: AuditLog) -> Self {
        Self {
            audit,
            latency: Duration::from_millis(200),
        }
    }

    /// Override the simulated write delay
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn audit_log(&self) -> AuditLog {
        self.audit.clone()
    }
}

#[async_trait]
impl Tool for LogMessageTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(NAME, "Logs an arbitrary message to a persistent system audit log.")
            .param(ParameterSchema::required("message", ParamType::String, "The text message to log."))
            .param(
                ParameterSchema::optional(
                    "severity",
                    ParamType::String,
                    "The severity level of the log (e.g., 'Info', 'Warning', 'Error').",
                )
                .with_default(serde_json::json!("Info")),
            )
            .category("audit")
            .side_effects()
    }

    async fn execute(&self, args: ToolArguments) -> ToolResult {
        let message = args.str("message")?;
        let severity = Severity::parse(args.opt_str("severity").unwrap_or("Info"));

        match severity {
            Severity::Info => tracing::info!(target: "audit", %message, "Audit log"),
            Severity::Warning => tracing::warn!(target: "audit", %message, "Audit log"),
            Severity::Error => tracing::error!(target: "audit", %message, "Audit log"),
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.audit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(AuditEntry {
                severity,
                message: message.to_string(),
                logged_at: Utc::now(),
            });

        Ok(ToolOutput::from(true))
    }
}
