//! Domain Models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current conditions for a location
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub location: String,
    pub temperature: String,
    pub conditions: String,
    pub unit: String,
}

impl WeatherReport {
    /// Report for a place without data
    pub fn unavailable(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            temperature: "N/A".into(),
            conditions: "Data not available".into(),
            unit: "N/A".into(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.unit != "N/A"
    }
}

/// Audit log severity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Lenient parse; anything unrecognized is `Info`
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "warning" | "warn" => Severity::Warning,
            "error" | "critical" => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "Info"),
            Severity::Warning => write!(f, "Warning"),
            Severity::Error => write!(f, "Error"),
        }
    }
}

/// One audit log record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub severity: Severity,
    pub message: String,
    pub logged_at: DateTime<Utc>,
}
