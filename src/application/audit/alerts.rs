//! `AlertSink` implementations (spec.md §4.8, §6).

use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::domain::ports::{AlertSeverity, AlertSink};

/// Default impl: emits at the matching `tracing` level, fulfilling the
/// structured-log sink contract without a separate transport.
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn emit(&self, severity: AlertSeverity, category: &str, message: &str) {
        match severity {
            AlertSeverity::Info => info!(category, message),
            AlertSeverity::Warning => warn!(category, message),
            AlertSeverity::Critical => error!(category, message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapturedAlert {
    pub severity: AlertSeverity,
    pub category: String,
    pub message: String,
}

/// Test double that records alerts instead of emitting them, so assertions
/// can check which CRITICAL alerts fired (spec.md §4.8's required list).
#[derive(Default)]
pub struct CapturingAlertSink {
    captured: Mutex<Vec<CapturedAlert>>,
}

impl AlertSink for CapturingAlertSink {
    fn emit(&self, severity: AlertSeverity, category: &str, message: &str) {
        self.captured.lock().unwrap().push(CapturedAlert {
            severity,
            category: category.to_string(),
            message: message.to_string(),
        });
    }
}

impl CapturingAlertSink {
    pub fn captured(&self) -> Vec<CapturedAlert> {
        self.captured.lock().unwrap().clone()
    }
}
