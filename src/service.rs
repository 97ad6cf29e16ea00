//! Service records and the drafts they are created from

use crate::errors::{MonitorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Cloud providers offered when registering a service.
pub const KNOWN_CLOUD_PROVIDERS: [&str; 6] = [
    "AWS",
    "Google Cloud",
    "Azure",
    "DigitalOcean",
    "Heroku",
    "Other",
];

/// User-declared lifecycle stage. Unrelated to reachability.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Production,
    Staging,
    Development,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lifecycle::Production => write!(f, "production"),
            Lifecycle::Staging => write!(f, "staging"),
            Lifecycle::Development => write!(f, "development"),
        }
    }
}

impl FromStr for Lifecycle {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Lifecycle::Production),
            "staging" | "stage" => Ok(Lifecycle::Staging),
            "development" | "dev" => Ok(Lifecycle::Development),
            other => Err(MonitorError::Validation(format!(
                "unknown lifecycle stage '{}', expected production, staging or development",
                other
            ))),
        }
    }
}

/// Reachability as seen by the most recent probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reachability {
    Healthy,
    Unreachable,
}

impl std::fmt::Display for Reachability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reachability::Healthy => write!(f, "Healthy"),
            Reachability::Unreachable => write!(f, "Failed"),
        }
    }
}

/// The user-supplied part of a service.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDraft {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Lifecycle,
    pub ip: String,
    pub cloud_provider: String,
    pub monthly_cost: f64,
    pub supported_by: String,
}

impl ServiceDraft {
    /// Reject drafts with missing required fields or a negative cost
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("name", &self.name),
            ("url", &self.url),
            ("ip", &self.ip),
            ("supportedBy", &self.supported_by),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(MonitorError::Validation(format!("{} cannot be empty", field)));
            }
        }

        if !self.monthly_cost.is_finite() || self.monthly_cost < 0.0 {
            return Err(MonitorError::Validation(format!(
                "monthlyCost must be a non-negative amount, got {}",
                self.monthly_cost
            )));
        }

        Ok(())
    }
}

/// A registered endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    pub status: Lifecycle,
    pub ip: String,
    pub cloud_provider: String,
    pub monthly_cost: f64,
    pub supported_by: String,
    pub last_check: DateTime<Utc>,
    pub is_active: bool,
}

impl Service {
    /// Build a new, not-yet-probed service from a validated draft
    pub fn from_draft(draft: ServiceDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            url: draft.url,
            description: draft.description,
            status: draft.status,
            ip: draft.ip,
            cloud_provider: draft.cloud_provider,
            monthly_cost: draft.monthly_cost,
            supported_by: draft.supported_by,
            last_check: now,
            is_active: false,
        }
    }

    pub fn reachability(&self) -> Reachability {
        if self.is_active {
            Reachability::Healthy
        } else {
            Reachability::Unreachable
        }
    }
}
