use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
}

impl PlanTier {
    pub fn parse(value: &str) -> Self {
        match value {
            "pro" => Self::Pro,
            _ => Self::Free,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
        }
    }
}

/// Capability check deciding whether a plan may invoke a model.
///
/// The production implementation classifies by name only; a model
/// metadata registry can slot in here without touching resolution.
pub trait ModelGate: Send + Sync {
    fn allows(&self, plan: PlanTier, model: &str) -> bool;
}

/// Coarse size heuristic: model naming conventions encode parameter
/// count as a suffix token, so a substring denylist is enough to keep
/// free-tier users on 3B models and smaller.
pub struct SizeMarkerGate;

const RESTRICTED_MARKERS: [&str; 4] = ["7b", "13b", "70b", "34b"];

impl ModelGate for SizeMarkerGate {
    fn allows(&self, plan: PlanTier, model: &str) -> bool {
        match plan {
            PlanTier::Pro => true,
            PlanTier::Free => {
                let lower = model.to_lowercase();
                !RESTRICTED_MARKERS.iter().any(|marker| lower.contains(marker))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Model \"{model}\" requires Pro plan. Free users can use 3B models and smaller.")]
    PlanRejected { model: String },
}

pub struct AccessPolicy {
    fallback_model: String,
    gate: Box<dyn ModelGate>,
}

impl AccessPolicy {
    pub fn new(fallback_model: impl Into<String>) -> Self {
        Self::with_gate(fallback_model, Box::new(SizeMarkerGate))
    }

    pub fn with_gate(fallback_model: impl Into<String>, gate: Box<dyn ModelGate>) -> Self {
        Self {
            fallback_model: fallback_model.into(),
            gate,
        }
    }

    /// Pure resolution over (request, catalog snapshot, policy config).
    ///
    /// The requested model is kept only when the catalog confirms it is
    /// installed, or when the catalog is unavailable and nothing better
    /// is known. Otherwise the first installed model (or the configured
    /// fallback) is substituted before the plan gate runs.
    pub fn resolve_model(
        &self,
        requested: Option<&str>,
        installed: &[String],
        plan: PlanTier,
    ) -> Result<String, PolicyError> {
        let default = installed
            .first()
            .map(String::as_str)
            .unwrap_or(&self.fallback_model);

        let model = match requested {
            Some(m) if installed.is_empty() || installed.iter().any(|i| i == m) => m,
            _ => default,
        };

        if !self.gate.allows(plan, model) {
            return Err(PolicyError::PlanRejected {
                model: model.to_string(),
            });
        }

        Ok(model.to_string())
    }
}
