use serde::{Deserialize, Serialize};

/// Anchor rules used by the EDI-likeness check (spec §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdiAnchorRules {
    pub required: Vec<String>,
    pub extra: Vec<String>,
}

impl Default for EdiAnchorRules {
    fn default() -> Self {
        EdiAnchorRules {
            required: vec!["OCR-nr".into(), "Kundnr".into()],
            extra: vec!["Leveransvillkor".into(), "Betalningsvillkor".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiPolicyConfig {
    pub allow_ai_for_edi: bool,
    pub force_review_on_edi_fail: bool,
    pub min_edi_signals: usize,
    pub min_text_quality: f64,
    pub edi_anchor_rules: EdiAnchorRules,
    pub edi_table_patterns: Vec<String>,
    /// Absolute deadline handed to `AiProvider::complete` (spec §5: "must
    /// honor an absolute timeout, default 30 s").
    pub ai_timeout_ms: u64,
}

impl Default for AiPolicyConfig {
    fn default() -> Self {
        AiPolicyConfig {
            allow_ai_for_edi: false,
            force_review_on_edi_fail: true,
            min_edi_signals: 2,
            min_text_quality: 0.5,
            edi_anchor_rules: EdiAnchorRules::default(),
            edi_table_patterns: vec![r"^\d{4,}\s+\d".into()],
            ai_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub eps_abs: f64,
    pub eps_rel: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            eps_abs: 0.01,
            eps_rel: 0.005,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub max_attempts: usize,
    pub target_confidence: f64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        FallbackConfig {
            max_attempts: 3,
            target_confidence: 0.90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub enabled: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig { enabled: false }
    }
}

/// Immutable for the lifetime of a pipeline run (spec §5). Construct once per
/// caller, clone cheaply across concurrently-running pipelines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub ai_policy: AiPolicyConfig,
    pub validation: ValidationConfig,
    pub fallback: FallbackConfig,
    pub calibration: CalibrationConfig,
}
