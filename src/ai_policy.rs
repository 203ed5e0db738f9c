//! Stage 10: AI Policy Gate (spec §4.8). `evaluate_ai_policy` is a pure
//! function — same inputs, same `AIPolicyDecision`, always (P4 policy
//! parity depends on this).

use crate::profile::AiPolicyConfig;
use crate::types::{AIPolicyDecision, EdiSignals, ReasonFlag, Row, ValidationResult, ValidationStatus};
use regex::Regex;

pub const POLICY_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSourceKind {
    TextLayer,
    Ocr,
}

/// Central pure policy function (spec §4.8). Rules short-circuit in the
/// documented order; the first rule that fires determines the decision.
pub fn evaluate_ai_policy(
    extraction_source: ExtractionSourceKind,
    text_quality: f64,
    validation_result: &ValidationResult,
    edi_signals: &EdiSignals,
    policy_config: &AiPolicyConfig,
    fallback_attempted: bool,
    fallback_passed: bool,
) -> AIPolicyDecision {
    let validation_passed = matches!(validation_result.status, ValidationStatus::Ok);
    let edi_like = is_edi_like(edi_signals, policy_config);

    let mut reason_flags = Vec::new();

    if validation_passed {
        reason_flags.push(ReasonFlag::ValidationOk);
        return decision(false, reason_flags, edi_like, edi_signals);
    }

    if edi_like && !policy_config.allow_ai_for_edi {
        reason_flags.push(ReasonFlag::EdiLikeBlocked);
        if policy_config.force_review_on_edi_fail {
            reason_flags.push(ReasonFlag::ForceReview);
        }
        return decision(false, reason_flags, edi_like, edi_signals);
    }

    if fallback_attempted && fallback_passed {
        reason_flags.push(ReasonFlag::FallbackOk);
        return decision(false, reason_flags, edi_like, edi_signals);
    }

    if text_quality < policy_config.min_text_quality && extraction_source == ExtractionSourceKind::TextLayer {
        reason_flags.push(ReasonFlag::LowTextQuality);
        if fallback_attempted && !fallback_passed {
            reason_flags.push(ReasonFlag::FallbackFailed);
        }
        return decision(true, reason_flags, edi_like, edi_signals);
    }

    if missing_critical_fields(validation_result) {
        reason_flags.push(ReasonFlag::MissingCriticalFields);
        return decision(true, reason_flags, edi_like, edi_signals);
    }

    reason_flags.push(ReasonFlag::NoTrigger);
    decision(false, reason_flags, edi_like, edi_signals)
}

fn missing_critical_fields(validation_result: &ValidationResult) -> bool {
    matches!(validation_result.status, ValidationStatus::Failed | ValidationStatus::Review)
        && validation_result.declared_total.is_none()
}

fn decision(
    allow_ai: bool,
    reason_flags: Vec<ReasonFlag>,
    edi_like: bool,
    edi_signals: &EdiSignals,
) -> AIPolicyDecision {
    AIPolicyDecision {
        allow_ai,
        reason_flags,
        edi_like,
        edi_signals: edi_signals.clone(),
        policy_version: POLICY_VERSION.to_string(),
    }
}

fn is_edi_like(signals: &EdiSignals, _config: &AiPolicyConfig) -> bool {
    // `evaluate_edi_signals` already folded the min-signal-count threshold
    // into which anchors/patterns it reports; here we just need the fact.
    !signals.anchors_matched.is_empty() && !signals.patterns_matched.is_empty()
}

/// Computes EDI-likeness signals across every page of a document (spec
/// §4.8). `edi_like` requires all pages to have used the text layer, at
/// least `min_edi_signals` anchors matched (required ∪ extra), and at
/// least one items row matching an `edi_table_patterns` entry.
pub fn evaluate_edi_signals(
    all_pages_used_text_layer: bool,
    header_and_footer_text: &str,
    items_rows: &[Row],
    config: &AiPolicyConfig,
    average_text_quality: f64,
) -> EdiSignals {
    let lower = header_and_footer_text.to_lowercase();

    let mut anchors_matched: Vec<String> = config
        .edi_anchor_rules
        .required
        .iter()
        .chain(config.edi_anchor_rules.extra.iter())
        .filter(|a| lower.contains(&a.to_lowercase()))
        .cloned()
        .collect();
    anchors_matched.dedup();

    let mut patterns_matched = Vec::new();
    for pattern in &config.edi_table_patterns {
        let Ok(re) = Regex::new(pattern) else { continue };
        if items_rows.iter().any(|r| re.is_match(&r.text())) {
            patterns_matched.push(pattern.clone());
        }
    }

    let enough_signals = all_pages_used_text_layer && anchors_matched.len() >= config.min_edi_signals;
    let enough_patterns = !patterns_matched.is_empty();

    EdiSignals {
        // Empty these out when the thresholds are not met, so downstream
        // `is_edi_like` (which looks only at non-emptiness) tracks the
        // configured minimums rather than raw anchor presence.
        anchors_matched: if enough_signals { anchors_matched } else { Vec::new() },
        patterns_matched: if enough_patterns { patterns_matched } else { Vec::new() },
        text_quality: average_text_quality,
    }
}
