//! Confidence Calibration (spec §4.11). Maps raw extractor confidences to
//! empirical correctness via per-(supplier, field) isotonic regression with
//! a fallback chain. Entirely optional — its absence must degrade
//! gracefully to raw confidences (every caller of `CalibrationRegistry`
//! treats `None` the same as "no calibration available").

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref SAFE_FILENAME: Regex = Regex::new(r"^[A-Za-z0-9._-]{1,120}$").unwrap();
}

/// Sanitizes a calibration artefact filename to `[A-Za-z0-9._-]`, length
/// ≤120, to prevent path traversal when artefacts are loaded by name.
pub fn sanitize_filename(name: &str) -> Option<&str> {
    SAFE_FILENAME.is_match(name).then_some(name)
}

/// One isotonic calibration curve, fit by pooled-adjacent-violators (PAV)
/// over (raw_score, empirical_correctness) pairs aggregated by rounded raw
/// score, weighted by the number of samples in each bin.
#[derive(Debug, Clone)]
pub struct IsotonicModel {
    /// Monotonically non-decreasing; parallel to `calibrated`.
    thresholds: Vec<f64>,
    calibrated: Vec<f64>,
    pub sample_count: usize,
}

impl IsotonicModel {
    /// Fits an isotonic model from raw (predicted confidence, was_correct)
    /// observation pairs, aggregating by raw score rounded to 2 decimals.
    pub fn fit(observations: &[(f64, bool)]) -> Self {
        let mut buckets: HashMap<i64, (f64, f64)> = HashMap::new();
        for &(raw, correct) in observations {
            let key = (raw * 100.0).round() as i64;
            let entry = buckets.entry(key).or_insert((0.0, 0.0));
            entry.0 += 1.0;
            entry.1 += if correct { 1.0 } else { 0.0 };
        }
        let mut points: Vec<(f64, f64, f64)> = buckets
            .into_iter()
            .map(|(key, (count, hits))| (key as f64 / 100.0, hits / count, count))
            .collect();
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

        let (thresholds, calibrated) = pool_adjacent_violators(&points);

        IsotonicModel {
            thresholds,
            calibrated,
            sample_count: observations.len(),
        }
    }

    pub fn predict(&self, raw: f64) -> f64 {
        if self.thresholds.is_empty() {
            return raw;
        }
        match self.thresholds.binary_search_by(|t| t.partial_cmp(&raw).unwrap()) {
            Ok(i) => self.calibrated[i],
            Err(0) => self.calibrated[0],
            Err(i) if i >= self.thresholds.len() => *self.calibrated.last().unwrap(),
            Err(i) => {
                // Linear interpolation between the two bracketing points.
                let (x0, y0) = (self.thresholds[i - 1], self.calibrated[i - 1]);
                let (x1, y1) = (self.thresholds[i], self.calibrated[i]);
                if (x1 - x0).abs() < f64::EPSILON {
                    y0
                } else {
                    y0 + (y1 - y0) * (raw - x0) / (x1 - x0)
                }
            }
        }
    }
}

/// Pooled-adjacent-violators: merges adjacent points whose weighted means
/// would otherwise violate monotonicity, producing a non-decreasing curve.
fn pool_adjacent_violators(points: &[(f64, f64, f64)]) -> (Vec<f64>, Vec<f64>) {
    // Each pooled block tracks (sum_x*w / keeps threshold as last-x-in-block,
    // weighted mean y, total weight).
    struct Block {
        x: f64,
        y: f64,
        weight: f64,
    }
    let mut blocks: Vec<Block> = Vec::new();
    for &(x, y, w) in points {
        blocks.push(Block { x, y, weight: w });
        while blocks.len() >= 2 {
            let n = blocks.len();
            if blocks[n - 2].y > blocks[n - 1].y {
                let b = blocks.pop().unwrap();
                let a = blocks.pop().unwrap();
                let total_weight = a.weight + b.weight;
                let merged_y = (a.y * a.weight + b.y * b.weight) / total_weight;
                blocks.push(Block { x: b.x, y: merged_y, weight: total_weight });
            } else {
                break;
            }
        }
    }
    (blocks.iter().map(|b| b.x).collect(), blocks.iter().map(|b| b.y).collect())
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CalibrationKey {
    supplier: Option<String>,
    field: Option<String>,
}

/// Immutable once built; a retrain produces a new registry and the caller
/// swaps it in atomically (spec §5 shared-resource policy).
#[derive(Debug, Clone, Default)]
pub struct CalibrationRegistry {
    models: HashMap<CalibrationKey, IsotonicModel>,
}

const MIN_SAMPLES_SUPPLIER_FIELD: usize = 200;
const MIN_SAMPLES_SUPPLIER_ANY: usize = 150;
const MIN_SAMPLES_ANY_FIELD: usize = 100;
const MIN_SAMPLES_GLOBAL: usize = 50;

impl CalibrationRegistry {
    pub fn new() -> Self {
        CalibrationRegistry { models: HashMap::new() }
    }

    pub fn train_group(&mut self, supplier: Option<&str>, field: Option<&str>, observations: &[(f64, bool)]) {
        let model = IsotonicModel::fit(observations);
        self.models.insert(
            CalibrationKey { supplier: supplier.map(str::to_string), field: field.map(str::to_string) },
            model,
        );
    }

    /// Calibrates a raw confidence, walking the fallback chain
    /// (supplier, field) → (supplier, *) → (*, field) → (*, *), each gated
    /// by its adaptive minimum sample count. Returns the raw confidence
    /// unchanged if no tier has enough samples.
    pub fn calibrate(&self, supplier: Option<&str>, field: &str, raw: f64) -> f64 {
        let chain = [
            (CalibrationKey { supplier: supplier.map(str::to_string), field: Some(field.to_string()) }, MIN_SAMPLES_SUPPLIER_FIELD),
            (CalibrationKey { supplier: supplier.map(str::to_string), field: None }, MIN_SAMPLES_SUPPLIER_ANY),
            (CalibrationKey { supplier: None, field: Some(field.to_string()) }, MIN_SAMPLES_ANY_FIELD),
            (CalibrationKey { supplier: None, field: None }, MIN_SAMPLES_GLOBAL),
        ];
        for (key, min_samples) in chain {
            if let Some(model) = self.models.get(&key) {
                if model.sample_count >= min_samples {
                    return model.predict(raw);
                }
            }
        }
        raw
    }
}

/// Reliability summary using equal-frequency (quantile) bins, not
/// equal-width (spec §4.11).
#[derive(Debug, Clone)]
pub struct ReliabilityReport {
    pub ece: f64,
    pub mce: f64,
    pub bin_count: usize,
    pub sample_count: usize,
}

pub fn reliability_report(observations: &[(f64, bool)], target_bins: usize) -> ReliabilityReport {
    let n = observations.len();
    if n == 0 || target_bins == 0 {
        return ReliabilityReport { ece: 0.0, mce: 0.0, bin_count: 0, sample_count: n };
    }

    let mut sorted: Vec<(f64, bool)> = observations.to_vec();
    sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let bin_count = target_bins.min(n);
    let base_size = n / bin_count;
    let remainder = n % bin_count;

    let mut ece = 0.0;
    let mut mce: f64 = 0.0;
    let mut idx = 0;
    let mut populated_bins = 0;

    for b in 0..bin_count {
        let size = base_size + if b < remainder { 1 } else { 0 };
        if size == 0 {
            continue;
        }
        let slice = &sorted[idx..idx + size];
        idx += size;
        let avg_confidence: f64 = slice.iter().map(|(c, _)| c).sum::<f64>() / size as f64;
        let accuracy = slice.iter().filter(|(_, correct)| *correct).count() as f64 / size as f64;
        let gap = (avg_confidence - accuracy).abs();
        ece += gap * (size as f64 / n as f64);
        mce = mce.max(gap);
        populated_bins += 1;
    }

    ReliabilityReport { ece, mce, bin_count: populated_bins, sample_count: n }
}

/// `τ(N)` recalibration threshold (spec §4.11). Only meaningful when at
/// least 5 bins have data, per the spec's own caveat.
pub fn recalibration_threshold(n: usize) -> f64 {
    if n < 200 {
        0.08
    } else if n < 500 {
        0.06
    } else {
        0.05
    }
}

pub fn should_recalibrate(report: &ReliabilityReport) -> bool {
    report.bin_count >= 5 && report.ece > recalibration_threshold(report.sample_count)
}
