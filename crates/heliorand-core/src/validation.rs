//! Statistical quality gate for conditioned blocks.
//!
//! Five tests run over every candidate block: Shannon entropy, chi-square
//! uniformity, Wald–Wolfowitz runs, lag-1 autocorrelation, and bit balance.
//! Their weighted sum is the quality score; a block passes only when both the
//! Shannon floor and the quality floor hold.
//!
//! Detailed verdicts also carry a zlib compression ratio and the chi-square
//! p-value as advisory diagnostics — neither participates in the pass
//! predicate.

use flate2::Compression;
use flate2::write::ZlibEncoder;
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::io::Write;

use crate::conditioning::quick_shannon;

/// Why a block was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectKind {
    /// Zero-length input.
    EmptyInput,
    /// Metrics computed but below the configured floors.
    BelowThreshold,
}

/// Per-test scores and advisory diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct VerdictDetail {
    pub chi_square_score: f64,
    pub runs_score: f64,
    pub autocorrelation_score: f64,
    pub bit_balance_score: f64,
    /// Chi-square p-value against the uniform byte distribution (advisory).
    pub chi_square_p: f64,
    /// zlib level-9 compression ratio; lower means more structure (advisory).
    pub compression_ratio: f64,
    pub min_required_shannon: f64,
}

/// Outcome of validating one block.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub passed: bool,
    pub quality_score: f64,
    pub shannon_entropy: f64,
    pub data_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject: Option<RejectKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<VerdictDetail>,
}

/// Statistical validator with configurable floors.
#[derive(Debug, Clone)]
pub struct EntropyValidator {
    min_shannon: f64,
    min_quality: f64,
}

impl Default for EntropyValidator {
    fn default() -> Self {
        Self {
            min_shannon: 7.8,
            min_quality: 0.75,
        }
    }
}

impl EntropyValidator {
    pub fn new(min_shannon: f64, min_quality: f64) -> Self {
        Self {
            min_shannon,
            min_quality,
        }
    }

    /// Validate one block, without per-test detail.
    pub fn validate(&self, data: &[u8]) -> Verdict {
        self.validate_inner(data, false)
    }

    /// Validate one block, including per-test scores and diagnostics.
    pub fn validate_detailed(&self, data: &[u8]) -> Verdict {
        self.validate_inner(data, true)
    }

    fn validate_inner(&self, data: &[u8], detailed: bool) -> Verdict {
        if data.is_empty() {
            return Verdict {
                passed: false,
                quality_score: 0.0,
                shannon_entropy: 0.0,
                data_size: 0,
                reject: Some(RejectKind::EmptyInput),
                detail: None,
            };
        }

        let shannon = quick_shannon(data);
        let (chi_score, chi_p) = chi_square(data);
        let runs = runs_score(data);
        let autocorr = autocorrelation_score(data, 1);
        let bits = bit_balance_score(data);

        let quality_score = shannon / 8.0 * 0.40
            + chi_score * 0.25
            + runs * 0.15
            + autocorr * 0.10
            + bits * 0.10;

        let passed = shannon >= self.min_shannon && quality_score >= self.min_quality;

        Verdict {
            passed,
            quality_score,
            shannon_entropy: shannon,
            data_size: data.len(),
            reject: (!passed).then_some(RejectKind::BelowThreshold),
            detail: detailed.then(|| VerdictDetail {
                chi_square_score: chi_score,
                runs_score: runs,
                autocorrelation_score: autocorr,
                bit_balance_score: bits,
                chi_square_p: chi_p,
                compression_ratio: compression_ratio(data),
                min_required_shannon: self.min_shannon,
            }),
        }
    }

    /// Validate many blocks, keeping only the passing ones.
    pub fn batch_validate(&self, blocks: Vec<Vec<u8>>) -> (Vec<Vec<u8>>, Vec<Verdict>) {
        let mut kept = Vec::new();
        let mut verdicts = Vec::with_capacity(blocks.len());
        for block in blocks {
            let verdict = self.validate(&block);
            if verdict.passed {
                kept.push(block);
            }
            verdicts.push(verdict);
        }
        log::debug!("batch validation kept {}/{} blocks", kept.len(), verdicts.len());
        (kept, verdicts)
    }
}

// ---------------------------------------------------------------------------
// Individual tests
// ---------------------------------------------------------------------------

/// Chi-square uniformity: (score, p-value). Needs at least 256 bytes.
///
/// For uniform bytes the statistic sits near 255 (its degrees of freedom);
/// the score decays with distance from that center.
fn chi_square(data: &[u8]) -> (f64, f64) {
    if data.len() < 256 {
        return (0.0, 0.0);
    }
    let mut hist = [0u64; 256];
    for &b in data {
        hist[b as usize] += 1;
    }
    let expected = data.len() as f64 / 256.0;
    let chi2: f64 = hist
        .iter()
        .map(|&c| {
            let diff = c as f64 - expected;
            diff * diff / expected
        })
        .sum();

    let score = 1.0 / (1.0 + (chi2 - 255.0).abs() / 100.0);
    let p = ChiSquared::new(255.0)
        .map(|dist| dist.sf(chi2))
        .unwrap_or(0.0);
    (score, p)
}

/// Wald–Wolfowitz runs around the median. Needs at least 10 bytes.
fn runs_score(data: &[u8]) -> f64 {
    if data.len() < 10 {
        return 0.0;
    }
    let mut sorted = data.to_vec();
    sorted.sort_unstable();
    let median = sorted[sorted.len() / 2];

    let binary: Vec<bool> = data.iter().map(|&b| b >= median).collect();
    let mut runs = 1u64;
    for pair in binary.windows(2) {
        if pair[0] != pair[1] {
            runs += 1;
        }
    }

    let n1 = binary.iter().filter(|&&b| b).count() as f64;
    let n0 = binary.len() as f64 - n1;
    if n1 == 0.0 || n0 == 0.0 {
        return 0.0;
    }

    let expected = 2.0 * n0 * n1 / (n0 + n1) + 1.0;
    let variance = (2.0 * n0 * n1 * (2.0 * n0 * n1 - n0 - n1))
        / ((n0 + n1) * (n0 + n1) * (n0 + n1 - 1.0));
    if variance <= 0.0 {
        return 0.0;
    }

    let z = ((runs as f64 - expected) / variance.sqrt()).abs();
    (1.0 - z / 4.0).max(0.0)
}

/// Lag-`lag` autocorrelation; low correlation scores high.
fn autocorrelation_score(data: &[u8], lag: usize) -> f64 {
    if data.len() <= lag {
        return 0.0;
    }
    let mean = data.iter().map(|&b| b as f64).sum::<f64>() / data.len() as f64;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for i in 0..data.len() - lag {
        let d1 = data[i] as f64 - mean;
        let d2 = data[i + lag] as f64 - mean;
        numerator += d1 * d2;
        denominator += d1 * d1;
    }
    if denominator == 0.0 {
        return 0.0;
    }

    let correlation = (numerator / denominator).abs();
    (1.0 - correlation).max(0.0)
}

/// Set-bit ratio; 0.5 scores 1.0, all-ones or all-zeros score 0.0.
fn bit_balance_score(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let ones: u64 = data.iter().map(|&b| b.count_ones() as u64).sum();
    let total = data.len() as u64 * 8;
    let ratio = ones as f64 / total as f64;
    (1.0 - (ratio - 0.5).abs() * 2.0).max(0.0)
}

/// zlib level-9 compression ratio as a structure proxy.
fn compression_ratio(data: &[u8]) -> f64 {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::best());
    if enc.write_all(data).is_err() {
        return 0.0;
    }
    match enc.finish() {
        Ok(compressed) => compressed.len() as f64 / data.len() as f64,
        Err(_) => 0.0,
    }
}
