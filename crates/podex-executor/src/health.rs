// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Typed output parsers for the deploy/e2e health-check tools.
//!
//! Each check mode is a variant of [`HealthCheck`], and each JSON-emitting
//! tool carries its own penalty-weight struct — the compiler enforces that
//! every mode's configuration is complete. Scores are 0–100.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HealthCheck {
    /// Pass/fail from the exit code alone.
    ExitCode {
        #[serde(default = "default_success_codes")]
        success_codes: Vec<i64>,
    },
    /// Tool-specific JSON output.
    Json { tool: JsonTool },
    /// Score by counting regex matches in the output.
    Regex {
        pattern: String,
        #[serde(default = "default_match_weight")]
        match_weight: f64,
    },
    /// Score by output line count (linters that print one finding per line).
    LineCount {
        #[serde(default = "default_line_weight")]
        line_weight: f64,
    },
}

fn default_success_codes() -> Vec<i64> {
    vec![0]
}
fn default_match_weight() -> f64 {
    5.0
}
fn default_line_weight() -> f64 {
    2.0
}

/// JSON-emitting tools with their penalty weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonTool {
    Eslint {
        #[serde(default = "default_error_weight")]
        error_weight: f64,
        #[serde(default = "default_warning_weight")]
        warning_weight: f64,
    },
    Ruff {
        #[serde(default = "default_error_weight")]
        error_weight: f64,
        #[serde(default = "default_warning_weight")]
        warning_weight: f64,
    },
    NpmAudit {
        #[serde(default = "default_critical_weight")]
        critical_weight: f64,
        #[serde(default = "default_high_weight")]
        high_weight: f64,
        #[serde(default = "default_moderate_weight")]
        moderate_weight: f64,
        #[serde(default = "default_low_weight")]
        low_weight: f64,
    },
    /// Coverage summaries (jest/pytest style): score is the percentage.
    Coverage,
}

fn default_error_weight() -> f64 {
    5.0
}
fn default_warning_weight() -> f64 {
    1.0
}
fn default_critical_weight() -> f64 {
    25.0
}
fn default_high_weight() -> f64 {
    15.0
}
fn default_moderate_weight() -> f64 {
    5.0
}
fn default_low_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub score: f64,
    pub passed: bool,
    #[serde(default)]
    pub errors: u64,
    #[serde(default)]
    pub warnings: u64,
    #[serde(default)]
    pub detail: Option<String>,
}

impl HealthCheck {
    /// Parse tool output into a score. Unparsable output scores 0 with the
    /// reason in `detail` — a broken check must look unhealthy, not pass.
    pub fn evaluate(&self, output: &str, exit_code: i64) -> HealthReport {
        match self {
            HealthCheck::ExitCode { success_codes } => {
                let passed = success_codes.contains(&exit_code);
                HealthReport {
                    score: if passed { 100.0 } else { 0.0 },
                    passed,
                    errors: u64::from(!passed),
                    warnings: 0,
                    detail: None,
                }
            }
            HealthCheck::Json { tool } => match extract_json(output) {
                Some(data) => tool.evaluate(&data),
                None => failed_report("no JSON found in output"),
            },
            HealthCheck::Regex {
                pattern,
                match_weight,
            } => match Regex::new(pattern) {
                Ok(re) => {
                    let matches = re.find_iter(output).count() as u64;
                    let score = (100.0 - matches as f64 * match_weight).max(0.0);
                    HealthReport {
                        score,
                        passed: matches == 0,
                        errors: matches,
                        warnings: 0,
                        detail: None,
                    }
                }
                Err(e) => failed_report(&format!("invalid pattern: {e}")),
            },
            HealthCheck::LineCount { line_weight } => {
                let lines = output.lines().filter(|l| !l.trim().is_empty()).count() as u64;
                let score = (100.0 - lines as f64 * line_weight).max(0.0);
                HealthReport {
                    score,
                    passed: lines == 0,
                    errors: lines,
                    warnings: 0,
                    detail: None,
                }
            }
        }
    }
}

impl JsonTool {
    fn evaluate(&self, data: &Value) -> HealthReport {
        match self {
            JsonTool::Eslint {
                error_weight,
                warning_weight,
            } => {
                // eslint --format json: an array of file reports.
                let (errors, warnings) = data
                    .as_array()
                    .map(|files| {
                        files.iter().fold((0u64, 0u64), |(e, w), f| {
                            (
                                e + f.get("errorCount").and_then(Value::as_u64).unwrap_or(0),
                                w + f.get("warningCount").and_then(Value::as_u64).unwrap_or(0),
                            )
                        })
                    })
                    .unwrap_or((0, 0));
                weighted_report(errors, warnings, *error_weight, *warning_weight)
            }
            JsonTool::Ruff {
                error_weight,
                warning_weight,
            } => {
                // ruff --output-format json: an array of diagnostics;
                // E/F codes are errors, the rest warnings.
                let mut errors = 0u64;
                let mut warnings = 0u64;
                if let Some(diags) = data.as_array() {
                    for d in diags {
                        let code = d.get("code").and_then(Value::as_str).unwrap_or("");
                        if code.starts_with('E') || code.starts_with('F') {
                            errors += 1;
                        } else {
                            warnings += 1;
                        }
                    }
                }
                weighted_report(errors, warnings, *error_weight, *warning_weight)
            }
            JsonTool::NpmAudit {
                critical_weight,
                high_weight,
                moderate_weight,
                low_weight,
            } => {
                let sev = |name: &str| -> u64 {
                    data.pointer(&format!("/metadata/vulnerabilities/{name}"))
                        .and_then(Value::as_u64)
                        .unwrap_or(0)
                };
                let (critical, high, moderate, low) =
                    (sev("critical"), sev("high"), sev("moderate"), sev("low"));
                let penalty = critical as f64 * critical_weight
                    + high as f64 * high_weight
                    + moderate as f64 * moderate_weight
                    + low as f64 * low_weight;
                let score = (100.0 - penalty).max(0.0);
                HealthReport {
                    score,
                    passed: critical == 0 && high == 0,
                    errors: critical + high,
                    warnings: moderate + low,
                    detail: None,
                }
            }
            JsonTool::Coverage => {
                let pct = data
                    .pointer("/total/lines/pct")
                    .or_else(|| data.pointer("/totals/percent_covered"))
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                HealthReport {
                    score: pct.clamp(0.0, 100.0),
                    passed: pct >= 80.0,
                    errors: 0,
                    warnings: 0,
                    detail: None,
                }
            }
        }
    }
}

fn weighted_report(errors: u64, warnings: u64, error_weight: f64, warning_weight: f64) -> HealthReport {
    let penalty = errors as f64 * error_weight + warnings as f64 * warning_weight;
    HealthReport {
        score: (100.0 - penalty).max(0.0),
        passed: errors == 0,
        errors,
        warnings,
        detail: None,
    }
}

fn failed_report(reason: &str) -> HealthReport {
    HealthReport {
        score: 0.0,
        passed: false,
        errors: 0,
        warnings: 0,
        detail: Some(reason.to_string()),
    }
}

/// Tools often wrap their JSON in log noise; extract the outermost
/// bracketed region.
fn extract_json(output: &str) -> Option<Value> {
    let start = output.find(['[', '{'])?;
    let end = output.rfind([']', '}'])?;
    if end < start {
        return None;
    }
    serde_json::from_str(&output[start..=end]).ok()
}

// ── Unit tests ────────────────────────────────────────────────────────────────
