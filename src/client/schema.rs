//! Report schema: the JSON shape requested from the backend, and strict
//! validation of what comes back.

use super::BackendError;
use crate::models::{DimensionScore, EvaluationModel, EvaluationReport, Issue};
use serde::Deserialize;
use serde_json::{json, Value};

/// Response schema in the Gemini structured-output dialect.
pub fn response_schema(model: EvaluationModel) -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "overallScore": { "type": "NUMBER", "description": "Overall score (0-100)" },
            "dimensionScores": {
                "type": "ARRAY",
                "description": format!("Scores for: {}", model.dimension_labels().join(", ")),
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "dimension": { "type": "STRING" },
                        "score": { "type": "NUMBER" },
                        "comment": { "type": "STRING" }
                    },
                    "required": ["dimension", "score", "comment"]
                }
            },
            "executiveSummary": { "type": "STRING" },
            "personaPerspective": { "type": "STRING" },
            "issues": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "severity": { "type": "STRING", "enum": model.severity_levels() },
                        "location": { "type": "STRING" },
                        "description": { "type": "STRING" },
                        "recommendation": { "type": "STRING" }
                    },
                    "required": ["severity", "location", "description", "recommendation"]
                }
            },
            "optimizationSuggestions": { "type": "ARRAY", "items": { "type": "STRING" } }
        },
        "required": [
            "overallScore",
            "dimensionScores",
            "executiveSummary",
            "personaPerspective",
            "issues",
            "optimizationSuggestions"
        ]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReport {
    overall_score: f64,
    dimension_scores: Vec<RawDimensionScore>,
    executive_summary: String,
    persona_perspective: String,
    issues: Vec<Issue>,
    optimization_suggestions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawDimensionScore {
    dimension: String,
    score: f64,
    comment: String,
}

/// Parse and validate backend output into an [`EvaluationReport`] stamped
/// with `model`.
///
/// Malformed JSON is a [`BackendError::Parse`]; JSON that is well-formed but
/// misses a required field, has an out-of-range score, or has the wrong
/// number of dimensions is a [`BackendError::Schema`]. Nothing is coerced.
pub fn parse_report(text: &str, model: EvaluationModel) -> Result<EvaluationReport, BackendError> {
    let body = strip_code_fence(text);
    let raw: RawReport = serde_json::from_str(body).map_err(|e| {
        if e.is_data() {
            BackendError::Schema(e.to_string())
        } else {
            BackendError::Parse(e.to_string())
        }
    })?;

    let expected = model.dimension_labels().len();
    if raw.dimension_scores.len() != expected {
        return Err(BackendError::Schema(format!(
            "expected {} dimension scores for {}, got {}",
            expected,
            model,
            raw.dimension_scores.len()
        )));
    }

    let dimension_scores = raw
        .dimension_scores
        .into_iter()
        .map(|d| {
            let score = validate_score(d.score, &d.dimension)?;
            Ok(DimensionScore {
                dimension: d.dimension,
                score,
                comment: d.comment,
            })
        })
        .collect::<Result<Vec<_>, BackendError>>()?;

    Ok(EvaluationReport {
        model_type: model,
        overall_score: validate_score(raw.overall_score, "overallScore")?,
        dimension_scores,
        executive_summary: raw.executive_summary,
        persona_perspective: raw.persona_perspective,
        issues: raw.issues,
        optimization_suggestions: raw.optimization_suggestions,
    })
}

fn validate_score(value: f64, field: &str) -> Result<u8, BackendError> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(BackendError::Schema(format!(
            "{} score {} is outside 0-100",
            field, value
        )));
    }
    Ok(value.round() as u8)
}

/// Some providers wrap JSON output in a Markdown code fence.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
