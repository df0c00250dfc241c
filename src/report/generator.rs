//! Markdown and JSON report generation.
//!
//! This module renders a settled evaluation run: a cross-persona summary
//! when more than one persona produced a report, one section per persona,
//! and the personas that failed.

use crate::analysis::{summarize, CrossPersonaSummary, DimensionStats, Heatmap};
use crate::models::{EvaluationModel, EvaluationReport, Issue, Persona, ScoreLevel};
use crate::orchestrator::{PersonaFailure, RunResult};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Metadata about the run.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    /// Artifact kind: image, flow or video.
    pub artifact_kind: String,
    /// Where the artifact was loaded from.
    pub artifact_source: String,
    pub evaluation_model: EvaluationModel,
    pub provider: String,
    pub analysis_model: String,
    pub failure_policy: String,
    pub analysis_date: DateTime<Utc>,
    pub duration_seconds: f64,
    pub personas_selected: usize,
}

/// One persona's report, with where its optimized image was written.
#[derive(Debug, Clone, Serialize)]
pub struct PersonaSection {
    pub persona: Persona,
    pub report: EvaluationReport,
    pub optimized_image: Option<String>,
}

/// Everything rendered for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub metadata: ReportMetadata,
    pub summary: CrossPersonaSummary,
    pub personas: Vec<PersonaSection>,
    pub analysis_failures: Vec<PersonaFailure>,
    pub generation_failures: Vec<PersonaFailure>,
}

impl RunReport {
    /// Assemble the report for a run. Persona sections follow the order of
    /// `personas`; `image_paths` maps persona id to a written image file.
    pub fn build(
        metadata: ReportMetadata,
        result: &RunResult,
        personas: &[Persona],
        image_paths: &HashMap<String, String>,
    ) -> Self {
        let sections = personas
            .iter()
            .filter_map(|persona| {
                result.reports.get(&persona.id).map(|report| PersonaSection {
                    persona: persona.clone(),
                    report: report.clone(),
                    optimized_image: image_paths.get(&persona.id).cloned(),
                })
            })
            .collect();

        Self {
            metadata,
            summary: summarize(&result.reports, personas),
            personas: sections,
            analysis_failures: result.analysis_failures().to_vec(),
            generation_failures: result.generation_failures.clone(),
        }
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str("# UX Panel Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_table_of_contents(report));

    if report.summary.report_count > 1 {
        output.push_str(&generate_summary_section(&report.summary));
    }

    let model = report.metadata.evaluation_model;
    for section in &report.personas {
        output.push_str(&generate_persona_section(section, model));
    }

    output.push_str(&generate_failures_section(
        &report.analysis_failures,
        &report.generation_failures,
    ));
    output.push_str(&generate_footer());

    output
}

/// Generate a JSON report.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Artifact:** {} (`{}`)\n",
        metadata.artifact_kind, metadata.artifact_source
    ));
    section.push_str(&format!(
        "- **Evaluation Model:** {}\n",
        metadata.evaluation_model
    ));
    section.push_str(&format!(
        "- **Backend:** {} / `{}`\n",
        metadata.provider, metadata.analysis_model
    ));
    section.push_str(&format!("- **Failure Policy:** {}\n", metadata.failure_policy));
    section.push_str(&format!(
        "- **Analysis Date:** {}\n",
        metadata.analysis_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Personas Selected:** {}\n",
        metadata.personas_selected
    ));
    section.push_str(&format!(
        "- **Analysis Duration:** {:.1}s\n\n",
        metadata.duration_seconds
    ));

    section
}

fn anchor(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect()
}

fn generate_table_of_contents(report: &RunReport) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    if report.summary.report_count > 1 {
        toc.push_str("- [Cross-Persona Summary](#cross-persona-summary)\n");
    }
    for section in &report.personas {
        toc.push_str(&format!(
            "- [{}](#{})\n",
            section.persona.name,
            anchor(&section.persona.name)
        ));
    }
    if !report.analysis_failures.is_empty() || !report.generation_failures.is_empty() {
        toc.push_str("- [Failures](#failures)\n");
    }
    toc.push('\n');

    toc
}

/// Table cells cannot hold pipes or line breaks.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

fn score_badge(score: u8) -> String {
    let level = ScoreLevel::from_score(score);
    format!("{} **{}** ({})", level.emoji(), score, level)
}

fn generate_summary_section(summary: &CrossPersonaSummary) -> String {
    let mut section = String::new();

    section.push_str("## Cross-Persona Summary\n\n");
    section.push_str(&format!(
        "**Average Overall Score:** {} across {} personas\n\n",
        score_badge(summary.average_overall_score),
        summary.report_count
    ));
    section.push_str(&format!(
        "*Issues: {} | Suggestions: {}*\n\n",
        summary.total_issues(),
        summary.total_suggestions()
    ));

    if !summary.dimensions.is_empty() {
        section.push_str("### Dimensions\n\n");
        section.push_str("| Dimension | Average | Min | Max | Range | Best | Worst |\n");
        section.push_str("|:---|:---:|:---:|:---:|:---:|:---|:---|\n");
        for d in &summary.dimensions {
            section.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} ({}) | {} ({}) |\n",
                cell(&d.dimension),
                d.average,
                d.min,
                d.max,
                d.range,
                cell(&d.best.persona_name),
                d.best.score,
                cell(&d.worst.persona_name),
                d.worst.score
            ));
        }
        section.push('\n');

        section.push_str(&highlight_list("Strengths", &summary.strengths));
        section.push_str(&highlight_list("Weaknesses", &summary.weaknesses));
    }

    section.push_str(&generate_heatmap(&summary.heatmap));

    if !summary.hotspots.is_empty() {
        section.push_str("### Issue Hotspots\n\n");
        section.push_str("Locations reported by more than one persona.\n\n");
        for hotspot in &summary.hotspots {
            section.push_str(&format!(
                "#### {} ({} personas)\n\n",
                hotspot.location, hotspot.persona_count
            ));
            for tagged in &hotspot.issues {
                section.push_str(&format!(
                    "- **{}** [{}]: {}\n",
                    tagged.persona_name, tagged.issue.severity, tagged.issue.description
                ));
            }
            section.push('\n');
        }
    }

    if !summary.severity_histogram.is_empty() {
        section.push_str("### Issues by Severity\n\n");
        section.push_str("| Severity | Count |\n");
        section.push_str("|:---|:---:|\n");
        for entry in &summary.severity_histogram {
            section.push_str(&format!("| {} | {} |\n", cell(&entry.severity), entry.count));
        }
        section.push('\n');
    }

    section
}

fn highlight_list(title: &str, dimensions: &[DimensionStats]) -> String {
    if dimensions.is_empty() {
        return String::new();
    }

    let mut list = format!("**{}:**\n\n", title);
    for d in dimensions {
        list.push_str(&format!("- {} ({})\n", d.dimension, d.average));
    }
    list.push('\n');
    list
}

fn generate_heatmap(heatmap: &Heatmap) -> String {
    if heatmap.rows.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("### Score Heatmap\n\n");

    section.push_str("| Persona |");
    for column in &heatmap.columns {
        section.push_str(&format!(" {} |", cell(column)));
    }
    section.push_str(" Overall |\n|:---|");
    section.push_str(&":---:|".repeat(heatmap.columns.len() + 1));
    section.push('\n');

    for row in &heatmap.rows {
        let label = match row.persona_id {
            Some(_) => cell(&row.label),
            None => format!("**{}**", cell(&row.label)),
        };
        section.push_str(&format!("| {} |", label));
        for column in &heatmap.columns {
            match row.cell(column) {
                Some(score) => section.push_str(&format!(" {} |", score)),
                None => section.push_str(" - |"),
            }
        }
        section.push_str(&format!(" {} |\n", row.overall));
    }
    section.push('\n');

    section
}

/// Position of a severity in the model's vocabulary; unknown labels last.
fn severity_rank(model: EvaluationModel, severity: &str) -> usize {
    model
        .severity_levels()
        .iter()
        .position(|s| *s == severity)
        .unwrap_or(usize::MAX)
}

fn generate_persona_section(section: &PersonaSection, model: EvaluationModel) -> String {
    let persona = &section.persona;
    let report = &section.report;
    let mut out = String::new();

    out.push_str(&format!("## {}\n\n", persona.name));
    out.push_str(&format!(
        "*{} | {}*\n\n",
        persona.role,
        if persona.description.is_empty() {
            "No description"
        } else {
            persona.description.as_str()
        }
    ));
    out.push_str(&format!(
        "**Overall Score:** {}\n\n",
        score_badge(report.overall_score)
    ));

    if !report.executive_summary.is_empty() {
        out.push_str(&format!("{}\n\n", report.executive_summary));
    }
    if !report.persona_perspective.is_empty() {
        out.push_str(&format!("> {}\n\n", report.persona_perspective.replace('\n', "\n> ")));
    }

    if !report.dimension_scores.is_empty() {
        out.push_str("| Dimension | Score | Comment |\n");
        out.push_str("|:---|:---:|:---|\n");
        for d in &report.dimension_scores {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                cell(&d.dimension),
                d.score,
                cell(&d.comment)
            ));
        }
        out.push('\n');
    }

    if report.issues.is_empty() {
        out.push_str("No issues were reported by this persona.\n\n");
    } else {
        let mut issues: Vec<&Issue> = report.issues.iter().collect();
        issues.sort_by_key(|i| severity_rank(model, &i.severity));

        out.push_str(&format!("### Issues ({})\n\n", issues.len()));
        for issue in issues {
            out.push_str(&generate_issue_block(issue));
        }
    }

    if !report.optimization_suggestions.is_empty() {
        out.push_str("### Suggestions\n\n");
        for (i, suggestion) in report.optimization_suggestions.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, suggestion));
        }
        out.push('\n');
    }

    if let Some(ref path) = section.optimized_image {
        out.push_str(&format!("**Optimized design:** [{}]({})\n\n", path, path));
    }

    out
}

fn generate_issue_block(issue: &Issue) -> String {
    let mut block = String::new();

    block.push_str(&format!(
        "#### [{}] {}\n\n",
        issue.severity, issue.location
    ));
    if !issue.description.is_empty() {
        block.push_str(&format!("**Description:** {}\n\n", issue.description));
    }
    if !issue.recommendation.is_empty() {
        block.push_str(&format!("> 💡 **Recommendation:** {}\n\n", issue.recommendation));
    }

    block
}

fn generate_failures_section(analysis: &[PersonaFailure], generation: &[PersonaFailure]) -> String {
    if analysis.is_empty() && generation.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Failures\n\n");

    for failure in analysis {
        section.push_str(&format!(
            "- ❌ **{}**: analysis failed: {}\n",
            failure.persona_name, failure.reason
        ));
    }
    for failure in generation {
        section.push_str(&format!(
            "- ⚠️ **{}**: no optimized image: {}\n",
            failure.persona_name, failure.reason
        ));
    }
    section.push('\n');

    section
}

fn generate_footer() -> String {
    format!(
        "---\n\n*Report generated by uxpanel v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}
