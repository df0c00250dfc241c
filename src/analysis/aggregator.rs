//! Cross-persona aggregation and statistics.
//!
//! [`summarize`] turns the settled report map of a run into the numbers the
//! report renders: averages, per-dimension spread, strengths and weaknesses,
//! issue hotspots, a severity histogram and a score heatmap. It is a pure
//! function of its inputs. Input order is the order of the persona slice,
//! and every tie is broken by that order.

use crate::models::{EvaluationReport, Issue, Persona};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Number of dimensions reported as strengths and as weaknesses.
pub const HIGHLIGHT_COUNT: usize = 3;

/// Label of the synthetic heatmap row holding the averages.
pub const AVERAGE_ROW_LABEL: &str = "Average";

/// A single persona's score and comment for one dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreAttribution {
    pub persona_id: String,
    pub persona_name: String,
    pub score: u8,
    pub comment: String,
}

/// Spread of one dimension across personas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionStats {
    pub dimension: String,
    pub average: u8,
    pub min: u8,
    pub max: u8,
    pub range: u8,
    pub best: ScoreAttribution,
    pub worst: ScoreAttribution,
}

/// An issue tagged with the persona that reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggedIssue {
    pub persona_id: String,
    pub persona_name: String,
    #[serde(flatten)]
    pub issue: Issue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggedSuggestion {
    pub persona_name: String,
    pub text: String,
}

/// A location cited by two or more distinct personas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hotspot {
    pub location: String,
    pub persona_count: usize,
    /// Names of the citing personas, in input order.
    pub personas: Vec<String>,
    pub issues: Vec<TaggedIssue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeverityCount {
    pub severity: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeverityGroup {
    pub severity: String,
    pub issues: Vec<TaggedIssue>,
}

/// One heatmap row. Cells are keyed by dimension label; a dimension the
/// persona did not score has no cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeatmapRow {
    pub label: String,
    /// `None` for the average row.
    pub persona_id: Option<String>,
    pub cells: BTreeMap<String, u8>,
    pub overall: u8,
}

impl HeatmapRow {
    pub fn cell(&self, dimension: &str) -> Option<u8> {
        self.cells.get(dimension).copied()
    }
}

/// Persona x dimension score grid plus a trailing average row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Heatmap {
    /// Dimension labels in first-encountered order.
    pub columns: Vec<String>,
    pub rows: Vec<HeatmapRow>,
}

/// Aggregate statistics over every report of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrossPersonaSummary {
    pub report_count: usize,
    pub average_overall_score: u8,
    /// Per-dimension statistics in first-encountered order.
    pub dimensions: Vec<DimensionStats>,
    pub strengths: Vec<DimensionStats>,
    pub weaknesses: Vec<DimensionStats>,
    pub issues: Vec<TaggedIssue>,
    pub hotspots: Vec<Hotspot>,
    pub severity_histogram: Vec<SeverityCount>,
    pub issues_by_severity: Vec<SeverityGroup>,
    pub suggestions: Vec<TaggedSuggestion>,
    pub heatmap: Heatmap,
}

impl CrossPersonaSummary {
    pub fn total_issues(&self) -> usize {
        self.issues.len()
    }

    pub fn total_suggestions(&self) -> usize {
        self.suggestions.len()
    }

    pub fn dimension(&self, label: &str) -> Option<&DimensionStats> {
        self.dimensions.iter().find(|d| d.dimension == label)
    }

    pub fn severity_count(&self, severity: &str) -> usize {
        self.severity_histogram
            .iter()
            .find(|s| s.severity == severity)
            .map(|s| s.count)
            .unwrap_or(0)
    }
}

/// A report together with the persona it belongs to.
struct Entry<'a> {
    id: &'a str,
    name: &'a str,
    report: &'a EvaluationReport,
}

/// Reports in input order: first those of `personas`, in slice order, then
/// any report without a persona record, by id, named by its id.
fn ordered_entries<'a>(
    reports: &'a HashMap<String, EvaluationReport>,
    personas: &'a [Persona],
) -> Vec<Entry<'a>> {
    let mut entries: Vec<Entry<'a>> = personas
        .iter()
        .filter_map(|p| {
            reports.get(&p.id).map(|report| Entry {
                id: &p.id,
                name: &p.name,
                report,
            })
        })
        .collect();

    let known: HashSet<&str> = personas.iter().map(|p| p.id.as_str()).collect();
    let mut orphans: Vec<_> = reports
        .iter()
        .filter(|(id, _)| !known.contains(id.as_str()))
        .collect();
    orphans.sort_by(|a, b| a.0.cmp(b.0));
    entries.extend(orphans.into_iter().map(|(id, report)| Entry {
        id,
        name: id,
        report,
    }));

    entries
}

fn rounded_mean(values: impl ExactSizeIterator<Item = u8>) -> u8 {
    let n = values.len();
    if n == 0 {
        return 0;
    }
    let sum: u32 = values.map(u32::from).sum();
    (f64::from(sum) / n as f64).round() as u8
}

/// Summarize a run's reports across personas.
pub fn summarize(
    reports: &HashMap<String, EvaluationReport>,
    personas: &[Persona],
) -> CrossPersonaSummary {
    let entries = ordered_entries(reports, personas);
    if entries.is_empty() {
        return CrossPersonaSummary::default();
    }

    let average_overall_score = rounded_mean(entries.iter().map(|e| e.report.overall_score));
    let dimensions = dimension_stats(&entries);
    let (strengths, weaknesses) = rank_dimensions(&dimensions);

    let issues: Vec<TaggedIssue> = entries
        .iter()
        .flat_map(|e| {
            e.report.issues.iter().map(move |issue| TaggedIssue {
                persona_id: e.id.to_string(),
                persona_name: e.name.to_string(),
                issue: issue.clone(),
            })
        })
        .collect();

    let suggestions = entries
        .iter()
        .flat_map(|e| {
            e.report
                .optimization_suggestions
                .iter()
                .map(move |text| TaggedSuggestion {
                    persona_name: e.name.to_string(),
                    text: text.clone(),
                })
        })
        .collect();

    let issues_by_severity = group_by_severity(&issues);
    let severity_histogram = issues_by_severity
        .iter()
        .map(|g| SeverityCount {
            severity: g.severity.clone(),
            count: g.issues.len(),
        })
        .collect();

    CrossPersonaSummary {
        report_count: entries.len(),
        average_overall_score,
        heatmap: heatmap(&entries, &dimensions, average_overall_score),
        hotspots: find_hotspots(&issues),
        dimensions,
        strengths,
        weaknesses,
        issues,
        severity_histogram,
        issues_by_severity,
        suggestions,
    }
}

/// Group dimension scores by exact label and compute their spread.
fn dimension_stats(entries: &[Entry<'_>]) -> Vec<DimensionStats> {
    let mut groups: Vec<(&str, Vec<ScoreAttribution>)> = Vec::new();

    for entry in entries {
        for score in &entry.report.dimension_scores {
            let attribution = ScoreAttribution {
                persona_id: entry.id.to_string(),
                persona_name: entry.name.to_string(),
                score: score.score,
                comment: score.comment.clone(),
            };
            match groups.iter().position(|(label, _)| *label == score.dimension) {
                Some(idx) => groups[idx].1.push(attribution),
                None => groups.push((score.dimension.as_str(), vec![attribution])),
            }
        }
    }

    groups
        .into_iter()
        .filter_map(|(label, scores)| {
            // First maximum and first minimum win ties.
            let best = scores
                .iter()
                .fold(None::<&ScoreAttribution>, |acc, s| match acc {
                    Some(b) if b.score >= s.score => Some(b),
                    _ => Some(s),
                })?;
            let worst = scores
                .iter()
                .fold(None::<&ScoreAttribution>, |acc, s| match acc {
                    Some(w) if w.score <= s.score => Some(w),
                    _ => Some(s),
                })?;

            Some(DimensionStats {
                dimension: label.to_string(),
                average: rounded_mean(scores.iter().map(|s| s.score)),
                min: worst.score,
                max: best.score,
                range: best.score - worst.score,
                best: best.clone(),
                worst: worst.clone(),
            })
        })
        .collect()
}

/// Top and bottom dimensions by average. Ties keep first-encountered order.
fn rank_dimensions(dimensions: &[DimensionStats]) -> (Vec<DimensionStats>, Vec<DimensionStats>) {
    let mut ranked = dimensions.to_vec();
    ranked.sort_by(|a, b| b.average.cmp(&a.average));

    let strengths = ranked.iter().take(HIGHLIGHT_COUNT).cloned().collect();
    let weaknesses = ranked.iter().rev().take(HIGHLIGHT_COUNT).cloned().collect();
    (strengths, weaknesses)
}

/// Locations cited by at least two distinct personas, most cited first.
fn find_hotspots(issues: &[TaggedIssue]) -> Vec<Hotspot> {
    let mut by_location: Vec<Hotspot> = Vec::new();

    for tagged in issues {
        let idx = match by_location
            .iter()
            .position(|h| h.location == tagged.issue.location)
        {
            Some(idx) => idx,
            None => {
                by_location.push(Hotspot {
                    location: tagged.issue.location.clone(),
                    persona_count: 0,
                    personas: Vec::new(),
                    issues: Vec::new(),
                });
                by_location.len() - 1
            }
        };
        let hotspot = &mut by_location[idx];
        hotspot.issues.push(tagged.clone());
        if !hotspot
            .issues
            .iter()
            .take(hotspot.issues.len() - 1)
            .any(|i| i.persona_id == tagged.persona_id)
        {
            hotspot.personas.push(tagged.persona_name.clone());
            hotspot.persona_count += 1;
        }
    }

    let mut hotspots: Vec<Hotspot> = by_location
        .into_iter()
        .filter(|h| h.persona_count >= 2)
        .collect();
    hotspots.sort_by_key(|h| std::cmp::Reverse(h.persona_count));
    hotspots
}

/// Issues grouped by literal severity label, in first-encountered order.
fn group_by_severity(issues: &[TaggedIssue]) -> Vec<SeverityGroup> {
    let mut groups: Vec<SeverityGroup> = Vec::new();

    for tagged in issues {
        match groups
            .iter()
            .position(|g| g.severity == tagged.issue.severity)
        {
            Some(idx) => groups[idx].issues.push(tagged.clone()),
            None => groups.push(SeverityGroup {
                severity: tagged.issue.severity.clone(),
                issues: vec![tagged.clone()],
            }),
        }
    }

    groups
}

fn heatmap(entries: &[Entry<'_>], dimensions: &[DimensionStats], average_overall: u8) -> Heatmap {
    let columns: Vec<String> = dimensions.iter().map(|d| d.dimension.clone()).collect();

    let mut rows: Vec<HeatmapRow> = entries
        .iter()
        .map(|e| {
            let mut cells = BTreeMap::new();
            for score in &e.report.dimension_scores {
                // A repeated label keeps the first score.
                cells.entry(score.dimension.clone()).or_insert(score.score);
            }
            HeatmapRow {
                label: e.name.to_string(),
                persona_id: Some(e.id.to_string()),
                cells,
                overall: e.report.overall_score,
            }
        })
        .collect();

    rows.push(HeatmapRow {
        label: AVERAGE_ROW_LABEL.to_string(),
        persona_id: None,
        cells: dimensions
            .iter()
            .map(|d| (d.dimension.clone(), d.average))
            .collect(),
        overall: average_overall,
    });

    Heatmap { columns, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DimensionScore, EvaluationModel, UserRole};

    fn persona(id: &str, name: &str) -> Persona {
        Persona {
            id: id.to_string(),
            name: name.to_string(),
            role: UserRole::User,
            description: String::new(),
            attributes: Default::default(),
        }
    }

    fn issue(severity: &str, location: &str) -> Issue {
        Issue {
            severity: severity.to_string(),
            location: location.to_string(),
            description: format!("{} problem", location),
            recommendation: "Fix it".to_string(),
        }
    }

    fn report(overall: u8, dims: &[(&str, u8)], issues: Vec<Issue>) -> EvaluationReport {
        EvaluationReport {
            model_type: EvaluationModel::Ues,
            overall_score: overall,
            dimension_scores: dims
                .iter()
                .map(|(d, s)| DimensionScore {
                    dimension: d.to_string(),
                    score: *s,
                    comment: format!("{} at {}", d, s),
                })
                .collect(),
            executive_summary: String::new(),
            persona_perspective: String::new(),
            issues,
            optimization_suggestions: vec![format!("suggestion {}", overall)],
        }
    }

    fn reports(items: Vec<(&str, EvaluationReport)>) -> HashMap<String, EvaluationReport> {
        items
            .into_iter()
            .map(|(id, r)| (id.to_string(), r))
            .collect()
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(&HashMap::new(), &[persona("1", "Senior")]);

        assert_eq!(summary.average_overall_score, 0);
        assert_eq!(summary.report_count, 0);
        assert!(summary.strengths.is_empty());
        assert!(summary.weaknesses.is_empty());
        assert!(summary.hotspots.is_empty());
        assert!(summary.severity_histogram.is_empty());
        assert!(summary.heatmap.rows.is_empty());
    }

    #[test]
    fn test_average_overall_score() {
        let personas = [persona("1", "Senior"), persona("2", "Geek")];
        let reports = reports(vec![
            ("1", report(60, &[], vec![])),
            ("2", report(90, &[], vec![])),
        ]);

        let summary = summarize(&reports, &personas);

        assert_eq!(summary.average_overall_score, 75);
        assert_eq!(summary.report_count, 2);
    }

    #[test]
    fn test_average_rounds_to_nearest() {
        let personas = [persona("1", "A"), persona("2", "B")];
        let reports = reports(vec![
            ("1", report(70, &[("Clarity", 70)], vec![])),
            ("2", report(71, &[("Clarity", 71)], vec![])),
        ]);

        let summary = summarize(&reports, &personas);

        assert_eq!(summary.average_overall_score, 71);
        assert_eq!(summary.dimension("Clarity").map(|d| d.average), Some(71));
    }

    #[test]
    fn test_dimension_stats_and_tie_break() {
        let personas = [persona("1", "First"), persona("2", "Second"), persona("3", "Third")];
        let reports = reports(vec![
            ("1", report(80, &[("Clarity", 90)], vec![])),
            ("2", report(80, &[("Clarity", 90)], vec![])),
            ("3", report(80, &[("Clarity", 60)], vec![])),
        ]);

        let summary = summarize(&reports, &personas);
        let clarity = summary.dimension("Clarity").unwrap();

        assert_eq!(clarity.average, 80);
        assert_eq!(clarity.min, 60);
        assert_eq!(clarity.max, 90);
        assert_eq!(clarity.range, 30);
        assert_eq!(clarity.best.persona_name, "First");
        assert_eq!(clarity.worst.persona_name, "Third");
    }

    #[test]
    fn test_tie_break_follows_persona_order_not_map_order() {
        let reports = reports(vec![
            ("a", report(50, &[("Clarity", 90)], vec![])),
            ("b", report(50, &[("Clarity", 90)], vec![])),
        ]);

        let forward = summarize(&reports, &[persona("a", "A"), persona("b", "B")]);
        let backward = summarize(&reports, &[persona("b", "B"), persona("a", "A")]);

        assert_eq!(forward.dimensions[0].best.persona_id, "a");
        assert_eq!(backward.dimensions[0].best.persona_id, "b");
        assert_eq!(forward.dimensions[0].average, backward.dimensions[0].average);
    }

    #[test]
    fn test_strengths_and_weaknesses() {
        let personas = [persona("1", "Solo")];
        let reports = reports(vec![(
            "1",
            report(
                70,
                &[
                    ("Usability", 50),
                    ("Consistency", 90),
                    ("Clarity", 70),
                    ("Aesthetics", 80),
                    ("Efficiency", 40),
                ],
                vec![],
            ),
        )]);

        let summary = summarize(&reports, &personas);
        let strengths: Vec<_> = summary.strengths.iter().map(|d| d.dimension.as_str()).collect();
        let weaknesses: Vec<_> = summary.weaknesses.iter().map(|d| d.dimension.as_str()).collect();

        assert_eq!(strengths, vec!["Consistency", "Aesthetics", "Clarity"]);
        assert_eq!(weaknesses, vec!["Efficiency", "Usability", "Clarity"]);
    }

    #[test]
    fn test_fewer_than_three_dimensions_are_not_padded() {
        let reports = reports(vec![("1", report(70, &[("Clarity", 70), ("Efficiency", 60)], vec![]))]);
        let summary = summarize(&reports, &[persona("1", "Solo")]);

        assert_eq!(summary.strengths.len(), 2);
        assert_eq!(summary.weaknesses.len(), 2);
        assert_eq!(summary.weaknesses[0].dimension, "Efficiency");
    }

    #[test]
    fn test_hotspot_requires_distinct_personas() {
        let personas = [persona("1", "A"), persona("2", "B"), persona("3", "C")];
        let reports = reports(vec![
            ("1", report(60, &[], vec![issue("High", "Checkout button")])),
            ("2", report(60, &[], vec![issue("Medium", "Checkout button")])),
            (
                "3",
                report(
                    60,
                    &[],
                    vec![issue("Low", "Footer"), issue("High", "Footer")],
                ),
            ),
        ]);

        let summary = summarize(&reports, &personas);

        assert_eq!(summary.hotspots.len(), 1);
        let hotspot = &summary.hotspots[0];
        assert_eq!(hotspot.location, "Checkout button");
        assert_eq!(hotspot.persona_count, 2);
        assert_eq!(hotspot.personas, vec!["A", "B"]);
        assert_eq!(hotspot.issues.len(), 2);
    }

    #[test]
    fn test_hotspots_sorted_by_persona_count() {
        let personas = [persona("1", "A"), persona("2", "B"), persona("3", "C")];
        let reports = reports(vec![
            ("1", report(60, &[], vec![issue("High", "Menu"), issue("High", "Search")])),
            ("2", report(60, &[], vec![issue("High", "Menu"), issue("High", "Search")])),
            ("3", report(60, &[], vec![issue("High", "Search")])),
        ]);

        let summary = summarize(&reports, &personas);
        let locations: Vec<_> = summary.hotspots.iter().map(|h| h.location.as_str()).collect();

        assert_eq!(locations, vec!["Search", "Menu"]);
        assert_eq!(summary.hotspots[0].persona_count, 3);
    }

    #[test]
    fn test_severity_histogram_keeps_unknown_labels() {
        let personas = [persona("1", "A"), persona("2", "B")];
        let reports = reports(vec![
            ("1", report(60, &[], vec![issue("High", "x"), issue("Blocker", "y")])),
            ("2", report(60, &[], vec![issue("High", "z")])),
        ]);

        let summary = summarize(&reports, &personas);

        assert_eq!(summary.severity_count("High"), 2);
        assert_eq!(summary.severity_count("Blocker"), 1);
        assert_eq!(summary.severity_count("Low"), 0);
        assert_eq!(summary.severity_histogram[0].severity, "High");
        assert_eq!(summary.total_issues(), 3);
        assert_eq!(summary.issues_by_severity[1].issues[0].persona_name, "A");
    }

    #[test]
    fn test_mismatched_labels_form_separate_groups() {
        let personas = [persona("1", "A"), persona("2", "B")];
        let reports = reports(vec![
            ("1", report(60, &[("Clarity", 80)], vec![])),
            ("2", report(60, &[("clarity", 40)], vec![])),
        ]);

        let summary = summarize(&reports, &personas);

        assert_eq!(summary.dimensions.len(), 2);
        assert_eq!(summary.dimension("Clarity").map(|d| d.average), Some(80));
        assert_eq!(summary.dimension("clarity").map(|d| d.average), Some(40));
    }

    #[test]
    fn test_heatmap_omits_missing_cells() {
        let personas = [persona("1", "A"), persona("2", "B")];
        let reports = reports(vec![
            ("1", report(60, &[("Clarity", 0), ("Efficiency", 50)], vec![])),
            ("2", report(80, &[("Clarity", 100)], vec![])),
        ]);

        let summary = summarize(&reports, &personas);
        let heatmap = &summary.heatmap;

        assert_eq!(heatmap.columns, vec!["Clarity", "Efficiency"]);
        assert_eq!(heatmap.rows.len(), 3);
        assert_eq!(heatmap.rows[0].cell("Clarity"), Some(0));
        assert_eq!(heatmap.rows[1].cell("Efficiency"), None);

        let average = &heatmap.rows[2];
        assert_eq!(average.label, AVERAGE_ROW_LABEL);
        assert_eq!(average.persona_id, None);
        assert_eq!(average.cell("Clarity"), Some(50));
        assert_eq!(average.cell("Efficiency"), Some(50));
        assert_eq!(average.overall, 70);
    }

    #[test]
    fn test_suggestions_are_tagged() {
        let personas = [persona("1", "A"), persona("2", "B")];
        let reports = reports(vec![("2", report(60, &[], vec![])), ("1", report(80, &[], vec![]))]);

        let summary = summarize(&reports, &personas);

        assert_eq!(summary.total_suggestions(), 2);
        assert_eq!(summary.suggestions[0].persona_name, "A");
        assert_eq!(summary.suggestions[0].text, "suggestion 80");
    }
}
