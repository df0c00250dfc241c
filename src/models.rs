//! Data models for persona-driven experience audits.
//!
//! This module contains the core data structures shared by the backend
//! client, the orchestrator and the aggregation engine: personas, the
//! artifact under evaluation, and the per-persona evaluation report.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Evaluator role of a persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    /// End user, evaluates usability from lived experience.
    User,
    /// Domain expert, evaluates consistency against design principles.
    Expert,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::User => write!(f, "USER"),
            UserRole::Expert => write!(f, "EXPERT"),
        }
    }
}

/// Free-text attributes used only as prompt context for the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaAttributes {
    #[serde(default)]
    pub age: String,
    #[serde(default)]
    pub tech_savviness: String,
    #[serde(default)]
    pub domain_knowledge: String,
    #[serde(default)]
    pub goals: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub frustration_tolerance: String,
    #[serde(default)]
    pub device_habits: String,
}

/// A named evaluator profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Stable identity, used as the key in run results.
    pub id: String,
    /// Display name.
    pub name: String,
    pub role: UserRole,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attributes: PersonaAttributes,
}

impl Persona {
    /// Built-in personas used when the configuration defines none.
    pub fn defaults() -> Vec<Persona> {
        vec![
            Persona {
                id: "1".to_string(),
                name: "Senior Novice".to_string(),
                role: UserRole::User,
                description: "Low tech literacy, possibly with reduced eyesight.".to_string(),
                attributes: PersonaAttributes {
                    age: "65+".to_string(),
                    tech_savviness: "Low".to_string(),
                    domain_knowledge: "Novice".to_string(),
                    goals: "Finish basic tasks without making mistakes".to_string(),
                    environment: "Quiet home".to_string(),
                    frustration_tolerance: "Low".to_string(),
                    device_habits: "Large fonts, slow and deliberate input".to_string(),
                },
            },
            Persona {
                id: "2".to_string(),
                name: "Power User".to_string(),
                role: UserRole::User,
                description: "Chases maximum efficiency and knows every shortcut.".to_string(),
                attributes: PersonaAttributes {
                    age: "25-35".to_string(),
                    tech_savviness: "High".to_string(),
                    domain_knowledge: "Expert".to_string(),
                    goals: "Complete tasks as fast as possible".to_string(),
                    environment: "Busy office".to_string(),
                    frustration_tolerance: "Medium".to_string(),
                    device_habits: "Keyboard heavy, multiple monitors".to_string(),
                },
            },
            Persona {
                id: "3".to_string(),
                name: "UX Expert".to_string(),
                role: UserRole::Expert,
                description: "Audits against heuristics and design-system consistency."
                    .to_string(),
                attributes: PersonaAttributes {
                    age: "30-40".to_string(),
                    tech_savviness: "High".to_string(),
                    domain_knowledge: "Expert".to_string(),
                    goals: "Keep the design system consistent and compliant".to_string(),
                    environment: "Design studio".to_string(),
                    frustration_tolerance: "High".to_string(),
                    device_habits: "Pixel-level review".to_string(),
                },
            },
        ]
    }
}

/// Evaluation model selection. Each variant carries its own dimension
/// labels and severity vocabulary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationModel {
    /// Five-dimension user experience score.
    Ues,
    /// Eight-dimension experience test standard.
    #[default]
    Ets,
}

impl fmt::Display for EvaluationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationModel::Ues => write!(f, "UES"),
            EvaluationModel::Ets => write!(f, "ETS"),
        }
    }
}

impl EvaluationModel {
    /// Dimension labels the backend is asked to score, in order.
    pub fn dimension_labels(&self) -> &'static [&'static str] {
        match self {
            EvaluationModel::Ues => &[
                "Usability",
                "Consistency",
                "Clarity",
                "Aesthetics",
                "Efficiency",
            ],
            EvaluationModel::Ets => &[
                "Function Flow",
                "Information Cognition",
                "Interaction Design",
                "System Performance",
                "Information Safety",
                "Visual Design",
                "Intelligence",
                "Operation Service",
            ],
        }
    }

    /// Severity vocabulary, most severe first.
    pub fn severity_levels(&self) -> &'static [&'static str] {
        match self {
            EvaluationModel::Ues => &["Critical", "High", "Medium", "Low"],
            EvaluationModel::Ets => &["Level 1", "Level 2", "Level 3"],
        }
    }

    /// Severities that a redraw must address first.
    pub fn priority_severities(&self) -> &'static [&'static str] {
        match self {
            EvaluationModel::Ues => &["Critical", "High"],
            EvaluationModel::Ets => &["Level 1", "Level 2"],
        }
    }
}

/// Binary media payload (an image or a video) with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaData {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl MediaData {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Base64 body for inline request parts.
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(&self.bytes)
    }

    /// Render as a `data:` URL.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Decode a base64 `data:` URL. Returns `None` for anything else.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (mime_type, data) = rest.split_once(";base64,")?;
        let bytes = BASE64_STANDARD.decode(data.trim()).ok()?;
        if bytes.is_empty() {
            return None;
        }
        Some(Self::new(mime_type, bytes))
    }
}

/// One screen of a multi-step flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStep {
    pub image: MediaData,
    pub description: String,
}

/// The visual subject under evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Image(MediaData),
    Flow(Vec<FlowStep>),
    Video(MediaData),
}

impl Artifact {
    /// Short tag used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::Image(_) => "image",
            Artifact::Flow(_) => "flow",
            Artifact::Video(_) => "video",
        }
    }

    /// True when there is nothing to evaluate.
    pub fn is_empty(&self) -> bool {
        match self {
            Artifact::Image(media) | Artifact::Video(media) => media.is_empty(),
            Artifact::Flow(steps) => {
                steps.is_empty() || steps.iter().any(|step| step.image.is_empty())
            }
        }
    }

    /// Image a redraw starts from: the image itself, or the first flow step.
    /// Videos have none.
    pub fn representative_image(&self) -> Option<&MediaData> {
        match self {
            Artifact::Image(media) => Some(media),
            Artifact::Flow(steps) => steps.first().map(|step| &step.image),
            Artifact::Video(_) => None,
        }
    }
}

/// Score of one evaluation dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: String,
    pub score: u8,
    pub comment: String,
}

/// A concrete problem found by a persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Severity label from the evaluation model's vocabulary. Kept as text so
    /// unknown labels survive.
    pub severity: String,
    pub location: String,
    pub description: String,
    pub recommendation: String,
}

/// The structured audit produced for one persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    /// Evaluation model the report was requested with.
    pub model_type: EvaluationModel,
    pub overall_score: u8,
    pub dimension_scores: Vec<DimensionScore>,
    pub executive_summary: String,
    pub persona_perspective: String,
    pub issues: Vec<Issue>,
    pub optimization_suggestions: Vec<String>,
}

impl EvaluationReport {
    /// Issues whose severity the model marks as priority.
    pub fn priority_issues(&self) -> impl Iterator<Item = &Issue> {
        let priority = self.model_type.priority_severities();
        self.issues
            .iter()
            .filter(move |issue| priority.contains(&issue.severity.as_str()))
    }
}

/// Qualitative band for a 0-100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScoreLevel {
    NeedsImprovement,
    Fair,
    Good,
    Excellent,
}

impl ScoreLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            85..=u8::MAX => ScoreLevel::Excellent,
            70..=84 => ScoreLevel::Good,
            55..=69 => ScoreLevel::Fair,
            _ => ScoreLevel::NeedsImprovement,
        }
    }

    /// Returns an emoji representation of the level.
    pub fn emoji(&self) -> &'static str {
        match self {
            ScoreLevel::Excellent => "🟢",
            ScoreLevel::Good => "🟡",
            ScoreLevel::Fair => "🟠",
            ScoreLevel::NeedsImprovement => "🔴",
        }
    }
}

impl fmt::Display for ScoreLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreLevel::Excellent => write!(f, "Excellent"),
            ScoreLevel::Good => write!(f, "Good"),
            ScoreLevel::Fair => write!(f, "Fair"),
            ScoreLevel::NeedsImprovement => write!(f, "Needs Improvement"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(bytes: &[u8]) -> MediaData {
        MediaData::new("image/png", bytes.to_vec())
    }

    #[test]
    fn test_score_level_bands() {
        assert_eq!(ScoreLevel::from_score(100), ScoreLevel::Excellent);
        assert_eq!(ScoreLevel::from_score(85), ScoreLevel::Excellent);
        assert_eq!(ScoreLevel::from_score(84), ScoreLevel::Good);
        assert_eq!(ScoreLevel::from_score(55), ScoreLevel::Fair);
        assert_eq!(ScoreLevel::from_score(54), ScoreLevel::NeedsImprovement);
        assert!(ScoreLevel::Fair < ScoreLevel::Good);
    }

    #[test]
    fn test_model_vocabulary() {
        assert_eq!(EvaluationModel::Ues.dimension_labels().len(), 5);
        assert_eq!(EvaluationModel::Ets.dimension_labels().len(), 8);
        assert_eq!(EvaluationModel::Ets.severity_levels()[0], "Level 1");
        assert_eq!(EvaluationModel::default(), EvaluationModel::Ets);
        assert_eq!(EvaluationModel::Ues.to_string(), "UES");
    }

    #[test]
    fn test_data_url_round_trip() {
        let media = png(&[137, 80, 78, 71]);
        let url = media.to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(MediaData::from_data_url(&url), Some(media));
        assert_eq!(MediaData::from_data_url("https://example.com/a.png"), None);
        assert_eq!(MediaData::from_data_url("data:image/png;base64,"), None);
    }

    #[test]
    fn test_artifact_emptiness() {
        assert!(Artifact::Image(png(&[])).is_empty());
        assert!(!Artifact::Image(png(&[1])).is_empty());
        assert!(Artifact::Flow(vec![]).is_empty());
        assert!(Artifact::Flow(vec![FlowStep {
            image: png(&[]),
            description: "login".to_string(),
        }])
        .is_empty());
        assert!(!Artifact::Video(MediaData::new("video/mp4", vec![0])).is_empty());
    }

    #[test]
    fn test_representative_image() {
        let flow = Artifact::Flow(vec![
            FlowStep {
                image: png(&[1]),
                description: "first".to_string(),
            },
            FlowStep {
                image: png(&[2]),
                description: "second".to_string(),
            },
        ]);
        assert_eq!(flow.representative_image(), Some(&png(&[1])));
        assert_eq!(
            Artifact::Video(MediaData::new("video/mp4", vec![0])).representative_image(),
            None
        );
    }

    #[test]
    fn test_priority_issues_follow_model_vocabulary() {
        let issue = |severity: &str| Issue {
            severity: severity.to_string(),
            location: "Header".to_string(),
            description: "d".to_string(),
            recommendation: "r".to_string(),
        };
        let report = EvaluationReport {
            model_type: EvaluationModel::Ets,
            overall_score: 70,
            dimension_scores: vec![],
            executive_summary: String::new(),
            persona_perspective: String::new(),
            issues: vec![issue("Level 1"), issue("Level 3"), issue("Critical")],
            optimization_suggestions: vec![],
        };
        let priority: Vec<_> = report.priority_issues().collect();
        assert_eq!(priority.len(), 1);
        assert_eq!(priority[0].severity, "Level 1");
    }

    #[test]
    fn test_persona_defaults_have_unique_ids() {
        let personas = Persona::defaults();
        let mut ids: Vec<_> = personas.iter().map(|p| p.id.as_str()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 3);
        assert_eq!(personas[2].role, UserRole::Expert);
    }
}
