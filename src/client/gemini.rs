//! Gemini `generateContent` backend.
//!
//! Artifacts are sent as inline base64 parts. Analysis requests a JSON
//! response constrained by [`schema::response_schema`]; redraw requests ask
//! for image output and take the first inline image part.

use super::{api_error, prompt, schema, BackendConfig, BackendError};
use crate::models::{Artifact, EvaluationModel, EvaluationReport, MediaData, Persona};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    response_modalities: Vec<String>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartResponse {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

fn inline(media: &MediaData) -> Part {
    Part::InlineData {
        inline_data: InlineData {
            mime_type: media.mime_type.clone(),
            data: media.to_base64(),
        },
    }
}

/// Request parts describing the artifact, dispatched on its variant.
fn artifact_parts(artifact: &Artifact) -> Vec<Part> {
    match artifact {
        Artifact::Image(media) | Artifact::Video(media) => vec![inline(media)],
        Artifact::Flow(steps) => steps
            .iter()
            .enumerate()
            .flat_map(|(i, step)| {
                [
                    Part::Text {
                        text: format!("Step {}: {}", i + 1, step.description),
                    },
                    inline(&step.image),
                ]
            })
            .collect(),
    }
}

pub(crate) async fn analyze(
    http: &reqwest::Client,
    artifact: &Artifact,
    persona: &Persona,
    model: EvaluationModel,
    config: &BackendConfig,
) -> Result<EvaluationReport, BackendError> {
    let mut parts = artifact_parts(artifact);
    parts.push(Part::Text {
        text: prompt::analysis_prompt(artifact, persona, model),
    });

    let request = GenerateContentRequest {
        contents: vec![Content {
            role: "user".to_string(),
            parts,
        }],
        generation_config: GenerationConfig {
            temperature: Some(config.temperature),
            response_mime_type: Some("application/json".to_string()),
            response_schema: Some(schema::response_schema(model)),
            ..Default::default()
        },
    };

    let response = send(http, config, &config.analysis_model, &request).await?;
    let text = first_text(response)?;
    schema::parse_report(&text, model)
}

pub(crate) async fn regenerate(
    http: &reqwest::Client,
    artifact: &Artifact,
    persona: &Persona,
    report: &EvaluationReport,
    config: &BackendConfig,
) -> Result<MediaData, BackendError> {
    let source = artifact.representative_image().ok_or_else(|| {
        BackendError::Unsupported(format!("cannot redraw a {} artifact", artifact.kind()))
    })?;

    let request = GenerateContentRequest {
        contents: vec![Content {
            role: "user".to_string(),
            parts: vec![
                inline(source),
                Part::Text {
                    text: prompt::regeneration_prompt(persona, report),
                },
            ],
        }],
        generation_config: GenerationConfig {
            response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            ..Default::default()
        },
    };

    let response = send(http, config, &config.image_model, &request).await?;
    first_image(response)
}

async fn send(
    http: &reqwest::Client,
    config: &BackendConfig,
    model_name: &str,
    body: &GenerateContentRequest,
) -> Result<GenerateContentResponse, BackendError> {
    let url = format!("{}/{}:generateContent", config.base_url(), model_name);
    debug!(model = model_name, "Gemini request to {}", url);

    let response = http
        .post(&url)
        .header("x-goog-api-key", &config.api_key)
        .timeout(config.timeout)
        .json(body)
        .send()
        .await
        .map_err(|e| BackendError::from_transport(e, config))?;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    response
        .json()
        .await
        .map_err(|e| BackendError::Parse(format!("Gemini response: {}", e)))
}

fn response_parts(response: GenerateContentResponse) -> Vec<PartResponse> {
    response
        .candidates
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .unwrap_or_default()
}

fn first_text(response: GenerateContentResponse) -> Result<String, BackendError> {
    response_parts(response)
        .into_iter()
        .find_map(|part| part.text)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| BackendError::EmptyResponse("Gemini returned no text".to_string()))
}

fn first_image(response: GenerateContentResponse) -> Result<MediaData, BackendError> {
    let data = response_parts(response)
        .into_iter()
        .find_map(|part| part.inline_data)
        .ok_or_else(|| BackendError::EmptyResponse("Gemini returned no image".to_string()))?;

    let bytes = BASE64_STANDARD
        .decode(data.data.as_bytes())
        .map_err(|e| BackendError::Parse(format!("image payload: {}", e)))?;
    if bytes.is_empty() {
        return Err(BackendError::EmptyResponse(
            "Gemini returned an empty image".to_string(),
        ));
    }
    Ok(MediaData::new(data.mime_type, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FlowStep;

    #[test]
    fn test_flow_parts_interleave_descriptions() {
        let artifact = Artifact::Flow(vec![
            FlowStep {
                image: MediaData::new("image/png", vec![1]),
                description: "Open cart".to_string(),
            },
            FlowStep {
                image: MediaData::new("image/png", vec![2]),
                description: "Pay".to_string(),
            },
        ]);
        let parts = serde_json::to_value(artifact_parts(&artifact)).unwrap();

        assert_eq!(parts.as_array().map(|p| p.len()), Some(4));
        assert_eq!(parts[0]["text"], "Step 1: Open cart");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[2]["text"], "Step 2: Pay");
    }

    #[test]
    fn test_generation_config_serialization() {
        let config = GenerationConfig {
            response_modalities: vec!["IMAGE".to_string()],
            ..Default::default()
        };
        let value = serde_json::to_value(config).unwrap();
        assert_eq!(value["responseModalities"][0], "IMAGE");
        assert!(value.get("responseSchema").is_none());
    }

    #[test]
    fn test_first_image_decodes_inline_data() {
        let response: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "here you go" },
                        { "inlineData": { "mimeType": "image/png", "data": "AQID" } }
                    ]
                }
            }]
        }))
        .unwrap();

        let image = first_image(response).unwrap();
        assert_eq!(image.bytes, vec![1, 2, 3]);
        assert_eq!(image.mime_type, "image/png");
    }

    #[test]
    fn test_missing_text_is_empty_response() {
        let response: GenerateContentResponse =
            serde_json::from_value(serde_json::json!({ "candidates": [] })).unwrap();
        assert!(matches!(
            first_text(response),
            Err(BackendError::EmptyResponse(_))
        ));
    }
}
