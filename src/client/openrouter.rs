//! OpenRouter chat-completions backend (OpenAI-compatible wire format).

use super::{api_error, prompt, schema, BackendConfig, BackendError};
use crate::models::{Artifact, EvaluationModel, EvaluationReport, MediaData, Persona};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    images: Vec<ImagePart>,
}

#[derive(Deserialize)]
struct ImagePart {
    image_url: ImageUrl,
}

#[derive(Deserialize)]
struct ImageUrl {
    url: String,
}

fn image_part(media: &MediaData) -> Value {
    json!({ "type": "image_url", "image_url": { "url": media.to_data_url() } })
}

fn text_part(text: String) -> Value {
    json!({ "type": "text", "text": text })
}

/// Content parts for the artifact. Video is not accepted by this provider.
fn artifact_parts(artifact: &Artifact) -> Result<Vec<Value>, BackendError> {
    match artifact {
        Artifact::Image(media) => Ok(vec![image_part(media)]),
        Artifact::Flow(steps) => Ok(steps
            .iter()
            .enumerate()
            .flat_map(|(i, step)| {
                [
                    text_part(format!("Step {}: {}", i + 1, step.description)),
                    image_part(&step.image),
                ]
            })
            .collect()),
        Artifact::Video(_) => Err(BackendError::Unsupported(
            "video artifacts require the gemini provider".to_string(),
        )),
    }
}

pub(crate) async fn analyze(
    http: &reqwest::Client,
    artifact: &Artifact,
    persona: &Persona,
    model: EvaluationModel,
    config: &BackendConfig,
) -> Result<EvaluationReport, BackendError> {
    let mut content = artifact_parts(artifact)?;
    content.push(text_part(format!(
        "{}\nThe JSON must follow this schema:\n{}",
        prompt::analysis_prompt(artifact, persona, model),
        schema::response_schema(model)
    )));

    let body = json!({
        "model": config.analysis_model,
        "messages": [{ "role": "user", "content": content }],
        "temperature": config.temperature,
        "response_format": { "type": "json_object" },
    });

    let response = send(http, config, &body).await?;
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| BackendError::EmptyResponse("missing choices[0].message.content".into()))?;

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

    let body = json!({
        "model": config.image_model,
        "messages": [{
            "role": "user",
            "content": [
                image_part(source),
                text_part(prompt::regeneration_prompt(persona, report)),
            ],
        }],
        "modalities": ["image", "text"],
    });

    let response = send(http, config, &body).await?;
    first_image(response)
}

async fn send(
    http: &reqwest::Client,
    config: &BackendConfig,
    body: &Value,
) -> Result<ChatResponse, BackendError> {
    let url = format!("{}/chat/completions", config.base_url());
    debug!("OpenRouter request to {}", url);

    let response = http
        .post(&url)
        .bearer_auth(&config.api_key)
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
        .map_err(|e| BackendError::Parse(format!("OpenRouter response: {}", e)))
}

fn first_image(response: ChatResponse) -> Result<MediaData, BackendError> {
    let url = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.images.into_iter().next())
        .map(|image| image.image_url.url)
        .ok_or_else(|| BackendError::EmptyResponse("no image in response".to_string()))?;

    MediaData::from_data_url(&url)
        .ok_or_else(|| BackendError::Parse("image is not a base64 data URL".to_string()))
}
