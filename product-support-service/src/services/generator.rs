//! Product description generation.
//!
//! Builds the prompt from product metadata, calls the model once and turns
//! whatever comes back into a [`ProductResponse`]. Once a provider exists this
//! never fails: unusable replies degrade to templated content.

use crate::models::{ImageAttachment, ProductRequest, ProductResponse};
use crate::services::providers::{GenerationParams, PromptPart, ProviderError, TextProvider};
use serde_json::Value;

const IMAGE_INSTRUCTION: &str = "A product image is also provided. Analyze the image and take \
the product's appearance and visual characteristics into account in the description.";

const FORMAT_INSTRUCTION: &str = "Respond only with a JSON object of the form \
{\"description\": \"<product description>\", \"seo_tag\": \"<comma-separated SEO keywords>\"}.";

/// Outcome of one model call.
#[derive(Debug)]
pub enum ModelReply {
    /// Reply parsed as a JSON object. Keys absent from the object are `None`.
    Structured {
        description: Option<String>,
        seo_tag: Option<String>,
    },
    /// Reply text that is not a JSON object.
    Unstructured(String),
    /// The call itself failed.
    Failed(ProviderError),
}

impl ModelReply {
    pub fn into_response(self, request: &ProductRequest) -> ProductResponse {
        match self {
            ModelReply::Structured {
                description,
                seo_tag,
            } => ProductResponse {
                description: description.unwrap_or_default(),
                seo_tag: seo_tag.unwrap_or_default(),
            },
            ModelReply::Unstructured(raw) => ProductResponse {
                description: raw,
                seo_tag: request.fallback_seo_tag(),
            },
            ModelReply::Failed(_) => ProductResponse {
                description: fallback_description(request),
                seo_tag: request.fallback_seo_tag(),
            },
        }
    }
}

/// Generates descriptions with fixed generation parameters.
#[derive(Debug, Clone, Default)]
pub struct ContentGenerator {
    params: GenerationParams,
}

impl ContentGenerator {
    pub fn new(params: GenerationParams) -> Self {
        Self { params }
    }

    pub async fn generate(
        &self,
        provider: &dyn TextProvider,
        request: &ProductRequest,
        image: Option<&ImageAttachment>,
    ) -> ProductResponse {
        self.invoke(provider, request, image)
            .await
            .into_response(request)
    }

    /// Call the model and classify its reply.
    pub async fn invoke(
        &self,
        provider: &dyn TextProvider,
        request: &ProductRequest,
        image: Option<&ImageAttachment>,
    ) -> ModelReply {
        let parts = prompt_parts(request, image);

        match provider.generate(&parts, &self.params).await {
            Ok(response) => {
                tracing::info!(
                    model = %provider.model(),
                    input_tokens = response.input_tokens,
                    output_tokens = response.output_tokens,
                    finish_reason = ?response.finish_reason,
                    with_image = image.is_some(),
                    "Model reply received"
                );
                let reply = parse_reply(&response.text);
                if let ModelReply::Unstructured(_) = reply {
                    tracing::warn!(
                        product_name = %request.product_name,
                        "Model reply is not a JSON object, using raw text as description"
                    );
                }
                reply
            }
            Err(e) => {
                tracing::warn!(
                    model = %provider.model(),
                    product_name = %request.product_name,
                    transient = e.is_transient(),
                    error = %e,
                    "Model invocation failed, using templated description"
                );
                ModelReply::Failed(e)
            }
        }
    }
}

/// Prompt text followed by the inline image, if any.
pub fn prompt_parts(request: &ProductRequest, image: Option<&ImageAttachment>) -> Vec<PromptPart> {
    let mut parts = vec![PromptPart::Text(build_prompt(request, image.is_some()))];

    if let Some(image) = image {
        parts.push(PromptPart::InlineData {
            mime_type: image.mime_type.clone(),
            data: image.to_base64(),
        });
    }

    parts
}

pub fn build_prompt(request: &ProductRequest, with_image: bool) -> String {
    let mut prompt = format!(
        "Generate an appealing product description and SEO tags \
         based on the following product information.\n\n\
         Product name: {}\n\
         Model number: {}\n\
         JAN code: {}\n\
         Brand: {}\n\
         Price: {} yen\n",
        request.product_name, request.model_number, request.jan_code, request.brand, request.price
    );

    if with_image {
        prompt.push('\n');
        prompt.push_str(IMAGE_INSTRUCTION);
        prompt.push('\n');
    }

    prompt.push('\n');
    prompt.push_str(FORMAT_INSTRUCTION);
    prompt
}

/// Classify model output. A surrounding ```json ... ``` fence is removed first.
pub fn parse_reply(text: &str) -> ModelReply {
    match serde_json::from_str::<Value>(strip_code_fence(text)) {
        Ok(Value::Object(mut object)) => ModelReply::Structured {
            description: object.remove("description").and_then(value_to_string),
            seo_tag: object.remove("seo_tag").and_then(value_to_string),
        },
        _ => ModelReply::Unstructured(text.to_string()),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_prefix("```json").unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed)
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Deterministic description used when the model cannot be reached.
pub fn fallback_description(request: &ProductRequest) -> String {
    format!(
        "{} {} is a high-quality product. Model number {}, JAN code {}, priced at {} yen.",
        request.brand, request.product_name, request.model_number, request.jan_code, request.price
    )
}
