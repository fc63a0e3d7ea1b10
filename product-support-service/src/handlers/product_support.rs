use crate::models::{parse_price, ImageAttachment, ProductRequest, ProductResponse};
use crate::services::providers::TextProvider;
use crate::startup::AppState;
use crate::utils::ValidatedJson;
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    Json,
};
use service_core::error::AppError;
use std::sync::Arc;
use validator::Validate;

#[tracing::instrument(skip_all)]
pub async fn generate_product_support(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<ProductRequest>,
) -> Result<Json<ProductResponse>, AppError> {
    let provider = init_model(&state).await?;

    let response = state
        .generator
        .generate(provider.as_ref(), &request, None)
        .await;

    Ok(Json(response))
}

#[tracing::instrument(skip_all)]
pub async fn generate_product_support_with_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ProductResponse>, AppError> {
    let mut multipart = multipart.map_err(|e| {
        AppError::BadRequest(anyhow::anyhow!("Invalid multipart request: {}", e.body_text()))
    })?;
    let form = ProductForm::read(&mut multipart, state.config.uploads.max_image_bytes).await?;
    let (request, image) = form.into_parts()?;
    request.validate()?;

    let provider = init_model(&state).await?;

    let response = state
        .generator
        .generate(provider.as_ref(), &request, image.as_ref())
        .await;

    Ok(Json(response))
}

async fn init_model(state: &AppState) -> Result<Arc<dyn TextProvider>, AppError> {
    state.model_factory.init().await.map_err(|e| {
        tracing::error!("Failed to initialize model client: {}", e);
        AppError::ModelInitError(anyhow::Error::new(e))
    })
}

/// Raw multipart fields before validation.
#[derive(Debug, Default)]
struct ProductForm {
    product_name: Option<String>,
    model_number: Option<String>,
    jan_code: Option<String>,
    brand: Option<String>,
    price: Option<String>,
    image: Option<ImageAttachment>,
}

impl ProductForm {
    async fn read(multipart: &mut Multipart, max_image_bytes: usize) -> Result<Self, AppError> {
        let mut form = ProductForm::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();

            match name.as_str() {
                "image" => {
                    let content_type = field.content_type().map(str::to_string);
                    let data = field.bytes().await?;

                    if data.len() > max_image_bytes {
                        return Err(AppError::PayloadTooLarge(anyhow::anyhow!(
                            "Image too large (max {} bytes)",
                            max_image_bytes
                        )));
                    }

                    // Browsers submit an empty part for an untouched file input.
                    if !data.is_empty() {
                        form.image = Some(ImageAttachment::new(
                            data.to_vec(),
                            content_type.as_deref(),
                        ));
                    }
                }
                "product_name" => form.product_name = Some(field.text().await?),
                "model_number" => form.model_number = Some(field.text().await?),
                "jan_code" => form.jan_code = Some(field.text().await?),
                "brand" => form.brand = Some(field.text().await?),
                "price" => form.price = Some(field.text().await?),
                other => tracing::debug!(field = %other, "Ignoring unknown form field"),
            }
        }

        Ok(form)
    }

    fn into_parts(self) -> Result<(ProductRequest, Option<ImageAttachment>), AppError> {
        let price_text = required(self.price, "price")?;
        let price = parse_price(&price_text).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "Form field price must be an integer, got {:?}",
                price_text
            ))
        })?;

        let request = ProductRequest {
            product_name: required(self.product_name, "product_name")?,
            model_number: required(self.model_number, "model_number")?,
            jan_code: required(self.jan_code, "jan_code")?,
            brand: required(self.brand, "brand")?,
            price,
        };

        Ok((request, self.image))
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    value.ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Missing form field: {}", field)))
}
