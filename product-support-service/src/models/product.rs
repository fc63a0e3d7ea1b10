use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de, Deserialize, Deserializer, Serialize};
use validator::Validate;

/// MIME type sent to the model when the upload does not declare an image type.
pub const DEFAULT_IMAGE_MIME_TYPE: &str = "image/jpeg";

/// Product metadata submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ProductRequest {
    pub product_name: String,
    pub model_number: String,
    pub jan_code: String,
    pub brand: String,
    #[serde(deserialize_with = "deserialize_price")]
    #[validate(range(min = 0, message = "Price must be a non-negative integer"))]
    pub price: i64,
}

/// Largest magnitude at which every integer is exactly representable as `f64`.
const MAX_EXACT_F64_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Convert a number with no fractional part (`1000.0`) to an integer price.
pub fn integral_price(value: f64) -> Option<i64> {
    (value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_EXACT_F64_INTEGER)
        .then_some(value as i64)
}

/// Parse a price written as an integer or as a number with no fractional part.
pub fn parse_price(text: &str) -> Option<i64> {
    let text = text.trim();
    text.parse::<i64>()
        .ok()
        .or_else(|| text.parse::<f64>().ok().and_then(integral_price))
}

fn deserialize_price<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPrice {
        Integer(i64),
        Float(f64),
    }

    match RawPrice::deserialize(deserializer)? {
        RawPrice::Integer(price) => Ok(price),
        RawPrice::Float(value) => integral_price(value).ok_or_else(|| {
            de::Error::custom(format!("price must be an integer, got {}", value))
        }),
    }
}

impl ProductRequest {
    /// Tag used whenever the model's answer cannot supply one.
    pub fn fallback_seo_tag(&self) -> String {
        format!("{},{}", self.brand, self.product_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductResponse {
    pub description: String,
    pub seo_tag: String,
}

/// Product photo uploaded alongside the metadata.
#[derive(Clone)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageAttachment {
    /// Wrap uploaded bytes, keeping the declared content type only if it is an image type.
    pub fn new(bytes: Vec<u8>, content_type: Option<&str>) -> Self {
        let mime_type = content_type
            .filter(|ct| ct.starts_with("image/"))
            .unwrap_or(DEFAULT_IMAGE_MIME_TYPE)
            .to_string();

        Self { mime_type, bytes }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

impl std::fmt::Debug for ImageAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageAttachment")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}
