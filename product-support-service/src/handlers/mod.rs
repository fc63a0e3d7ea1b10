//! HTTP handlers for the product support service.

pub mod health;
pub mod product_support;

pub use health::{health_check, root};
pub use product_support::{generate_product_support, generate_product_support_with_image};
