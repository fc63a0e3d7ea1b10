pub mod product;

pub use product::{parse_price, ImageAttachment, ProductRequest, ProductResponse};
