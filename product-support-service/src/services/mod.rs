pub mod generator;
pub mod providers;

pub use generator::{ContentGenerator, ModelReply};
