// Convention from https://serde.rs/conventions.html
mod decode;
mod encode;
mod error;
pub mod raw;

pub use decode::from_bytes;
pub use encode::to_bytes;
pub use error::{Error, Result};
