use serde::de;
use crate::error::Result;

mod access;
mod decoder;

use decoder::Decoder;

// Strict decode of a complete bencoded value; trailing bytes are an error.
pub fn from_bytes<'de, T>(b: &'de [u8]) -> Result<T>
where
    T: de::Deserialize<'de>,
{
    let mut decoder = Decoder::new(b);
    let value = T::deserialize(&mut decoder)?;
    decoder.finish()?;
    Ok(value)
}
