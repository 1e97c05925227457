use serde::ser;
use crate::error::Result;

mod encoder;
mod map;

// Canonical encode: dictionary keys are emitted in lexicographic byte order
// and `None` fields are omitted.
pub fn to_bytes<T: ser::Serialize>(v: &T) -> Result<Vec<u8>> {
    let mut encoder = encoder::Encoder::new();
    v.serialize(&mut encoder)?;
    Ok(encoder.into_buf())
}
