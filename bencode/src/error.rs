use std::fmt::Display;

pub type Result<T> = std::result::Result<T, Error>;

// Errors specific to bencoding on top of those present in serde.
#[derive(Debug, thiserror::Error)]
pub enum Error {

    // Input ended inside an integer, byte string or container.
    #[error("unexpected end of input")]
    Truncated,

    // A complete value was decoded but bytes remain.
    #[error("trailing bytes after top-level value")]
    TrailingInput,

    #[error("invalid token byte: {0:#04x}")]
    InvalidByte(u8),

    // Empty literal, leading zeros, negative zero or i64 overflow.
    #[error("invalid integer literal")]
    InvalidInteger,

    // Byte string length prefix with leading zeros or no digits.
    #[error("invalid length prefix")]
    InvalidLength,

    #[error("byte string is not valid utf-8")]
    InvalidUtf8,

    // An 'e' where a value was expected.
    #[error("unexpected end marker")]
    UnexpectedEnd,

    #[error("dictionary keys must be byte strings")]
    InvalidKey,

    #[error("type cannot be represented in bencode: {0}")]
    Unsupported(&'static str),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("{0}")]
    Custom(String),

}

impl serde::ser::Error for Error {
    fn custom<T>(msg: T) -> Self where T: Display {
        Error::Custom(msg.to_string())
    }
}

impl serde::de::Error for Error {
    fn custom<T>(msg: T) -> Self where T: Display {
        Error::Custom(msg.to_string())
    }

    // Kept distinct so callers can tell a missing required key from
    // malformed input.
    fn missing_field(field: &'static str) -> Self {
        Error::MissingField(field)
    }
}
