use serde::{de, forward_to_deserialize_any};
use crate::error::{Error, Result};
use super::access::Access;

// One lexical token of the input. Containers surface only their start
// markers; their contents are pulled by the seq/map access types.
#[derive(Debug, PartialEq, Eq)]
pub enum Token<'de> {
    Integer(i64),
    Bytes(&'de [u8]),
    ListStart,
    DictStart,
    End,
}

pub struct Decoder<'de> {
    input: &'de [u8],
    pos: usize,
    peeked: Option<Token<'de>>,
}

impl<'de> Decoder<'de> {

    pub fn new(input: &'de [u8]) -> Self {
        Self { input, pos: 0, peeked: None }
    }

    // A value has been deserialized; the input must be exhausted.
    pub fn finish(&self) -> Result<()> {
        if self.peeked.is_none() && self.pos == self.input.len() {
            Ok(())
        } else {
            Err(Error::TrailingInput)
        }
    }

    pub(super) fn read_token(&mut self) -> Result<Token<'de>> {
        if let Some(token) = self.peeked.take() {
            return Ok(token);
        }
        match self.next_byte()? {
            b'i' => Ok(Token::Integer(self.read_integer()?)),
            n @ b'0'..=b'9' => Ok(Token::Bytes(self.read_bytes(n)?)),
            b'l' => Ok(Token::ListStart),
            b'd' => Ok(Token::DictStart),
            b'e' => Ok(Token::End),
            b => Err(Error::InvalidByte(b)),
        }
    }

    pub(super) fn push_back(&mut self, token: Token<'de>) {
        debug_assert!(self.peeked.is_none(), "token pushed back twice");
        self.peeked = Some(token);
    }

    fn next_byte(&mut self) -> Result<u8> {
        let b = *self.input.get(self.pos).ok_or(Error::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    // i<decimal>e, already past the 'i'. No leading zeros, no "-0".
    fn read_integer(&mut self) -> Result<i64> {
        let rest = &self.input[self.pos..];
        let end = rest.iter().position(|&b| b == b'e').ok_or(Error::Truncated)?;
        let literal = &rest[..end];
        self.pos += end + 1;

        let digits = literal.strip_prefix(b"-").unwrap_or(literal);
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(Error::InvalidInteger);
        }
        if digits[0] == b'0' && (digits.len() > 1 || literal[0] == b'-') {
            return Err(Error::InvalidInteger);
        }

        std::str::from_utf8(literal)
            .map_err(|_| Error::InvalidInteger)?
            .parse()
            .map_err(|_| Error::InvalidInteger)
    }

    // <len>:<bytes>, with the first length digit already consumed.
    fn read_bytes(&mut self, first: u8) -> Result<&'de [u8]> {
        let rest = &self.input[self.pos..];
        let colon = rest.iter().position(|&b| b == b':').ok_or(Error::Truncated)?;
        let trailing = &rest[..colon];
        self.pos += colon + 1;

        if !trailing.iter().all(u8::is_ascii_digit) {
            return Err(Error::InvalidLength);
        }
        if first == b'0' && !trailing.is_empty() {
            return Err(Error::InvalidLength);
        }

        let mut len: usize = (first - b'0') as usize;
        for &d in trailing {
            len = len
                .checked_mul(10)
                .and_then(|l| l.checked_add((d - b'0') as usize))
                .ok_or(Error::InvalidLength)?;
        }

        let end = self.pos.checked_add(len).ok_or(Error::Truncated)?;
        let bytes = self.input.get(self.pos..end).ok_or(Error::Truncated)?;
        self.pos = end;
        Ok(bytes)
    }
}

impl<'de, 'a> de::Deserializer<'de> for &'a mut Decoder<'de> {

    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        match self.read_token()? {
            Token::Integer(i) => visitor.visit_i64(i),
            Token::Bytes(b) => visitor.visit_borrowed_bytes(b),
            Token::ListStart => visitor.visit_seq(Access::new(self)),
            Token::DictStart => visitor.visit_map(Access::new(self)),
            Token::End => Err(Error::UnexpectedEnd),
        }
    }

    forward_to_deserialize_any! {
        bool char
        i8 i16 i32 i64 i128
        u8 u16 u32 u64 u128
        f32 f64
        unit bytes byte_buf
        seq map unit_struct tuple tuple_struct
        enum ignored_any struct
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V>(self, _name: &'static str, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_str<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        match self.read_token()? {
            Token::Bytes(b) => {
                let s = std::str::from_utf8(b).map_err(|_| Error::InvalidUtf8)?;
                visitor.visit_borrowed_str(s)
            }
            _ => Err(Error::Custom("expected byte string".to_string())),
        }
    }

    fn deserialize_string<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_str(visitor)
    }

    fn deserialize_identifier<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_str(visitor)
    }
}
