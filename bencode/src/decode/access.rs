use serde::de;
use crate::error::{Error, Result};
use super::decoder::{Decoder, Token};

pub struct Access<'a, 'de> {
    de: &'a mut Decoder<'de>,
}

impl<'a, 'de> Access<'a, 'de> {
    pub fn new(de: &'a mut Decoder<'de>) -> Self {
        Self { de }
    }
}

impl<'de, 'a> de::SeqAccess<'de> for Access<'a, 'de> {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>>
    where
        T: de::DeserializeSeed<'de>,
    {
        match self.de.read_token()? {
            Token::End => Ok(None),
            token => {
                self.de.push_back(token);
                seed.deserialize(&mut *self.de).map(Some)
            }
        }
    }
}

impl<'de, 'a> de::MapAccess<'de> for Access<'a, 'de> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: de::DeserializeSeed<'de>,
    {
        match self.de.read_token()? {
            Token::End => Ok(None),
            token @ Token::Bytes(_) => {
                self.de.push_back(token);
                seed.deserialize(&mut *self.de).map(Some)
            }
            _ => Err(Error::InvalidKey),
        }
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: de::DeserializeSeed<'de>,
    {
        seed.deserialize(&mut *self.de)
    }
}
