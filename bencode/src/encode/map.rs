use serde::ser;
use crate::error::{Error, Result};
use super::encoder::Encoder;

// All keys must be byte strings and must appear in lexicographical order.
// Entries are buffered so callers may serialize them in any order; values
// that encode to nothing (None fields) are dropped.
pub struct SortedMap<'a> {
    encoder: &'a mut Encoder,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pending_key: Option<Vec<u8>>,
}

impl<'a> SortedMap<'a> {

    pub fn new(encoder: &'a mut Encoder, size: usize) -> Self {
        Self {
            encoder,
            entries: Vec::with_capacity(size),
            pending_key: None,
        }
    }

    fn finish(&mut self) -> Result<()> {
        if self.pending_key.is_some() {
            return Err(Error::InvalidKey);
        }
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        self.encoder.push("d");
        for (key, value) in entries {
            ser::Serializer::serialize_bytes(&mut *self.encoder, &key)?;
            self.encoder.push(value);
        }
        self.encoder.push("e");
        Ok(())
    }
}

impl<'a> ser::SerializeMap for SortedMap<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_key<T: ?Sized>(&mut self, key: &T) -> Result<()>
    where
        T: serde::Serialize,
    {
        if self.pending_key.is_some() {
            return Err(Error::InvalidKey);
        }
        let mut key_ser = KeySerializer::default();
        key.serialize(&mut key_ser)?;
        self.pending_key = Some(key_ser.0);
        Ok(())
    }

    fn serialize_value<T: ?Sized>(&mut self, value: &T) -> Result<()>
    where
        T: serde::Serialize,
    {
        let key = self.pending_key.take().ok_or(Error::InvalidKey)?;
        let mut value_ser = Encoder::new();
        value.serialize(&mut value_ser)?;
        if !value_ser.is_empty() {
            self.entries.push((key, value_ser.into_buf()));
        }
        Ok(())
    }

    fn end(mut self) -> Result<()> {
        self.finish()
    }
}

impl<'a> ser::SerializeStruct for SortedMap<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized>(&mut self, key: &'static str, value: &T) -> Result<()>
    where
        T: serde::Serialize,
    {
        ser::SerializeMap::serialize_key(self, key)?;
        ser::SerializeMap::serialize_value(self, value)
    }

    fn end(mut self) -> Result<()> {
        self.finish()
    }
}

impl<'a> ser::SerializeStructVariant for SortedMap<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized>(&mut self, key: &'static str, value: &T) -> Result<()>
    where
        T: serde::Serialize,
    {
        ser::SerializeStruct::serialize_field(self, key, value)
    }

    fn end(mut self) -> Result<()> {
        self.finish()?;
        self.encoder.push("e");
        Ok(())
    }
}

// Serializes a map key to its raw bytes; anything but a string-like key is
// rejected.
#[derive(Default)]
struct KeySerializer(Vec<u8>);

impl<'a> ser::Serializer for &'a mut KeySerializer {

    type Ok = ();
    type Error = Error;

    type SerializeSeq           = ser::Impossible<(), Error>;
    type SerializeTuple         = ser::Impossible<(), Error>;
    type SerializeTupleStruct   = ser::Impossible<(), Error>;
    type SerializeTupleVariant  = ser::Impossible<(), Error>;
    type SerializeMap           = ser::Impossible<(), Error>;
    type SerializeStruct        = ser::Impossible<(), Error>;
    type SerializeStructVariant = ser::Impossible<(), Error>;

    fn serialize_str(self, v: &str) -> Result<()> {
        self.0.extend_from_slice(v.as_bytes());
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<()> {
        self.0.extend_from_slice(v);
        Ok(())
    }

    fn serialize_char(self, v: char) -> Result<()> {
        let mut buf = [0; 4];
        self.serialize_str(v.encode_utf8(&mut buf))
    }

    fn serialize_newtype_struct<T: ?Sized>(self, _name: &'static str, value: &T) -> Result<()>
    where
        T: serde::Serialize,
    {
        value.serialize(self)
    }

    fn serialize_bool(self, _: bool) -> Result<()> { Err(Error::InvalidKey) }
    fn serialize_i8(self, _: i8) -> Result<()> { Err(Error::InvalidKey) }
    fn serialize_i16(self, _: i16) -> Result<()> { Err(Error::InvalidKey) }
    fn serialize_i32(self, _: i32) -> Result<()> { Err(Error::InvalidKey) }
    fn serialize_i64(self, _: i64) -> Result<()> { Err(Error::InvalidKey) }
    fn serialize_u8(self, _: u8) -> Result<()> { Err(Error::InvalidKey) }
    fn serialize_u16(self, _: u16) -> Result<()> { Err(Error::InvalidKey) }
    fn serialize_u32(self, _: u32) -> Result<()> { Err(Error::InvalidKey) }
    fn serialize_u64(self, _: u64) -> Result<()> { Err(Error::InvalidKey) }
    fn serialize_f32(self, _: f32) -> Result<()> { Err(Error::InvalidKey) }
    fn serialize_f64(self, _: f64) -> Result<()> { Err(Error::InvalidKey) }
    fn serialize_unit(self) -> Result<()> { Err(Error::InvalidKey) }
    fn serialize_unit_struct(self, _: &'static str) -> Result<()> { Err(Error::InvalidKey) }
    fn serialize_none(self) -> Result<()> { Err(Error::InvalidKey) }

    fn serialize_some<T: ?Sized>(self, value: &T) -> Result<()>
    where
        T: serde::Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<()> {
        self.serialize_str(variant)
    }

    fn serialize_newtype_variant<T: ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<()>
    where
        T: serde::Serialize,
    {
        Err(Error::InvalidKey)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self::SerializeSeq> {
        Err(Error::InvalidKey)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self::SerializeTuple> {
        Err(Error::InvalidKey)
    }

    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self::SerializeTupleStruct> {
        Err(Error::InvalidKey)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(Error::InvalidKey)
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap> {
        Err(Error::InvalidKey)
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self::SerializeStruct> {
        Err(Error::InvalidKey)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(Error::InvalidKey)
    }
}
