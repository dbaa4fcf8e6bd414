//! Top-level shape inspection for serializable values
//!
//! The codec picks an encoding from a value's shape, and the cache service
//! skips "empty" results. Both only need the outermost layer of the serde
//! data model, so [`Shape::of`] drives a serializer that records that layer
//! and ignores everything nested below it.

use serde::Serialize;
use serde::ser;
use std::fmt;

/// Outermost shape of a value in the serde data model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `()`, `None` and unit structs
    Absent,
    /// Numbers, booleans, characters and unit enum variants
    Scalar,
    /// Strings, with their length in bytes
    Text(usize),
    /// Sequences, sets, tuples and byte strings, with their element count
    Seq(usize),
    /// Maps, with their entry count
    Map(usize),
    /// Structs and data-carrying enum variants
    Record,
}

impl Shape {
    /// Inspect `value`, failing only if its `Serialize` impl reports an error
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Shape, ProbeError> {
        value.serialize(ShapeProbe)
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Shape::Map(_))
    }

    /// Absent values and empty strings, collections or maps
    pub fn is_empty(&self) -> bool {
        matches!(
            self,
            Shape::Absent | Shape::Text(0) | Shape::Seq(0) | Shape::Map(0)
        )
    }
}

/// Error raised by a value's own `Serialize` impl while probing
#[derive(Debug)]
pub struct ProbeError(String);

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ProbeError {}

impl ser::Error for ProbeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        ProbeError(msg.to_string())
    }
}

struct ShapeProbe;

/// Counts elements of a sequence or entries of a map without visiting them
struct Counter {
    map: bool,
    count: usize,
}

impl Counter {
    fn finish(self) -> Shape {
        if self.map {
            Shape::Map(self.count)
        } else {
            Shape::Seq(self.count)
        }
    }
}

impl ser::SerializeSeq for Counter {
    type Ok = Shape;
    type Error = ProbeError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, _value: &T) -> Result<(), ProbeError> {
        self.count += 1;
        Ok(())
    }

    fn end(self) -> Result<Shape, ProbeError> {
        Ok(self.finish())
    }
}

impl ser::SerializeTuple for Counter {
    type Ok = Shape;
    type Error = ProbeError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, _value: &T) -> Result<(), ProbeError> {
        self.count += 1;
        Ok(())
    }

    fn end(self) -> Result<Shape, ProbeError> {
        Ok(self.finish())
    }
}

impl ser::SerializeMap for Counter {
    type Ok = Shape;
    type Error = ProbeError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, _key: &T) -> Result<(), ProbeError> {
        self.count += 1;
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, _value: &T) -> Result<(), ProbeError> {
        Ok(())
    }

    fn end(self) -> Result<Shape, ProbeError> {
        Ok(self.finish())
    }
}

/// Fields of structs and variants do not affect the shape
struct Fields;

impl ser::SerializeTupleStruct for Fields {
    type Ok = Shape;
    type Error = ProbeError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _value: &T) -> Result<(), ProbeError> {
        Ok(())
    }

    fn end(self) -> Result<Shape, ProbeError> {
        Ok(Shape::Record)
    }
}

impl ser::SerializeTupleVariant for Fields {
    type Ok = Shape;
    type Error = ProbeError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _value: &T) -> Result<(), ProbeError> {
        Ok(())
    }

    fn end(self) -> Result<Shape, ProbeError> {
        Ok(Shape::Record)
    }
}

impl ser::SerializeStruct for Fields {
    type Ok = Shape;
    type Error = ProbeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        _value: &T,
    ) -> Result<(), ProbeError> {
        Ok(())
    }

    fn end(self) -> Result<Shape, ProbeError> {
        Ok(Shape::Record)
    }
}

impl ser::SerializeStructVariant for Fields {
    type Ok = Shape;
    type Error = ProbeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        _value: &T,
    ) -> Result<(), ProbeError> {
        Ok(())
    }

    fn end(self) -> Result<Shape, ProbeError> {
        Ok(Shape::Record)
    }
}

impl ser::Serializer for ShapeProbe {
    type Ok = Shape;
    type Error = ProbeError;

    type SerializeSeq = Counter;
    type SerializeTuple = Counter;
    type SerializeTupleStruct = Fields;
    type SerializeTupleVariant = Fields;
    type SerializeMap = Counter;
    type SerializeStruct = Fields;
    type SerializeStructVariant = Fields;

    fn serialize_bool(self, _v: bool) -> Result<Shape, ProbeError> {
        Ok(Shape::Scalar)
    }

    fn serialize_i8(self, _v: i8) -> Result<Shape, ProbeError> {
        Ok(Shape::Scalar)
    }

    fn serialize_i16(self, _v: i16) -> Result<Shape, ProbeError> {
        Ok(Shape::Scalar)
    }

    fn serialize_i32(self, _v: i32) -> Result<Shape, ProbeError> {
        Ok(Shape::Scalar)
    }

    fn serialize_i64(self, _v: i64) -> Result<Shape, ProbeError> {
        Ok(Shape::Scalar)
    }

    fn serialize_i128(self, _v: i128) -> Result<Shape, ProbeError> {
        Ok(Shape::Scalar)
    }

    fn serialize_u8(self, _v: u8) -> Result<Shape, ProbeError> {
        Ok(Shape::Scalar)
    }

    fn serialize_u16(self, _v: u16) -> Result<Shape, ProbeError> {
        Ok(Shape::Scalar)
    }

    fn serialize_u32(self, _v: u32) -> Result<Shape, ProbeError> {
        Ok(Shape::Scalar)
    }

    fn serialize_u64(self, _v: u64) -> Result<Shape, ProbeError> {
        Ok(Shape::Scalar)
    }

    fn serialize_u128(self, _v: u128) -> Result<Shape, ProbeError> {
        Ok(Shape::Scalar)
    }

    fn serialize_f32(self, _v: f32) -> Result<Shape, ProbeError> {
        Ok(Shape::Scalar)
    }

    fn serialize_f64(self, _v: f64) -> Result<Shape, ProbeError> {
        Ok(Shape::Scalar)
    }

    fn serialize_char(self, _v: char) -> Result<Shape, ProbeError> {
        Ok(Shape::Scalar)
    }

    fn serialize_str(self, v: &str) -> Result<Shape, ProbeError> {
        Ok(Shape::Text(v.len()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Shape, ProbeError> {
        Ok(Shape::Seq(v.len()))
    }

    fn serialize_none(self) -> Result<Shape, ProbeError> {
        Ok(Shape::Absent)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Shape, ProbeError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Shape, ProbeError> {
        Ok(Shape::Absent)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Shape, ProbeError> {
        Ok(Shape::Absent)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Result<Shape, ProbeError> {
        Ok(Shape::Scalar)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Shape, ProbeError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<Shape, ProbeError> {
        Ok(Shape::Record)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Counter, ProbeError> {
        Ok(Counter { map: false, count: 0 })
    }

    fn serialize_tuple(self, _len: usize) -> Result<Counter, ProbeError> {
        Ok(Counter { map: false, count: 0 })
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Fields, ProbeError> {
        Ok(Fields)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Fields, ProbeError> {
        Ok(Fields)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Counter, ProbeError> {
        Ok(Counter { map: true, count: 0 })
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Fields, ProbeError> {
        Ok(Fields)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Fields, ProbeError> {
        Ok(Fields)
    }
}
