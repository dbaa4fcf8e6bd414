//! Self-describing value tree behind format B
//!
//! bincode writes bare values and needs the target type to read them back,
//! which rules out types that deserialize through `deserialize_any`
//! (`serde_json::Value`, untagged enums, flattened structs). Format B
//! therefore captures a value as a [`Tree`] first and hands the tree to
//! bincode: every node carries its own variant tag, so the bytes decode
//! without knowing the original type, and [`Tree`] is itself a
//! `Deserializer` the target type reads from.
//!
//! Structs and enum variants take the shapes JSON gives them: structs become
//! maps keyed by field name, a unit variant is its name, and a data-carrying
//! variant is a one-entry map from its name to its content. Map keys keep
//! their own type, so integer-keyed maps survive.

use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{self, IntoDeserializer, Visitor};
use serde::{Deserialize, Serialize, ser};
use std::fmt;

/// One node of a captured value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Tree {
    Unit,
    Bool(bool),
    I64(i64),
    U64(u64),
    I128(i128),
    U128(u128),
    F64(f64),
    Char(char),
    Str(String),
    Bytes(Vec<u8>),
    None,
    Some(Box<Tree>),
    Seq(Vec<Tree>),
    Map(Vec<(Tree, Tree)>),
}

impl Tree {
    /// Capture `value`, failing only if its `Serialize` impl reports an error
    pub fn capture<T: Serialize + ?Sized>(value: &T) -> Result<Tree, TreeError> {
        value.serialize(TreeSerializer)
    }

    /// Read a `T` back out of the tree
    pub fn restore<T: de::DeserializeOwned>(self) -> Result<T, TreeError> {
        T::deserialize(self)
    }

    fn variant(name: &str, content: Tree) -> Tree {
        Tree::Map(vec![(Tree::Str(name.to_string()), content)])
    }

    fn kind(&self) -> &'static str {
        match self {
            Tree::Unit => "unit",
            Tree::Bool(_) => "boolean",
            Tree::I64(_) | Tree::U64(_) | Tree::I128(_) | Tree::U128(_) => "integer",
            Tree::F64(_) => "float",
            Tree::Char(_) => "character",
            Tree::Str(_) => "string",
            Tree::Bytes(_) => "bytes",
            Tree::None | Tree::Some(_) => "option",
            Tree::Seq(_) => "sequence",
            Tree::Map(_) => "map",
        }
    }
}

#[derive(Debug)]
pub struct TreeError(String);

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TreeError {}

impl ser::Error for TreeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        TreeError(msg.to_string())
    }
}

impl de::Error for TreeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        TreeError(msg.to_string())
    }
}

struct TreeSerializer;

/// Sequences, tuples and tuple structs
struct SeqBuilder {
    items: Vec<Tree>,
}

impl ser::SerializeSeq for SeqBuilder {
    type Ok = Tree;
    type Error = TreeError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), TreeError> {
        self.items.push(Tree::capture(value)?);
        Ok(())
    }

    fn end(self) -> Result<Tree, TreeError> {
        Ok(Tree::Seq(self.items))
    }
}

impl ser::SerializeTuple for SeqBuilder {
    type Ok = Tree;
    type Error = TreeError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), TreeError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Tree, TreeError> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqBuilder {
    type Ok = Tree;
    type Error = TreeError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), TreeError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Tree, TreeError> {
        ser::SerializeSeq::end(self)
    }
}

struct VariantSeqBuilder {
    name: &'static str,
    items: Vec<Tree>,
}

impl ser::SerializeTupleVariant for VariantSeqBuilder {
    type Ok = Tree;
    type Error = TreeError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), TreeError> {
        self.items.push(Tree::capture(value)?);
        Ok(())
    }

    fn end(self) -> Result<Tree, TreeError> {
        Ok(Tree::variant(self.name, Tree::Seq(self.items)))
    }
}

/// Maps and structs
struct MapBuilder {
    entries: Vec<(Tree, Tree)>,
    key: Option<Tree>,
}

impl ser::SerializeMap for MapBuilder {
    type Ok = Tree;
    type Error = TreeError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), TreeError> {
        self.key = Some(Tree::capture(key)?);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), TreeError> {
        let key = self
            .key
            .take()
            .ok_or_else(|| TreeError("map value without a key".to_string()))?;
        self.entries.push((key, Tree::capture(value)?));
        Ok(())
    }

    fn end(self) -> Result<Tree, TreeError> {
        Ok(Tree::Map(self.entries))
    }
}

impl ser::SerializeStruct for MapBuilder {
    type Ok = Tree;
    type Error = TreeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), TreeError> {
        self.entries
            .push((Tree::Str(key.to_string()), Tree::capture(value)?));
        Ok(())
    }

    fn end(self) -> Result<Tree, TreeError> {
        Ok(Tree::Map(self.entries))
    }
}

struct VariantMapBuilder {
    name: &'static str,
    fields: MapBuilder,
}

impl ser::SerializeStructVariant for VariantMapBuilder {
    type Ok = Tree;
    type Error = TreeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), TreeError> {
        ser::SerializeStruct::serialize_field(&mut self.fields, key, value)
    }

    fn end(self) -> Result<Tree, TreeError> {
        Ok(Tree::variant(self.name, Tree::Map(self.fields.entries)))
    }
}

impl ser::Serializer for TreeSerializer {
    type Ok = Tree;
    type Error = TreeError;

    type SerializeSeq = SeqBuilder;
    type SerializeTuple = SeqBuilder;
    type SerializeTupleStruct = SeqBuilder;
    type SerializeTupleVariant = VariantSeqBuilder;
    type SerializeMap = MapBuilder;
    type SerializeStruct = MapBuilder;
    type SerializeStructVariant = VariantMapBuilder;

    fn serialize_bool(self, v: bool) -> Result<Tree, TreeError> {
        Ok(Tree::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Tree, TreeError> {
        Ok(Tree::I64(v.into()))
    }

    fn serialize_i16(self, v: i16) -> Result<Tree, TreeError> {
        Ok(Tree::I64(v.into()))
    }

    fn serialize_i32(self, v: i32) -> Result<Tree, TreeError> {
        Ok(Tree::I64(v.into()))
    }

    fn serialize_i64(self, v: i64) -> Result<Tree, TreeError> {
        Ok(Tree::I64(v))
    }

    fn serialize_i128(self, v: i128) -> Result<Tree, TreeError> {
        Ok(Tree::I128(v))
    }

    fn serialize_u8(self, v: u8) -> Result<Tree, TreeError> {
        Ok(Tree::U64(v.into()))
    }

    fn serialize_u16(self, v: u16) -> Result<Tree, TreeError> {
        Ok(Tree::U64(v.into()))
    }

    fn serialize_u32(self, v: u32) -> Result<Tree, TreeError> {
        Ok(Tree::U64(v.into()))
    }

    fn serialize_u64(self, v: u64) -> Result<Tree, TreeError> {
        Ok(Tree::U64(v))
    }

    fn serialize_u128(self, v: u128) -> Result<Tree, TreeError> {
        Ok(Tree::U128(v))
    }

    fn serialize_f32(self, v: f32) -> Result<Tree, TreeError> {
        Ok(Tree::F64(v.into()))
    }

    fn serialize_f64(self, v: f64) -> Result<Tree, TreeError> {
        Ok(Tree::F64(v))
    }

    fn serialize_char(self, v: char) -> Result<Tree, TreeError> {
        Ok(Tree::Char(v))
    }

    fn serialize_str(self, v: &str) -> Result<Tree, TreeError> {
        Ok(Tree::Str(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Tree, TreeError> {
        Ok(Tree::Bytes(v.to_vec()))
    }

    fn serialize_none(self) -> Result<Tree, TreeError> {
        Ok(Tree::None)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Tree, TreeError> {
        Ok(Tree::Some(Box::new(Tree::capture(value)?)))
    }

    fn serialize_unit(self) -> Result<Tree, TreeError> {
        Ok(Tree::Unit)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Tree, TreeError> {
        Ok(Tree::Unit)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Tree, TreeError> {
        Ok(Tree::Str(variant.to_string()))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Tree, TreeError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Tree, TreeError> {
        Ok(Tree::variant(variant, Tree::capture(value)?))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqBuilder, TreeError> {
        Ok(SeqBuilder {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqBuilder, TreeError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqBuilder, TreeError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantSeqBuilder, TreeError> {
        Ok(VariantSeqBuilder {
            name: variant,
            items: Vec::with_capacity(len),
        })
    }

    // Unknown lengths (flattened structs) are fine here
    fn serialize_map(self, len: Option<usize>) -> Result<MapBuilder, TreeError> {
        Ok(MapBuilder {
            entries: Vec::with_capacity(len.unwrap_or(0)),
            key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<MapBuilder, TreeError> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantMapBuilder, TreeError> {
        Ok(VariantMapBuilder {
            name: variant,
            fields: self.serialize_map(Some(len))?,
        })
    }
}

impl<'de> IntoDeserializer<'de, TreeError> for Tree {
    type Deserializer = Tree;

    fn into_deserializer(self) -> Tree {
        self
    }
}

impl<'de> de::Deserializer<'de> for Tree {
    type Error = TreeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, TreeError> {
        match self {
            Tree::Unit => visitor.visit_unit(),
            Tree::Bool(v) => visitor.visit_bool(v),
            Tree::I64(v) => visitor.visit_i64(v),
            Tree::U64(v) => visitor.visit_u64(v),
            Tree::I128(v) => visitor.visit_i128(v),
            Tree::U128(v) => visitor.visit_u128(v),
            Tree::F64(v) => visitor.visit_f64(v),
            Tree::Char(v) => visitor.visit_char(v),
            Tree::Str(v) => visitor.visit_string(v),
            Tree::Bytes(v) => visitor.visit_byte_buf(v),
            Tree::None => visitor.visit_none(),
            Tree::Some(inner) => visitor.visit_some(*inner),
            Tree::Seq(items) => {
                let mut seq = SeqDeserializer::new(items.into_iter());
                let value = visitor.visit_seq(&mut seq)?;
                seq.end()?;
                Ok(value)
            }
            Tree::Map(entries) => {
                let mut map = MapDeserializer::new(entries.into_iter());
                let value = visitor.visit_map(&mut map)?;
                map.end()?;
                Ok(value)
            }
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, TreeError> {
        match self {
            Tree::None | Tree::Unit => visitor.visit_none(),
            Tree::Some(inner) => visitor.visit_some(*inner),
            other => visitor.visit_some(other),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, TreeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, TreeError> {
        match self {
            Tree::Str(name) => visitor.visit_enum(name.into_deserializer()),
            Tree::Map(mut entries) if entries.len() == 1 => {
                let Some((Tree::Str(name), content)) = entries.pop() else {
                    return Err(TreeError("enum variant name must be a string".to_string()));
                };
                visitor.visit_enum(VariantTree { name, content })
            }
            other => Err(TreeError(format!(
                "expected an enum variant, found {}",
                other.kind()
            ))),
        }
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map struct
        identifier ignored_any
    }
}

/// A data-carrying enum variant being read
struct VariantTree {
    name: String,
    content: Tree,
}

impl<'de> de::EnumAccess<'de> for VariantTree {
    type Error = TreeError;
    type Variant = Tree;

    fn variant_seed<S: de::DeserializeSeed<'de>>(
        self,
        seed: S,
    ) -> Result<(S::Value, Tree), TreeError> {
        let variant = seed.deserialize(Tree::Str(self.name))?;
        Ok((variant, self.content))
    }
}

impl<'de> de::VariantAccess<'de> for Tree {
    type Error = TreeError;

    fn unit_variant(self) -> Result<(), TreeError> {
        match self {
            Tree::Unit => Ok(()),
            other => Err(TreeError(format!(
                "expected a unit variant, found {}",
                other.kind()
            ))),
        }
    }

    fn newtype_variant_seed<S: de::DeserializeSeed<'de>>(
        self,
        seed: S,
    ) -> Result<S::Value, TreeError> {
        seed.deserialize(self)
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, TreeError> {
        de::Deserializer::deserialize_any(self, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, TreeError> {
        de::Deserializer::deserialize_any(self, visitor)
    }
}
