//! The [`Serializable`] capability and its implementations for built-in types.
//!
//! Primitives map to single entries, sequences to arrays, maps to arrays of
//! `$entry` nodes holding `$k`/`$v`, structs (via the derive) to nodes, and
//! shared graph nodes `Arc<RwLock<T>>` to reference nodes so sharing and
//! cycles survive a round trip.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::data::{DataReader, DataWriter, EntryType};
use crate::error::CodecError;
use crate::formatter;
use crate::member::Reflect;

/// Node type name of one map entry.
pub const MAP_ENTRY: &str = "$entry";
pub const MAP_KEY: &str = "$k";
pub const MAP_VALUE: &str = "$v";

// Upper bound on preallocation from a declared length.
pub(crate) const MAX_PREALLOCATION: usize = 4096;

/// A value that can be written to a [`DataWriter`] and read back from a
/// [`DataReader`].
pub trait Serializable: Sized + 'static {
    fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError>;

    fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError>;

    /// A copy that needs no round trip, for value types, null and host
    /// aliases. `None` means the value must be deep-copied through a stream.
    fn copy_by_value(&self) -> Option<Self> {
        None
    }
}

/// `Vec<u8>` written as one primitive array entry instead of an array of
/// integers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteArray(pub Vec<u8>);

impl From<Vec<u8>> for ByteArray {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

macro_rules! impl_signed {
    ($($ty:ty),*) => {$(
        impl Serializable for $ty {
            fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
                let value = i64::try_from(*self).map_err(|_| CodecError::OutOfRange {
                    value: self.to_string(),
                    target: "i64",
                })?;
                writer.write_int(name, value)
            }

            fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
                let value = reader.read_int()?;
                <$ty>::try_from(value).map_err(|_| CodecError::OutOfRange {
                    value: value.to_string(),
                    target: stringify!($ty),
                })
            }

            fn copy_by_value(&self) -> Option<Self> {
                Some(*self)
            }
        }
    )*};
}

macro_rules! impl_unsigned {
    ($($ty:ty),*) => {$(
        impl Serializable for $ty {
            fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
                let value = u64::try_from(*self).map_err(|_| CodecError::OutOfRange {
                    value: self.to_string(),
                    target: "u64",
                })?;
                writer.write_uint(name, value)
            }

            fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
                let value = reader.read_uint()?;
                <$ty>::try_from(value).map_err(|_| CodecError::OutOfRange {
                    value: value.to_string(),
                    target: stringify!($ty),
                })
            }

            fn copy_by_value(&self) -> Option<Self> {
                Some(*self)
            }
        }
    )*};
}

impl_signed!(i8, i16, i32, i64, isize);
impl_unsigned!(u8, u16, u32, u64, usize);

impl Serializable for bool {
    fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
        writer.write_bool(name, *self)
    }

    fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
        reader.read_bool()
    }

    fn copy_by_value(&self) -> Option<Self> {
        Some(*self)
    }
}

impl Serializable for f32 {
    fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
        writer.write_f32(name, *self)
    }

    fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
        reader.read_f32()
    }

    fn copy_by_value(&self) -> Option<Self> {
        Some(*self)
    }
}

impl Serializable for f64 {
    fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
        writer.write_f64(name, *self)
    }

    fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
        reader.read_f64()
    }

    fn copy_by_value(&self) -> Option<Self> {
        Some(*self)
    }
}

impl Serializable for char {
    fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
        let mut buf = [0u8; 4];
        writer.write_string(name, self.encode_utf8(&mut buf))
    }

    fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
        let text = reader.read_string()?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(CodecError::InvalidData(format!(
                "expected a single character, found '{text}'"
            ))),
        }
    }

    fn copy_by_value(&self) -> Option<Self> {
        Some(*self)
    }
}

impl Serializable for String {
    fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
        writer.write_string(name, self)
    }

    fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
        reader.read_string()
    }

    fn copy_by_value(&self) -> Option<Self> {
        Some(self.clone())
    }
}

impl Serializable for ByteArray {
    fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
        writer.write_bytes(name, &self.0)
    }

    fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
        reader.read_bytes().map(Self)
    }
}

// ---------------------------------------------------------------------------
// Wrappers and collections
// ---------------------------------------------------------------------------

impl<T: Serializable> Serializable for Option<T> {
    fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
        match self {
            Some(value) => value.write_value(name, writer),
            None => writer.write_null(name),
        }
    }

    fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
        if reader.peek_entry()?.0 == EntryType::Null {
            reader.read_null()?;
            return Ok(None);
        }
        T::read_value(reader).map(Some)
    }

    fn copy_by_value(&self) -> Option<Self> {
        match self {
            Some(value) => value.copy_by_value().map(Some),
            None => Some(None),
        }
    }
}

impl<T: Serializable> Serializable for Box<T> {
    fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
        (**self).write_value(name, writer)
    }

    fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
        T::read_value(reader).map(Box::new)
    }

    fn copy_by_value(&self) -> Option<Self> {
        (**self).copy_by_value().map(Box::new)
    }
}

/// Read array items until the end of the array, then consume the end.
fn read_array_items(
    reader: &mut dyn DataReader,
    mut read_item: impl FnMut(&mut dyn DataReader) -> Result<(), CodecError>,
) -> Result<(), CodecError> {
    loop {
        match reader.peek_entry()?.0 {
            EntryType::EndOfArray => break,
            EntryType::EndOfStream => {
                return Err(CodecError::InvalidData("stream ended inside an array".into()));
            }
            _ => read_item(reader)?,
        }
    }
    reader.exit_array()
}

impl<T: Serializable> Serializable for Vec<T> {
    fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
        writer.begin_array_node(name, self.len())?;
        for item in self {
            item.write_value(None, writer)?;
        }
        writer.end_array_node()
    }

    fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
        let length = reader.enter_array()?;
        let mut items = Vec::with_capacity(length.min(MAX_PREALLOCATION));
        read_array_items(reader, |reader| {
            items.push(T::read_value(reader)?);
            Ok(())
        })?;
        Ok(items)
    }

    fn copy_by_value(&self) -> Option<Self> {
        self.iter().map(T::copy_by_value).collect()
    }
}

fn write_map_entries<'m, K, V>(
    entries: impl ExactSizeIterator<Item = (&'m K, &'m V)>,
    name: Option<&str>,
    writer: &mut dyn DataWriter,
) -> Result<(), CodecError>
where
    K: Serializable,
    V: Serializable,
{
    writer.begin_array_node(name, entries.len())?;
    for (key, value) in entries {
        writer.begin_struct_node(None, MAP_ENTRY)?;
        key.write_value(Some(MAP_KEY), writer)?;
        value.write_value(Some(MAP_VALUE), writer)?;
        writer.end_node()?;
    }
    writer.end_array_node()
}

fn read_map_entries<K, V>(
    reader: &mut dyn DataReader,
    mut insert: impl FnMut(K, V),
) -> Result<(), CodecError>
where
    K: Serializable,
    V: Serializable,
{
    reader.enter_array()?;
    read_array_items(reader, |reader| {
        reader.enter_node()?;
        let key = K::read_value(reader)?;
        let value = V::read_value(reader)?;
        reader.exit_node()?;
        insert(key, value);
        Ok(())
    })
}

impl<K, V> Serializable for HashMap<K, V>
where
    K: Serializable + Eq + Hash,
    V: Serializable,
{
    fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
        write_map_entries(self.iter(), name, writer)
    }

    fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
        let mut map = HashMap::new();
        read_map_entries(reader, |key, value| {
            map.insert(key, value);
        })?;
        Ok(map)
    }

    fn copy_by_value(&self) -> Option<Self> {
        self.iter()
            .map(|(k, v)| Some((k.copy_by_value()?, v.copy_by_value()?)))
            .collect()
    }
}

impl<K, V> Serializable for BTreeMap<K, V>
where
    K: Serializable + Ord,
    V: Serializable,
{
    fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
        write_map_entries(self.iter(), name, writer)
    }

    fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
        let mut map = BTreeMap::new();
        read_map_entries(reader, |key, value| {
            map.insert(key, value);
        })?;
        Ok(map)
    }

    fn copy_by_value(&self) -> Option<Self> {
        self.iter()
            .map(|(k, v)| Some((k.copy_by_value()?, v.copy_by_value()?)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Shared graph nodes
// ---------------------------------------------------------------------------

impl<T> Serializable for Arc<RwLock<T>>
where
    T: Reflect + Default + Send + Sync,
{
    fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
        formatter::write_shared(self, name, writer)
    }

    fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
        formatter::read_shared(reader)
    }
}

/// A dead weak reference is written as null and read back as an empty
/// `Weak`.
impl<T> Serializable for Weak<RwLock<T>>
where
    T: Reflect + Default + Send + Sync,
{
    fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
        match self.upgrade() {
            Some(node) => formatter::write_shared(&node, name, writer),
            None => writer.write_null(name),
        }
    }

    fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
        if reader.peek_entry()?.0 == EntryType::Null {
            reader.read_null()?;
            return Ok(Weak::new());
        }
        let node = formatter::read_shared::<T>(reader)?;
        Ok(Arc::downgrade(&node))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
