//! Public entry points.
//!
//! Every function accepts an optional caller-owned context. Without one a
//! context is claimed from the shared cache for the duration of the call,
//! so reference ids never leak between unrelated calls.

use std::io::{Read, Write};

use crate::context::{
    ContextHandle, DeserializationContext, SerializationConfig, SerializationContext,
};
use crate::data::{self, DataReader, DataWriter, Format};
use crate::error::CodecError;
use crate::nodes::{NodeDataReader, NodeDataWriter, SerializationNode};
use crate::policy;
use crate::serializable::Serializable;

/// Write `value` as the root of `writer` and flush.
///
/// Failures are reported to the writer's logger before being returned.
pub fn serialize_value<T: Serializable>(
    value: &T,
    writer: &mut dyn DataWriter,
) -> Result<(), CodecError> {
    let result = value
        .write_value(None, writer)
        .and_then(|()| writer.flush());
    if let Err(err) = &result {
        if let Ok(context) = writer.context() {
            context.debug().exception(err);
        }
    }
    result
}

/// Read a root value from `reader`.
pub fn deserialize_value<T: Serializable>(reader: &mut dyn DataReader) -> Result<T, CodecError> {
    let result = T::read_value(reader);
    if let Err(err) = &result {
        if let Ok(context) = reader.context() {
            context.debug().exception(err);
        }
    }
    result
}

/// Serialize `value` into `stream` in `format`.
pub fn serialize_value_to<T: Serializable, W: Write>(
    value: &T,
    stream: &mut W,
    format: Format,
    context: Option<&mut SerializationContext>,
) -> Result<(), CodecError> {
    let mut writer = data::get_writer(format, stream, context)?;
    serialize_value(value, writer.as_mut())
}

/// Deserialize a value of type `T` from `stream` in `format`.
pub fn deserialize_value_from<T: Serializable, R: Read>(
    stream: &mut R,
    format: Format,
    context: Option<&mut DeserializationContext>,
) -> Result<T, CodecError> {
    let mut reader = data::get_reader(format, stream, context)?;
    deserialize_value(reader.as_mut())
}

pub fn serialize_to_bytes<T: Serializable>(
    value: &T,
    format: Format,
    context: Option<&mut SerializationContext>,
) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    serialize_value_to(value, &mut bytes, format, context)?;
    Ok(bytes)
}

pub fn deserialize_from_bytes<T: Serializable>(
    bytes: &[u8],
    format: Format,
    context: Option<&mut DeserializationContext>,
) -> Result<T, CodecError> {
    let mut stream = bytes;
    deserialize_value_from(&mut stream, format, context)
}

pub fn serialize_to_nodes<T: Serializable>(
    value: &T,
    context: Option<&mut SerializationContext>,
) -> Result<Vec<SerializationNode>, CodecError> {
    let mut writer = NodeDataWriter::new(context);
    serialize_value(value, &mut writer)?;
    Ok(writer.into_nodes())
}

pub fn deserialize_from_nodes<T: Serializable>(
    nodes: &[SerializationNode],
    context: Option<&mut DeserializationContext>,
) -> Result<T, CodecError> {
    let mut reader = NodeDataReader::new(nodes, context);
    deserialize_value(&mut reader)
}

/// An independent deep copy of `value`.
///
/// Value types, null and host references are copied directly (host
/// objects stay aliased). Anything else goes through a Binary round trip
/// under the permissive `everything` policy, so private and skipped
/// members are carried over and shared nodes keep their sharing.
pub fn create_copy<T: Serializable>(value: &T) -> Result<T, CodecError> {
    if let Some(copy) = value.copy_by_value() {
        return Ok(copy);
    }

    let mut write_handle = ContextHandle::<SerializationContext>::borrow_or_claim(None);
    let mut read_handle = ContextHandle::<DeserializationContext>::borrow_or_claim(None);
    let write_context = write_handle.get_mut()?;
    let read_context = read_handle.get_mut()?;
    *write_context.config_mut() = SerializationConfig::with_policy(policy::everything());
    *read_context.config_mut() = SerializationConfig::with_policy(policy::everything());

    let bytes = serialize_to_bytes(value, Format::Binary, Some(&mut *write_context))?;
    read_context.set_external_references(write_context.take_external_references());
    deserialize_from_bytes(&bytes, Format::Binary, Some(read_context))
}
