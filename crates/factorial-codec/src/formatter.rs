//! Struct formatting: drives a [`Reflect`] type's members through a writer
//! or reader using the members the active policy selects.
//!
//! Reading is name-driven. Entries are matched against the member map
//! (current, aliased and former names); unknown entries are skipped with a
//! warning and members absent from the data keep their `Default`.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::{SerializationConfig, SharedObject};
use crate::data::{DataReader, DataWriter, EntryType, NodeHeader};
use crate::error::CodecError;
use crate::member::{Reflect, TypeInfo};
use crate::resolver::MemberResolver;

/// Fail with [`CodecError::TypeNotAllowed`] when `type_info` is not
/// conventional and the configured policy only accepts conventional types.
pub fn ensure_type_allowed(
    type_info: &'static TypeInfo,
    config: &SerializationConfig,
) -> Result<(), CodecError> {
    if type_info.conventional || config.policy.allows_non_conventional_types() {
        return Ok(());
    }
    let err = CodecError::TypeNotAllowed {
        type_name: type_info.name,
        policy: config.policy.id().to_owned(),
    };
    config.debug.error(&err.to_string());
    Err(err)
}

fn check_type_name<T: Reflect>(
    header: &NodeHeader,
    reader: &dyn DataReader,
) -> Result<(), CodecError> {
    let expected = T::type_info().name;
    match header.type_name.as_deref() {
        Some(found) if found != expected => reader.context()?.debug().warn(format!(
            "node of type '{found}' read as '{expected}'"
        )),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write `value` as a struct node.
pub fn write_struct<T: Reflect>(
    value: &T,
    name: Option<&str>,
    writer: &mut dyn DataWriter,
) -> Result<(), CodecError> {
    ensure_type_allowed(T::type_info(), writer.context()?.config())?;
    writer.begin_struct_node(name, T::type_info().name)?;
    write_members(value, writer)?;
    writer.end_node()
}

/// Write every member of `value` selected by the writer's policy.
pub fn write_members<T: Reflect>(value: &T, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
    let policy = Arc::clone(writer.context()?.policy());
    let members = MemberResolver::global().get_members(T::type_info(), &policy);
    for member in members.iter() {
        member.write_value(value, writer)?;
    }
    Ok(())
}

/// Write a shared node, or a reference to it if this session already
/// wrote it.
pub fn write_shared<T>(
    node: &Arc<RwLock<T>>,
    name: Option<&str>,
    writer: &mut dyn DataWriter,
) -> Result<(), CodecError>
where
    T: Reflect + Send + Sync,
{
    let context = writer.context_mut()?;
    if let Some(id) = context.object_id(node) {
        return writer.write_internal_reference(name, id);
    }
    ensure_type_allowed(T::type_info(), context.config())?;
    let id = context.register_object(node)?;

    writer.begin_reference_node(name, T::type_info().name, id)?;
    {
        let value = node.read();
        write_members(&*value, writer)?;
    }
    writer.end_node()
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read a struct node into a fresh `T::default()`.
pub fn read_struct<T: Reflect + Default>(reader: &mut dyn DataReader) -> Result<T, CodecError> {
    ensure_type_allowed(T::type_info(), reader.context()?.config())?;
    let header = reader.enter_node()?;
    check_type_name::<T>(&header, reader)?;
    let mut value = T::default();
    read_members(&mut value, reader)?;
    reader.exit_node()?;
    Ok(value)
}

/// Read named entries into the members of `value` until the end of the
/// current node. The end itself is not consumed.
pub fn read_members<T: Reflect>(value: &mut T, reader: &mut dyn DataReader) -> Result<(), CodecError> {
    let policy = Arc::clone(reader.context()?.policy());
    let members = MemberResolver::global().get_member_map(T::type_info(), &policy);
    loop {
        let (entry, name) = reader.peek_entry()?;
        match entry {
            EntryType::EndOfNode => return Ok(()),
            EntryType::EndOfStream => {
                return Err(CodecError::InvalidData(format!(
                    "stream ended inside '{}'",
                    T::type_info().name
                )));
            }
            _ => {}
        }
        match name.as_deref().and_then(|name| members.get(name)) {
            Some(member) => member.read_value(value, reader)?,
            None => {
                reader.context()?.debug().warn(format!(
                    "skipping unknown entry '{}' in '{}'",
                    name.as_deref().unwrap_or("<unnamed>"),
                    T::type_info().name
                ))?;
                reader.skip_entry()?;
            }
        }
    }
}

/// Read a shared node, resolving internal references to nodes already
/// read in this session.
pub fn read_shared<T>(reader: &mut dyn DataReader) -> Result<Arc<RwLock<T>>, CodecError>
where
    T: Reflect + Default + Send + Sync,
{
    if reader.peek_entry()?.0 == EntryType::InternalReference {
        let id = reader.read_internal_reference()?;
        let object = reader
            .context()?
            .object(id)
            .cloned()
            .ok_or(CodecError::UnknownReference(id))?;
        return object
            .downcast::<RwLock<T>>()
            .map_err(|_| CodecError::ReferenceTypeMismatch {
                id,
                expected: T::type_info().name,
            });
    }

    ensure_type_allowed(T::type_info(), reader.context()?.config())?;
    let header = reader.enter_node()?;
    check_type_name::<T>(&header, reader)?;
    let node = Arc::new(RwLock::new(T::default()));
    // Registered before the members so references back to it resolve.
    if let Some(id) = header.id {
        let object: SharedObject = Arc::clone(&node) as SharedObject;
        reader.context_mut()?.register_object(id, object);
    }
    {
        let mut value = node.write();
        read_members(&mut *value, reader)?;
    }
    reader.exit_node()?;
    Ok(node)
}

// ===========================================================================
// Tests
// ===========================================================================
