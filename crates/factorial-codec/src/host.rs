//! References to host-managed objects.
//!
//! A [`HostRef`] points at an object owned by the embedding engine (a
//! texture, a prefab, a scene handle). It is never written inline: the
//! serialization context records the object in its external table and the
//! stream only carries the table index. The reader resolves the index
//! against the table it was handed; an index it cannot resolve becomes
//! [`HostRef::Missing`] with a warning.

use std::sync::Arc;

use crate::data::{DataReader, DataWriter, EntryType};
use crate::error::CodecError;
use crate::serializable::Serializable;

/// A host-managed object, or the sentinel for one that could not be
/// resolved.
#[derive(Debug)]
pub enum HostRef<T> {
    Live(Arc<T>),
    Missing,
}

impl<T> HostRef<T> {
    pub fn new(value: T) -> Self {
        Self::Live(Arc::new(value))
    }

    pub fn from_arc(object: Arc<T>) -> Self {
        Self::Live(object)
    }

    pub fn get(&self) -> Option<&Arc<T>> {
        match self {
            Self::Live(object) => Some(object),
            Self::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl<T> Clone for HostRef<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Live(object) => Self::Live(Arc::clone(object)),
            Self::Missing => Self::Missing,
        }
    }
}

impl<T> Default for HostRef<T> {
    fn default() -> Self {
        Self::Missing
    }
}

/// Identity comparison: two live references are equal when they point at
/// the same object.
impl<T> PartialEq for HostRef<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Live(a), Self::Live(b)) => Arc::ptr_eq(a, b),
            (Self::Missing, Self::Missing) => true,
            _ => false,
        }
    }
}

impl<T> Eq for HostRef<T> {}

impl<T: Send + Sync + 'static> Serializable for HostRef<T> {
    fn write_value(&self, name: Option<&str>, writer: &mut dyn DataWriter) -> Result<(), CodecError> {
        match self {
            Self::Live(object) => {
                let index = writer.context_mut()?.register_external(object)?;
                writer.write_external_reference(name, index)
            }
            Self::Missing => writer.write_null(name),
        }
    }

    fn read_value(reader: &mut dyn DataReader) -> Result<Self, CodecError> {
        if reader.peek_entry()?.0 == EntryType::Null {
            reader.read_null()?;
            return Ok(Self::Missing);
        }
        let index = reader.read_external_reference()?;
        let context = reader.context()?;
        let resolved = context
            .external_reference(index)
            .cloned()
            .map(|object| object.downcast::<T>());
        match resolved {
            Some(Ok(object)) => Ok(Self::Live(object)),
            Some(Err(_)) => {
                context.debug().warn(format!(
                    "external reference {index} is not a '{}'",
                    std::any::type_name::<T>()
                ))?;
                Ok(Self::Missing)
            }
            None => {
                context
                    .debug()
                    .warn(format!("external reference {index} could not be resolved"))?;
                Ok(Self::Missing)
            }
        }
    }

    /// Host objects are aliased, never cloned.
    fn copy_by_value(&self) -> Option<Self> {
        Some(self.clone())
    }
}
