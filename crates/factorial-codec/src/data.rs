//! Format-neutral writer and reader interfaces.
//!
//! A stream is a sequence of entries. Each entry has an optional name and
//! an [`EntryType`]. Structs are nodes (`begin_*_node` .. `end_node`),
//! sequences are arrays (`begin_array_node` .. `end_array_node`), and
//! everything else is a single primitive entry. Writers and readers for
//! every format implement [`DataWriter`] / [`DataReader`]; the value layer
//! ([`Serializable`](crate::serializable::Serializable)) only talks to these
//! traits.
//!
//! [`get_writer`] and [`get_reader`] build the stream-backed
//! implementations. [`Format::Nodes`] is an in-memory tree and has no
//! stream constructor; use [`nodes`](crate::nodes) directly.
//!
//! Every writer refuses, and every reader rejects, nodes and arrays nested
//! deeper than [`MAX_NESTING_DEPTH`], so whatever one format writes the
//! same format can read back.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::binary::{BinaryDataReader, BinaryDataWriter};
use crate::context::{ContextHandle, DeserializationContext, SerializationContext};
use crate::error::CodecError;
use crate::json::{JsonDataReader, JsonDataWriter};

/// Wire formats understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    #[default]
    Binary,
    Json,
    /// In-memory [`SerializationNode`](crate::nodes::SerializationNode) tree.
    Nodes,
}

/// Kind of the next entry in a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    String,
    Integer,
    FloatingPoint,
    Boolean,
    Null,
    StartOfNode,
    EndOfNode,
    InternalReference,
    ExternalReference,
    StartOfArray,
    EndOfArray,
    PrimitiveArray,
    EndOfStream,
}

/// Deepest nesting of nodes and arrays a writer emits or a reader accepts.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Count of currently open nodes and arrays.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Depth(usize);

impl Depth {
    /// Open one more level, failing past [`MAX_NESTING_DEPTH`].
    pub(crate) fn descend(&mut self) -> Result<(), CodecError> {
        if self.0 >= MAX_NESTING_DEPTH {
            return Err(CodecError::NestingTooDeep {
                limit: MAX_NESTING_DEPTH,
            });
        }
        self.0 += 1;
        Ok(())
    }

    pub(crate) fn ascend(&mut self) {
        self.0 = self.0.saturating_sub(1);
    }

    pub(crate) fn reset(&mut self) {
        self.0 = 0;
    }
}

/// Header of a node as seen by a reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeHeader {
    pub type_name: Option<String>,
    /// Present for reference nodes (shared objects).
    pub id: Option<u32>,
}

/// Sink for entries.
pub trait DataWriter {
    fn context(&self) -> Result<&SerializationContext, CodecError>;
    fn context_mut(&mut self) -> Result<&mut SerializationContext, CodecError>;

    fn begin_struct_node(&mut self, name: Option<&str>, type_name: &str) -> Result<(), CodecError>;
    /// A node for a shared object that later entries may refer to by `id`.
    fn begin_reference_node(
        &mut self,
        name: Option<&str>,
        type_name: &str,
        id: u32,
    ) -> Result<(), CodecError>;
    fn end_node(&mut self) -> Result<(), CodecError>;
    fn begin_array_node(&mut self, name: Option<&str>, length: usize) -> Result<(), CodecError>;
    fn end_array_node(&mut self) -> Result<(), CodecError>;

    fn write_null(&mut self, name: Option<&str>) -> Result<(), CodecError>;
    fn write_internal_reference(&mut self, name: Option<&str>, id: u32) -> Result<(), CodecError>;
    fn write_external_reference(&mut self, name: Option<&str>, index: u32)
    -> Result<(), CodecError>;
    fn write_bool(&mut self, name: Option<&str>, value: bool) -> Result<(), CodecError>;
    fn write_int(&mut self, name: Option<&str>, value: i64) -> Result<(), CodecError>;
    fn write_uint(&mut self, name: Option<&str>, value: u64) -> Result<(), CodecError>;
    fn write_f32(&mut self, name: Option<&str>, value: f32) -> Result<(), CodecError>;
    fn write_f64(&mut self, name: Option<&str>, value: f64) -> Result<(), CodecError>;
    fn write_string(&mut self, name: Option<&str>, value: &str) -> Result<(), CodecError>;
    fn write_bytes(&mut self, name: Option<&str>, value: &[u8]) -> Result<(), CodecError>;

    /// Push everything written so far to the destination.
    fn flush(&mut self) -> Result<(), CodecError>;
}

/// Source of entries.
///
/// `peek_entry` never consumes. Typed reads fail with
/// [`CodecError::UnexpectedEntry`] without consuming when the next entry
/// has the wrong type.
pub trait DataReader {
    fn context(&self) -> Result<&DeserializationContext, CodecError>;
    fn context_mut(&mut self) -> Result<&mut DeserializationContext, CodecError>;

    fn peek_entry(&mut self) -> Result<(EntryType, Option<String>), CodecError>;

    fn enter_node(&mut self) -> Result<NodeHeader, CodecError>;
    /// Skip whatever is left of the current node and consume its end.
    fn exit_node(&mut self) -> Result<(), CodecError>;
    /// Returns the declared length.
    fn enter_array(&mut self) -> Result<usize, CodecError>;
    /// Skip whatever is left of the current array and consume its end.
    fn exit_array(&mut self) -> Result<(), CodecError>;

    fn read_null(&mut self) -> Result<(), CodecError>;
    fn read_internal_reference(&mut self) -> Result<u32, CodecError>;
    fn read_external_reference(&mut self) -> Result<u32, CodecError>;
    fn read_bool(&mut self) -> Result<bool, CodecError>;
    fn read_int(&mut self) -> Result<i64, CodecError>;
    fn read_uint(&mut self) -> Result<u64, CodecError>;
    fn read_f32(&mut self) -> Result<f32, CodecError>;
    fn read_f64(&mut self) -> Result<f64, CodecError>;
    fn read_string(&mut self) -> Result<String, CodecError>;
    fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError>;

    /// Skip the next entry, including a whole node or array.
    fn skip_entry(&mut self) -> Result<(), CodecError>;
}

/// Stream writer for `format`, using `context` or a pooled one.
pub fn get_writer<'a>(
    format: Format,
    stream: &'a mut dyn Write,
    context: Option<&'a mut SerializationContext>,
) -> Result<Box<dyn DataWriter + 'a>, CodecError> {
    match format {
        Format::Binary => {
            let context = ContextHandle::borrow_or_claim(context);
            Ok(Box::new(BinaryDataWriter::new(stream, context)?))
        }
        Format::Json => {
            let context = ContextHandle::borrow_or_claim(context);
            Ok(Box::new(JsonDataWriter::new(stream, context)))
        }
        Format::Nodes => Err(nodes_unsupported()),
    }
}

/// Stream reader for `format`, using `context` or a pooled one.
pub fn get_reader<'a>(
    format: Format,
    stream: &'a mut dyn Read,
    context: Option<&'a mut DeserializationContext>,
) -> Result<Box<dyn DataReader + 'a>, CodecError> {
    match format {
        Format::Binary => {
            let context = ContextHandle::borrow_or_claim(context);
            Ok(Box::new(BinaryDataReader::new(stream, context)?))
        }
        Format::Json => {
            let context = ContextHandle::borrow_or_claim(context);
            Ok(Box::new(JsonDataReader::new(stream, context)?))
        }
        Format::Nodes => Err(nodes_unsupported()),
    }
}

fn nodes_unsupported() -> CodecError {
    CodecError::UnsupportedOperation(
        "the Nodes format is an in-memory tree with no stream writer or reader; \
         use NodeDataWriter / NodeDataReader"
            .into(),
    )
}
