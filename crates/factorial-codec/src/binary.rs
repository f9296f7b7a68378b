//! Compact binary format.
//!
//! # Wire layout
//!
//! Every entry starts with a tag byte. Bit `0x80` marks a named entry, in
//! which case a length-prefixed UTF-8 name follows. Then the payload:
//!
//! | Tag  | Entry            | Payload                                |
//! |------|------------------|----------------------------------------|
//! | 0x01 | struct node      | type name (string)                     |
//! | 0x02 | reference node   | type name (string), id (u32)           |
//! | 0x03 | end of node      |                                        |
//! | 0x04 | start of array   | length (u64)                           |
//! | 0x05 | end of array     |                                        |
//! | 0x06 | primitive array  | byte count (u32), bytes                |
//! | 0x07 | internal ref     | id (u32)                               |
//! | 0x08 | external ref     | index (u32)                            |
//! | 0x09 | signed integer   | i64                                    |
//! | 0x0A | unsigned integer | u64                                    |
//! | 0x0B | f32              | 4 bytes                                |
//! | 0x0C | f64              | 8 bytes                                |
//! | 0x0D | bool             | 1 byte                                 |
//! | 0x0E | string           | byte count (u32), UTF-8                |
//! | 0x0F | null             |                                        |
//!
//! All multi-byte values are little-endian. The end of the underlying
//! stream is the end of the data.
//!
//! Both ends keep their scratch buffer and cursor in a state object from
//! an [`InstanceCache`], so repeated calls reuse them. Primitives are
//! encoded through [`crate::arch`], which picks the unaligned fast path
//! when the platform supports it. Length prefixes are not trusted: a
//! payload is read in scratch-sized chunks and only grows as bytes arrive.

use std::io::{ErrorKind, Read, Write};

use crate::arch::{self, ArchitectureCapabilities};
use crate::context::{ContextHandle, DeserializationContext, SerializationContext};
use crate::data::{DataReader, DataWriter, Depth, EntryType, NodeHeader};
use crate::error::CodecError;
use crate::pool::{BufferPool, Cached, InstanceCache, PooledBuffer, Reusable};

/// Scratch size claimed by new writers and readers.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

const NAMED: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Tag {
    StructNode = 0x01,
    ReferenceNode = 0x02,
    EndOfNode = 0x03,
    StartOfArray = 0x04,
    EndOfArray = 0x05,
    PrimitiveArray = 0x06,
    InternalReference = 0x07,
    ExternalReference = 0x08,
    Int = 0x09,
    UInt = 0x0A,
    F32 = 0x0B,
    F64 = 0x0C,
    Bool = 0x0D,
    String = 0x0E,
    Null = 0x0F,
    // Never written; produced when the stream is exhausted.
    EndOfStream = 0x7F,
}

impl Tag {
    fn from_byte(byte: u8) -> Result<Self, CodecError> {
        Ok(match byte {
            0x01 => Tag::StructNode,
            0x02 => Tag::ReferenceNode,
            0x03 => Tag::EndOfNode,
            0x04 => Tag::StartOfArray,
            0x05 => Tag::EndOfArray,
            0x06 => Tag::PrimitiveArray,
            0x07 => Tag::InternalReference,
            0x08 => Tag::ExternalReference,
            0x09 => Tag::Int,
            0x0A => Tag::UInt,
            0x0B => Tag::F32,
            0x0C => Tag::F64,
            0x0D => Tag::Bool,
            0x0E => Tag::String,
            0x0F => Tag::Null,
            other => {
                return Err(CodecError::InvalidData(format!(
                    "unknown binary entry tag 0x{other:02X}"
                )));
            }
        })
    }

    fn entry_type(self) -> EntryType {
        match self {
            Tag::StructNode | Tag::ReferenceNode => EntryType::StartOfNode,
            Tag::EndOfNode => EntryType::EndOfNode,
            Tag::StartOfArray => EntryType::StartOfArray,
            Tag::EndOfArray => EntryType::EndOfArray,
            Tag::PrimitiveArray => EntryType::PrimitiveArray,
            Tag::InternalReference => EntryType::InternalReference,
            Tag::ExternalReference => EntryType::ExternalReference,
            Tag::Int | Tag::UInt => EntryType::Integer,
            Tag::F32 | Tag::F64 => EntryType::FloatingPoint,
            Tag::Bool => EntryType::Boolean,
            Tag::String => EntryType::String,
            Tag::Null => EntryType::Null,
            Tag::EndOfStream => EntryType::EndOfStream,
        }
    }
}

fn length_prefix(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::OutOfRange {
        value: len.to_string(),
        target: "u32 length prefix",
    })
}

// ===========================================================================
// Writer
// ===========================================================================

fn claim_scratch<'a>(
    slot: &'a mut Option<PooledBuffer<'static, u8>>,
) -> Result<&'a mut PooledBuffer<'static, u8>, CodecError> {
    if slot.is_none() {
        *slot = Some(BufferPool::<u8>::shared().claim_at_least(DEFAULT_BUFFER_SIZE)?);
    }
    slot.as_mut()
        .ok_or(CodecError::InvalidState("scratch buffer missing"))
}

/// Reusable part of a [`BinaryDataWriter`], kept in an [`InstanceCache`].
///
/// The scratch buffer stays with the state between sessions.
#[derive(Debug, Default)]
pub struct BinaryWriterState {
    scratch: Option<PooledBuffer<'static, u8>>,
    position: usize,
    depth: Depth,
}

impl Reusable for BinaryWriterState {
    fn prepare_new_session(&mut self) {
        self.position = 0;
        self.depth.reset();
    }
}

impl BinaryWriterState {
    /// Reserve `len` bytes at the write position, flushing first if they
    /// do not fit behind what is already staged.
    fn reserve(&mut self, stream: &mut dyn Write, len: usize) -> Result<&mut [u8], CodecError> {
        let capacity = claim_scratch(&mut self.scratch)?.capacity()?;
        if len > capacity {
            return Err(CodecError::InvalidState("entry wider than the scratch buffer"));
        }
        if self.position + len > capacity {
            self.flush_to(stream)?;
        }
        let start = self.position;
        self.position += len;
        Ok(&mut claim_scratch(&mut self.scratch)?.as_mut_slice()?[start..start + len])
    }

    /// Stage `bytes`, or write them straight through when they are larger
    /// than the scratch buffer.
    fn put_raw(&mut self, stream: &mut dyn Write, bytes: &[u8]) -> Result<(), CodecError> {
        let capacity = claim_scratch(&mut self.scratch)?.capacity()?;
        if bytes.len() > capacity {
            self.flush_to(stream)?;
            stream.write_all(bytes)?;
            return Ok(());
        }
        self.reserve(stream, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    fn flush_to(&mut self, stream: &mut dyn Write) -> Result<(), CodecError> {
        let position = self.position;
        if position > 0 {
            stream.write_all(&claim_scratch(&mut self.scratch)?.as_slice()?[..position])?;
            self.position = 0;
        }
        Ok(())
    }
}

/// Writes the binary format to a stream.
pub struct BinaryDataWriter<'a> {
    stream: &'a mut dyn Write,
    context: ContextHandle<'a, SerializationContext>,
    state: Cached<'static, BinaryWriterState>,
    caps: &'static ArchitectureCapabilities,
}

impl<'a> BinaryDataWriter<'a> {
    pub fn new(
        stream: &'a mut dyn Write,
        context: ContextHandle<'a, SerializationContext>,
    ) -> Result<Self, CodecError> {
        let mut state = InstanceCache::<BinaryWriterState>::shared().claim();
        claim_scratch(&mut state.get_mut()?.scratch)?;
        Ok(Self {
            stream,
            context,
            state,
            caps: arch::capabilities(),
        })
    }

    fn reserve(&mut self, len: usize) -> Result<&mut [u8], CodecError> {
        self.state.get_mut()?.reserve(&mut *self.stream, len)
    }

    fn put_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.reserve(1)?[0] = value;
        Ok(())
    }

    fn put_u32(&mut self, value: u32) -> Result<(), CodecError> {
        let caps = self.caps;
        arch::write_u32(self.reserve(4)?, value, caps);
        Ok(())
    }

    fn put_u64(&mut self, value: u64) -> Result<(), CodecError> {
        let caps = self.caps;
        arch::write_u64(self.reserve(8)?, value, caps);
        Ok(())
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.put_u32(length_prefix(bytes.len())?)?;
        self.state.get_mut()?.put_raw(&mut *self.stream, bytes)
    }

    fn put_header(&mut self, tag: Tag, name: Option<&str>) -> Result<(), CodecError> {
        match name {
            Some(name) => {
                self.put_u8(tag as u8 | NAMED)?;
                self.put_bytes(name.as_bytes())
            }
            None => self.put_u8(tag as u8),
        }
    }

    fn descend(&mut self) -> Result<(), CodecError> {
        self.state.get_mut()?.depth.descend()
    }

    fn ascend(&mut self) -> Result<(), CodecError> {
        self.state.get_mut()?.depth.ascend();
        Ok(())
    }
}

impl DataWriter for BinaryDataWriter<'_> {
    fn context(&self) -> Result<&SerializationContext, CodecError> {
        self.context.get()
    }

    fn context_mut(&mut self) -> Result<&mut SerializationContext, CodecError> {
        self.context.get_mut()
    }

    fn begin_struct_node(&mut self, name: Option<&str>, type_name: &str) -> Result<(), CodecError> {
        self.descend()?;
        self.put_header(Tag::StructNode, name)?;
        self.put_bytes(type_name.as_bytes())
    }

    fn begin_reference_node(
        &mut self,
        name: Option<&str>,
        type_name: &str,
        id: u32,
    ) -> Result<(), CodecError> {
        self.descend()?;
        self.put_header(Tag::ReferenceNode, name)?;
        self.put_bytes(type_name.as_bytes())?;
        self.put_u32(id)
    }

    fn end_node(&mut self) -> Result<(), CodecError> {
        self.ascend()?;
        self.put_header(Tag::EndOfNode, None)
    }

    fn begin_array_node(&mut self, name: Option<&str>, length: usize) -> Result<(), CodecError> {
        self.descend()?;
        self.put_header(Tag::StartOfArray, name)?;
        self.put_u64(length as u64)
    }

    fn end_array_node(&mut self) -> Result<(), CodecError> {
        self.ascend()?;
        self.put_header(Tag::EndOfArray, None)
    }

    fn write_null(&mut self, name: Option<&str>) -> Result<(), CodecError> {
        self.put_header(Tag::Null, name)
    }

    fn write_internal_reference(&mut self, name: Option<&str>, id: u32) -> Result<(), CodecError> {
        self.put_header(Tag::InternalReference, name)?;
        self.put_u32(id)
    }

    fn write_external_reference(
        &mut self,
        name: Option<&str>,
        index: u32,
    ) -> Result<(), CodecError> {
        self.put_header(Tag::ExternalReference, name)?;
        self.put_u32(index)
    }

    fn write_bool(&mut self, name: Option<&str>, value: bool) -> Result<(), CodecError> {
        self.put_header(Tag::Bool, name)?;
        self.put_u8(u8::from(value))
    }

    fn write_int(&mut self, name: Option<&str>, value: i64) -> Result<(), CodecError> {
        self.put_header(Tag::Int, name)?;
        self.put_u64(value as u64)
    }

    fn write_uint(&mut self, name: Option<&str>, value: u64) -> Result<(), CodecError> {
        self.put_header(Tag::UInt, name)?;
        self.put_u64(value)
    }

    fn write_f32(&mut self, name: Option<&str>, value: f32) -> Result<(), CodecError> {
        self.put_header(Tag::F32, name)?;
        let caps = self.caps;
        arch::write_f32(self.reserve(4)?, value, caps);
        Ok(())
    }

    fn write_f64(&mut self, name: Option<&str>, value: f64) -> Result<(), CodecError> {
        self.put_header(Tag::F64, name)?;
        let caps = self.caps;
        arch::write_f64(self.reserve(8)?, value, caps);
        Ok(())
    }

    fn write_string(&mut self, name: Option<&str>, value: &str) -> Result<(), CodecError> {
        self.put_header(Tag::String, name)?;
        self.put_bytes(value.as_bytes())
    }

    fn write_bytes(&mut self, name: Option<&str>, value: &[u8]) -> Result<(), CodecError> {
        self.put_header(Tag::PrimitiveArray, name)?;
        self.put_bytes(value)
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        self.state.get_mut()?.flush_to(&mut *self.stream)?;
        self.stream.flush()?;
        Ok(())
    }
}

// ===========================================================================
// Reader
// ===========================================================================

#[derive(Debug, Clone)]
struct Peeked {
    tag: Tag,
    name: Option<String>,
}

/// Reusable part of a [`BinaryDataReader`], kept in an [`InstanceCache`].
///
/// The scratch buffer never grows: payloads longer than it are copied out
/// chunk by chunk as they arrive.
#[derive(Debug, Default)]
pub struct BinaryReaderState {
    scratch: Option<PooledBuffer<'static, u8>>,
    start: usize,
    end: usize,
    peeked: Option<Peeked>,
    depth: Depth,
}

impl Reusable for BinaryReaderState {
    fn prepare_new_session(&mut self) {
        self.start = 0;
        self.end = 0;
        self.peeked = None;
        self.depth.reset();
    }
}

impl BinaryReaderState {
    /// Make at least `len` unread bytes available. Returns `false` if the
    /// stream ends first.
    fn fill(&mut self, stream: &mut dyn Read, len: usize) -> Result<bool, CodecError> {
        let available = self.end - self.start;
        if available >= len {
            return Ok(true);
        }
        let (start, end) = (self.start, self.end);
        let scratch = claim_scratch(&mut self.scratch)?;
        if len > scratch.capacity()? {
            return Err(CodecError::InvalidState("read wider than the scratch buffer"));
        }
        let buffer = scratch.as_mut_slice()?;
        buffer.copy_within(start..end, 0);
        self.start = 0;
        self.end = available;

        while self.end < len {
            match stream.read(&mut buffer[self.end..]) {
                Ok(0) => return Ok(false),
                Ok(read) => self.end += read,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    fn take(&mut self, stream: &mut dyn Read, len: usize) -> Result<&[u8], CodecError> {
        if !self.fill(stream, len)? {
            return Err(CodecError::InvalidData(format!(
                "stream ended while {len} more bytes were expected"
            )));
        }
        let start = self.start;
        self.start += len;
        Ok(&claim_scratch(&mut self.scratch)?.as_slice()?[start..start + len])
    }

    /// Consume `len` bytes, handing them to `sink` in scratch-sized chunks.
    fn drain(
        &mut self,
        stream: &mut dyn Read,
        len: usize,
        mut sink: impl FnMut(&[u8]),
    ) -> Result<(), CodecError> {
        let mut remaining = len;
        while remaining > 0 {
            if self.start == self.end && !self.fill(stream, 1)? {
                return Err(CodecError::InvalidData(format!(
                    "stream ended while {remaining} more bytes were expected"
                )));
            }
            let chunk = remaining.min(self.end - self.start);
            let start = self.start;
            sink(&claim_scratch(&mut self.scratch)?.as_slice()?[start..start + chunk]);
            self.start += chunk;
            remaining -= chunk;
        }
        Ok(())
    }
}

/// Reads the binary format from a stream.
pub struct BinaryDataReader<'a> {
    stream: &'a mut dyn Read,
    context: ContextHandle<'a, DeserializationContext>,
    state: Cached<'static, BinaryReaderState>,
    caps: &'static ArchitectureCapabilities,
}

impl<'a> BinaryDataReader<'a> {
    pub fn new(
        stream: &'a mut dyn Read,
        context: ContextHandle<'a, DeserializationContext>,
    ) -> Result<Self, CodecError> {
        let mut state = InstanceCache::<BinaryReaderState>::shared().claim();
        claim_scratch(&mut state.get_mut()?.scratch)?;
        Ok(Self {
            stream,
            context,
            state,
            caps: arch::capabilities(),
        })
    }

    fn parts(&mut self) -> Result<(&mut BinaryReaderState, &mut (dyn Read + 'a)), CodecError> {
        Ok((self.state.get_mut()?, &mut *self.stream))
    }

    fn take(&mut self, len: usize) -> Result<&[u8], CodecError> {
        let (state, stream) = self.parts()?;
        state.take(stream, len)
    }

    fn get_u32(&mut self) -> Result<u32, CodecError> {
        let caps = self.caps;
        Ok(arch::read_u32(self.take(4)?, caps))
    }

    fn get_u64(&mut self) -> Result<u64, CodecError> {
        let caps = self.caps;
        Ok(arch::read_u64(self.take(8)?, caps))
    }

    /// A length-prefixed payload. The output grows only as bytes arrive,
    /// whatever length the prefix declares.
    fn get_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.get_u32()? as usize;
        let (state, stream) = self.parts()?;
        let mut bytes = Vec::with_capacity(len.min(DEFAULT_BUFFER_SIZE));
        state.drain(stream, len, |chunk| bytes.extend_from_slice(chunk))?;
        Ok(bytes)
    }

    fn get_string(&mut self) -> Result<String, CodecError> {
        String::from_utf8(self.get_bytes()?)
            .map_err(|e| CodecError::InvalidData(format!("string is not UTF-8: {e}")))
    }

    fn peek(&mut self) -> Result<&Peeked, CodecError> {
        if self.state.get()?.peeked.is_none() {
            let (state, stream) = self.parts()?;
            let peeked = if state.fill(&mut *stream, 1)? {
                let byte = state.take(&mut *stream, 1)?[0];
                let tag = Tag::from_byte(byte & !NAMED)?;
                let name = if byte & NAMED != 0 {
                    Some(self.get_string()?)
                } else {
                    None
                };
                Peeked { tag, name }
            } else {
                Peeked {
                    tag: Tag::EndOfStream,
                    name: None,
                }
            };
            self.state.get_mut()?.peeked = Some(peeked);
        }
        self.state
            .get()?
            .peeked
            .as_ref()
            .ok_or(CodecError::InvalidState("peeked entry vanished"))
    }

    fn clear_peeked(&mut self) -> Result<(), CodecError> {
        self.state.get_mut()?.peeked = None;
        Ok(())
    }

    /// Consume the peeked entry header if its tag is one of `accepted`.
    fn expect(&mut self, accepted: &[Tag], expected: &'static str) -> Result<Tag, CodecError> {
        let tag = self.peek()?.tag;
        if !accepted.contains(&tag) {
            return Err(CodecError::UnexpectedEntry {
                expected,
                found: tag.entry_type(),
            });
        }
        self.clear_peeked()?;
        Ok(tag)
    }

    /// Skip entries up to and including the `end` tag of the current level.
    fn skip_until(&mut self, end: Tag, context: &'static str) -> Result<(), CodecError> {
        loop {
            match self.peek()?.tag {
                tag if tag == end => {
                    self.clear_peeked()?;
                    self.state.get_mut()?.depth.ascend();
                    return Ok(());
                }
                Tag::EndOfStream => {
                    return Err(CodecError::InvalidData(format!("stream ended inside {context}")));
                }
                _ => self.skip_entry()?,
            }
        }
    }

    /// Consume a scalar entry whose header was already peeked.
    fn skip_scalar(&mut self, tag: Tag) -> Result<(), CodecError> {
        self.clear_peeked()?;
        let payload = match tag {
            Tag::InternalReference | Tag::ExternalReference | Tag::F32 => 4,
            Tag::Int | Tag::UInt | Tag::F64 => 8,
            Tag::Bool => 1,
            Tag::String | Tag::PrimitiveArray => self.get_u32()? as usize,
            _ => 0,
        };
        let (state, stream) = self.parts()?;
        state.drain(stream, payload, |_| {})
    }

    fn read_f64_payload(&mut self) -> Result<f64, CodecError> {
        let caps = self.caps;
        Ok(arch::read_f64(self.take(8)?, caps))
    }
}

impl DataReader for BinaryDataReader<'_> {
    fn context(&self) -> Result<&DeserializationContext, CodecError> {
        self.context.get()
    }

    fn context_mut(&mut self) -> Result<&mut DeserializationContext, CodecError> {
        self.context.get_mut()
    }

    fn peek_entry(&mut self) -> Result<(EntryType, Option<String>), CodecError> {
        let peeked = self.peek()?;
        Ok((peeked.tag.entry_type(), peeked.name.clone()))
    }

    fn enter_node(&mut self) -> Result<NodeHeader, CodecError> {
        let tag = self.expect(&[Tag::StructNode, Tag::ReferenceNode], "a node")?;
        self.state.get_mut()?.depth.descend()?;
        let type_name = Some(self.get_string()?);
        let id = match tag {
            Tag::ReferenceNode => Some(self.get_u32()?),
            _ => None,
        };
        Ok(NodeHeader { type_name, id })
    }

    fn exit_node(&mut self) -> Result<(), CodecError> {
        self.skip_until(Tag::EndOfNode, "a node")
    }

    fn enter_array(&mut self) -> Result<usize, CodecError> {
        self.expect(&[Tag::StartOfArray], "an array")?;
        self.state.get_mut()?.depth.descend()?;
        let len = self.get_u64()?;
        usize::try_from(len).map_err(|_| CodecError::OutOfRange {
            value: len.to_string(),
            target: "usize",
        })
    }

    fn exit_array(&mut self) -> Result<(), CodecError> {
        self.skip_until(Tag::EndOfArray, "an array")
    }

    fn read_null(&mut self) -> Result<(), CodecError> {
        self.expect(&[Tag::Null], "null").map(drop)
    }

    fn read_internal_reference(&mut self) -> Result<u32, CodecError> {
        self.expect(&[Tag::InternalReference], "an internal reference")?;
        self.get_u32()
    }

    fn read_external_reference(&mut self) -> Result<u32, CodecError> {
        self.expect(&[Tag::ExternalReference], "an external reference")?;
        self.get_u32()
    }

    fn read_bool(&mut self) -> Result<bool, CodecError> {
        self.expect(&[Tag::Bool], "a boolean")?;
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidData(format!("invalid boolean byte {other}"))),
        }
    }

    fn read_int(&mut self) -> Result<i64, CodecError> {
        match self.expect(&[Tag::Int, Tag::UInt], "an integer")? {
            Tag::UInt => {
                let value = self.get_u64()?;
                i64::try_from(value).map_err(|_| CodecError::OutOfRange {
                    value: value.to_string(),
                    target: "i64",
                })
            }
            _ => Ok(self.get_u64()? as i64),
        }
    }

    fn read_uint(&mut self) -> Result<u64, CodecError> {
        match self.expect(&[Tag::Int, Tag::UInt], "an integer")? {
            Tag::Int => {
                let value = self.get_u64()? as i64;
                u64::try_from(value).map_err(|_| CodecError::OutOfRange {
                    value: value.to_string(),
                    target: "u64",
                })
            }
            _ => self.get_u64(),
        }
    }

    fn read_f32(&mut self) -> Result<f32, CodecError> {
        match self.expect(&[Tag::F32, Tag::F64], "a float")? {
            Tag::F64 => self.read_f64_payload().map(|v| v as f32),
            _ => {
                let caps = self.caps;
                Ok(arch::read_f32(self.take(4)?, caps))
            }
        }
    }

    fn read_f64(&mut self) -> Result<f64, CodecError> {
        match self.expect(&[Tag::F32, Tag::F64], "a float")? {
            Tag::F32 => {
                let caps = self.caps;
                Ok(f64::from(arch::read_f32(self.take(4)?, caps)))
            }
            _ => self.read_f64_payload(),
        }
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        self.expect(&[Tag::String], "a string")?;
        self.get_string()
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        self.expect(&[Tag::PrimitiveArray], "a primitive array")?;
        self.get_bytes()
    }

    /// Skips nested nodes and arrays with an explicit stack of the end tags
    /// still owed, so crafted nesting hits the depth limit instead of the
    /// call stack.
    fn skip_entry(&mut self) -> Result<(), CodecError> {
        let mut open: Vec<Tag> = Vec::new();
        loop {
            let tag = self.peek()?.tag;
            match tag {
                Tag::StructNode | Tag::ReferenceNode => {
                    self.enter_node()?;
                    open.push(Tag::EndOfNode);
                }
                Tag::StartOfArray => {
                    self.enter_array()?;
                    open.push(Tag::EndOfArray);
                }
                Tag::EndOfNode | Tag::EndOfArray if open.last() == Some(&tag) => {
                    self.clear_peeked()?;
                    self.state.get_mut()?.depth.ascend();
                    open.pop();
                }
                Tag::EndOfNode | Tag::EndOfArray | Tag::EndOfStream if !open.is_empty() => {
                    return Err(CodecError::InvalidData(format!(
                        "found {:?} inside a skipped entry",
                        tag.entry_type()
                    )));
                }
                Tag::EndOfNode | Tag::EndOfArray | Tag::EndOfStream => {
                    return Err(CodecError::UnexpectedEntry {
                        expected: "an entry to skip",
                        found: tag.entry_type(),
                    });
                }
                scalar => self.skip_scalar(scalar)?,
            }
            if open.is_empty() {
                return Ok(());
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
