//! JSON format.
//!
//! Nodes become objects carrying `$type` (and `$id` for shared objects)
//! next to their named members. Arrays become JSON arrays. Entries that
//! JSON cannot express directly use reserved single-key objects:
//! `{"$iref": id}`, `{"$eref": index}` and `{"$bytes": [..]}`. Non-finite
//! floats are written as the strings `"NaN"`, `"Infinity"` and
//! `"-Infinity"`.
//!
//! The writer assembles a `serde_json::Value` and emits it on `flush`; the
//! reader parses the whole document up front and walks it with a stack of
//! entry queues. Member order is preserved (`preserve_order`). Frame stacks
//! and the input buffer live in pooled state objects.
//!
//! serde_json's own recursion limit is switched off (`unbounded_depth`);
//! the reader instead pre-scans the text and rejects anything nested deeper
//! than the writers can produce.

use std::collections::VecDeque;
use std::io::{Read, Write};

use serde::Deserialize;
use serde_json::{Map, Number, Value};

use crate::context::{ContextHandle, DeserializationContext, SerializationContext};
use crate::data::{DataReader, DataWriter, Depth, EntryType, MAX_NESTING_DEPTH, NodeHeader};
use crate::error::CodecError;
use crate::pool::{Cached, InstanceCache, Reusable};
use crate::serializable::MAX_PREALLOCATION;

const TYPE_KEY: &str = "$type";
const ID_KEY: &str = "$id";
const INTERNAL_REF_KEY: &str = "$iref";
const EXTERNAL_REF_KEY: &str = "$eref";
const BYTES_KEY: &str = "$bytes";

fn float_value(value: f64) -> Value {
    match Number::from_f64(value) {
        Some(number) => Value::Number(number),
        None if value.is_nan() => Value::String("NaN".into()),
        None if value > 0.0 => Value::String("Infinity".into()),
        None => Value::String("-Infinity".into()),
    }
}

fn tagged(key: &str, value: Value) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(key.to_owned(), value);
    Value::Object(map)
}

// ===========================================================================
// Writer
// ===========================================================================

#[derive(Debug)]
enum WriteFrame {
    Node {
        name: Option<String>,
        members: Map<String, Value>,
    },
    Array {
        name: Option<String>,
        items: Vec<Value>,
    },
}

/// Reusable part of a [`JsonDataWriter`], kept in an [`InstanceCache`].
#[derive(Debug, Default)]
pub struct JsonWriterState {
    frames: Vec<WriteFrame>,
    root: Option<Value>,
    depth: Depth,
}

impl Reusable for JsonWriterState {
    fn prepare_new_session(&mut self) {
        self.frames.clear();
        self.root = None;
        self.depth.reset();
    }
}

impl JsonWriterState {
    fn emit(&mut self, name: Option<&str>, value: Value) -> Result<(), CodecError> {
        match self.frames.last_mut() {
            Some(WriteFrame::Node { members, .. }) => {
                let key = match name {
                    Some(name) => name.to_owned(),
                    None => format!("$v{}", members.len()),
                };
                members.insert(key, value);
            }
            Some(WriteFrame::Array { items, .. }) => items.push(value),
            None => {
                if self.root.is_some() {
                    return Err(CodecError::InvalidState(
                        "JSON writer already holds an unflushed root value",
                    ));
                }
                self.root = Some(value);
            }
        }
        Ok(())
    }

    fn begin_node(
        &mut self,
        name: Option<&str>,
        type_name: &str,
        id: Option<u32>,
    ) -> Result<(), CodecError> {
        self.depth.descend()?;
        let mut members = Map::new();
        members.insert(TYPE_KEY.to_owned(), Value::String(type_name.to_owned()));
        if let Some(id) = id {
            members.insert(ID_KEY.to_owned(), Value::from(id));
        }
        self.frames.push(WriteFrame::Node {
            name: name.map(str::to_owned),
            members,
        });
        Ok(())
    }

    fn end_node(&mut self) -> Result<(), CodecError> {
        match self.frames.pop() {
            Some(WriteFrame::Node { name, members }) => {
                self.depth.ascend();
                self.emit(name.as_deref(), Value::Object(members))
            }
            Some(frame @ WriteFrame::Array { .. }) => {
                self.frames.push(frame);
                Err(CodecError::InvalidState("end_node called inside an array"))
            }
            None => Err(CodecError::InvalidState("end_node called with no open node")),
        }
    }

    fn begin_array(&mut self, name: Option<&str>, length: usize) -> Result<(), CodecError> {
        self.depth.descend()?;
        self.frames.push(WriteFrame::Array {
            name: name.map(str::to_owned),
            items: Vec::with_capacity(length.min(MAX_PREALLOCATION)),
        });
        Ok(())
    }

    fn end_array(&mut self) -> Result<(), CodecError> {
        match self.frames.pop() {
            Some(WriteFrame::Array { name, items }) => {
                self.depth.ascend();
                self.emit(name.as_deref(), Value::Array(items))
            }
            Some(frame @ WriteFrame::Node { .. }) => {
                self.frames.push(frame);
                Err(CodecError::InvalidState("end_array_node called inside a node"))
            }
            None => Err(CodecError::InvalidState("end_array_node called with no open array")),
        }
    }
}

/// Writes JSON to a stream.
pub struct JsonDataWriter<'a> {
    stream: &'a mut dyn Write,
    context: ContextHandle<'a, SerializationContext>,
    state: Cached<'static, JsonWriterState>,
    pretty: bool,
}

impl<'a> JsonDataWriter<'a> {
    pub fn new(stream: &'a mut dyn Write, context: ContextHandle<'a, SerializationContext>) -> Self {
        Self {
            stream,
            context,
            state: InstanceCache::<JsonWriterState>::shared().claim(),
            pretty: false,
        }
    }

    /// Indent the output.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    fn emit(&mut self, name: Option<&str>, value: Value) -> Result<(), CodecError> {
        self.state.get_mut()?.emit(name, value)
    }
}

impl DataWriter for JsonDataWriter<'_> {
    fn context(&self) -> Result<&SerializationContext, CodecError> {
        self.context.get()
    }

    fn context_mut(&mut self) -> Result<&mut SerializationContext, CodecError> {
        self.context.get_mut()
    }

    fn begin_struct_node(&mut self, name: Option<&str>, type_name: &str) -> Result<(), CodecError> {
        self.state.get_mut()?.begin_node(name, type_name, None)
    }

    fn begin_reference_node(
        &mut self,
        name: Option<&str>,
        type_name: &str,
        id: u32,
    ) -> Result<(), CodecError> {
        self.state.get_mut()?.begin_node(name, type_name, Some(id))
    }

    fn end_node(&mut self) -> Result<(), CodecError> {
        self.state.get_mut()?.end_node()
    }

    fn begin_array_node(&mut self, name: Option<&str>, length: usize) -> Result<(), CodecError> {
        self.state.get_mut()?.begin_array(name, length)
    }

    fn end_array_node(&mut self) -> Result<(), CodecError> {
        self.state.get_mut()?.end_array()
    }

    fn write_null(&mut self, name: Option<&str>) -> Result<(), CodecError> {
        self.emit(name, Value::Null)
    }

    fn write_internal_reference(&mut self, name: Option<&str>, id: u32) -> Result<(), CodecError> {
        self.emit(name, tagged(INTERNAL_REF_KEY, Value::from(id)))
    }

    fn write_external_reference(
        &mut self,
        name: Option<&str>,
        index: u32,
    ) -> Result<(), CodecError> {
        self.emit(name, tagged(EXTERNAL_REF_KEY, Value::from(index)))
    }

    fn write_bool(&mut self, name: Option<&str>, value: bool) -> Result<(), CodecError> {
        self.emit(name, Value::Bool(value))
    }

    fn write_int(&mut self, name: Option<&str>, value: i64) -> Result<(), CodecError> {
        self.emit(name, Value::from(value))
    }

    fn write_uint(&mut self, name: Option<&str>, value: u64) -> Result<(), CodecError> {
        self.emit(name, Value::from(value))
    }

    fn write_f32(&mut self, name: Option<&str>, value: f32) -> Result<(), CodecError> {
        self.emit(name, float_value(f64::from(value)))
    }

    fn write_f64(&mut self, name: Option<&str>, value: f64) -> Result<(), CodecError> {
        self.emit(name, float_value(value))
    }

    fn write_string(&mut self, name: Option<&str>, value: &str) -> Result<(), CodecError> {
        self.emit(name, Value::String(value.to_owned()))
    }

    fn write_bytes(&mut self, name: Option<&str>, value: &[u8]) -> Result<(), CodecError> {
        let bytes = value.iter().copied().map(Value::from).collect();
        self.emit(name, tagged(BYTES_KEY, Value::Array(bytes)))
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        let state = self.state.get_mut()?;
        if !state.frames.is_empty() {
            return Err(CodecError::InvalidState("flush called with unclosed nodes or arrays"));
        }
        if let Some(root) = state.root.take() {
            if self.pretty {
                serde_json::to_writer_pretty(&mut *self.stream, &root)?;
            } else {
                serde_json::to_writer(&mut *self.stream, &root)?;
            }
        }
        self.stream.flush()?;
        Ok(())
    }
}

// ===========================================================================
// Reader
// ===========================================================================

/// Deepest JSON nesting the reader parses: every writer level plus the two
/// levels a `{"$bytes": [..]}` wrapper adds.
const MAX_DOCUMENT_DEPTH: usize = MAX_NESTING_DEPTH + 2;

/// Reject documents nested deeper than [`MAX_DOCUMENT_DEPTH`] before they
/// reach the recursive parser.
fn check_nesting(text: &[u8]) -> Result<(), CodecError> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for &byte in text {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                if depth > MAX_DOCUMENT_DEPTH {
                    return Err(CodecError::NestingTooDeep {
                        limit: MAX_NESTING_DEPTH,
                    });
                }
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Root,
    Node,
    Array,
}

#[derive(Debug)]
struct ReadFrame {
    kind: FrameKind,
    entries: VecDeque<(Option<String>, Value)>,
}

/// Reusable part of a [`JsonDataReader`], kept in an [`InstanceCache`].
#[derive(Debug, Default)]
pub struct JsonReaderState {
    text: Vec<u8>,
    frames: Vec<ReadFrame>,
}

impl Reusable for JsonReaderState {
    fn prepare_new_session(&mut self) {
        self.text.clear();
        self.frames.clear();
    }
}

/// Reads JSON from a stream. The whole document is parsed on construction.
pub struct JsonDataReader<'a> {
    context: ContextHandle<'a, DeserializationContext>,
    state: Cached<'static, JsonReaderState>,
}

fn classify(value: &Value) -> EntryType {
    match value {
        Value::Null => EntryType::Null,
        Value::Bool(_) => EntryType::Boolean,
        Value::Number(n) if n.is_f64() => EntryType::FloatingPoint,
        Value::Number(_) => EntryType::Integer,
        Value::String(_) => EntryType::String,
        Value::Array(_) => EntryType::StartOfArray,
        Value::Object(map) if map.contains_key(INTERNAL_REF_KEY) => EntryType::InternalReference,
        Value::Object(map) if map.contains_key(EXTERNAL_REF_KEY) => EntryType::ExternalReference,
        Value::Object(map) if map.contains_key(BYTES_KEY) => EntryType::PrimitiveArray,
        Value::Object(_) => EntryType::StartOfNode,
    }
}

fn u32_field(value: Option<&Value>, key: &str) -> Result<u32, CodecError> {
    value
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| CodecError::InvalidData(format!("'{key}' must be a u32")))
}

impl<'a> JsonDataReader<'a> {
    pub fn new(
        stream: &'a mut dyn Read,
        context: ContextHandle<'a, DeserializationContext>,
    ) -> Result<Self, CodecError> {
        let mut state = InstanceCache::<JsonReaderState>::shared().claim();
        let root = {
            let text = &mut state.get_mut()?.text;
            stream.read_to_end(text)?;
            check_nesting(text)?;
            let mut parser = serde_json::Deserializer::from_slice(text);
            parser.disable_recursion_limit();
            let root = Value::deserialize(&mut parser)?;
            parser.end()?;
            root
        };
        Self::with_state(root, context, state)
    }

    /// Read from an already parsed document.
    pub fn from_value(
        root: Value,
        context: ContextHandle<'a, DeserializationContext>,
    ) -> Result<Self, CodecError> {
        Self::with_state(root, context, InstanceCache::<JsonReaderState>::shared().claim())
    }

    fn with_state(
        root: Value,
        context: ContextHandle<'a, DeserializationContext>,
        mut state: Cached<'static, JsonReaderState>,
    ) -> Result<Self, CodecError> {
        state.get_mut()?.frames.push(ReadFrame {
            kind: FrameKind::Root,
            entries: VecDeque::from([(None, root)]),
        });
        Ok(Self { context, state })
    }

    fn frames(&self) -> Result<&[ReadFrame], CodecError> {
        Ok(&self.state.get()?.frames)
    }

    fn frames_mut(&mut self) -> Result<&mut Vec<ReadFrame>, CodecError> {
        Ok(&mut self.state.get_mut()?.frames)
    }

    fn top(&self) -> Result<&ReadFrame, CodecError> {
        self.frames()?
            .last()
            .ok_or(CodecError::InvalidState("JSON reader has no open frame"))
    }

    fn peek_type(&self) -> Result<EntryType, CodecError> {
        let frame = self.top()?;
        Ok(match frame.entries.front() {
            Some((_, value)) => classify(value),
            None => match frame.kind {
                FrameKind::Root => EntryType::EndOfStream,
                FrameKind::Node => EntryType::EndOfNode,
                FrameKind::Array => EntryType::EndOfArray,
            },
        })
    }

    /// Pop the next value if its type is one of `accepted`.
    fn take(&mut self, accepted: &[EntryType], expected: &'static str) -> Result<Value, CodecError> {
        let found = self.peek_type()?;
        if !accepted.contains(&found) {
            return Err(CodecError::UnexpectedEntry { expected, found });
        }
        self.frames_mut()?
            .last_mut()
            .and_then(|frame| frame.entries.pop_front())
            .map(|(_, value)| value)
            .ok_or(CodecError::InvalidState("JSON entry vanished"))
    }

    fn open(&mut self, kind: FrameKind, entries: VecDeque<(Option<String>, Value)>) -> Result<(), CodecError> {
        self.frames_mut()?.push(ReadFrame { kind, entries });
        Ok(())
    }

    fn close(&mut self, kind: FrameKind) -> Result<(), CodecError> {
        if self.top()?.kind != kind {
            return Err(CodecError::InvalidState("closing a frame that is not open"));
        }
        self.frames_mut()?.pop();
        Ok(())
    }
}

impl DataReader for JsonDataReader<'_> {
    fn context(&self) -> Result<&DeserializationContext, CodecError> {
        self.context.get()
    }

    fn context_mut(&mut self) -> Result<&mut DeserializationContext, CodecError> {
        self.context.get_mut()
    }

    fn peek_entry(&mut self) -> Result<(EntryType, Option<String>), CodecError> {
        let entry = self.peek_type()?;
        let name = self
            .top()?
            .entries
            .front()
            .and_then(|(name, _)| name.clone());
        Ok((entry, name))
    }

    fn enter_node(&mut self) -> Result<NodeHeader, CodecError> {
        let Value::Object(map) = self.take(&[EntryType::StartOfNode], "a node")? else {
            return Err(CodecError::InvalidState("node entry was not an object"));
        };
        let mut header = NodeHeader::default();
        let mut entries = VecDeque::with_capacity(map.len());
        for (key, value) in map {
            match key.as_str() {
                TYPE_KEY => header.type_name = value.as_str().map(str::to_owned),
                ID_KEY => header.id = Some(u32_field(Some(&value), ID_KEY)?),
                _ => entries.push_back((Some(key), value)),
            }
        }
        self.open(FrameKind::Node, entries)?;
        Ok(header)
    }

    fn exit_node(&mut self) -> Result<(), CodecError> {
        self.close(FrameKind::Node)
    }

    fn enter_array(&mut self) -> Result<usize, CodecError> {
        let Value::Array(items) = self.take(&[EntryType::StartOfArray], "an array")? else {
            return Err(CodecError::InvalidState("array entry was not an array"));
        };
        let len = items.len();
        self.open(FrameKind::Array, items.into_iter().map(|v| (None, v)).collect())?;
        Ok(len)
    }

    fn exit_array(&mut self) -> Result<(), CodecError> {
        self.close(FrameKind::Array)
    }

    fn read_null(&mut self) -> Result<(), CodecError> {
        self.take(&[EntryType::Null], "null").map(drop)
    }

    fn read_internal_reference(&mut self) -> Result<u32, CodecError> {
        let value = self.take(&[EntryType::InternalReference], "an internal reference")?;
        u32_field(value.get(INTERNAL_REF_KEY), INTERNAL_REF_KEY)
    }

    fn read_external_reference(&mut self) -> Result<u32, CodecError> {
        let value = self.take(&[EntryType::ExternalReference], "an external reference")?;
        u32_field(value.get(EXTERNAL_REF_KEY), EXTERNAL_REF_KEY)
    }

    fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.take(&[EntryType::Boolean], "a boolean")? {
            Value::Bool(b) => Ok(b),
            _ => Err(CodecError::InvalidState("boolean entry was not a bool")),
        }
    }

    fn read_int(&mut self) -> Result<i64, CodecError> {
        let value = self.take(&[EntryType::Integer, EntryType::FloatingPoint], "an integer")?;
        if let Some(v) = value.as_i64() {
            return Ok(v);
        }
        match value.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                Ok(f as i64)
            }
            _ => Err(CodecError::OutOfRange {
                value: value.to_string(),
                target: "i64",
            }),
        }
    }

    fn read_uint(&mut self) -> Result<u64, CodecError> {
        let value = self.take(&[EntryType::Integer, EntryType::FloatingPoint], "an integer")?;
        if let Some(v) = value.as_u64() {
            return Ok(v);
        }
        match value.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= 0.0 && f < u64::MAX as f64 => Ok(f as u64),
            _ => Err(CodecError::OutOfRange {
                value: value.to_string(),
                target: "u64",
            }),
        }
    }

    fn read_f32(&mut self) -> Result<f32, CodecError> {
        self.read_f64().map(|v| v as f32)
    }

    fn read_f64(&mut self) -> Result<f64, CodecError> {
        let found = self.peek_type()?;
        let value = match found {
            EntryType::String => self.take(&[EntryType::String], "a float")?,
            _ => self.take(&[EntryType::FloatingPoint, EntryType::Integer], "a float")?,
        };
        match &value {
            Value::Number(n) => n.as_f64().ok_or(CodecError::InvalidState("number without f64 form")),
            Value::String(s) => match s.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(CodecError::InvalidData(format!("'{other}' is not a float"))),
            },
            _ => Err(CodecError::UnexpectedEntry {
                expected: "a float",
                found,
            }),
        }
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        match self.take(&[EntryType::String], "a string")? {
            Value::String(s) => Ok(s),
            _ => Err(CodecError::InvalidState("string entry was not a string")),
        }
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let value = self.take(&[EntryType::PrimitiveArray], "a primitive array")?;
        let Some(Value::Array(items)) = value.get(BYTES_KEY) else {
            return Err(CodecError::InvalidData(format!("'{BYTES_KEY}' must be an array")));
        };
        items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| CodecError::InvalidData(format!("{item} is not a byte")))
            })
            .collect()
    }

    fn skip_entry(&mut self) -> Result<(), CodecError> {
        match self.peek_type()? {
            found @ (EntryType::EndOfNode | EntryType::EndOfArray | EntryType::EndOfStream) => {
                Err(CodecError::UnexpectedEntry {
                    expected: "an entry to skip",
                    found,
                })
            }
            found => self.take(&[found], "an entry to skip").map(drop),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
