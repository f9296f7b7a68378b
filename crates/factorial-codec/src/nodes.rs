//! The Nodes format: a flat in-memory list of entries.
//!
//! Each [`SerializationNode`] is one entry with its name, its type and a
//! textual payload. Editors and inspectors can display or diff the list
//! directly, and it is itself serde-serializable for embedding in other
//! documents. There is no stream form; build a [`NodeDataWriter`] or
//! [`NodeDataReader`] directly, or use the facade's `*_nodes` functions.

use serde::{Deserialize, Serialize};

use crate::context::{ContextHandle, DeserializationContext, SerializationContext};
use crate::data::{DataReader, DataWriter, Depth, EntryType, NodeHeader};
use crate::error::CodecError;

/// One entry of a Nodes tree.
///
/// `data` holds the type name for struct nodes, `"{id}|{type}"` for
/// reference nodes, the length for arrays, lowercase hex for byte arrays,
/// and the textual value for primitives. An empty name means unnamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializationNode {
    pub name: String,
    pub entry: EntryType,
    pub data: String,
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex(text: &str) -> Result<Vec<u8>, CodecError> {
    if text.len() % 2 != 0 {
        return Err(CodecError::InvalidData(format!("odd-length hex '{text}'")));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            text.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| CodecError::InvalidData(format!("invalid hex '{text}'")))
        })
        .collect()
}

// ===========================================================================
// Writer
// ===========================================================================

/// Collects entries into a `Vec<SerializationNode>`.
pub struct NodeDataWriter<'a> {
    nodes: Vec<SerializationNode>,
    context: ContextHandle<'a, SerializationContext>,
    depth: Depth,
}

impl<'a> NodeDataWriter<'a> {
    pub fn new(context: Option<&'a mut SerializationContext>) -> Self {
        Self {
            nodes: Vec::new(),
            context: ContextHandle::borrow_or_claim(context),
            depth: Depth::default(),
        }
    }

    pub fn nodes(&self) -> &[SerializationNode] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<SerializationNode> {
        self.nodes
    }

    fn push(&mut self, name: Option<&str>, entry: EntryType, data: String) -> Result<(), CodecError> {
        self.nodes.push(SerializationNode {
            name: name.unwrap_or_default().to_owned(),
            entry,
            data,
        });
        Ok(())
    }
}

impl DataWriter for NodeDataWriter<'_> {
    fn context(&self) -> Result<&SerializationContext, CodecError> {
        self.context.get()
    }

    fn context_mut(&mut self) -> Result<&mut SerializationContext, CodecError> {
        self.context.get_mut()
    }

    fn begin_struct_node(&mut self, name: Option<&str>, type_name: &str) -> Result<(), CodecError> {
        self.depth.descend()?;
        self.push(name, EntryType::StartOfNode, type_name.to_owned())
    }

    fn begin_reference_node(
        &mut self,
        name: Option<&str>,
        type_name: &str,
        id: u32,
    ) -> Result<(), CodecError> {
        self.depth.descend()?;
        self.push(name, EntryType::StartOfNode, format!("{id}|{type_name}"))
    }

    fn end_node(&mut self) -> Result<(), CodecError> {
        self.depth.ascend();
        self.push(None, EntryType::EndOfNode, String::new())
    }

    fn begin_array_node(&mut self, name: Option<&str>, length: usize) -> Result<(), CodecError> {
        self.depth.descend()?;
        self.push(name, EntryType::StartOfArray, length.to_string())
    }

    fn end_array_node(&mut self) -> Result<(), CodecError> {
        self.depth.ascend();
        self.push(None, EntryType::EndOfArray, String::new())
    }

    fn write_null(&mut self, name: Option<&str>) -> Result<(), CodecError> {
        self.push(name, EntryType::Null, String::new())
    }

    fn write_internal_reference(&mut self, name: Option<&str>, id: u32) -> Result<(), CodecError> {
        self.push(name, EntryType::InternalReference, id.to_string())
    }

    fn write_external_reference(
        &mut self,
        name: Option<&str>,
        index: u32,
    ) -> Result<(), CodecError> {
        self.push(name, EntryType::ExternalReference, index.to_string())
    }

    fn write_bool(&mut self, name: Option<&str>, value: bool) -> Result<(), CodecError> {
        self.push(name, EntryType::Boolean, value.to_string())
    }

    fn write_int(&mut self, name: Option<&str>, value: i64) -> Result<(), CodecError> {
        self.push(name, EntryType::Integer, value.to_string())
    }

    fn write_uint(&mut self, name: Option<&str>, value: u64) -> Result<(), CodecError> {
        self.push(name, EntryType::Integer, value.to_string())
    }

    fn write_f32(&mut self, name: Option<&str>, value: f32) -> Result<(), CodecError> {
        self.push(name, EntryType::FloatingPoint, value.to_string())
    }

    fn write_f64(&mut self, name: Option<&str>, value: f64) -> Result<(), CodecError> {
        self.push(name, EntryType::FloatingPoint, value.to_string())
    }

    fn write_string(&mut self, name: Option<&str>, value: &str) -> Result<(), CodecError> {
        self.push(name, EntryType::String, value.to_owned())
    }

    fn write_bytes(&mut self, name: Option<&str>, value: &[u8]) -> Result<(), CodecError> {
        self.push(name, EntryType::PrimitiveArray, encode_hex(value))
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        Ok(())
    }
}

// ===========================================================================
// Reader
// ===========================================================================

/// Reads entries back from a slice of [`SerializationNode`]s.
pub struct NodeDataReader<'a> {
    nodes: &'a [SerializationNode],
    index: usize,
    context: ContextHandle<'a, DeserializationContext>,
    depth: Depth,
}

impl<'a> NodeDataReader<'a> {
    pub fn new(
        nodes: &'a [SerializationNode],
        context: Option<&'a mut DeserializationContext>,
    ) -> Self {
        Self {
            nodes,
            index: 0,
            context: ContextHandle::borrow_or_claim(context),
            depth: Depth::default(),
        }
    }

    fn current_type(&self) -> EntryType {
        self.nodes
            .get(self.index)
            .map_or(EntryType::EndOfStream, |node| node.entry)
    }

    /// Consume the current node if its type is one of `accepted`.
    fn take(&mut self, accepted: &[EntryType], expected: &'static str) -> Result<&'a SerializationNode, CodecError> {
        let found = self.current_type();
        let nodes = self.nodes;
        match nodes.get(self.index) {
            Some(node) if accepted.contains(&found) => {
                self.index += 1;
                Ok(node)
            }
            _ => Err(CodecError::UnexpectedEntry { expected, found }),
        }
    }

    fn parse<T: std::str::FromStr>(node: &SerializationNode, target: &'static str) -> Result<T, CodecError> {
        node.data.parse().map_err(|_| {
            CodecError::InvalidData(format!("'{}' is not a valid {target}", node.data))
        })
    }

    fn skip_until(&mut self, end: EntryType, context: &'static str) -> Result<(), CodecError> {
        loop {
            match self.current_type() {
                found if found == end => {
                    self.index += 1;
                    self.depth.ascend();
                    return Ok(());
                }
                EntryType::EndOfStream => {
                    return Err(CodecError::InvalidData(format!("nodes ended inside {context}")));
                }
                _ => self.skip_entry()?,
            }
        }
    }
}

impl DataReader for NodeDataReader<'_> {
    fn context(&self) -> Result<&DeserializationContext, CodecError> {
        self.context.get()
    }

    fn context_mut(&mut self) -> Result<&mut DeserializationContext, CodecError> {
        self.context.get_mut()
    }

    fn peek_entry(&mut self) -> Result<(EntryType, Option<String>), CodecError> {
        let name = self
            .nodes
            .get(self.index)
            .filter(|node| !node.name.is_empty())
            .map(|node| node.name.clone());
        Ok((self.current_type(), name))
    }

    fn enter_node(&mut self) -> Result<NodeHeader, CodecError> {
        let node = self.take(&[EntryType::StartOfNode], "a node")?;
        self.depth.descend()?;
        let reference = node
            .data
            .split_once('|')
            .and_then(|(id, type_name)| id.parse::<u32>().ok().map(|id| (id, type_name)));
        Ok(match reference {
            Some((id, type_name)) => NodeHeader {
                type_name: Some(type_name.to_owned()),
                id: Some(id),
            },
            None => NodeHeader {
                type_name: Some(node.data.clone()),
                id: None,
            },
        })
    }

    fn exit_node(&mut self) -> Result<(), CodecError> {
        self.skip_until(EntryType::EndOfNode, "a node")
    }

    fn enter_array(&mut self) -> Result<usize, CodecError> {
        let node = self.take(&[EntryType::StartOfArray], "an array")?;
        self.depth.descend()?;
        Self::parse(node, "array length")
    }

    fn exit_array(&mut self) -> Result<(), CodecError> {
        self.skip_until(EntryType::EndOfArray, "an array")
    }

    fn read_null(&mut self) -> Result<(), CodecError> {
        self.take(&[EntryType::Null], "null").map(drop)
    }

    fn read_internal_reference(&mut self) -> Result<u32, CodecError> {
        let node = self.take(&[EntryType::InternalReference], "an internal reference")?;
        Self::parse(node, "reference id")
    }

    fn read_external_reference(&mut self) -> Result<u32, CodecError> {
        let node = self.take(&[EntryType::ExternalReference], "an external reference")?;
        Self::parse(node, "reference index")
    }

    fn read_bool(&mut self) -> Result<bool, CodecError> {
        let node = self.take(&[EntryType::Boolean], "a boolean")?;
        Self::parse(node, "boolean")
    }

    fn read_int(&mut self) -> Result<i64, CodecError> {
        let node = self.take(&[EntryType::Integer], "an integer")?;
        node.data.parse::<i64>().map_err(|_| CodecError::OutOfRange {
            value: node.data.clone(),
            target: "i64",
        })
    }

    fn read_uint(&mut self) -> Result<u64, CodecError> {
        let node = self.take(&[EntryType::Integer], "an integer")?;
        node.data.parse::<u64>().map_err(|_| CodecError::OutOfRange {
            value: node.data.clone(),
            target: "u64",
        })
    }

    fn read_f32(&mut self) -> Result<f32, CodecError> {
        let node = self.take(&[EntryType::FloatingPoint, EntryType::Integer], "a float")?;
        Self::parse(node, "f32")
    }

    fn read_f64(&mut self) -> Result<f64, CodecError> {
        let node = self.take(&[EntryType::FloatingPoint, EntryType::Integer], "a float")?;
        Self::parse(node, "f64")
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        let node = self.take(&[EntryType::String], "a string")?;
        Ok(node.data.clone())
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let node = self.take(&[EntryType::PrimitiveArray], "a primitive array")?;
        decode_hex(&node.data)
    }

    fn skip_entry(&mut self) -> Result<(), CodecError> {
        let mut open: Vec<EntryType> = Vec::new();
        loop {
            match self.current_type() {
                EntryType::StartOfNode => {
                    self.take(&[EntryType::StartOfNode], "a node")?;
                    self.depth.descend()?;
                    open.push(EntryType::EndOfNode);
                }
                EntryType::StartOfArray => {
                    self.take(&[EntryType::StartOfArray], "an array")?;
                    self.depth.descend()?;
                    open.push(EntryType::EndOfArray);
                }
                found @ (EntryType::EndOfNode | EntryType::EndOfArray)
                    if open.last() == Some(&found) =>
                {
                    self.index += 1;
                    self.depth.ascend();
                    open.pop();
                }
                found @ (EntryType::EndOfNode | EntryType::EndOfArray | EntryType::EndOfStream) => {
                    if open.is_empty() {
                        return Err(CodecError::UnexpectedEntry {
                            expected: "an entry to skip",
                            found,
                        });
                    }
                    return Err(CodecError::InvalidData(format!(
                        "found {found:?} inside a skipped entry"
                    )));
                }
                _ => self.index += 1,
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
