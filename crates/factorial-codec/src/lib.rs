//! Factorial Codec -- policy-driven object serialization for factory games.
//!
//! This crate turns game objects into a stream of named entries and back,
//! through pluggable formats (compact Binary, JSON and an in-memory Nodes
//! tree), with member selection decided by a serialization policy.
//!
//! # Pipeline
//!
//! 1. **Describe** -- `#[derive(Serializable)]` generates a static member
//!    table ([`member::TypeInfo`]) and accessor dispatch ([`member::Reflect`]).
//! 2. **Resolve** -- [`resolver::MemberResolver`] picks the members a
//!    [`policy::SerializationPolicy`] accepts, walking the embedded base
//!    first and aliasing name collisions. Results are cached per policy and
//!    type.
//! 3. **Format** -- [`formatter`] writes each member as a named entry and
//!    reads entries back by name, skipping unknown ones.
//! 4. **Encode** -- a [`data::DataWriter`] / [`data::DataReader`] pair for
//!    the chosen [`Format`] turns entries into bytes or nodes, staging
//!    through pooled buffers.
//!
//! # Usage
//!
//! ```rust,ignore
//! #[derive(Default, Serializable)]
//! struct Assembler {
//!     pub recipe: String,
//!     #[codec(serialize)]
//!     progress: f32,
//! }
//!
//! let bytes = serialize_to_bytes(&assembler, Format::Binary, None)?;
//! let back: Assembler = deserialize_from_bytes(&bytes, Format::Binary, None)?;
//! let copy = create_copy(&assembler)?;
//! ```
//!
//! # Key Types
//!
//! - [`Serializable`] -- write/read capability, implemented for primitives,
//!   strings, options, boxes, vectors, maps, shared nodes and host references.
//! - [`context::SerializationContext`] / [`context::DeserializationContext`]
//!   -- per-operation configuration and reference tables.
//! - [`policy`] -- the `everything`, `conventional` and `strict` policies,
//!   custom policies and the [`policy::PolicyRegistry`].
//! - [`pool`] -- the shared [`pool::BufferPool`] and [`pool::InstanceCache`].
//! - [`host::HostRef`] -- references to host-managed objects.
//! - [`header`] -- self-describing blobs that record format and policy.
//! - [`settings::CodecSettings`] -- TOML/RON settings resolved into a
//!   [`context::SerializationConfig`].

extern crate self as factorial_codec;

pub mod arch;
pub mod binary;
pub mod context;
pub mod data;
pub mod error;
pub mod facade;
pub mod formatter;
pub mod header;
pub mod host;
pub mod json;
pub mod logger;
pub mod member;
pub mod nodes;
pub mod policy;
pub mod pool;
pub mod resolver;
pub mod serializable;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use context::{DeserializationContext, SerializationConfig, SerializationContext};
pub use data::{DataReader, DataWriter, EntryType, Format};
pub use error::CodecError;
pub use facade::{
    create_copy, deserialize_from_bytes, deserialize_from_nodes, deserialize_value,
    deserialize_value_from, serialize_to_bytes, serialize_to_nodes, serialize_value,
    serialize_value_to,
};
pub use factorial_codec_derive::Serializable;
pub use host::HostRef;
pub use parking_lot::RwLock;
pub use serializable::{ByteArray, Serializable};
