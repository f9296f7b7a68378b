//! Self-describing blobs: a versioned header followed by the payload.
//!
//! The header records the format and the id of the policy that produced
//! the payload, so a reader with the same [`PolicyRegistry`] deserializes
//! with the same member selection. Layout:
//!
//! ```text
//! [u32 LE header length][bitcode BlobHeader][payload]
//! ```
//!
//! Binary and JSON payloads are the stream bytes. A Nodes payload is the
//! node list encoded with bitcode.

use serde::{Deserialize, Serialize};

use crate::context::{DeserializationContext, SerializationConfig, SerializationContext};
use crate::data::Format;
use crate::error::CodecError;
use crate::facade;
use crate::nodes::SerializationNode;
use crate::policy::PolicyRegistry;
use crate::serializable::Serializable;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a codec blob.
pub const BLOB_MAGIC: u32 = 0xFAC7_C0DE;

/// Current header version. Increment when breaking the blob layout.
pub const BLOB_VERSION: u32 = 1;

const LENGTH_PREFIX: usize = 4;

// ---------------------------------------------------------------------------
// BlobHeader
// ---------------------------------------------------------------------------

/// Header prepended to every blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHeader {
    pub magic: u32,
    pub version: u32,
    pub format: Format,
    /// Id of the policy the payload was written with.
    pub policy_id: String,
}

impl BlobHeader {
    /// A header for the current version.
    pub fn new(format: Format, policy_id: impl Into<String>) -> Self {
        Self {
            magic: BLOB_MAGIC,
            version: BLOB_VERSION,
            format,
            policy_id: policy_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), CodecError> {
        if self.magic != BLOB_MAGIC {
            return Err(CodecError::InvalidMagic(self.magic));
        }
        if self.version > BLOB_VERSION {
            return Err(CodecError::FutureVersion(self.version));
        }
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let body = bitcode::serialize(self).map_err(|e| CodecError::HeaderEncode(e.to_string()))?;
        let length = u32::try_from(body.len())
            .map_err(|_| CodecError::HeaderEncode("header too large".into()))?;
        let mut out = Vec::with_capacity(LENGTH_PREFIX + body.len());
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }
}

/// Split `blob` into its validated header and the payload.
pub fn read_blob_header(blob: &[u8]) -> Result<(BlobHeader, &[u8]), CodecError> {
    let (prefix, rest) = blob
        .split_first_chunk::<LENGTH_PREFIX>()
        .ok_or_else(|| CodecError::HeaderDecode("blob too short for header length".into()))?;
    let length = usize::try_from(u32::from_le_bytes(*prefix))
        .map_err(|_| CodecError::HeaderDecode("header length overflows".into()))?;
    if rest.len() < length {
        return Err(CodecError::HeaderDecode(format!(
            "header declares {length} bytes, {} available",
            rest.len()
        )));
    }
    let (body, payload) = rest.split_at(length);
    let header: BlobHeader =
        bitcode::deserialize(body).map_err(|e| CodecError::HeaderDecode(e.to_string()))?;
    header.validate()?;
    Ok((header, payload))
}

/// Serialize `value` into a blob using `config`'s policy and diagnostics.
pub fn serialize_blob<T: Serializable>(
    value: &T,
    format: Format,
    config: SerializationConfig,
) -> Result<Vec<u8>, CodecError> {
    let mut blob = BlobHeader::new(format, config.policy.id()).encode()?;
    let mut context = SerializationContext::with_config(config);
    match format {
        Format::Nodes => {
            let nodes = facade::serialize_to_nodes(value, Some(&mut context))?;
            let payload =
                bitcode::serialize(&nodes).map_err(|e| CodecError::InvalidData(e.to_string()))?;
            blob.extend_from_slice(&payload);
        }
        Format::Binary | Format::Json => {
            facade::serialize_value_to(value, &mut blob, format, Some(&mut context))?;
        }
    }
    Ok(blob)
}

/// Deserialize a blob, resolving its recorded policy in `registry`.
///
/// A supplied context keeps its logger and error handling; only its policy
/// is replaced by the recorded one.
pub fn deserialize_blob<T: Serializable>(
    blob: &[u8],
    registry: &PolicyRegistry,
    context: Option<&mut DeserializationContext>,
) -> Result<T, CodecError> {
    let (header, payload) = read_blob_header(blob)?;
    let policy = registry.resolve(&header.policy_id)?;
    log::debug!(
        "reading {:?} blob v{} with policy '{}'",
        header.format,
        header.version,
        header.policy_id
    );

    let mut owned;
    let context = match context {
        Some(context) => {
            context.config_mut().policy = policy;
            context
        }
        None => {
            owned = DeserializationContext::with_config(SerializationConfig::with_policy(policy));
            &mut owned
        }
    };
    match header.format {
        Format::Nodes => {
            let nodes: Vec<SerializationNode> = bitcode::deserialize(payload)
                .map_err(|e| CodecError::InvalidData(e.to_string()))?;
            facade::deserialize_from_nodes(&nodes, Some(context))
        }
        Format::Binary | Format::Json => {
            facade::deserialize_from_bytes(payload, header.format, Some(context))
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
