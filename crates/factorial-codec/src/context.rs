//! Per-operation state for serialization and deserialization.
//!
//! A context carries the active [`SerializationConfig`] and the reference
//! tables that make shared and cyclic graphs round-trip:
//!
//! - internal references: every shared node (`Arc<RwLock<T>>`) gets an id
//!   the first time it is written; later occurrences are written as that
//!   id and re-linked on read.
//! - external references: host-owned objects ([`HostRef`]) are written as
//!   an index into a side table the caller hands over to the reader.
//!
//! Contexts can be supplied by the caller (to share identity across calls)
//! or claimed from the process-wide [`InstanceCache`] for one call.
//!
//! [`HostRef`]: crate::host::HostRef

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::logger::{DefaultLogger, Logger};
use crate::policy::{self, PolicyRef};
use crate::pool::{Cached, InstanceCache, Reusable};

/// A type-erased shared object held by a context.
pub type SharedObject = Arc<dyn Any + Send + Sync>;

fn identity<T: ?Sized>(object: &Arc<T>) -> usize {
    Arc::as_ptr(object).cast::<()>() as usize
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which diagnostics reach the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoggingPolicy {
    #[default]
    LogErrors,
    LogWarningsAndErrors,
    Silent,
}

/// How recoverable problems are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandlingPolicy {
    /// Warnings are logged and the operation continues.
    #[default]
    Resilient,
    /// Warnings abort the operation with [`CodecError::Warning`].
    ThrowOnWarnings,
}

/// Logger plus the policies deciding what it sees.
#[derive(Debug, Clone)]
pub struct DebugContext {
    pub logger: Arc<dyn Logger>,
    pub logging: LoggingPolicy,
    pub error_handling: ErrorHandlingPolicy,
}

impl Default for DebugContext {
    fn default() -> Self {
        Self {
            logger: Arc::new(DefaultLogger),
            logging: LoggingPolicy::default(),
            error_handling: ErrorHandlingPolicy::default(),
        }
    }
}

impl DebugContext {
    pub fn with_logger(logger: Arc<dyn Logger>) -> Self {
        Self {
            logger,
            ..Self::default()
        }
    }

    /// Report a recoverable problem. Returns `Err` under
    /// [`ErrorHandlingPolicy::ThrowOnWarnings`].
    pub fn warn(&self, message: impl Into<String>) -> Result<(), CodecError> {
        let message = message.into();
        if self.error_handling == ErrorHandlingPolicy::ThrowOnWarnings {
            return Err(CodecError::Warning(message));
        }
        if self.logging == LoggingPolicy::LogWarningsAndErrors {
            self.logger.warn(&message);
        }
        Ok(())
    }

    pub fn error(&self, message: &str) {
        if self.logging != LoggingPolicy::Silent {
            self.logger.error(message);
        }
    }

    pub fn exception(&self, error: &dyn std::error::Error) {
        if self.logging != LoggingPolicy::Silent {
            self.logger.exception(error);
        }
    }
}

/// Format-agnostic settings of one context.
#[derive(Debug, Clone)]
pub struct SerializationConfig {
    pub policy: PolicyRef,
    pub debug: DebugContext,
}

impl Default for SerializationConfig {
    fn default() -> Self {
        Self {
            policy: policy::conventional(),
            debug: DebugContext::default(),
        }
    }
}

impl SerializationConfig {
    pub fn with_policy(policy: PolicyRef) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// SerializationContext
// ---------------------------------------------------------------------------

/// Write-side state: configuration plus object and host reference tables.
#[derive(Debug, Default)]
pub struct SerializationContext {
    config: SerializationConfig,
    object_ids: HashMap<usize, u32>,
    // Registered objects stay alive so their addresses stay unique.
    objects: Vec<SharedObject>,
    external_ids: HashMap<usize, u32>,
    external: Vec<SharedObject>,
}

impl SerializationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SerializationConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &SerializationConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SerializationConfig {
        &mut self.config
    }

    pub fn policy(&self) -> &PolicyRef {
        &self.config.policy
    }

    pub fn debug(&self) -> &DebugContext {
        &self.config.debug
    }

    /// Id of `object` if it was already written in this session.
    pub fn object_id<T: Send + Sync + 'static>(&self, object: &Arc<T>) -> Option<u32> {
        self.object_ids.get(&identity(object)).copied()
    }

    /// Assign the next id to `object`, or return its existing one.
    pub fn register_object<T: Send + Sync + 'static>(
        &mut self,
        object: &Arc<T>,
    ) -> Result<u32, CodecError> {
        let key = identity(object);
        if let Some(&id) = self.object_ids.get(&key) {
            return Ok(id);
        }
        let id = u32::try_from(self.objects.len())
            .map_err(|_| CodecError::InvalidState("too many shared objects in one session"))?;
        let pinned: SharedObject = Arc::clone(object) as SharedObject;
        self.objects.push(pinned);
        self.object_ids.insert(key, id);
        Ok(id)
    }

    /// Index of `object` in the external reference table, adding it if new.
    pub fn register_external<T: Send + Sync + 'static>(
        &mut self,
        object: &Arc<T>,
    ) -> Result<u32, CodecError> {
        let key = identity(object);
        if let Some(&index) = self.external_ids.get(&key) {
            return Ok(index);
        }
        let index = u32::try_from(self.external.len())
            .map_err(|_| CodecError::InvalidState("too many external references in one session"))?;
        self.external.push(Arc::clone(object) as SharedObject);
        self.external_ids.insert(key, index);
        Ok(index)
    }

    pub fn external_references(&self) -> &[SharedObject] {
        &self.external
    }

    /// Hand the external table over to a reader.
    pub fn take_external_references(&mut self) -> Vec<SharedObject> {
        self.external_ids.clear();
        std::mem::take(&mut self.external)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Forget all references and restore the default configuration.
    pub fn reset(&mut self) {
        self.config = SerializationConfig::default();
        self.object_ids.clear();
        self.objects.clear();
        self.external_ids.clear();
        self.external.clear();
    }
}

impl Reusable for SerializationContext {
    fn prepare_new_session(&mut self) {
        self.reset();
    }
}

// ---------------------------------------------------------------------------
// DeserializationContext
// ---------------------------------------------------------------------------

/// Read-side state: configuration, objects by id, and the external table.
#[derive(Debug, Default)]
pub struct DeserializationContext {
    config: SerializationConfig,
    objects: HashMap<u32, SharedObject>,
    external: Vec<SharedObject>,
}

impl DeserializationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SerializationConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &SerializationConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SerializationConfig {
        &mut self.config
    }

    pub fn policy(&self) -> &PolicyRef {
        &self.config.policy
    }

    pub fn debug(&self) -> &DebugContext {
        &self.config.debug
    }

    /// Record the object materialized for `id`. Must happen before the
    /// object's members are read so cycles resolve.
    pub fn register_object(&mut self, id: u32, object: SharedObject) {
        self.objects.insert(id, object);
    }

    pub fn object(&self, id: u32) -> Option<&SharedObject> {
        self.objects.get(&id)
    }

    pub fn set_external_references(&mut self, references: Vec<SharedObject>) {
        self.external = references;
    }

    pub fn external_reference(&self, index: u32) -> Option<&SharedObject> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.external.get(i))
    }

    /// Forget all references and restore the default configuration.
    pub fn reset(&mut self) {
        self.config = SerializationConfig::default();
        self.objects.clear();
        self.external.clear();
    }
}

impl Reusable for DeserializationContext {
    fn prepare_new_session(&mut self) {
        self.reset();
    }
}

// ---------------------------------------------------------------------------
// ContextHandle
// ---------------------------------------------------------------------------

/// A context owned by the caller or claimed from the shared cache for the
/// lifetime of one writer or reader.
#[derive(Debug)]
pub enum ContextHandle<'a, C: Reusable> {
    Borrowed(&'a mut C),
    Pooled(Cached<'static, C>),
}

impl<'a, C: Reusable> ContextHandle<'a, C> {
    /// Use `context` if given, otherwise claim one from the shared cache.
    pub fn borrow_or_claim(context: Option<&'a mut C>) -> Self {
        match context {
            Some(context) => Self::Borrowed(context),
            None => Self::Pooled(InstanceCache::<C>::shared().claim()),
        }
    }

    pub fn get(&self) -> Result<&C, CodecError> {
        match self {
            Self::Borrowed(context) => Ok(&**context),
            Self::Pooled(cached) => cached.get(),
        }
    }

    pub fn get_mut(&mut self) -> Result<&mut C, CodecError> {
        match self {
            Self::Borrowed(context) => Ok(&mut **context),
            Self::Pooled(cached) => cached.get_mut(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{LogRecord, MemoryLogger};

    #[test]
    fn object_ids_are_sequential_and_stable() {
        let mut ctx = SerializationContext::new();
        let a = Arc::new(1u8);
        let b = Arc::new(1u8);
        assert_eq!(ctx.object_id(&a), None);
        assert_eq!(ctx.register_object(&a).unwrap(), 0);
        assert_eq!(ctx.register_object(&b).unwrap(), 1);
        assert_eq!(ctx.register_object(&Arc::clone(&a)).unwrap(), 0);
        assert_eq!(ctx.object_id(&b), Some(1));
        assert_eq!(ctx.object_count(), 2);
    }

    #[test]
    fn external_references_are_deduplicated() {
        let mut ctx = SerializationContext::new();
        let texture = Arc::new("grass.png".to_string());
        assert_eq!(ctx.register_external(&texture).unwrap(), 0);
        assert_eq!(ctx.register_external(&texture).unwrap(), 0);
        assert_eq!(ctx.external_references().len(), 1);

        let taken = ctx.take_external_references();
        assert_eq!(taken.len(), 1);
        assert!(ctx.external_references().is_empty());
    }

    #[test]
    fn reset_clears_tables_and_config() {
        let mut ctx = SerializationContext::with_config(SerializationConfig::with_policy(
            policy::everything(),
        ));
        ctx.register_object(&Arc::new(5i32)).unwrap();
        ctx.reset();
        assert_eq!(ctx.object_count(), 0);
        assert!(Arc::ptr_eq(ctx.policy(), &policy::conventional()));
    }

    #[test]
    fn deserialization_context_lookups() {
        let mut ctx = DeserializationContext::new();
        ctx.register_object(3, Arc::new(42u16));
        assert!(ctx.object(3).unwrap().downcast_ref::<u16>().is_some());
        assert!(ctx.object(4).is_none());

        ctx.set_external_references(vec![Arc::new(7u8) as SharedObject]);
        assert!(ctx.external_reference(0).is_some());
        assert!(ctx.external_reference(1).is_none());
        ctx.reset();
        assert!(ctx.object(3).is_none());
        assert!(ctx.external_reference(0).is_none());
    }

    #[test]
    fn warnings_follow_policies() {
        let logger = Arc::new(MemoryLogger::new());
        let mut debug = DebugContext::with_logger(logger.clone());

        debug.warn("quiet by default").unwrap();
        assert!(logger.is_empty());

        debug.logging = LoggingPolicy::LogWarningsAndErrors;
        debug.warn("heard").unwrap();
        debug.error("broken");
        assert_eq!(
            logger.records(),
            vec![
                LogRecord::Warning("heard".into()),
                LogRecord::Error("broken".into())
            ]
        );

        debug.error_handling = ErrorHandlingPolicy::ThrowOnWarnings;
        let err = debug.warn("fatal").unwrap_err();
        assert!(matches!(err, CodecError::Warning(msg) if msg == "fatal"));

        logger.clear();
        debug.logging = LoggingPolicy::Silent;
        debug.error("dropped");
        assert!(logger.is_empty());
    }

    #[test]
    fn pooled_handle_is_returned_reset() {
        {
            let mut handle = ContextHandle::<SerializationContext>::borrow_or_claim(None);
            let ctx = handle.get_mut().unwrap();
            ctx.register_object(&Arc::new(0u64)).unwrap();
        }
        let handle = ContextHandle::<SerializationContext>::borrow_or_claim(None);
        assert_eq!(handle.get().unwrap().object_count(), 0);
    }

    #[test]
    fn borrowed_handle_writes_through() {
        let mut ctx = SerializationContext::new();
        {
            let mut handle = ContextHandle::borrow_or_claim(Some(&mut ctx));
            handle
                .get_mut()
                .unwrap()
                .register_object(&Arc::new(1u8))
                .unwrap();
        }
        assert_eq!(ctx.object_count(), 1);
    }
}
