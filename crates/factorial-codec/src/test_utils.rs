//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so the sample
//! types are available to integration tests and benchmarks via the
//! `test-utils` feature.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::context::{DebugContext, LoggingPolicy};
use crate::host::HostRef;
use crate::logger::MemoryLogger;
use factorial_codec_derive::Serializable;

// ===========================================================================
// Sample types
// ===========================================================================

/// A plain value type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serializable)]
#[codec(value_type)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Base of [`Player`]. `health` is private and opted in.
#[derive(Debug, Clone, Default, PartialEq, Serializable)]
pub struct Entity {
    pub name: String,
    #[codec(serialize)]
    health: i32,
    #[codec(skip)]
    pub selected: bool,
}

impl Entity {
    pub fn health(&self) -> i32 {
        self.health
    }
}

/// Embeds [`Entity`] and declares its own `health`, which is aliased as
/// `Player+health`.
#[derive(Debug, Clone, Default, PartialEq, Serializable)]
pub struct Player {
    #[codec(base)]
    pub entity: Entity,
    #[codec(serialize)]
    health: i32,
    pub inventory: Vec<String>,
    #[codec(property)]
    pub score: u32,
}

impl Player {
    pub fn new(base_health: i32, own_health: i32) -> Self {
        Self {
            entity: Entity {
                health: base_health,
                ..Entity::default()
            },
            health: own_health,
            ..Self::default()
        }
    }

    pub fn health(&self) -> i32 {
        self.health
    }
}

/// Only permissive policies may write this type.
#[derive(Debug, Clone, Default, PartialEq, Serializable)]
#[codec(unconventional)]
pub struct Scratch {
    label: String,
    #[codec(skip)]
    count: u32,
}

impl Scratch {
    pub fn new(label: &str, count: u32) -> Self {
        Self {
            label: label.to_owned(),
            count,
        }
    }
}

/// Shared graph node with owned children and a back-pointer.
#[derive(Debug, Default, Serializable)]
pub struct GraphNode {
    pub name: String,
    pub children: Vec<Arc<RwLock<GraphNode>>>,
    pub parent: Weak<RwLock<GraphNode>>,
}

impl GraphNode {
    pub fn shared(name: &str) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(Self {
            name: name.to_owned(),
            ..Self::default()
        }))
    }

    /// Push `child` under `parent` and point it back.
    pub fn attach(parent: &Arc<RwLock<Self>>, child: &Arc<RwLock<Self>>) {
        child.write().parent = Arc::downgrade(parent);
        parent.write().children.push(Arc::clone(child));
    }
}

/// Current layout of a machine; `crafting_speed` was saved as `speed`.
#[derive(Debug, Clone, Default, PartialEq, Serializable)]
pub struct Machine {
    pub label: String,
    #[codec(former_name = "speed")]
    pub crafting_speed: f32,
}

/// The old layout of [`Machine`].
#[derive(Debug, Clone, Default, PartialEq, Serializable)]
pub struct LegacyMachine {
    pub label: String,
    pub speed: f32,
}

/// Holds a host-owned texture.
#[derive(Debug, Clone, Default, PartialEq, Serializable)]
pub struct Sprite {
    pub texture: HostRef<String>,
    pub tint: u32,
}

/// A collection-heavy aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serializable)]
pub struct Inventory {
    pub slots: Vec<Option<String>>,
    pub counts: std::collections::BTreeMap<String, u32>,
    pub origin: Point,
    pub ratio: f64,
}

// ===========================================================================
// Diagnostics
// ===========================================================================

/// A debug context recording warnings and errors into the returned logger.
pub fn recording_debug() -> (Arc<MemoryLogger>, DebugContext) {
    let logger = Arc::new(MemoryLogger::new());
    let mut debug = DebugContext::with_logger(logger.clone());
    debug.logging = LoggingPolicy::LogWarningsAndErrors;
    (logger, debug)
}

/// A populated [`Inventory`].
pub fn sample_inventory() -> Inventory {
    Inventory {
        slots: vec![Some("iron plate".into()), None, Some("gear".into())],
        counts: [("iron plate".to_string(), 40), ("gear".to_string(), 3)].into(),
        origin: Point { x: 12, y: -3 },
        ratio: 0.75,
    }
}
