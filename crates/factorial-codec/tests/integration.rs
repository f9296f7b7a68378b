//! Integration tests for the Factorial codec.
//!
//! These tests exercise end-to-end behavior across the whole pipeline:
//! member resolution, policies, every format, shared graphs, host
//! references, deep copies, blobs and settings.

use std::sync::Arc;

use factorial_codec::context::{ErrorHandlingPolicy, LoggingPolicy};
use factorial_codec::data::get_writer;
use factorial_codec::header::{deserialize_blob, read_blob_header, serialize_blob};
use factorial_codec::logger::MemoryLogger;
use factorial_codec::nodes::SerializationNode;
use factorial_codec::policy::{self, CustomSerializationPolicy, PolicyRegistry};
use factorial_codec::resolver::MemberResolver;
use factorial_codec::settings::CodecSettings;
use factorial_codec::test_utils::*;
use factorial_codec::*;

const STREAM_FORMATS: [Format; 2] = [Format::Binary, Format::Json];

fn round_trip<T: Serializable>(value: &T, format: Format) -> T {
    match format {
        Format::Nodes => {
            let nodes = serialize_to_nodes(value, None).unwrap();
            deserialize_from_nodes(&nodes, None).unwrap()
        }
        _ => {
            let bytes = serialize_to_bytes(value, format, None).unwrap();
            deserialize_from_bytes(&bytes, format, None).unwrap()
        }
    }
}

fn member_names<T: factorial_codec::member::Reflect>(policy: &policy::PolicyRef) -> Vec<String> {
    MemberResolver::global()
        .members_of::<T>(policy)
        .iter()
        .map(|m| m.name().to_owned())
        .collect()
}

// ===========================================================================
// Test 1: Point round trip in every format
// ===========================================================================

#[test]
fn point_round_trip_every_format() {
    for format in [Format::Binary, Format::Json, Format::Nodes] {
        assert_eq!(round_trip(&Point { x: 3, y: 4 }, format), Point { x: 3, y: 4 });
        assert_eq!(round_trip(&Point::default(), format), Point { x: 0, y: 0 });
    }
}

// ===========================================================================
// Test 2: Aggregates with collections
// ===========================================================================

#[test]
fn aggregate_round_trip_every_format() {
    let inventory = sample_inventory();
    for format in [Format::Binary, Format::Json, Format::Nodes] {
        assert_eq!(round_trip(&inventory, format), inventory, "{format:?}");
    }
}

// ===========================================================================
// Test 3: Policies select different member sets
// ===========================================================================

#[test]
fn policies_select_members() {
    assert_eq!(member_names::<Player>(&policy::strict()), ["health", "Player+health"]);
    assert_eq!(
        member_names::<Player>(&policy::conventional()),
        ["name", "health", "Player+health", "inventory"]
    );
    assert_eq!(
        member_names::<Player>(&policy::everything()),
        ["name", "health", "selected", "Player+health", "inventory", "score"]
    );
}

#[test]
fn custom_policy_filters_members() {
    let public_only = CustomSerializationPolicy::builder()
        .id("tests.public-only")
        .predicate(|m| m.is_public())
        .build()
        .unwrap()
        .into_ref();
    assert_eq!(
        member_names::<Player>(&public_only),
        ["name", "selected", "inventory", "score"]
    );

    let mut ctx = SerializationContext::with_config(SerializationConfig::with_policy(public_only));
    let mut player = Player::new(10, 20);
    player.entity.name = "alice".into();
    let nodes = serialize_to_nodes(&player, Some(&mut ctx)).unwrap();
    assert!(nodes.iter().all(|n| n.name != "health"));
    assert!(nodes.iter().any(|n| n.name == "name" && n.data == "alice"));
}

#[test]
fn resolution_is_cached() {
    let policy = policy::conventional();
    let first = MemberResolver::global().members_of::<Inventory>(&policy);
    let second = MemberResolver::global().members_of::<Inventory>(&policy);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(&*first, &*second);
}

// ===========================================================================
// Test 4: Aliased members on the wire
// ===========================================================================

#[test]
fn aliased_member_in_json() {
    let bytes = serialize_to_bytes(&Player::new(1, 2), Format::Json, None).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["health"], 1);
    assert_eq!(json["Player+health"], 2);
    assert_eq!(json["$type"], "Player");

    for format in STREAM_FORMATS {
        let back = round_trip(&Player::new(1, 2), format);
        assert_eq!(back.entity.health(), 1);
        assert_eq!(back.health(), 2);
    }
}

// ===========================================================================
// Test 5: Shared nodes and cycles
// ===========================================================================

#[test]
fn shared_graph_keeps_sharing_and_back_pointers() {
    let root = GraphNode::shared("hub");
    let left = GraphNode::shared("left");
    let right = GraphNode::shared("right");
    GraphNode::attach(&root, &left);
    GraphNode::attach(&root, &right);
    // The same node twice.
    root.write().children.push(Arc::clone(&left));

    for format in [Format::Binary, Format::Json, Format::Nodes] {
        let back = round_trip(&root, format);
        let hub = back.read();
        assert_eq!(hub.name, "hub");
        assert_eq!(hub.children.len(), 3);
        assert!(Arc::ptr_eq(&hub.children[0], &hub.children[2]), "{format:?}");
        assert!(!Arc::ptr_eq(&hub.children[0], &hub.children[1]));

        let child = hub.children[1].read();
        assert_eq!(child.name, "right");
        let parent = child.parent.upgrade().unwrap();
        assert!(Arc::ptr_eq(&parent, &back));
    }
}

#[test]
fn context_shares_identity_across_calls() {
    let node = GraphNode::shared("depot");
    let mut write_ctx = SerializationContext::new();
    let first = serialize_to_bytes(&node, Format::Binary, Some(&mut write_ctx)).unwrap();
    let second = serialize_to_bytes(&node, Format::Binary, Some(&mut write_ctx)).unwrap();
    assert!(second.len() < first.len());

    let mut read_ctx = DeserializationContext::new();
    let a: Arc<RwLock<GraphNode>> =
        deserialize_from_bytes(&first, Format::Binary, Some(&mut read_ctx)).unwrap();
    let b: Arc<RwLock<GraphNode>> =
        deserialize_from_bytes(&second, Format::Binary, Some(&mut read_ctx)).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

// ===========================================================================
// Test 6: Deep copies
// ===========================================================================

#[test]
fn deep_copy_is_independent() {
    let original = sample_inventory();
    let mut copy = create_copy(&original).unwrap();
    assert_eq!(copy, original);

    copy.slots.push(Some("copper".into()));
    copy.counts.insert("gear".into(), 99);
    assert_eq!(original.slots.len(), 3);
    assert_eq!(original.counts["gear"], 3);
}

#[test]
fn deep_copy_of_shared_graph_is_a_new_graph() {
    let root = GraphNode::shared("hub");
    GraphNode::attach(&root, &GraphNode::shared("leaf"));

    let copy = create_copy(&root).unwrap();
    assert!(!Arc::ptr_eq(&copy, &root));
    copy.write().name = "renamed".into();
    assert_eq!(root.read().name, "hub");

    let leaf = Arc::clone(&copy.read().children[0]);
    assert!(Arc::ptr_eq(&leaf.read().parent.upgrade().unwrap(), &copy));
}

#[test]
fn deep_copy_of_null_value_and_host() {
    let none: Option<Inventory> = None;
    assert_eq!(create_copy(&none).unwrap(), None);
    assert_eq!(create_copy(&Point { x: 7, y: 8 }).unwrap(), Point { x: 7, y: 8 });

    let texture = HostRef::new(String::from("gear.png"));
    let copied = create_copy(&texture).unwrap();
    assert!(Arc::ptr_eq(texture.get().unwrap(), copied.get().unwrap()));
}

#[test]
fn deep_copy_keeps_host_objects_inside_structs() {
    let sprite = Sprite {
        texture: HostRef::new(String::from("belt.png")),
        tint: 0xFF00FF,
    };
    let copy = create_copy(&sprite).unwrap();
    assert_eq!(copy, sprite);
    assert!(Arc::ptr_eq(
        copy.texture.get().unwrap(),
        sprite.texture.get().unwrap()
    ));
}

#[test]
fn deep_copy_includes_skipped_and_private_members() {
    let mut player = Player::new(5, 6);
    player.entity.selected = true;
    player.score = 42;
    assert_eq!(create_copy(&player).unwrap(), player);
}

// ===========================================================================
// Test 7: Host references without a table
// ===========================================================================

#[test]
fn host_reference_without_table_is_missing() {
    let sprite = Sprite {
        texture: HostRef::new(String::from("a.png")),
        tint: 1,
    };
    let bytes = serialize_to_bytes(&sprite, Format::Binary, None).unwrap();
    let back: Sprite = deserialize_from_bytes(&bytes, Format::Binary, None).unwrap();
    assert!(back.texture.is_missing());
    assert_eq!(back.tint, 1);
}

// ===========================================================================
// Test 8: Nodes format has no stream
// ===========================================================================

#[test]
fn nodes_format_rejects_streams() {
    let mut sink = Vec::new();
    assert!(matches!(
        get_writer(Format::Nodes, &mut sink, None),
        Err(CodecError::UnsupportedOperation(_))
    ));
    assert!(matches!(
        serialize_to_bytes(&Point::default(), Format::Nodes, None),
        Err(CodecError::UnsupportedOperation(_))
    ));
}

// ===========================================================================
// Test 9: Schema evolution
// ===========================================================================

#[test]
fn renamed_member_loads_from_former_name() {
    let legacy = LegacyMachine {
        label: "assembler".into(),
        speed: 1.5,
    };
    let logger = Arc::new(MemoryLogger::new());
    for format in STREAM_FORMATS {
        let bytes = serialize_to_bytes(&legacy, format, None).unwrap();
        let mut ctx = DeserializationContext::new();
        ctx.config_mut().debug.logger = logger.clone();
        ctx.config_mut().debug.logging = LoggingPolicy::LogWarningsAndErrors;
        let machine: Machine = deserialize_from_bytes(&bytes, format, Some(&mut ctx)).unwrap();
        assert_eq!(machine.label, "assembler");
        assert_eq!(machine.crafting_speed, 1.5);
    }
    // One type-name warning per load.
    assert_eq!(logger.warnings().len(), 2);
}

#[test]
fn unknown_json_members_are_skipped() {
    let text = r#"{"$type":"Point","x":1,"extra":{"$type":"Junk","deep":[1,2]},"y":2}"#;
    let point: Point = deserialize_from_bytes(text.as_bytes(), Format::Json, None).unwrap();
    assert_eq!(point, Point { x: 1, y: 2 });

    let mut strict_ctx = DeserializationContext::new();
    strict_ctx.config_mut().debug.error_handling = ErrorHandlingPolicy::ThrowOnWarnings;
    let err = deserialize_from_bytes::<Point>(text.as_bytes(), Format::Json, Some(&mut strict_ctx))
        .unwrap_err();
    assert!(matches!(err, CodecError::Warning(_)));
}

#[test]
fn missing_members_keep_defaults() {
    let nodes = vec![
        SerializationNode {
            name: String::new(),
            entry: EntryType::StartOfNode,
            data: "Point".into(),
        },
        SerializationNode {
            name: String::new(),
            entry: EntryType::EndOfNode,
            data: String::new(),
        },
    ];
    let point: Point = deserialize_from_nodes(&nodes, None).unwrap();
    assert_eq!(point, Point::default());
}

// ===========================================================================
// Test 10: Blobs and settings
// ===========================================================================

#[test]
fn settings_drive_blob_round_trip() {
    let settings = CodecSettings::from_toml_str(
        r#"
        format = "json"
        policy = "factorial.everything"
        "#,
    )
    .unwrap();
    let registry = PolicyRegistry::with_builtins();
    let logger = Arc::new(MemoryLogger::new());
    let config = settings.to_config(&registry, logger).unwrap();

    let mut player = Player::new(3, 4);
    player.score = 11;
    let blob = serialize_blob(&player, settings.format, config).unwrap();
    let (header, _) = read_blob_header(&blob).unwrap();
    assert_eq!(header.format, Format::Json);
    assert_eq!(header.policy_id, policy::EVERYTHING_ID);

    // The recorded policy brings the property back.
    let back: Player = deserialize_blob(&blob, &registry, None).unwrap();
    assert_eq!(back.score, 11);
}

#[test]
fn registry_rejects_duplicates() {
    let mut registry = PolicyRegistry::with_builtins();
    assert!(matches!(
        registry.register(policy::strict()),
        Err(CodecError::DuplicatePolicy(_))
    ));
}

// ===========================================================================
// Test 11: Errors are logged once at the facade
// ===========================================================================

#[test]
fn facade_reports_failures_to_logger() {
    let logger = Arc::new(MemoryLogger::new());
    let mut ctx = SerializationContext::with_config(SerializationConfig::with_policy(
        policy::strict(),
    ));
    ctx.config_mut().debug.logger = logger.clone();
    let err = serialize_to_bytes(&Scratch::new("x", 1), Format::Binary, Some(&mut ctx))
        .unwrap_err();
    assert!(matches!(err, CodecError::TypeNotAllowed { .. }));
    // One error from the formatter, one exception from the facade.
    assert_eq!(logger.records().len(), 2);
}

// ===========================================================================
// Test 12: Deep but legal nesting, and lying length prefixes
// ===========================================================================

#[derive(Debug, Default, PartialEq, Serializable)]
struct Chain {
    pub rank: u32,
    pub next: Option<Box<Chain>>,
}

fn chain(levels: u32) -> Chain {
    let mut head = Chain::default();
    for rank in 1..levels {
        head = Chain {
            rank,
            next: Some(Box::new(head)),
        };
    }
    head
}

#[test]
fn deep_chain_round_trips_in_every_format() {
    // Debug builds spend a lot of stack per nesting level.
    std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(|| {
            let value = chain(200);
            for format in [Format::Binary, Format::Json, Format::Nodes] {
                assert_eq!(round_trip(&value, format), value, "{format:?}");
            }
        })
        .unwrap()
        .join()
        .unwrap();
}

#[test]
fn declared_length_beyond_the_data_is_invalid() {
    // A string entry claiming 4 GiB of payload, followed by nothing.
    let mut bytes = vec![0x0E];
    bytes.extend_from_slice(&u32::MAX.to_le_bytes());
    let err = deserialize_from_bytes::<String>(&bytes, Format::Binary, None).unwrap_err();
    assert!(matches!(err, CodecError::InvalidData(_)), "{err:?}");

    // A well-formed stream still decodes afterwards.
    assert_eq!(round_trip(&"ore".to_owned(), Format::Binary), "ore");
}
