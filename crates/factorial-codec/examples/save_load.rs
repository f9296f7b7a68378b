//! Save and load a small factory with the codec.
//!
//! Run with `RUST_LOG=debug cargo run --example save_load` to see member
//! resolution and blob diagnostics.

use std::sync::Arc;

use factorial_codec::header::{deserialize_blob, serialize_blob};
use factorial_codec::logger::MemoryLogger;
use factorial_codec::policy::PolicyRegistry;
use factorial_codec::settings::CodecSettings;
use factorial_codec::{
    CodecError, Format, HostRef, RwLock, Serializable, create_copy, deserialize_from_bytes,
    serialize_to_bytes,
};

#[derive(Debug, Default, Serializable)]
struct Building {
    pub kind: String,
    pub recipe: Option<String>,
    #[codec(serialize)]
    progress: f32,
    #[codec(skip)]
    pub hovered: bool,
    pub icon: HostRef<String>,
    pub outputs: Vec<Arc<RwLock<Building>>>,
}

#[derive(Debug, Default, Serializable)]
struct Factory {
    pub name: String,
    pub buildings: Vec<Arc<RwLock<Building>>>,
}

fn building(kind: &str, recipe: Option<&str>, icon: &HostRef<String>) -> Arc<RwLock<Building>> {
    Arc::new(RwLock::new(Building {
        kind: kind.to_owned(),
        recipe: recipe.map(str::to_owned),
        icon: icon.clone(),
        ..Building::default()
    }))
}

fn main() -> Result<(), CodecError> {
    env_logger::init();

    let icon = HostRef::new(String::from("sprites/machine.png"));
    let drill = building("drill", None, &icon);
    let furnace = building("furnace", Some("iron plate"), &icon);
    let assembler = building("assembler", Some("gear"), &icon);
    drill.write().outputs.push(Arc::clone(&furnace));
    furnace.write().outputs.push(Arc::clone(&assembler));
    furnace.write().progress = 0.4;

    let factory = Factory {
        name: "starter base".into(),
        buildings: vec![drill, Arc::clone(&furnace), assembler],
    };

    // JSON, readable.
    let json = serialize_to_bytes(&factory, Format::Json, None)?;
    println!("json: {}", String::from_utf8_lossy(&json));

    // Binary, compact. The furnace is written once and referenced after.
    let binary = serialize_to_bytes(&factory, Format::Binary, None)?;
    println!("binary: {} bytes (json {} bytes)", binary.len(), json.len());
    let loaded: Factory = deserialize_from_bytes(&binary, Format::Binary, None)?;
    let shared = Arc::ptr_eq(&loaded.buildings[0].read().outputs[0], &loaded.buildings[1]);
    println!("furnace still shared after load: {shared}");

    // Settings pick the format and policy; the blob records the policy.
    let settings = CodecSettings::from_toml_str(
        r#"
        format = "binary"
        policy = "factorial.strict"
        logging = "log_warnings_and_errors"
        "#,
    )?;
    let registry = PolicyRegistry::with_builtins();
    let logger = Arc::new(MemoryLogger::new());
    let config = settings.to_config(&registry, logger.clone())?;
    let blob = serialize_blob(&factory, settings.format, config)?;
    let strict: Factory = deserialize_blob(&blob, &registry, None)?;
    println!(
        "strict blob: {} bytes, {} buildings kept",
        blob.len(),
        strict.buildings.len()
    );

    // Deep copy: a new graph; the icon stays the same host object.
    let copy = create_copy(&furnace)?;
    copy.write().progress = 1.0;
    let same_icon = match (copy.read().icon.get(), furnace.read().icon.get()) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    };
    println!(
        "original progress {} / copy progress {}, icon shared: {same_icon}",
        furnace.read().progress,
        copy.read().progress
    );
    Ok(())
}
