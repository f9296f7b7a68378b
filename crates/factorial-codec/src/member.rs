//! Static member metadata and the [`Reflect`] capability trait.
//!
//! Every serializable struct describes itself with a `'static` [`TypeInfo`]:
//! its declared members (fields and properties), an optional embedded base
//! type, and whether it is conventionally serializable. `#[derive(Serializable)]`
//! generates this table together with the accessor dispatch used by the
//! formatter, so no runtime reflection is needed.

use crate::data::{DataReader, DataWriter};
use crate::error::CodecError;

/// What kind of member a [`MemberInfo`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Field,
    Property,
    Method,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Private,
}

/// One declared member of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberInfo {
    pub name: &'static str,
    pub declaring_type: &'static str,
    pub kind: MemberKind,
    pub visibility: Visibility,
    /// Source-level type of the member's value.
    pub value_type: &'static str,
    /// Explicitly opted into serialization (`#[codec(serialize)]`).
    pub serialize: bool,
    /// Explicitly opted out of serialization (`#[codec(skip)]`).
    pub skip: bool,
    /// Names this member was saved under in older builds.
    pub former_names: &'static [&'static str],
}

impl MemberInfo {
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// Fields and properties hold a value; methods and events do not.
    pub fn holds_value(&self) -> bool {
        matches!(self.kind, MemberKind::Field | MemberKind::Property)
    }
}

/// Static description of a serializable type.
#[derive(Debug)]
pub struct TypeInfo {
    pub name: &'static str,
    /// The embedded base type, walked before this type's own members.
    pub base: Option<fn() -> &'static TypeInfo>,
    /// Own declared members in declaration order.
    pub members: &'static [MemberInfo],
    /// False for types that only the permissive policies may serialize.
    pub conventional: bool,
}

impl TypeInfo {
    pub fn base(&self) -> Option<&'static TypeInfo> {
        self.base.map(|base| base())
    }

    /// Position of `member` among this type's own members, by identity.
    pub fn own_member_index(&self, member: &MemberInfo) -> Option<usize> {
        self.members.iter().position(|m| std::ptr::eq(m, member))
    }
}

/// Member-level access to a struct.
///
/// `write_member`/`read_member` dispatch on the identity of `member`: a
/// member owned by this type is handled directly, anything else is handed
/// to the embedded base.
pub trait Reflect: Sized + 'static {
    fn type_info() -> &'static TypeInfo;

    fn write_member(
        &self,
        member: &MemberInfo,
        name: &str,
        writer: &mut dyn DataWriter,
    ) -> Result<(), CodecError>;

    fn read_member(
        &mut self,
        member: &MemberInfo,
        reader: &mut dyn DataReader,
    ) -> Result<(), CodecError>;
}

// ---------------------------------------------------------------------------
// SerializableMember
// ---------------------------------------------------------------------------

/// A member selected for serialization, possibly under an alias.
///
/// The alias `"{DeclaringType}+{name}"` is used when a member's simple name
/// was already taken by a member collected earlier in the hierarchy walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializableMember {
    info: &'static MemberInfo,
    alias: Option<String>,
}

impl SerializableMember {
    pub fn new(info: &'static MemberInfo) -> Self {
        Self { info, alias: None }
    }

    pub fn aliased(info: &'static MemberInfo) -> Self {
        Self {
            info,
            alias: Some(format!("{}+{}", info.declaring_type, info.name)),
        }
    }

    /// Name written to and looked up in the data.
    pub fn name(&self) -> &str {
        self.alias.as_deref().unwrap_or(self.info.name)
    }

    pub fn simple_name(&self) -> &'static str {
        self.info.name
    }

    pub fn is_aliased(&self) -> bool {
        self.alias.is_some()
    }

    pub fn declaring_type(&self) -> &'static str {
        self.info.declaring_type
    }

    pub fn info(&self) -> &'static MemberInfo {
        self.info
    }

    pub fn former_names(&self) -> &'static [&'static str] {
        self.info.former_names
    }

    /// The type of value this member holds.
    pub fn contained_type(&self) -> Result<&'static str, CodecError> {
        if self.info.holds_value() {
            Ok(self.info.value_type)
        } else {
            Err(CodecError::UnsupportedOperation(format!(
                "member '{}' is a {:?} and holds no value",
                self.name(),
                self.info.kind
            )))
        }
    }

    /// Write this member of `target`.
    pub fn write_value<T: Reflect>(
        &self,
        target: &T,
        writer: &mut dyn DataWriter,
    ) -> Result<(), CodecError> {
        self.ensure_holds_value()?;
        target.write_member(self.info, self.name(), writer)
    }

    /// Read the next entry into this member of `target`.
    pub fn read_value<T: Reflect>(
        &self,
        target: &mut T,
        reader: &mut dyn DataReader,
    ) -> Result<(), CodecError> {
        self.ensure_holds_value()?;
        target.read_member(self.info, reader)
    }

    fn ensure_holds_value(&self) -> Result<(), CodecError> {
        if self.info.holds_value() {
            Ok(())
        } else {
            Err(CodecError::UnsupportedMemberKind {
                member: self.name().to_owned(),
                kind: self.info.kind,
            })
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const FIELD: MemberInfo = MemberInfo {
        name: "health",
        declaring_type: "Player",
        kind: MemberKind::Field,
        visibility: Visibility::Private,
        value_type: "i32",
        serialize: true,
        skip: false,
        former_names: &["hp"],
    };

    const EVENT: MemberInfo = MemberInfo {
        name: "on_death",
        declaring_type: "Player",
        kind: MemberKind::Event,
        visibility: Visibility::Public,
        value_type: "()",
        serialize: false,
        skip: false,
        former_names: &[],
    };

    #[test]
    fn alias_is_qualified_by_declaring_type() {
        let plain = SerializableMember::new(&FIELD);
        let aliased = SerializableMember::aliased(&FIELD);
        assert_eq!(plain.name(), "health");
        assert!(!plain.is_aliased());
        assert_eq!(aliased.name(), "Player+health");
        assert_eq!(aliased.simple_name(), "health");
        assert!(aliased.is_aliased());
    }

    #[test]
    fn contained_type_of_field() {
        let member = SerializableMember::new(&FIELD);
        assert_eq!(member.contained_type().unwrap(), "i32");
        assert_eq!(member.former_names(), &["hp"]);
    }

    #[test]
    fn contained_type_of_event_is_unsupported() {
        let member = SerializableMember::new(&EVENT);
        assert!(matches!(
            member.contained_type(),
            Err(CodecError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            member.ensure_holds_value(),
            Err(CodecError::UnsupportedMemberKind {
                kind: MemberKind::Event,
                ..
            })
        ));
    }

    /// Hand-written reflection table mixing a field with members that hold
    /// no value. Only the field is dispatched.
    #[derive(Debug, Default, PartialEq)]
    struct Relay {
        signal: i32,
    }

    static RELAY_MEMBERS: [MemberInfo; 3] = [
        MemberInfo {
            name: "signal",
            declaring_type: "Relay",
            kind: MemberKind::Field,
            visibility: Visibility::Public,
            value_type: "i32",
            serialize: false,
            skip: false,
            former_names: &[],
        },
        MemberInfo {
            name: "on_trip",
            declaring_type: "Relay",
            kind: MemberKind::Event,
            visibility: Visibility::Public,
            value_type: "()",
            serialize: true,
            skip: false,
            former_names: &[],
        },
        MemberInfo {
            name: "reset",
            declaring_type: "Relay",
            kind: MemberKind::Method,
            visibility: Visibility::Public,
            value_type: "()",
            serialize: true,
            skip: false,
            former_names: &[],
        },
    ];

    static RELAY_INFO: TypeInfo = TypeInfo {
        name: "Relay",
        base: None,
        members: &RELAY_MEMBERS,
        conventional: true,
    };

    impl Reflect for Relay {
        fn type_info() -> &'static TypeInfo {
            &RELAY_INFO
        }

        fn write_member(
            &self,
            member: &MemberInfo,
            name: &str,
            writer: &mut dyn DataWriter,
        ) -> Result<(), CodecError> {
            match RELAY_INFO.own_member_index(member) {
                Some(0) => writer.write_int(Some(name), i64::from(self.signal)),
                _ => Err(CodecError::UnknownMember {
                    type_name: "Relay",
                    member: member.name.to_owned(),
                }),
            }
        }

        fn read_member(
            &mut self,
            member: &MemberInfo,
            reader: &mut dyn DataReader,
        ) -> Result<(), CodecError> {
            match RELAY_INFO.own_member_index(member) {
                Some(0) => {
                    let value = reader.read_int()?;
                    self.signal = i32::try_from(value)
                        .map_err(|_| CodecError::InvalidData(format!("{value} out of range")))?;
                    Ok(())
                }
                _ => Err(CodecError::UnknownMember {
                    type_name: "Relay",
                    member: member.name.to_owned(),
                }),
            }
        }
    }

    #[test]
    fn event_member_refuses_values_without_touching_the_data() {
        use crate::nodes::{NodeDataReader, NodeDataWriter};

        let event = SerializableMember::new(&RELAY_MEMBERS[1]);
        let mut relay = Relay { signal: 7 };

        let mut writer = NodeDataWriter::new(None);
        assert!(matches!(
            event.write_value(&relay, &mut writer),
            Err(CodecError::UnsupportedMemberKind {
                kind: MemberKind::Event,
                ..
            })
        ));
        assert!(writer.nodes().is_empty());

        let mut source = NodeDataWriter::new(None);
        source.write_int(Some("signal"), 3).unwrap();
        let nodes = source.into_nodes();
        let mut reader = NodeDataReader::new(&nodes, None);
        assert!(matches!(
            event.read_value(&mut relay, &mut reader),
            Err(CodecError::UnsupportedMemberKind {
                kind: MemberKind::Event,
                ..
            })
        ));
        assert_eq!(relay.signal, 7);
        assert_eq!(reader.read_int().unwrap(), 3);
    }

    #[test]
    fn methods_and_events_never_reach_the_formatter() {
        use crate::context::{SerializationConfig, SerializationContext};
        use crate::formatter::{read_struct, write_struct};
        use crate::nodes::{NodeDataReader, NodeDataWriter};
        use crate::policy;

        let mut context =
            SerializationContext::with_config(SerializationConfig::with_policy(policy::everything()));
        let mut writer = NodeDataWriter::new(Some(&mut context));
        write_struct(&Relay { signal: 11 }, None, &mut writer).unwrap();
        let nodes = writer.into_nodes();

        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["", "signal", ""]);

        let mut reader = NodeDataReader::new(&nodes, None);
        let back: Relay = read_struct(&mut reader).unwrap();
        assert_eq!(back, Relay { signal: 11 });
    }

    #[test]
    fn own_member_index_uses_identity() {
        static MEMBERS: [MemberInfo; 2] = [FIELD, EVENT];
        static INFO: TypeInfo = TypeInfo {
            name: "Player",
            base: None,
            members: &MEMBERS,
            conventional: true,
        };
        assert_eq!(INFO.own_member_index(&MEMBERS[1]), Some(1));
        // An equal value living elsewhere is a different member.
        assert_eq!(INFO.own_member_index(&FIELD), None);
        assert!(INFO.base().is_none());
    }
}
