//! Member resolution: which members of a type a policy serializes, and
//! under which names.
//!
//! Resolution walks the embedded base chain first, then the type's own
//! fields and properties in declaration order, keeping those the policy
//! accepts. A member whose simple name was already collected is aliased as
//! `"{DeclaringType}+{name}"`. The name map additionally maps every former
//! name to its member, never overwriting an existing entry, so renamed
//! fields keep loading from old saves.
//!
//! Results are cached per (policy instance, type) in concurrent maps and
//! never evicted. Two policies sharing an id string are still distinct
//! cache keys.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::member::{Reflect, SerializableMember, TypeInfo};
use crate::policy::{PolicyRef, SerializationPolicy};

/// Ordered members of a type under one policy.
pub type MemberList = Arc<[SerializableMember]>;

/// Name (current, aliased or former) to member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberMap {
    by_name: HashMap<String, SerializableMember>,
}

impl MemberMap {
    pub fn get(&self, name: &str) -> Option<&SerializableMember> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    policy: usize,
    type_info: usize,
}

impl CacheKey {
    fn new(type_info: &'static TypeInfo, policy: &PolicyRef) -> Self {
        Self {
            policy: Arc::as_ptr(policy).cast::<()>() as usize,
            type_info: std::ptr::from_ref(type_info) as usize,
        }
    }
}

/// Process-lifetime cache of resolved members.
#[derive(Debug, Default)]
pub struct MemberResolver {
    lists: DashMap<CacheKey, MemberList>,
    maps: DashMap<CacheKey, Arc<MemberMap>>,
    // Keeps every keyed policy alive so its address is never reused.
    pinned: DashMap<usize, PolicyRef>,
}

impl MemberResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The resolver used by the formatter.
    pub fn global() -> &'static MemberResolver {
        static RESOLVER: OnceLock<MemberResolver> = OnceLock::new();
        RESOLVER.get_or_init(MemberResolver::new)
    }

    /// Ordered serializable members of `type_info` under `policy`.
    pub fn get_members(&self, type_info: &'static TypeInfo, policy: &PolicyRef) -> MemberList {
        let key = CacheKey::new(type_info, policy);
        if let Some(hit) = self.lists.get(&key) {
            return Arc::clone(hit.value());
        }
        self.pin(key, policy);
        let entry = self.lists.entry(key).or_insert_with(|| {
            log::debug!(
                "resolving members of '{}' under policy '{}'",
                type_info.name,
                policy.id()
            );
            let mut members = Vec::new();
            collect_members(type_info, policy.as_ref(), &mut members);
            members.into()
        });
        Arc::clone(entry.value())
    }

    /// Name-to-member map of `type_info` under `policy`, including former
    /// names.
    pub fn get_member_map(&self, type_info: &'static TypeInfo, policy: &PolicyRef) -> Arc<MemberMap> {
        let key = CacheKey::new(type_info, policy);
        if let Some(hit) = self.maps.get(&key) {
            return Arc::clone(hit.value());
        }
        let members = self.get_members(type_info, policy);
        let entry = self
            .maps
            .entry(key)
            .or_insert_with(|| Arc::new(build_member_map(&members)));
        Arc::clone(entry.value())
    }

    pub fn members_of<T: Reflect>(&self, policy: &PolicyRef) -> MemberList {
        self.get_members(T::type_info(), policy)
    }

    pub fn member_map_of<T: Reflect>(&self, policy: &PolicyRef) -> Arc<MemberMap> {
        self.get_member_map(T::type_info(), policy)
    }

    /// Number of cached member lists.
    pub fn cached_types(&self) -> usize {
        self.lists.len()
    }

    fn pin(&self, key: CacheKey, policy: &PolicyRef) {
        self.pinned
            .entry(key.policy)
            .or_insert_with(|| Arc::clone(policy));
    }
}

fn collect_members(
    type_info: &'static TypeInfo,
    policy: &dyn SerializationPolicy,
    members: &mut Vec<SerializableMember>,
) {
    if let Some(base) = type_info.base() {
        collect_members(base, policy, members);
    }
    for info in type_info.members {
        if !info.holds_value() || !policy.should_serialize_member(info) {
            continue;
        }
        if members.iter().any(|m| m.name() == info.name) {
            log::debug!(
                "member '{}.{}' collides with an inherited member; aliasing",
                info.declaring_type,
                info.name
            );
            members.push(SerializableMember::aliased(info));
        } else {
            members.push(SerializableMember::new(info));
        }
    }
}

fn build_member_map(members: &[SerializableMember]) -> MemberMap {
    let mut by_name = HashMap::with_capacity(members.len());
    for member in members {
        by_name
            .entry(member.name().to_owned())
            .or_insert_with(|| member.clone());
    }
    for member in members {
        for former in member.former_names() {
            by_name
                .entry((*former).to_owned())
                .or_insert_with(|| member.clone());
        }
    }
    MemberMap { by_name }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::{MemberInfo, MemberKind, Visibility};
    use crate::policy::{self, CustomSerializationPolicy};

    const fn field(
        name: &'static str,
        declaring_type: &'static str,
        visibility: Visibility,
        former_names: &'static [&'static str],
    ) -> MemberInfo {
        MemberInfo {
            name,
            declaring_type,
            kind: MemberKind::Field,
            visibility,
            value_type: "i32",
            serialize: false,
            skip: false,
            former_names,
        }
    }

    static BUILDING_MEMBERS: [MemberInfo; 2] = [
        field("x", "Building", Visibility::Private, &[]),
        field("label", "Building", Visibility::Public, &["name"]),
    ];
    static BUILDING: TypeInfo = TypeInfo {
        name: "Building",
        base: None,
        members: &BUILDING_MEMBERS,
        conventional: true,
    };

    static FURNACE_MEMBERS: [MemberInfo; 4] = [
        field("x", "Furnace", Visibility::Private, &[]),
        field("fuel", "Furnace", Visibility::Public, &["label", "coal"]),
        MemberInfo {
            kind: MemberKind::Method,
            ..field("ignite", "Furnace", Visibility::Public, &[])
        },
        MemberInfo {
            kind: MemberKind::Property,
            ..field("heat", "Furnace", Visibility::Public, &["coal"])
        },
    ];
    static FURNACE: TypeInfo = TypeInfo {
        name: "Furnace",
        base: Some(building_info),
        members: &FURNACE_MEMBERS,
        conventional: true,
    };

    fn building_info() -> &'static TypeInfo {
        &BUILDING
    }

    fn names(list: &MemberList) -> Vec<&str> {
        list.iter().map(SerializableMember::name).collect()
    }

    // Test 1: base_members_come_first
    #[test]
    fn base_members_come_first() {
        let resolver = MemberResolver::new();
        let members = resolver.get_members(&FURNACE, &policy::everything());
        assert_eq!(names(&members), vec!["x", "label", "Furnace+x", "fuel", "heat"]);
    }

    // Test 2: private_collision_produces_two_entries
    #[test]
    fn private_collision_produces_two_entries() {
        let resolver = MemberResolver::new();
        let members = resolver.get_members(&FURNACE, &policy::everything());
        let xs: Vec<_> = members.iter().filter(|m| m.simple_name() == "x").collect();
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[0].declaring_type(), "Building");
        assert!(!xs[0].is_aliased());
        assert!(xs[1].is_aliased());
        assert_eq!(xs[1].name(), "Furnace+x");
    }

    // Test 3: second_call_hits_cache
    #[test]
    fn second_call_hits_cache() {
        let resolver = MemberResolver::new();
        let everything = policy::everything();
        let first = resolver.get_members(&FURNACE, &everything);
        let second = resolver.get_members(&FURNACE, &everything);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
        assert_eq!(resolver.cached_types(), 1);

        let map_a = resolver.get_member_map(&FURNACE, &everything);
        let map_b = resolver.get_member_map(&FURNACE, &everything);
        assert!(Arc::ptr_eq(&map_a, &map_b));
    }

    // Test 4: policy_filters_members
    #[test]
    fn policy_filters_members() {
        let resolver = MemberResolver::new();
        let conventional = resolver.get_members(&FURNACE, &policy::conventional());
        // Private fields and the property are not conventional; the method
        // never is.
        assert_eq!(names(&conventional), vec!["label", "fuel"]);

        let strict = resolver.get_members(&FURNACE, &policy::strict());
        assert!(strict.is_empty());
    }

    // Test 5: former_names_never_overwrite
    #[test]
    fn former_names_never_overwrite() {
        let resolver = MemberResolver::new();
        let map = resolver.get_member_map(&FURNACE, &policy::everything());
        // "label" is a current member name; fuel's former name loses.
        assert_eq!(map.get("label").unwrap().declaring_type(), "Building");
        assert_eq!(map.get("label").unwrap().simple_name(), "label");
        // "name" is a former name of Building.label.
        assert_eq!(map.get("name").unwrap().simple_name(), "label");
        // Both fuel and heat claim "coal"; fuel was first.
        assert_eq!(map.get("coal").unwrap().simple_name(), "fuel");
        assert_eq!(map.get("Furnace+x").unwrap().declaring_type(), "Furnace");
        assert!(!map.contains("ignite"));
        assert_eq!(map.len(), 7);
    }

    // Test 6: same_id_distinct_instances_are_distinct_keys
    #[test]
    fn same_id_distinct_instances_are_distinct_keys() {
        let resolver = MemberResolver::new();
        let a = CustomSerializationPolicy::new("dup", true, |m| m.is_public())
            .unwrap()
            .into_ref();
        let b = CustomSerializationPolicy::new("dup", true, |_| true)
            .unwrap()
            .into_ref();
        let with_a = resolver.get_members(&FURNACE, &a);
        let with_b = resolver.get_members(&FURNACE, &b);
        assert_eq!(with_a.len(), 3);
        assert_eq!(with_b.len(), 5);
        assert_eq!(resolver.cached_types(), 2);
    }

    // Test 7: concurrent_resolution_is_stable
    #[test]
    fn concurrent_resolution_is_stable() {
        let resolver = MemberResolver::new();
        let everything = policy::everything();
        let results: Vec<MemberList> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| resolver.get_members(&FURNACE, &everything)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for list in &results {
            assert!(Arc::ptr_eq(list, &results[0]));
        }
    }
}
