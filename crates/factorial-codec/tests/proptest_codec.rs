//! Property-based tests for the Factorial codec.
//!
//! Uses proptest to generate random values, then verify that every format
//! round-trips them and that pooled buffers honor their capacity contract.

use std::collections::BTreeMap;

use factorial_codec::pool::{BufferPool, MIN_BUFFER_CAPACITY};
use factorial_codec::test_utils::*;
use factorial_codec::*;
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

fn arb_point() -> impl Strategy<Value = Point> {
    (any::<i32>(), any::<i32>()).prop_map(|(x, y)| Point { x, y })
}

fn arb_inventory() -> impl Strategy<Value = Inventory> {
    (
        proptest::collection::vec(proptest::option::of("\\PC{0,12}"), 0..8),
        proptest::collection::btree_map("[a-z ]{1,10}", any::<u32>(), 0..6),
        arb_point(),
        -1.0e12..1.0e12f64,
    )
        .prop_map(|(slots, counts, origin, ratio)| Inventory {
            slots,
            counts,
            origin,
            ratio,
        })
}

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

const FORMATS: [Format; 3] = [Format::Binary, Format::Json, Format::Nodes];

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// deserialize(serialize(v)) == v for points in every format.
    #[test]
    fn point_round_trips(point in arb_point()) {
        for format in FORMATS {
            prop_assert_eq!(round_trip(&point, format), point);
        }
    }

    /// Aggregates with strings, options, maps and floats round-trip.
    #[test]
    fn inventory_round_trips(inventory in arb_inventory()) {
        for format in FORMATS {
            prop_assert_eq!(&round_trip(&inventory, format), &inventory);
        }
    }

    /// Full integer ranges survive every format.
    #[test]
    fn integer_extremes_round_trip(signed in any::<i64>(), unsigned in any::<u64>()) {
        for format in FORMATS {
            prop_assert_eq!(round_trip(&signed, format), signed);
            prop_assert_eq!(round_trip(&unsigned, format), unsigned);
        }
    }

    /// Byte arrays are one entry, not a list of integers.
    #[test]
    fn byte_arrays_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..300)) {
        let value = ByteArray(bytes);
        for format in FORMATS {
            prop_assert_eq!(&round_trip(&value, format), &value);
        }
    }

    /// Deep copies equal the original.
    #[test]
    fn deep_copy_equals_original(inventory in arb_inventory()) {
        prop_assert_eq!(create_copy(&inventory).unwrap(), inventory);
    }

    /// Maps keyed by integers keep every entry.
    #[test]
    fn integer_keyed_maps(map in proptest::collection::btree_map(any::<i16>(), any::<bool>(), 0..20)) {
        for format in FORMATS {
            let back: BTreeMap<i16, bool> = round_trip(&map, format);
            prop_assert_eq!(&back, &map);
        }
    }

    /// A claimed buffer is never smaller than requested, and a freed buffer
    /// satisfies the next claim of the same size without allocating.
    #[test]
    fn pool_capacity_contract(request in 0usize..10_000) {
        let pool = BufferPool::<u8>::new();
        let capacity = {
            let buffer = pool.claim_at_least(request).unwrap();
            buffer.capacity().unwrap()
        };
        prop_assert!(capacity >= request);
        prop_assert!(capacity >= MIN_BUFFER_CAPACITY);
        prop_assert!(capacity.is_power_of_two());
        prop_assert_eq!(pool.free_count(), 1);

        let again = pool.claim_at_least(request).unwrap();
        prop_assert_eq!(again.capacity().unwrap(), capacity);
        prop_assert_eq!(pool.allocations(), 1);
    }
}
