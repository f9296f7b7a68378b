//! Runtime detection of unaligned memory access support.
//!
//! The binary codec reads and writes multi-byte primitives at arbitrary
//! offsets of its scratch buffer. On platforms known to handle unaligned
//! access in hardware it uses `ptr::read_unaligned` / `ptr::write_unaligned`
//! directly; everywhere else it goes through explicit little-endian byte
//! conversion. Both paths produce identical bytes.
//!
//! Detection happens once per process. A platform must be on a compile-time
//! allow-list (little-endian x86, x86_64 or aarch64) and pass a self-check
//! that reads an `f32` at four offsets of an 8-byte scratch region and
//! compares the result with the byte-wise decode. A mismatch only turns the
//! fast path off.
//!
//! The allow-list is what keeps the check safe. An alignment fault is a
//! signal, not a panic, so it could not be caught here; off the allow-list
//! the unaligned read is never attempted.

use std::sync::OnceLock;

/// Whether the current target is a candidate for the unaligned fast path.
pub const PLATFORM_ALLOW_LISTED: bool = cfg!(all(
    target_endian = "little",
    any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")
));

/// Capability flags consulted by the binary codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchitectureCapabilities {
    /// Unaligned 32-bit float reads are safe and fast.
    pub unaligned_f32_reads: bool,
    /// All unaligned multi-byte reads and writes are safe and fast.
    pub unaligned_reads_writes: bool,
}

impl ArchitectureCapabilities {
    /// Byte-wise everywhere.
    pub const CONSERVATIVE: Self = Self {
        unaligned_f32_reads: false,
        unaligned_reads_writes: false,
    };

    /// Run the allow-list check and the self-check.
    pub fn detect() -> Self {
        if !PLATFORM_ALLOW_LISTED {
            log::debug!("unaligned access fast path disabled: platform not allow-listed");
            return Self::CONSERVATIVE;
        }
        let supported = unaligned_f32_matches_bytes();
        if !supported {
            log::debug!("unaligned access fast path disabled: unaligned reads disagree with byte-wise decode");
        }
        Self {
            unaligned_f32_reads: supported,
            unaligned_reads_writes: supported,
        }
    }
}

/// The process-wide capabilities, computed on first use.
pub fn capabilities() -> &'static ArchitectureCapabilities {
    static CAPABILITIES: OnceLock<ArchitectureCapabilities> = OnceLock::new();
    CAPABILITIES.get_or_init(ArchitectureCapabilities::detect)
}

fn unaligned_f32_matches_bytes() -> bool {
    // 1.0f32 twice, little-endian.
    let scratch: [u8; 8] = [0x00, 0x00, 0x80, 0x3F, 0x00, 0x00, 0x80, 0x3F];
    (0..4).all(|offset| {
        let bytes = &scratch[offset..offset + 4];
        // SAFETY: `bytes` holds four initialized bytes and
        // `read_unaligned` has no alignment requirement.
        let fast = unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<f32>()) };
        let slow = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        fast.to_bits() == slow.to_bits()
    })
}

// ---------------------------------------------------------------------------
// Endian-explicit primitive access
// ---------------------------------------------------------------------------

macro_rules! integer_access {
    ($($write:ident, $read:ident, $ty:ty;)*) => {
        $(
            /// Write `value` little-endian into the first bytes of `dst`.
            #[inline]
            pub fn $write(dst: &mut [u8], value: $ty, caps: &ArchitectureCapabilities) {
                const LEN: usize = std::mem::size_of::<$ty>();
                let dst = &mut dst[..LEN];
                if caps.unaligned_reads_writes {
                    // SAFETY: `dst` is exactly LEN bytes long and
                    // `write_unaligned` has no alignment requirement.
                    unsafe { std::ptr::write_unaligned(dst.as_mut_ptr().cast::<$ty>(), value.to_le()) }
                } else {
                    dst.copy_from_slice(&value.to_le_bytes());
                }
            }

            /// Read a little-endian value from the first bytes of `src`.
            #[inline]
            pub fn $read(src: &[u8], caps: &ArchitectureCapabilities) -> $ty {
                const LEN: usize = std::mem::size_of::<$ty>();
                let src = &src[..LEN];
                if caps.unaligned_reads_writes {
                    // SAFETY: `src` is exactly LEN initialized bytes and
                    // `read_unaligned` has no alignment requirement.
                    <$ty>::from_le(unsafe { std::ptr::read_unaligned(src.as_ptr().cast::<$ty>()) })
                } else {
                    let mut raw = [0u8; LEN];
                    raw.copy_from_slice(src);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

integer_access! {
    write_u16, read_u16, u16;
    write_u32, read_u32, u32;
    write_u64, read_u64, u64;
}

#[inline]
pub fn write_f32(dst: &mut [u8], value: f32, caps: &ArchitectureCapabilities) {
    write_u32(dst, value.to_bits(), caps);
}

#[inline]
pub fn read_f32(src: &[u8], caps: &ArchitectureCapabilities) -> f32 {
    if caps.unaligned_f32_reads {
        let src = &src[..4];
        // SAFETY: four initialized bytes; the flag is only set on
        // little-endian targets where the native layout matches the wire.
        unsafe { std::ptr::read_unaligned(src.as_ptr().cast::<f32>()) }
    } else {
        f32::from_bits(read_u32(src, caps))
    }
}

#[inline]
pub fn write_f64(dst: &mut [u8], value: f64, caps: &ArchitectureCapabilities) {
    write_u64(dst, value.to_bits(), caps);
}

#[inline]
pub fn read_f64(src: &[u8], caps: &ArchitectureCapabilities) -> f64 {
    f64::from_bits(read_u64(src, caps))
}

// ===========================================================================
// Tests
// ===========================================================================
