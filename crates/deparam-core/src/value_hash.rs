//! Deterministic structural hashing of parameter values and types.
//!
//! [`ValueHash`] is a 64-bit hash computed from the *shape* of a value or type
//! subtree, never from arena positions. Two structurally identical values bound
//! at different instantiation sites therefore hash identically, and the key
//! builder can collapse them to one value id.
//!
//! # Hash Computation
//!
//! Uses XXHash64 with per-node-kind domain constants, and mixes children with
//! position markers so that `[7:0] logic` and `[0:7] logic` differ.
//!
//! ```
//! use deparam_core::ValueHash;
//!
//! let a = ValueHash::of_str("logic [7:0]");
//! let b = ValueHash::of_str("logic [7:0]");
//! assert_eq!(a, b);
//! assert_ne!(a, ValueHash::of_str("logic [0:7]"));
//! ```

use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Domain-specific mixing constants for hash computation.
pub mod hash_constants {
    /// Separator constant between child positions
    pub const SEP: u64 = 0x4bc94d6bd06053ad;

    /// Domain marker for literal values
    pub const LITERAL: u64 = 0x2fac10b63a6cc57c;

    /// Domain marker for basic (built-in) types
    pub const BASIC_TYPE: u64 = 0x5ea77ffbcdf5f302;

    /// Domain marker for packed/unpacked arrays
    pub const ARRAY: u64 = 0x7d3c8b4a92e15f6d;

    /// Domain marker for struct/union types
    pub const AGGREGATE: u64 = 0x3e9f5d2a8c7b1403;

    /// Domain marker for class/interface references
    pub const REFERENCE: u64 = 0x9a7f3d5e2b8c4601;

    /// Domain marker for operators and other expression nodes
    pub const EXPR: u64 = 0x1a095090689d4647;

    /// Child position mixing constants.
    pub const CHILD_MARKERS: [u64; 8] = [
        0x9e3779b97f4a7c15,
        0xbf58476d1ce4e5b9,
        0x94d049bb133111eb,
        0xd6e8feb86659fd93,
        0xe7037ed1a0b428db,
        0xc6a4a7935bd1e995,
        0x8648dbbc94d49b8d,
        0xa2b48b2c69e0d657,
    ];
}

/// A deterministic 64-bit structural hash of a value or type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ValueHash(pub u64);

impl ValueHash {
    /// Empty hash constant.
    pub const EMPTY: ValueHash = ValueHash(0);

    /// Hash a value string alone.
    #[inline]
    pub fn of_str(text: &str) -> Self {
        ValueHash(xxh64(text.as_bytes(), 0))
    }

    /// Start a hash for a node of the given domain, seeded with its own label.
    #[inline]
    pub fn leaf(domain: u64, label: &str) -> Self {
        ValueHash(domain ^ xxh64(label.as_bytes(), 0))
    }

    /// Mix child hashes into `self`. Child order matters.
    #[inline]
    pub fn with_children(self, children: &[ValueHash]) -> Self {
        let mut hash = self.0;
        for (i, child) in children.iter().enumerate() {
            let marker = hash_constants::CHILD_MARKERS
                .get(i)
                .copied()
                .unwrap_or_else(|| hash_constants::CHILD_MARKERS[0].wrapping_add(i as u64));
            hash = hash.wrapping_mul(hash_constants::SEP).wrapping_add(marker ^ child.0);
        }
        ValueHash(hash)
    }

    /// Mix an extra string into the hash (used to fold the value string in).
    #[inline]
    pub fn with_str(self, text: &str) -> Self {
        self.with_children(&[ValueHash::of_str(text)])
    }

    /// Get the underlying u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ValueHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueHash({:#018x})", self.0)
    }
}

impl fmt::Display for ValueHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
