//! FFI-friendly value types shared with the host's state callbacks.
//!
//! These types are the only "wire" format shared between Go <-> C (CGO) <-> Rust.
//! They MUST remain stable – **do not** change their memory layout without bumping
//! the crate major version and updating the host side.
//!
//! All structs use `#[repr(C)]` and plain value fields so that they can cross
//! the FFI boundary by value.

use revm::primitives::{Address, B256, U256};

/// 160-bit account address (20 raw bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FFIAddress {
    pub bytes: [u8; 20],
}

/// 256-bit hash (storage key/value, code hash, block hash).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FFIHash {
    pub bytes: [u8; 32],
}

/// 256-bit unsigned integer (big-endian byte order).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FFIU256 {
    pub bytes: [u8; 32],
}

impl From<Address> for FFIAddress {
    fn from(addr: Address) -> Self {
        Self { bytes: addr.0 .0 }
    }
}

impl From<FFIAddress> for Address {
    fn from(addr: FFIAddress) -> Self {
        Address::new(addr.bytes)
    }
}

impl From<B256> for FFIHash {
    fn from(hash: B256) -> Self {
        Self { bytes: hash.0 }
    }
}

impl From<FFIHash> for B256 {
    fn from(hash: FFIHash) -> Self {
        B256::new(hash.bytes)
    }
}

impl From<U256> for FFIU256 {
    fn from(value: U256) -> Self {
        Self { bytes: value.to_be_bytes() }
    }
}

impl From<FFIU256> for U256 {
    fn from(value: FFIU256) -> Self {
        U256::from_be_bytes(value.bytes)
    }
}

// ---------------------------------------------------------------------------
//  Layout assertions – these prevent silent ABI breakage.
// ---------------------------------------------------------------------------
