//! `HostState` – [`StateAdapter`] implementation backed by the host's state DB
//! via FFI callbacks.
//!
//! The host hands us a table of `extern "C"` function pointers plus an opaque
//! handle (`usize`) identifying its state object. All heavy lifting is
//! delegated to the callbacks; this type only converts values across the
//! boundary.

use std::ptr;
use std::slice;

use libc::{c_void, free};
use revm::primitives::{Address, Bytes, Log, B256, U256};

use crate::state::{BlockHashResolver, StateAdapter};
use crate::statedb_types::{FFIAddress, FFIHash, FFIU256};

/// Callback table supplied by the host. Every entry receives the host handle first.
///
/// `get_code` must write a `malloc`-allocated buffer (or null) into `out_ptr`;
/// the bridge releases it with `free`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct HostCallbacks {
    pub create_account: extern "C" fn(handle: usize, addr: FFIAddress),
    pub get_balance: extern "C" fn(handle: usize, addr: FFIAddress) -> FFIU256,
    pub add_balance: extern "C" fn(handle: usize, addr: FFIAddress, amount: FFIU256),
    pub sub_balance: extern "C" fn(handle: usize, addr: FFIAddress, amount: FFIU256),
    pub get_nonce: extern "C" fn(handle: usize, addr: FFIAddress) -> u64,
    pub set_nonce: extern "C" fn(handle: usize, addr: FFIAddress, nonce: u64),
    pub get_code: extern "C" fn(handle: usize, addr: FFIAddress, out_ptr: *mut *mut u8, out_len: *mut u32),
    pub set_code: extern "C" fn(handle: usize, addr: FFIAddress, code: *const u8, code_len: u32),
    pub get_code_hash: extern "C" fn(handle: usize, addr: FFIAddress) -> FFIHash,
    pub get_code_size: extern "C" fn(handle: usize, addr: FFIAddress) -> u32,
    pub get_state: extern "C" fn(handle: usize, addr: FFIAddress, key: FFIHash) -> FFIHash,
    pub set_state: extern "C" fn(handle: usize, addr: FFIAddress, key: FFIHash, value: FFIHash),
    pub exist: extern "C" fn(handle: usize, addr: FFIAddress) -> bool,
    pub empty: extern "C" fn(handle: usize, addr: FFIAddress) -> bool,
    pub remove: extern "C" fn(handle: usize, addr: FFIAddress) -> bool,
    pub add_refund: extern "C" fn(handle: usize, gas: u64),
    pub add_log: extern "C" fn(
        handle: usize,
        addr: FFIAddress,
        topics: *const FFIHash,
        topics_len: u32,
        data: *const u8,
        data_len: u32,
    ),
    pub block_hash: extern "C" fn(handle: usize, distance: u64) -> FFIHash,
}

/// Host state DB seen through its callback table.
#[derive(Clone, Copy)]
pub struct HostState {
    callbacks: HostCallbacks,
    handle: usize,
}

impl HostState {
    /// `handle` must stay valid on the host side for as long as this value is used.
    pub fn new(callbacks: HostCallbacks, handle: usize) -> Self {
        Self { callbacks, handle }
    }

    pub fn handle(&self) -> usize {
        self.handle
    }

    /// Point subsequent calls at a different host state object (e.g. the next block's).
    pub fn set_handle(&mut self, handle: usize) {
        self.handle = handle;
    }
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

impl StateAdapter for HostState {
    fn create_account(&mut self, addr: Address) {
        (self.callbacks.create_account)(self.handle, addr.into())
    }

    fn get_balance(&self, addr: Address) -> U256 {
        (self.callbacks.get_balance)(self.handle, addr.into()).into()
    }

    fn add_balance(&mut self, addr: Address, amount: U256) {
        (self.callbacks.add_balance)(self.handle, addr.into(), amount.into())
    }

    fn sub_balance(&mut self, addr: Address, amount: U256) {
        (self.callbacks.sub_balance)(self.handle, addr.into(), amount.into())
    }

    fn get_nonce(&self, addr: Address) -> u64 {
        (self.callbacks.get_nonce)(self.handle, addr.into())
    }

    fn set_nonce(&mut self, addr: Address, nonce: u64) {
        (self.callbacks.set_nonce)(self.handle, addr.into(), nonce)
    }

    fn get_code(&self, addr: Address) -> Bytes {
        let mut out_ptr: *mut u8 = ptr::null_mut();
        let mut out_len: u32 = 0;
        (self.callbacks.get_code)(self.handle, addr.into(), &mut out_ptr, &mut out_len);
        if out_ptr.is_null() {
            return Bytes::new();
        }
        // SAFETY: the host promised a malloc'd buffer of `out_len` bytes.
        let code = unsafe { Bytes::copy_from_slice(slice::from_raw_parts(out_ptr, out_len as usize)) };
        unsafe { free(out_ptr as *mut c_void) };
        code
    }

    fn set_code(&mut self, addr: Address, code: Bytes) {
        (self.callbacks.set_code)(self.handle, addr.into(), code.as_ptr(), len_u32(code.len()))
    }

    fn get_code_hash(&self, addr: Address) -> B256 {
        (self.callbacks.get_code_hash)(self.handle, addr.into()).into()
    }

    fn get_code_size(&self, addr: Address) -> usize {
        (self.callbacks.get_code_size)(self.handle, addr.into()) as usize
    }

    fn get_state(&self, addr: Address, key: B256) -> B256 {
        (self.callbacks.get_state)(self.handle, addr.into(), key.into()).into()
    }

    fn set_state(&mut self, addr: Address, key: B256, value: B256) {
        (self.callbacks.set_state)(self.handle, addr.into(), key.into(), value.into())
    }

    fn exist(&self, addr: Address) -> bool {
        (self.callbacks.exist)(self.handle, addr.into())
    }

    fn empty(&self, addr: Address) -> bool {
        (self.callbacks.empty)(self.handle, addr.into())
    }

    fn remove(&mut self, addr: Address) -> bool {
        (self.callbacks.remove)(self.handle, addr.into())
    }

    fn add_refund(&mut self, gas: u64) {
        (self.callbacks.add_refund)(self.handle, gas)
    }

    fn add_log(&mut self, log: Log) {
        let topics: Vec<FFIHash> = log.data.topics().iter().map(|t| FFIHash::from(*t)).collect();
        let data = &log.data.data;
        (self.callbacks.add_log)(
            self.handle,
            log.address.into(),
            topics.as_ptr(),
            len_u32(topics.len()),
            data.as_ptr(),
            len_u32(data.len()),
        )
    }
}

impl BlockHashResolver for HostState {
    fn hash(&self, distance: u64) -> B256 {
        (self.callbacks.block_hash)(self.handle, distance).into()
    }
}

// ---------------------------------------------------------------------------
//  Mock host used by unit tests here and in lib.rs
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod mock {
    //! Callbacks backed by a thread-local [`MemoryState`]. The handle is ignored.

    use super::*;
    use crate::state::MemoryState;
    use std::cell::RefCell;

    thread_local! {
        pub(crate) static HOST: RefCell<MemoryState> = RefCell::new(MemoryState::new());
    }

    pub(crate) fn reset(state: MemoryState) {
        HOST.with(|h| *h.borrow_mut() = state);
    }

    pub(crate) fn with<T>(f: impl FnOnce(&mut MemoryState) -> T) -> T {
        HOST.with(|h| f(&mut h.borrow_mut()))
    }

    extern "C" fn create_account(_: usize, addr: FFIAddress) {
        with(|s| s.create_account(addr.into()))
    }
    extern "C" fn get_balance(_: usize, addr: FFIAddress) -> FFIU256 {
        with(|s| s.get_balance(addr.into()).into())
    }
    extern "C" fn add_balance(_: usize, addr: FFIAddress, amount: FFIU256) {
        with(|s| s.add_balance(addr.into(), amount.into()))
    }
    extern "C" fn sub_balance(_: usize, addr: FFIAddress, amount: FFIU256) {
        with(|s| s.sub_balance(addr.into(), amount.into()))
    }
    extern "C" fn get_nonce(_: usize, addr: FFIAddress) -> u64 {
        with(|s| s.get_nonce(addr.into()))
    }
    extern "C" fn set_nonce(_: usize, addr: FFIAddress, nonce: u64) {
        with(|s| s.set_nonce(addr.into(), nonce))
    }
    extern "C" fn get_code(_: usize, addr: FFIAddress, out_ptr: *mut *mut u8, out_len: *mut u32) {
        let code = with(|s| s.get_code(addr.into()));
        unsafe {
            if code.is_empty() {
                *out_ptr = ptr::null_mut();
                *out_len = 0;
                return;
            }
            let buf = libc::malloc(code.len()) as *mut u8;
            ptr::copy_nonoverlapping(code.as_ptr(), buf, code.len());
            *out_ptr = buf;
            *out_len = code.len() as u32;
        }
    }
    extern "C" fn set_code(_: usize, addr: FFIAddress, code: *const u8, code_len: u32) {
        let code = if code.is_null() {
            Bytes::new()
        } else {
            Bytes::copy_from_slice(unsafe { slice::from_raw_parts(code, code_len as usize) })
        };
        with(|s| s.set_code(addr.into(), code))
    }
    extern "C" fn get_code_hash(_: usize, addr: FFIAddress) -> FFIHash {
        with(|s| s.get_code_hash(addr.into()).into())
    }
    extern "C" fn get_code_size(_: usize, addr: FFIAddress) -> u32 {
        with(|s| s.get_code_size(addr.into()) as u32)
    }
    extern "C" fn get_state(_: usize, addr: FFIAddress, key: FFIHash) -> FFIHash {
        with(|s| s.get_state(addr.into(), key.into()).into())
    }
    extern "C" fn set_state(_: usize, addr: FFIAddress, key: FFIHash, value: FFIHash) {
        with(|s| s.set_state(addr.into(), key.into(), value.into()))
    }
    extern "C" fn exist(_: usize, addr: FFIAddress) -> bool {
        with(|s| s.exist(addr.into()))
    }
    extern "C" fn empty(_: usize, addr: FFIAddress) -> bool {
        with(|s| s.empty(addr.into()))
    }
    extern "C" fn remove(_: usize, addr: FFIAddress) -> bool {
        with(|s| s.remove(addr.into()))
    }
    extern "C" fn add_refund(_: usize, gas: u64) {
        with(|s| s.add_refund(gas))
    }
    extern "C" fn add_log(
        _: usize,
        addr: FFIAddress,
        topics: *const FFIHash,
        topics_len: u32,
        data: *const u8,
        data_len: u32,
    ) {
        let topics: Vec<B256> = if topics_len == 0 {
            Vec::new()
        } else {
            unsafe { slice::from_raw_parts(topics, topics_len as usize) }
                .iter()
                .map(|t| B256::from(*t))
                .collect()
        };
        let data = if data_len == 0 {
            Bytes::new()
        } else {
            Bytes::copy_from_slice(unsafe { slice::from_raw_parts(data, data_len as usize) })
        };
        with(|s| s.add_log(Log::new_unchecked(addr.into(), topics, data)))
    }
    pub(crate) extern "C" fn block_hash(_: usize, distance: u64) -> FFIHash {
        FFIHash { bytes: B256::with_last_byte(distance as u8).0 }
    }

    pub(crate) fn callbacks() -> HostCallbacks {
        HostCallbacks {
            create_account,
            get_balance,
            add_balance,
            sub_balance,
            get_nonce,
            set_nonce,
            get_code,
            set_code,
            get_code_hash,
            get_code_size,
            get_state,
            set_state,
            exist,
            empty,
            remove,
            add_refund,
            add_log,
            block_hash,
        }
    }
}
