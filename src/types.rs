//! FFI-compatible handle and result types

use std::ffi::CString;
use std::os::raw::{c_int, c_uint};
use std::sync::Mutex;

use crate::host_state::HostState;
use crate::session::Session;
use crate::statedb_types::FFIAddress;

/// Bridge session shared with the host.
///
/// The session sits behind a mutex so host threads sharing one handle are
/// serialized; the protocol cannot interleave two requests on a connection.
pub struct KevmSession {
    pub session: Mutex<Session<HostState, HostState>>,
    pub last_error: Mutex<Option<CString>>,
}

/// `CallOutcomeFFI::status` values.
pub const KEVM_STATUS_SUCCESS: c_int = 0;
/// The engine reported failure; nothing was committed to host state.
pub const KEVM_STATUS_EXECUTION_FAILED: c_int = 1;
/// Transport, codec, timeout or protocol failure. The session must be freed.
pub const KEVM_STATUS_FATAL: c_int = -1;

/// FFI-compatible outcome of `kevm_call` / `kevm_create`.
#[repr(C)]
pub struct CallOutcomeFFI {
    pub status: c_int,
    pub gas_left: u64,
    pub output_data: *mut u8,
    pub output_len: c_uint,
    /// Only meaningful when `has_created_address` is set.
    pub created_address: FFIAddress,
    pub has_created_address: bool,
}
