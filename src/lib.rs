//! Client-side bridge to an out-of-process execution engine.
//!
//! The host keeps all account and storage state. For every call or contract
//! creation it sends a self-contained request to the engine over one
//! persistent connection; while executing, the engine queries the host for
//! accounts, code, storage and block hashes, and finally returns a state diff
//! that is reconciled into the host's store.
//!
//! Rust hosts use [`Session`] directly with any [`StateAdapter`]. Other
//! languages (Go via CGO) use the C ABI below, supplying their state DB as a
//! [`HostCallbacks`] table.
//!
//! # Safety
//!
//! All FFI functions are `unsafe` and require careful handling of memory and
//! pointer lifetimes. Results must be released with [`kevm_free_outcome`],
//! sessions with [`kevm_session_free`].

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_uint};
use std::ptr;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, error};

mod codec;
mod config;
mod error;
mod host_state;
mod messages;
mod reconcile;
mod session;
mod state;
mod statedb_types;
mod transport;
mod types;
mod utils;

pub use codec::*;
pub use config::*;
pub use error::*;
pub use host_state::*;
pub use messages::*;
pub use reconcile::*;
pub use session::*;
pub use state::*;
pub use statedb_types::*;
pub use transport::*;
pub use types::*;
pub use utils::*;

unsafe fn connect_impl(
    endpoint: *const c_char,
    chain: ChainConfig,
    read_timeout_ms: u64,
    callbacks: *const HostCallbacks,
    host_handle: usize,
) -> anyhow::Result<KevmSession> {
    if callbacks.is_null() {
        anyhow::bail!("Null callback table");
    }
    let mut config = BridgeConfig::from_env()?;
    if !endpoint.is_null() {
        config.endpoint = c_str_to_string(endpoint)?.parse()?;
    }
    if read_timeout_ms > 0 {
        config.read_timeout = Some(Duration::from_millis(read_timeout_ms));
    }

    let host = HostState::new(*callbacks, host_handle);
    let session = Session::connect(&config, &chain, host, host)?;
    Ok(KevmSession { session: Mutex::new(session), last_error: Mutex::new(None) })
}

/// Connect to the engine and perform the handshake.
///
/// `endpoint` may be null to use `KEVM_ENDPOINT` or the default. `read_timeout_ms == 0`
/// keeps the configured deadline. Returns null on failure.
#[no_mangle]
pub unsafe extern "C" fn kevm_session_connect(
    endpoint: *const c_char,
    chain_config_json: *const c_char,
    read_timeout_ms: u64,
    callbacks: *const HostCallbacks,
    host_handle: usize,
) -> *mut KevmSession {
    let chain = match c_str_to_string(chain_config_json).and_then(|json| Ok(ChainConfig::from_json(&json)?)) {
        Ok(chain) => chain,
        Err(e) => {
            error!("invalid chain config: {e:#}");
            return ptr::null_mut();
        }
    };
    match connect_impl(endpoint, chain, read_timeout_ms, callbacks, host_handle) {
        Ok(session) => Box::into_raw(Box::new(session)),
        Err(e) => {
            error!("failed to open engine session: {e:#}");
            ptr::null_mut()
        }
    }
}

/// Connect using a predefined chain configuration.
#[no_mangle]
pub unsafe extern "C" fn kevm_session_connect_preset(
    endpoint: *const c_char,
    preset: ChainPreset,
    read_timeout_ms: u64,
    callbacks: *const HostCallbacks,
    host_handle: usize,
) -> *mut KevmSession {
    match connect_impl(endpoint, ChainConfig::preset(preset), read_timeout_ms, callbacks, host_handle) {
        Ok(session) => Box::into_raw(Box::new(session)),
        Err(e) => {
            error!("failed to open engine session: {e:#}");
            ptr::null_mut()
        }
    }
}

/// Free a session, closing its connection.
#[no_mangle]
pub unsafe extern "C" fn kevm_session_free(session: *mut KevmSession) {
    if !session.is_null() {
        let _ = Box::from_raw(session);
    }
}

/// Point the session at a different host state object.
#[no_mangle]
pub unsafe extern "C" fn kevm_session_set_host(session: *mut KevmSession, host_handle: usize) -> c_int {
    if session.is_null() {
        return -1;
    }
    match (*session).session.lock() {
        Ok(mut guard) => {
            guard.state_mut().set_handle(host_handle);
            guard.resolver_mut().set_handle(host_handle);
            0
        }
        Err(_) => -1,
    }
}

/// Whether an earlier fatal error made the session unusable.
#[no_mangle]
pub unsafe extern "C" fn kevm_session_is_poisoned(session: *const KevmSession) -> bool {
    if session.is_null() {
        return true;
    }
    match (*session).session.lock() {
        Ok(guard) => guard.is_poisoned(),
        Err(_) => true,
    }
}

fn finish(handle: &KevmSession, result: Result<CallOutcomeFFI>) -> *mut CallOutcomeFFI {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            debug!(%err, "invocation failed");
            if let Ok(mut last) = handle.last_error.lock() {
                *last = CString::new(err.to_string()).ok();
            }
            outcome_from_error(err)
        }
    };
    Box::into_raw(Box::new(outcome))
}

/// Execute a message call. Returns null only for a null session.
#[no_mangle]
pub unsafe extern "C" fn kevm_call(
    session: *mut KevmSession,
    caller: FFIAddress,
    to: FFIAddress,
    input: *const u8,
    input_len: c_uint,
    value: FFIU256,
    gas: u64,
) -> *mut CallOutcomeFFI {
    if session.is_null() {
        return ptr::null_mut();
    }
    let handle = &*session;
    let input = bytes_from_raw(input, input_len);

    let result = match handle.session.lock() {
        Ok(mut guard) => guard.call(caller.into(), to.into(), input, gas, value.into()),
        Err(_) => Err(BridgeError::SessionPoisoned),
    };
    finish(
        handle,
        result.map(|(data, gas_left)| {
            debug!(output = %bytes_to_hex(&data), gas_left, "call succeeded");
            outcome_success(data, gas_left, None)
        }),
    )
}

/// Deploy a contract. On success `created_address` holds the new address.
#[no_mangle]
pub unsafe extern "C" fn kevm_create(
    session: *mut KevmSession,
    caller: FFIAddress,
    code: *const u8,
    code_len: c_uint,
    value: FFIU256,
    gas: u64,
) -> *mut CallOutcomeFFI {
    if session.is_null() {
        return ptr::null_mut();
    }
    let handle = &*session;
    let code = bytes_from_raw(code, code_len);

    let result = match handle.session.lock() {
        Ok(mut guard) => guard.create(caller.into(), code, gas, value.into()),
        Err(_) => Err(BridgeError::SessionPoisoned),
    };
    finish(
        handle,
        result.map(|(data, address, gas_left)| {
            debug!(%address, gas_left, "create succeeded");
            outcome_success(data, gas_left, Some(address))
        }),
    )
}

/// Free an outcome returned by `kevm_call` / `kevm_create`.
#[no_mangle]
pub unsafe extern "C" fn kevm_free_outcome(outcome: *mut CallOutcomeFFI) {
    if !outcome.is_null() {
        let outcome = Box::from_raw(outcome);
        free_output(outcome.output_data, outcome.output_len);
    }
}

/// Message of the last failed invocation on this session, or null.
///
/// The pointer stays valid until the next failing invocation or `kevm_session_free`.
#[no_mangle]
pub unsafe extern "C" fn kevm_get_last_error(session: *const KevmSession) -> *const c_char {
    if session.is_null() {
        return ptr::null();
    }
    match (*session).last_error.lock() {
        Ok(last) => last.as_ref().map_or(ptr::null(), |msg| msg.as_ptr()),
        Err(_) => ptr::null(),
    }
}
