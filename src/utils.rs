//! Utility functions for FFI operations

use std::ffi::CStr;
use std::os::raw::{c_char, c_uint};
use std::slice;

use anyhow::{anyhow, Result};
use revm::primitives::{Address, Bytes};

use crate::error::BridgeError;
use crate::statedb_types::FFIAddress;
use crate::types::{CallOutcomeFFI, KEVM_STATUS_EXECUTION_FAILED, KEVM_STATUS_FATAL, KEVM_STATUS_SUCCESS};

/// Convert a C string to a Rust string
pub unsafe fn c_str_to_string(c_str: *const c_char) -> Result<String> {
    if c_str.is_null() {
        return Err(anyhow!("Null pointer"));
    }

    let c_str = CStr::from_ptr(c_str);
    c_str
        .to_str()
        .map(|s| s.to_string())
        .map_err(|e| anyhow!("Invalid UTF-8: {}", e))
}

/// Copy a host buffer into `Bytes`. Null or zero-length yields empty bytes.
pub unsafe fn bytes_from_raw(data: *const u8, len: c_uint) -> Bytes {
    if data.is_null() || len == 0 {
        Bytes::new()
    } else {
        Bytes::copy_from_slice(slice::from_raw_parts(data, len as usize))
    }
}

/// Convert bytes to hex string
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn boxed_output(data: Bytes) -> (*mut u8, c_uint) {
    if data.is_empty() {
        return (std::ptr::null_mut(), 0);
    }
    let len = data.len() as c_uint;
    let boxed = data.to_vec().into_boxed_slice();
    (Box::into_raw(boxed) as *mut u8, len)
}

/// Release an output buffer produced by [`outcome_success`] / [`outcome_from_error`].
pub unsafe fn free_output(data: *mut u8, len: c_uint) {
    if !data.is_null() {
        let _ = Box::from_raw(std::ptr::slice_from_raw_parts_mut(data, len as usize));
    }
}

pub fn outcome_success(return_data: Bytes, gas_left: u64, created: Option<Address>) -> CallOutcomeFFI {
    let (output_data, output_len) = boxed_output(return_data);
    CallOutcomeFFI {
        status: KEVM_STATUS_SUCCESS,
        gas_left,
        output_data,
        output_len,
        created_address: created.map(FFIAddress::from).unwrap_or_default(),
        has_created_address: created.is_some(),
    }
}

/// Failed invocations still report return data and leftover gas when the engine sent them.
pub fn outcome_from_error(err: BridgeError) -> CallOutcomeFFI {
    match err {
        BridgeError::ExecutionFailed { return_data, gas_left } => {
            let (output_data, output_len) = boxed_output(return_data);
            CallOutcomeFFI {
                status: KEVM_STATUS_EXECUTION_FAILED,
                gas_left,
                output_data,
                output_len,
                created_address: FFIAddress::default(),
                has_created_address: false,
            }
        }
        _ => CallOutcomeFFI {
            status: KEVM_STATUS_FATAL,
            gas_left: 0,
            output_data: std::ptr::null_mut(),
            output_len: 0,
            created_address: FFIAddress::default(),
            has_created_address: false,
        },
    }
}
