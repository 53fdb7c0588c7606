//! DTLS retransmission-timer controls.
//!
//! The `openssl` crate does not wrap `DTLSv1_get_timeout` (an `SSL_ctrl`
//! macro) nor `DTLSv1_handle_timeout`, so they are reached directly here.

use foreign_types::ForeignTypeRef;
use libc::{c_int, c_void, timeval};
use openssl::ssl::SslRef;
use std::time::Duration;

const DTLS_CTRL_GET_TIMEOUT: c_int = 73;
const DTLS_CTRL_HANDLE_TIMEOUT: c_int = 74;

/// Time until the session's current retransmission deadline, if one is armed.
pub(crate) fn dtls_get_timeout(ssl: &SslRef) -> Option<Duration> {
    let mut tv = timeval {
        tv_sec: 0,
        tv_usec: 0,
    };

    let ret = unsafe {
        openssl_sys::SSL_ctrl(
            ssl.as_ptr(),
            DTLS_CTRL_GET_TIMEOUT,
            0,
            &mut tv as *mut timeval as *mut c_void,
        )
    };
    if ret == 0 {
        return None;
    }

    Some(Duration::new(
        tv.tv_sec.max(0) as u64,
        tv.tv_usec.max(0) as u32 * 1_000,
    ))
}

/// Let the session retransmit whatever flights are pending after a deadline.
pub(crate) fn dtls_handle_timeout(ssl: &SslRef) -> c_int {
    unsafe {
        openssl_sys::SSL_ctrl(
            ssl.as_ptr(),
            DTLS_CTRL_HANDLE_TIMEOUT,
            0,
            std::ptr::null_mut(),
        ) as c_int
    }
}
