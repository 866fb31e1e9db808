//! TPM2 hardware engine plumbing.
//!
//! `openssl-sys` does not expose the legacy `ENGINE_*` API as a safe
//! wrapper, so this module declares the handful of symbols it needs
//! directly against libcrypto (already linked in by `openssl-sys`'s
//! build script) and wraps them in a small RAII handle.

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::sync::Mutex;

use crate::error::{CryptoError, CryptoResult};

#[allow(non_camel_case_types)]
type ENGINE = c_void;

extern "C" {
    fn ENGINE_load_builtin_engines();
    fn ENGINE_register_all_complete() -> c_int;
    fn ENGINE_by_id(id: *const c_char) -> *mut ENGINE;
    fn ENGINE_init(e: *mut ENGINE) -> c_int;
    fn ENGINE_finish(e: *mut ENGINE) -> c_int;
    fn ENGINE_free(e: *mut ENGINE) -> c_int;
    fn ENGINE_set_default(e: *mut ENGINE, flags: c_int) -> c_int;
    fn ENGINE_ctrl_cmd_string(
        e: *mut ENGINE,
        cmd_name: *const c_char,
        arg: *const c_char,
        cmd_optional: c_int,
    ) -> c_int;
}

// from openssl/engine.h
const ENGINE_METHOD_RSA: c_int = 0x0001;
const ENGINE_METHOD_RAND: c_int = 0x0008;

const TPM2_ENGINE_ID: &str = "tpm2";

/// Process-wide handle to the crypto engine. `init`/`shutdown` are
/// idempotent: a double-shutdown or a shutdown without a prior init is a
/// silent no-op, mirroring the defensive free/finish pattern of the C
/// original.
pub struct Engine {
    inner: Mutex<Option<*mut ENGINE>>,
}

// The raw ENGINE pointer is only ever touched behind the Mutex.
unsafe impl Send for Engine {}
unsafe impl Sync for Engine {}

impl Engine {
    pub const fn new() -> Self {
        Engine { inner: Mutex::new(None) }
    }

    pub fn init(&self, use_tpm: bool, srk_pin: Option<&[u8]>) -> CryptoResult<()> {
        let mut guard = self.inner.lock().unwrap();
        unsafe {
            ENGINE_load_builtin_engines();
        }
        if !use_tpm {
            let rc = unsafe { ENGINE_register_all_complete() };
            if rc != 1 {
                return Err(CryptoError::EngineInit(
                    "ENGINE_register_all_complete failed".into(),
                ));
            }
            log::info!("crypto engine initialized with software providers");
            return Ok(());
        }

        let id = CString::new(TPM2_ENGINE_ID).unwrap();
        let e = unsafe { ENGINE_by_id(id.as_ptr()) };
        if e.is_null() {
            return Err(CryptoError::EngineUnavailable);
        }
        if unsafe { ENGINE_init(e) } != 1 {
            unsafe { ENGINE_free(e) };
            return Err(CryptoError::EngineInit("ENGINE_init failed".into()));
        }
        if let Some(pin) = srk_pin {
            let cmd = CString::new("PIN").unwrap();
            let pin_cstr = CString::new(pin).map_err(|_| {
                CryptoError::EngineInit("SRK PIN contains interior NUL".into())
            })?;
            let rc = unsafe {
                ENGINE_ctrl_cmd_string(e, cmd.as_ptr(), pin_cstr.as_ptr(), 0)
            };
            if rc != 1 {
                unsafe {
                    ENGINE_finish(e);
                    ENGINE_free(e);
                }
                return Err(CryptoError::EngineInit("PIN control command failed".into()));
            }
        }
        let rc = unsafe { ENGINE_set_default(e, ENGINE_METHOD_RSA | ENGINE_METHOD_RAND) };
        if rc != 1 {
            unsafe {
                ENGINE_finish(e);
                ENGINE_free(e);
            }
            return Err(CryptoError::EngineInit("ENGINE_set_default failed".into()));
        }
        log::info!("crypto engine initialized with TPM2 engine");
        *guard = Some(e);
        Ok(())
    }

    pub fn shutdown(&self) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(e) = guard.take() {
            unsafe {
                ENGINE_finish(e);
                ENGINE_free(e);
            }
            log::info!("crypto engine shut down");
        }
    }

    pub fn is_tpm_active(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
