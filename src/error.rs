//! Error types for the crypto and hotplug subsystems.

use thiserror::Error;

/// Errors raised by the crypto engine, key-wrap service and bulk cipher
/// service (C1-C3).
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("TPM2 engine unavailable")]
    EngineUnavailable,

    #[error("engine initialization failed: {0}")]
    EngineInit(String),

    #[error("key generation failed: {0}")]
    KeyGen(String),

    #[error("failed to write CSR or key: {0}")]
    CsrWrite(String),

    #[error("PKCS#12 MAC check failed (wrong passphrase)")]
    BadPassphrase,

    #[error("malformed PKCS#12 or wrap envelope: {0}")]
    MalformedBlob(String),

    #[error("unsupported key or signature algorithm: {0}")]
    Unsupported(String),

    #[error("bad key length: expected one of {expected:?}, got {got}")]
    BadKeyLen { expected: &'static [usize], got: usize },

    #[error("bad IV length: expected {expected}, got {got}")]
    BadIvLen { expected: usize, got: usize },

    #[error("corrupt wrap envelope: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OpenSSL error: {0}")]
    Ssl(#[from] openssl::error::ErrorStack),
}

/// Outcome of a verification operation. `VerifyInvalid` and `VerifyError`
/// must never be collapsed: the former is a cryptographically sound "no",
/// the latter an infrastructure fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    Invalid,
    VerifyError,
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by the hotplug router and device claim registry (C4-C5).
#[derive(Debug, Error)]
pub enum HotplugError {
    #[error("no claim registered for device")]
    NotFound,

    #[error("netdev move or rename failed: {0}")]
    TransientMoveFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("system call failed: {0}")]
    Sys(#[from] nix::Error),
}

pub type HotplugResult<T> = Result<T, HotplugError>;
