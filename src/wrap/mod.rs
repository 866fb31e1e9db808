//! Key Wrap Service (C2): hybrid asymmetric envelope wrap/unwrap and
//! symmetric AES key wrap.

pub mod asym;
pub mod sym;

pub use asym::{unwrap_key, wrap_key};
pub use sym::{unwrap_sym, wrap_sym};
