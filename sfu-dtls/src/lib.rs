#![warn(rust_2018_idioms)]

pub mod agent;
pub mod materials;

mod bio;
mod ffi;

pub use agent::{DtlsAgent, DtlsEvent, DtlsRole};
pub use materials::{DtlsMaterials, DtlsSettings, FingerprintHash};
