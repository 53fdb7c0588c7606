#![warn(rust_2018_idioms)]

pub mod attributes;
pub mod fingerprint;
pub mod integrity;
pub mod message;

pub use message::{
    MessageAuth, MessageClass, MessageMethod, StunMessage, TransactionId, MAGIC_COOKIE,
};
