#![warn(rust_2018_idioms)]

pub mod session;

pub use session::{SessionType, SrtpSession, SRTP_MASTER_KEY_LENGTH};
