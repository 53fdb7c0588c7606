#![warn(rust_2018_idioms)]

pub mod net;
pub mod rtcp;
pub mod rtp;
pub mod settings;
pub mod transport;

pub use settings::Settings;
pub use transport::{Transport, TransportEvent, TransportFlags};
