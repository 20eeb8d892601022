//! The TCP core: sequence-number arithmetic, byte stream, reassembler,
//! sender, receiver, and the connection state machine that composes them.

pub mod byte_stream;
pub mod config;
pub mod connection;
pub mod error;
pub mod reassembler;
pub mod receiver;
pub mod segment;
pub mod sender;
pub mod sequence;
pub mod state;

pub use connection::{Tcp4Tuple, TcpConnection};
pub use config::Config;
