//! Wire format and shared-memory transport between a sheetbatch client and
//! a compute server.
//!
//! An [`Envelope`] is encoded with [`encode`] into a little-endian byte
//! stream and exchanged through a memory-mapped segment guarded by a small
//! control block of atomic sequence words ([`Client`] and [`Server`]).

pub mod codec;
pub mod envelope;
pub mod error;
pub mod server;
pub mod transport;

pub use codec::{TypeFlags, decode, encode, encode_into};
pub use envelope::{Envelope, MessageType};
pub use error::{CodecError, TransportError};
pub use server::{MessageHandler, Server};
pub use transport::{Client, TransportConfig};
