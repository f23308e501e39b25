//! Library compiling declarative spec trees into lazy packet pipelines.
//! This library is used by the pktsynth binary, but can be used freely.

/// Errors of every stage
pub mod error;

/// Configuration attributes of spec nodes
pub mod config;

/// Registered sources, modifiers and sinks
pub mod registry;

/// Layered packets and their serialization
pub mod packet;

/// TCP header and sequence-number policies
pub mod tcp;

/// Spec tree construction and validation
pub mod spec;

/// Compilation of spec trees into packet streams
pub mod instantiate;

/// Packet sources
pub mod sources;

/// Packet stream transformations
pub mod modifiers;

/// Export to pcap
pub mod export;

#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use instantiate::{instantiate, instantiate_root, Context, Instance, PacketStream};
#[doc(inline)]
pub use packet::Packet;
#[doc(inline)]
pub use spec::SpecNode;
