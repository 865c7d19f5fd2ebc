//! Cycle driven simulator of directory based cache coherence, with a MESI
//! and a write-through/invalidate (WTI) protocol.

pub mod cache;
pub mod channel;
pub mod common;
pub mod component;
pub mod directory;
pub mod error;
pub mod l1;
pub mod mem;
pub mod message;
pub mod processor;
pub mod topology;
pub mod trace;

pub use common::{Addr, Id, Protocol, SegmentSpec, SystemSpec};
pub use error::{SimError, SimResult};
pub use message::{Cmd, Message};
pub use processor::{Instr, Insts};
pub use topology::{IdMap, Simulator};
