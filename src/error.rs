use std::path::PathBuf;

use thiserror::Error;

use crate::common::{Addr, Id};
use crate::message::{Cmd, Message};

/// Top-level error type for the simulator
#[derive(Error, Debug)]
pub enum SimError {
    #[error("{component} in state {state} at cycle {cycle}: unexpected {msg}")]
    ProtocolViolation {
        component: String,
        cycle: u64,
        state: String,
        msg: Box<Message>,
    },

    #[error("{component} in state {state} at cycle {cycle}: {detail}")]
    Usage {
        component: String,
        cycle: u64,
        state: String,
        detail: String,
    },

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("coherence invariant broken at cycle {cycle}: {detail}")]
    Invariant { cycle: u64, detail: String },

    #[error("simulation did not finish within {0} cycles")]
    Timeout(u64),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("trace '{path}' line {line}: {detail}")]
    Trace { path: PathBuf, line: usize, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to channel use
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("'{channel}': front/pop on an empty queue for consumer {consumer}")]
    Empty { channel: String, consumer: Id },

    #[error("'{channel}': no route for target {target}")]
    NoTarget { channel: String, target: Id },

    #[error("'{channel}': no segment covers address {addr}")]
    NoSegment { channel: String, addr: Addr },

    #[error("'{channel}': {cmd} is not a transmittable command")]
    NotTransmittable { channel: String, cmd: Cmd },
}

/// Errors related to L1 cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("write to {addr} which is not held exclusively")]
    NotWritable { addr: Addr },

    #[error("access to {addr} which is not valid")]
    NotValid { addr: Addr },

    #[error("refill of {addr} would overwrite modified line {victim}")]
    DirtyVictim { addr: Addr, victim: Addr },

    #[error("line of {expected} words filled with {got} words")]
    LineSize { expected: usize, got: usize },
}

/// Errors related to the backing store and its directory
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("address {0} is outside every segment of this memory")]
    OutOfSegment(Addr),

    #[error("line of {expected} words written with {got} words")]
    LineSize { expected: usize, got: usize },

    #[error("directory slot {addr} cannot become exclusive with {sharers} sharers")]
    ExclusiveSharers { addr: Addr, sharers: usize },
}

/// Type alias for Result with SimError
pub type SimResult<T> = Result<T, SimError>;
