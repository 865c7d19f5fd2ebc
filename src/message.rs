use std::fmt;

use crate::common::{Addr, Id};

/// Advisory duration stamped on interconnect messages; nothing enforces it.
pub const DEFAULT_MAX_DURATION: u64 = 3;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cmd {
    // processor <-> L1
    ReadWord,
    WriteWord,
    RspReadWord,
    RspWriteWord,

    // L1 <-> memory, direct channel
    ReadLine,
    WriteLine,
    GetM,
    GetMLine,
    RspReadLine,
    RspReadLineEx,
    RspGetM,
    RspGetMLine,
    RspWriteLine,

    // memory <-> L1, coherence channel
    Inval,
    InvalRo,
    RspInvalClean,
    RspInvalDirty,
    RspInvalRoClean,
    RspInvalRoDirty,

    /// "nothing pending" in a controller register; never transmitted
    Nop,
}

impl Cmd {
    /// responses that satisfy an L1 miss
    pub fn is_line_grant(&self) -> bool {
        matches!(self, Cmd::RspReadLine | Cmd::RspReadLineEx | Cmd::RspGetM | Cmd::RspGetMLine)
    }
    pub fn is_inval_ack(&self) -> bool {
        matches!(self, Cmd::RspInvalClean | Cmd::RspInvalDirty
            | Cmd::RspInvalRoClean | Cmd::RspInvalRoDirty)
    }
    /// invalidation acks carrying a write-back of the line
    pub fn is_dirty_ack(&self) -> bool {
        matches!(self, Cmd::RspInvalDirty | Cmd::RspInvalRoDirty)
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cmd::ReadWord => "READ_WORD",
            Cmd::WriteWord => "WRITE_WORD",
            Cmd::RspReadWord => "RSP_READ_WORD",
            Cmd::RspWriteWord => "RSP_WRITE_WORD",
            Cmd::ReadLine => "READ_LINE",
            Cmd::WriteLine => "WRITE_LINE",
            Cmd::GetM => "GETM",
            Cmd::GetMLine => "GETM_LINE",
            Cmd::RspReadLine => "RSP_READ_LINE",
            Cmd::RspReadLineEx => "RSP_READ_LINE_EX",
            Cmd::RspGetM => "RSP_GETM",
            Cmd::RspGetMLine => "RSP_GETM_LINE",
            Cmd::RspWriteLine => "RSP_WRITE_LINE",
            Cmd::Inval => "INVAL",
            Cmd::InvalRo => "INVAL_RO",
            Cmd::RspInvalClean => "RSP_INVAL_CLEAN",
            Cmd::RspInvalDirty => "RSP_INVAL_DIRTY",
            Cmd::RspInvalRoClean => "RSP_INVAL_RO_CLEAN",
            Cmd::RspInvalRoDirty => "RSP_INVAL_RO_DIRTY",
            Cmd::Nop => "NOP",
        };
        f.write_str(s)
    }
}

/// A request or a response travelling through a channel.
///
/// `target` is `None` for requests routed to the home memory of `addr`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Message {
    pub addr: Addr,
    pub src: Id,
    pub target: Option<Id>,
    pub cmd: Cmd,
    pub cycle: u64,
    pub max_duration: u64,
    pub data: Vec<u32>,
    pub be: u8,
}

impl Message {
    pub fn new(addr: Addr, src: Id, target: Option<Id>, cmd: Cmd, cycle: u64) -> Self {
        Message {
            addr,
            src,
            target,
            cmd,
            cycle,
            max_duration: DEFAULT_MAX_DURATION,
            data: Vec::new(),
            be: 0xf,
        }
    }

    pub fn with_data(mut self, data: Vec<u32>) -> Self {
        self.data = data;
        self
    }

    pub fn with_be(mut self, be: u8) -> Self {
        self.be = be & 0xf;
        self
    }

    pub fn with_max_duration(mut self, max_duration: u64) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// first data word, 0 when the message carries none
    pub fn word(&self) -> u32 {
        self.data.first().copied().unwrap_or(0)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @{} src={}", self.cmd, self.addr, self.src)?;
        match self.target {
            Some(t) => write!(f, " tgt={t}")?,
            None => write!(f, " tgt=home")?,
        }
        write!(f, " cycle={}", self.cycle)?;
        if !self.data.is_empty() {
            write!(f, " data={:x?} be={:#x}", self.data, self.be)?;
        }
        Ok(())
    }
}
