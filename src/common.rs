use std::fmt;
use std::str::FromStr;

use crate::error::SimError;

// system specs

/// Bytes per word. Fixed since byte enables carry one bit per byte.
pub const WORD_SIZE: u32 = 4;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Protocol {
    Mesi,
    Wti,
}

impl FromStr for Protocol {
    type Err = SimError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MESI" => Ok(Protocol::Mesi),
            "WTI" => Ok(Protocol::Wti),
            _ => Err(SimError::Config(format!("invalid protocol argument: {s}"))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Mesi => write!(f, "MESI"),
            Protocol::Wti => write!(f, "WTI"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SystemSpec {         // unit         reasonable defaults
    pub protocol: Protocol,     //              MESI
    pub words_per_line: u32,    // words        8
    pub cache_sets: u32,        // sets         16
    pub cache_ways: u32,        // lines        2
    pub max_cycles: u64,        // cycles       100000
    pub check_invariants: bool, //              false
}

impl Default for SystemSpec {
    fn default() -> Self {
        SystemSpec {
            protocol: Protocol::Mesi,
            words_per_line: 8,
            cache_sets: 16,
            cache_ways: 2,
            max_cycles: 100_000,
            check_invariants: false,
        }
    }
}

impl SystemSpec {
    pub fn line_bytes(&self) -> u32 {
        WORD_SIZE * self.words_per_line
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.words_per_line == 0 || !self.words_per_line.is_power_of_two() {
            return Err(SimError::Config(format!(
                "words per line must be a power of two, got {}", self.words_per_line)));
        }
        if self.cache_sets == 0 || self.cache_ways == 0 {
            return Err(SimError::Config("cache needs at least one set and one way".into()));
        }
        Ok(())
    }
}

// addresses

/// A byte address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Addr(pub u32);

impl Addr {
    /// base address of the line containing this address
    pub fn line(&self, spec: &SystemSpec) -> Addr {
        Addr(self.0 & !(spec.line_bytes() - 1))
    }
    /// index of the addressed word within its line
    pub fn word_offset(&self, spec: &SystemSpec) -> usize {
        ((self.0 / WORD_SIZE) % spec.words_per_line) as usize
    }
    /// get the cache set index of this address under given system specs
    pub fn set_index(&self, spec: &SystemSpec) -> usize {
        ((self.0 / spec.line_bytes()) % spec.cache_sets) as usize
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Globally unique component id, handed out by `topology::IdMap`.
pub type Id = u32;

/// Merges `word` into `old`, keeping the bytes whose enable bit is clear.
pub fn merge_word(old: u32, word: u32, be: u8) -> u32 {
    let mut mask = 0u32;
    for byte in 0..4 {
        if be & (1 << byte) != 0 {
            mask |= 0xff << (8 * byte);
        }
    }
    (old & !mask) | (word & mask)
}

// memory segments

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SegmentSpec {
    pub base: u32,  // bytes, line aligned
    pub size: u32,  // bytes, multiple of the line size
}

impl SegmentSpec {
    pub fn new(base: u32, size: u32) -> Self {
        SegmentSpec { base, size }
    }
    pub fn contains(&self, addr: Addr) -> bool {
        addr.0 >= self.base && (addr.0 - self.base) < self.size
    }
}
