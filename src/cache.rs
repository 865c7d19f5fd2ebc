use crate::common::{merge_word, Addr, SystemSpec};
use crate::error::CacheError;

// data cache

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
pub enum LineState {
    #[default]
    Invalid,
    Shared,
    Exclusive,
    Modified,
}

impl LineState {
    /// the line may be written without asking the directory
    pub fn is_owned(&self) -> bool {
        matches!(self, LineState::Exclusive | LineState::Modified)
    }
}

#[derive(Clone, Debug)]
pub struct CacheLine {
    pub tag: Addr,      // base address of the cached line
    pub valid: bool,
    pub exclusive: bool,
    pub dirty: bool,
    pub data: Vec<u32>,
    filled: u64,        // fill stamp for the replacement policy
}

impl CacheLine {
    fn empty(words: usize) -> Self {
        CacheLine {
            tag: Addr(0),
            valid: false,
            exclusive: false,
            dirty: false,
            data: vec![0; words],
            filled: 0,
        }
    }

    pub fn state(&self) -> LineState {
        match (self.valid, self.exclusive, self.dirty) {
            (false, _, _) => LineState::Invalid,
            (true, false, _) => LineState::Shared,
            (true, true, false) => LineState::Exclusive,
            (true, true, true) => LineState::Modified,
        }
    }

    fn set_state(&mut self, state: LineState) {
        (self.valid, self.exclusive, self.dirty) = match state {
            LineState::Invalid => (false, false, false),
            LineState::Shared => (true, false, false),
            LineState::Exclusive => (true, true, false),
            LineState::Modified => (true, true, true),
        };
    }
}

/// Replacement candidate for a refill.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Victim {
    pub way: usize,
    /// the victim holds a modified line that must be written back first
    pub dirty: bool,
    /// line currently held by the way, if valid and not the requested line
    pub addr: Option<Addr>,
    pub data: Vec<u32>,
}

#[derive(Clone, Debug)]
struct CacheSet {
    lines: Vec<CacheLine>,
    fill_ctr: u64,
}

impl CacheSet {
    fn new(ways: usize, words: usize) -> Self {
        CacheSet { lines: vec![CacheLine::empty(words); ways], fill_ctr: 0 }
    }
    fn find(&self, tag: Addr) -> Option<usize> {
        self.lines.iter().position(|l| l.valid && l.tag == tag)
    }
    /// Replacement policy: the way already holding the line, else the first
    /// invalid way, else the least recently filled way.
    fn victim_way(&self, tag: Addr) -> usize {
        if let Some(way) = self.find(tag) {
            return way;
        }
        if let Some(way) = self.lines.iter().position(|l| !l.valid) {
            return way;
        }
        self.lines
            .iter()
            .enumerate()
            .min_by_key(|(_, l)| l.filled)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

/// Set associative L1 storage, owned by one L1 controller.
pub struct L1Cache {
    spec: SystemSpec,
    sets: Vec<CacheSet>,
}

impl L1Cache {
    pub fn new(spec: SystemSpec) -> Self {
        let sets = (0..spec.cache_sets)
            .map(|_| CacheSet::new(spec.cache_ways as usize, spec.words_per_line as usize))
            .collect();
        L1Cache { spec, sets }
    }

    // helper functions
    fn set_and_tag_of(&self, addr: Addr) -> (&CacheSet, Addr) {
        (&self.sets[addr.set_index(&self.spec)], addr.line(&self.spec))
    }
    fn set_and_tag_of_mut(&mut self, addr: Addr) -> (&mut CacheSet, Addr) {
        let index = addr.set_index(&self.spec);
        (&mut self.sets[index], addr.line(&self.spec))
    }
    fn line(&self, addr: Addr) -> Option<&CacheLine> {
        let (set, tag) = self.set_and_tag_of(addr);
        set.find(tag).map(|way| &set.lines[way])
    }
    fn line_mut(&mut self, addr: Addr) -> Option<&mut CacheLine> {
        let (set, tag) = self.set_and_tag_of_mut(addr);
        let way = set.find(tag)?;
        Some(&mut set.lines[way])
    }

    /// Data and state of the line holding `addr`, `None` on a miss.
    pub fn read(&self, addr: Addr) -> Option<(&[u32], LineState)> {
        self.line(addr).map(|l| (l.data.as_slice(), l.state()))
    }

    /// The addressed word, `None` on a miss.
    pub fn read_word(&self, addr: Addr) -> Option<u32> {
        let offset = addr.word_offset(&self.spec);
        self.line(addr).map(|l| l.data[offset])
    }

    pub fn read_directory(&self, addr: Addr) -> LineState {
        self.line(addr).map_or(LineState::Invalid, |l| l.state())
    }

    /// Overwrites the coherence bits of a present line; no-op on a miss.
    pub fn write_directory(&mut self, addr: Addr, state: LineState) {
        if let Some(line) = self.line_mut(addr) {
            line.set_state(state);
        }
    }

    /// Local write into a line held exclusively. Does not touch the dirty bit.
    pub fn write(&mut self, addr: Addr, word: u32, be: u8) -> Result<(), CacheError> {
        let offset = addr.word_offset(&self.spec);
        match self.line_mut(addr) {
            Some(line) if line.exclusive => {
                line.data[offset] = merge_word(line.data[offset], word, be);
                Ok(())
            }
            _ => Err(CacheError::NotWritable { addr }),
        }
    }

    /// Updates a valid copy after memory accepted the write (write-through).
    pub fn write_through(&mut self, addr: Addr, word: u32, be: u8) -> Result<(), CacheError> {
        let offset = addr.word_offset(&self.spec);
        match self.line_mut(addr) {
            Some(line) => {
                line.data[offset] = merge_word(line.data[offset], word, be);
                Ok(())
            }
            None => Err(CacheError::NotValid { addr }),
        }
    }

    pub fn select_victim(&self, addr: Addr) -> Victim {
        let (set, tag) = self.set_and_tag_of(addr);
        let way = set.victim_way(tag);
        let line = &set.lines[way];
        if line.valid && line.tag != tag {
            Victim {
                way,
                dirty: line.state() == LineState::Modified,
                addr: Some(line.tag),
                data: line.data.clone(),
            }
        } else {
            Victim { way, dirty: false, addr: None, data: Vec::new() }
        }
    }

    /// Fills the line of `addr` after a miss was answered.
    pub fn install_line(&mut self, addr: Addr, words: &[u32], exclusive: bool) -> Result<(), CacheError> {
        let expected = self.spec.words_per_line as usize;
        if words.len() != expected {
            return Err(CacheError::LineSize { expected, got: words.len() });
        }
        let victim = self.select_victim(addr);
        if victim.dirty {
            return Err(CacheError::DirtyVictim {
                addr,
                victim: victim.addr.unwrap_or_default(),
            });
        }
        let (set, tag) = self.set_and_tag_of_mut(addr);
        set.fill_ctr += 1;
        let line = &mut set.lines[victim.way];
        line.tag = tag;
        line.data.copy_from_slice(words);
        line.set_state(if exclusive { LineState::Exclusive } else { LineState::Shared });
        line.filled = set.fill_ctr;
        Ok(())
    }

    /// Drops the line; returns its data if `send_back` and it was present.
    pub fn invalidate(&mut self, addr: Addr, send_back: bool) -> Option<Vec<u32>> {
        let line = self.line_mut(addr)?;
        line.set_state(LineState::Invalid);
        send_back.then(|| line.data.clone())
    }

    /// Exclusive or modified → shared. Returns the state before the downgrade.
    pub fn downgrade(&mut self, addr: Addr) -> LineState {
        match self.line_mut(addr) {
            Some(line) => {
                let before = line.state();
                line.set_state(LineState::Shared);
                before
            }
            None => LineState::Invalid,
        }
    }

    /// every valid line with its state, set by set
    pub fn valid_lines(&self) -> impl Iterator<Item = (Addr, LineState)> + '_ {
        self.sets
            .iter()
            .flat_map(|s| s.lines.iter())
            .filter(|l| l.valid)
            .map(|l| (l.tag, l.state()))
    }
}
