use std::collections::BTreeSet;

use crate::common::{merge_word, Addr, Id, SegmentSpec, SystemSpec, WORD_SIZE};
use crate::error::{MemoryError, SimError, SimResult};

/// Home side view of a line.
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
pub enum DirState {
    #[default]
    Invalid,
    Valid,
    Exclusive,
}

/// Caches holding a copy of a line. Iterates in ascending id order, which
/// fixes the order invalidations are sent in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SharerSet(BTreeSet<Id>);

impl SharerSet {
    pub fn new() -> Self {
        SharerSet(BTreeSet::new())
    }
    pub fn contains(&self, id: Id) -> bool {
        self.0.contains(&id)
    }
    pub fn insert(&mut self, id: Id) -> bool {
        self.0.insert(id)
    }
    pub fn remove(&mut self, id: Id) -> bool {
        self.0.remove(&id)
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn clear(&mut self) {
        self.0.clear()
    }
    /// next owner to contact, without removing it
    pub fn next(&self) -> Option<Id> {
        self.0.first().copied()
    }
    pub fn pop_next(&mut self) -> Option<Id> {
        self.0.pop_first()
    }
    /// copy of the set minus `id`
    pub fn without(&self, id: Id) -> SharerSet {
        SharerSet(self.0.iter().copied().filter(|&s| s != id).collect())
    }
    pub fn iter(&self) -> impl Iterator<Item = Id> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Id> for SharerSet {
    fn from_iter<I: IntoIterator<Item = Id>>(iter: I) -> Self {
        SharerSet(iter.into_iter().collect())
    }
}

/// Directory entry of one line.
///
/// The state follows the sharer set: an empty set is always `Invalid` and
/// `Exclusive` always has exactly one sharer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectorySlot {
    state: DirState,
    sharers: SharerSet,
}

impl DirectorySlot {
    pub fn state(&self) -> DirState {
        self.state
    }
    pub fn sharers(&self) -> &SharerSet {
        &self.sharers
    }
    pub fn add_copy(&mut self, id: Id) {
        self.sharers.insert(id);
        self.normalize();
    }
    pub fn remove_copy(&mut self, id: Id) {
        self.sharers.remove(id);
        self.normalize();
    }
    pub fn remove_all_copies(&mut self) {
        self.sharers.clear();
        self.normalize();
    }
    pub fn has_copy(&self, id: Id) -> bool {
        self.sharers.contains(id)
    }
    pub fn has_other_copy(&self, id: Id) -> bool {
        self.sharers.iter().any(|s| s != id)
    }
    pub fn nb_copies(&self) -> usize {
        self.sharers.len()
    }
    /// sole sharer of an exclusive line
    pub fn owner(&self) -> Option<Id> {
        match self.state {
            DirState::Exclusive => self.sharers.next(),
            _ => None,
        }
    }
    /// marks the line shared by its current sharers
    pub fn set_valid(&mut self) {
        self.state = DirState::Valid;
        self.normalize();
    }
    pub fn set_exclusive(&mut self, addr: Addr) -> Result<(), MemoryError> {
        if self.sharers.len() != 1 {
            return Err(MemoryError::ExclusiveSharers { addr, sharers: self.sharers.len() });
        }
        self.state = DirState::Exclusive;
        Ok(())
    }
    fn normalize(&mut self) {
        self.state = match (self.state, self.sharers.len()) {
            (_, 0) => DirState::Invalid,
            (DirState::Exclusive, 1) => DirState::Exclusive,
            _ => DirState::Valid,
        };
    }
}

struct Segment {
    spec: SegmentSpec,
    words: Vec<u32>,
    slots: Vec<DirectorySlot>,
}

/// Backing store and directory of the segments owned by one memory controller.
pub struct Ram {
    spec: SystemSpec,
    segments: Vec<Segment>,
}

impl Ram {
    pub fn new(spec: SystemSpec, segments: &[SegmentSpec]) -> SimResult<Self> {
        let line_bytes = spec.line_bytes();
        let segments = segments
            .iter()
            .map(|seg| {
                if seg.base % line_bytes != 0 || seg.size % line_bytes != 0 || seg.size == 0 {
                    return Err(SimError::Config(format!(
                        "segment {:#x}+{:#x} is not a non-empty multiple of the {line_bytes} byte line",
                        seg.base, seg.size)));
                }
                Ok(Segment {
                    spec: *seg,
                    words: vec![0; (seg.size / WORD_SIZE) as usize],
                    slots: vec![DirectorySlot::default(); (seg.size / line_bytes) as usize],
                })
            })
            .collect::<SimResult<Vec<_>>>()?;
        Ok(Ram { spec, segments })
    }

    pub fn segments(&self) -> impl Iterator<Item = SegmentSpec> + '_ {
        self.segments.iter().map(|s| s.spec)
    }

    pub fn covers(&self, addr: Addr) -> bool {
        self.segments.iter().any(|s| s.spec.contains(addr))
    }

    // (segment, line index, word index within the segment)
    fn locate(&self, addr: Addr) -> Result<(usize, usize, usize), MemoryError> {
        let seg = self
            .segments
            .iter()
            .position(|s| s.spec.contains(addr))
            .ok_or(MemoryError::OutOfSegment(addr))?;
        let offset = addr.0 - self.segments[seg].spec.base;
        Ok((
            seg,
            (offset / self.spec.line_bytes()) as usize,
            (offset / WORD_SIZE) as usize,
        ))
    }

    fn line_range(&self, addr: Addr) -> Result<(usize, std::ops::Range<usize>), MemoryError> {
        let (seg, line, _) = self.locate(addr)?;
        let words = self.spec.words_per_line as usize;
        Ok((seg, line * words..(line + 1) * words))
    }

    pub fn get_line(&self, addr: Addr) -> Result<Vec<u32>, MemoryError> {
        let (seg, range) = self.line_range(addr)?;
        Ok(self.segments[seg].words[range].to_vec())
    }

    pub fn write_line(&mut self, addr: Addr, data: &[u32]) -> Result<(), MemoryError> {
        let (seg, range) = self.line_range(addr)?;
        if data.len() != range.len() {
            return Err(MemoryError::LineSize { expected: range.len(), got: data.len() });
        }
        self.segments[seg].words[range].copy_from_slice(data);
        Ok(())
    }

    pub fn read_word(&self, addr: Addr) -> Result<u32, MemoryError> {
        let (seg, _, word) = self.locate(addr)?;
        Ok(self.segments[seg].words[word])
    }

    pub fn write_word(&mut self, addr: Addr, data: u32, be: u8) -> Result<(), MemoryError> {
        let (seg, _, word) = self.locate(addr)?;
        let w = &mut self.segments[seg].words[word];
        *w = merge_word(*w, data, be);
        Ok(())
    }

    pub fn slot(&self, addr: Addr) -> Result<&DirectorySlot, MemoryError> {
        let (seg, line, _) = self.locate(addr)?;
        Ok(&self.segments[seg].slots[line])
    }

    pub fn slot_mut(&mut self, addr: Addr) -> Result<&mut DirectorySlot, MemoryError> {
        let (seg, line, _) = self.locate(addr)?;
        Ok(&mut self.segments[seg].slots[line])
    }

    /// every directory slot that records at least one copy
    pub fn lines(&self) -> impl Iterator<Item = (Addr, &DirectorySlot)> + '_ {
        let line_bytes = self.spec.line_bytes();
        self.segments.iter().flat_map(move |seg| {
            seg.slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.state() != DirState::Invalid)
                .map(move |(i, slot)| (Addr(seg.spec.base + i as u32 * line_bytes), slot))
        })
    }
}
