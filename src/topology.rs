//! Assembles processors, L1 controllers, memory controllers and the channels
//! between them, and drives the whole system one cycle at a time.

use std::ops::Range;

use log::{debug, info, warn};

use crate::cache::LineState;
use crate::channel::{Channel, ChannelRef};
use crate::common::{Addr, Id, Protocol, SegmentSpec, SystemSpec};
use crate::component::Component;
use crate::directory::DirState;
use crate::error::{SimError, SimResult};
use crate::l1::{L1Controller, L1MesiController, L1Ports, L1WtiController};
use crate::mem::{MemController, MemMesiController, MemPorts, MemWtiController};
use crate::message::Message;
use crate::processor::{Insts, Processor};

/// Ids handed out once at assembly, in disjoint ranges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdMap {
    procs: Range<Id>,
    caches: Range<Id>,
    mems: Range<Id>,
}

impl IdMap {
    pub fn allocate(n_procs: usize, n_mems: usize) -> Self {
        let n = n_procs as Id;
        let m = n_mems as Id;
        IdMap { procs: 0..n, caches: n..2 * n, mems: 2 * n..2 * n + m }
    }
    pub fn proc_id(&self, i: usize) -> Id {
        self.procs.start + i as Id
    }
    pub fn cache_id(&self, i: usize) -> Id {
        self.caches.start + i as Id
    }
    pub fn mem_id(&self, i: usize) -> Id {
        self.mems.start + i as Id
    }
    pub fn procs(&self) -> Range<Id> {
        self.procs.clone()
    }
    pub fn caches(&self) -> Range<Id> {
        self.caches.clone()
    }
    pub fn mems(&self) -> Range<Id> {
        self.mems.clone()
    }
}

struct Channels {
    direct_req: ChannelRef,
    direct_rsp: ChannelRef,
    coh_req: ChannelRef,
    coh_rsp: ChannelRef,
    proc_req: ChannelRef,
    proc_rsp: ChannelRef,
}

impl Channels {
    fn all(&self) -> [&ChannelRef; 6] {
        [&self.direct_req, &self.direct_rsp, &self.coh_req, &self.coh_rsp, &self.proc_req, &self.proc_rsp]
    }
}

pub struct Simulator {
    spec: SystemSpec,
    ids: IdMap,
    cycle: u64,
    channels: Channels,
    procs: Vec<Processor>,
    l1s: Vec<Box<dyn L1Controller>>,
    mems: Vec<Box<dyn MemController>>,
}

impl Simulator {
    /// One processor and L1 per program, one memory controller per entry of
    /// `memories` owning the listed segments.
    pub fn new(spec: SystemSpec, memories: &[Vec<SegmentSpec>], programs: Vec<Insts>) -> SimResult<Self> {
        spec.validate()?;
        if programs.is_empty() || memories.is_empty() {
            return Err(SimError::Config("need at least one processor and one memory".into()));
        }
        let mut all: Vec<SegmentSpec> = memories.iter().flatten().copied().collect();
        all.sort_by_key(|s| s.base);
        if let Some(w) = all.windows(2).find(|w| w[0].base as u64 + w[0].size as u64 > w[1].base as u64) {
            return Err(SimError::Config(format!(
                "segments at {:#x} and {:#x} overlap", w[0].base, w[1].base)));
        }

        let ids = IdMap::allocate(programs.len(), memories.len());
        let routes = memories
            .iter()
            .enumerate()
            .flat_map(|(i, segs)| segs.iter().map(move |s| (*s, i)))
            .map(|(s, i)| (s, ids.mem_id(i)))
            .collect();
        let channels = Channels {
            direct_req: Channel::by_address("direct_req", routes).shared(),
            direct_rsp: Channel::by_target("direct_rsp", ids.caches()).shared(),
            coh_req: Channel::by_target("coh_req", ids.caches()).shared(),
            coh_rsp: Channel::by_target("coh_rsp", ids.mems()).shared(),
            proc_req: Channel::by_target("proc_req", ids.caches()).shared(),
            proc_rsp: Channel::by_target("proc_rsp", ids.procs()).shared(),
        };

        let l1_ports = L1Ports {
            direct_req: channels.direct_req.clone(),
            direct_rsp: channels.direct_rsp.clone(),
            coh_req: channels.coh_req.clone(),
            coh_rsp: channels.coh_rsp.clone(),
            proc_req: channels.proc_req.clone(),
            proc_rsp: channels.proc_rsp.clone(),
        };
        let mem_ports = MemPorts {
            direct_req: channels.direct_req.clone(),
            direct_rsp: channels.direct_rsp.clone(),
            coh_req: channels.coh_req.clone(),
            coh_rsp: channels.coh_rsp.clone(),
        };

        let procs = programs
            .into_iter()
            .enumerate()
            .map(|(i, insts)| {
                Processor::new(&format!("proc{i}"), ids.proc_id(i), ids.cache_id(i),
                    channels.proc_req.clone(), channels.proc_rsp.clone(), insts)
            })
            .collect::<Vec<_>>();
        let l1s = (0..procs.len())
            .map(|i| -> Box<dyn L1Controller> {
                let name = format!("l1_{i}");
                match spec.protocol {
                    Protocol::Mesi => Box::new(L1MesiController::new(&name, ids.cache_id(i), spec, l1_ports.clone())),
                    Protocol::Wti => Box::new(L1WtiController::new(&name, ids.cache_id(i), spec, l1_ports.clone())),
                }
            })
            .collect();
        let mems = memories
            .iter()
            .enumerate()
            .map(|(i, segs)| -> SimResult<Box<dyn MemController>> {
                let name = format!("mem{i}");
                Ok(match spec.protocol {
                    Protocol::Mesi => Box::new(MemMesiController::new(&name, ids.mem_id(i), spec, segs, mem_ports.clone())?),
                    Protocol::Wti => Box::new(MemWtiController::new(&name, ids.mem_id(i), spec, segs, mem_ports.clone())?),
                })
            })
            .collect::<SimResult<Vec<_>>>()?;

        info!("{} system: {} processors, {} memories", spec.protocol, procs.len(), mems.len());
        Ok(Simulator { spec, ids, cycle: 0, channels, procs, l1s, mems })
    }

    pub fn spec(&self) -> &SystemSpec {
        &self.spec
    }
    pub fn ids(&self) -> &IdMap {
        &self.ids
    }
    pub fn cycle(&self) -> u64 {
        self.cycle
    }
    pub fn processor(&self, i: usize) -> &Processor {
        &self.procs[i]
    }
    pub fn processor_mut(&mut self, i: usize) -> &mut Processor {
        &mut self.procs[i]
    }
    pub fn l1(&self, i: usize) -> &dyn L1Controller {
        self.l1s[i].as_ref()
    }
    pub fn mem(&self, i: usize) -> &dyn MemController {
        self.mems[i].as_ref()
    }
    pub fn num_procs(&self) -> usize {
        self.procs.len()
    }

    /// Advances every component by one cycle.
    pub fn step(&mut self) -> SimResult<()> {
        let cycle = self.cycle;
        for ch in self.channels.all() {
            ch.borrow_mut().update_time(cycle);
        }
        // nothing pushed this cycle is visible before the next one, so the
        // order components are ticked in does not matter
        for p in self.procs.iter_mut() {
            p.on_tick(cycle)?;
        }
        for c in self.l1s.iter_mut() {
            c.on_tick(cycle)?;
        }
        for m in self.mems.iter_mut() {
            m.on_tick(cycle)?;
        }
        if self.spec.check_invariants {
            self.check_coherence()?;
        }
        self.cycle += 1;
        Ok(())
    }

    /// Steps until every program finished and the system is quiescent.
    /// Returns the number of cycles simulated.
    pub fn run(&mut self) -> SimResult<u64> {
        while !self.is_done() {
            if self.cycle >= self.spec.max_cycles {
                warn!("giving up at cycle {}", self.cycle);
                for (name, state) in self.states() {
                    warn!("  {name}: {state}");
                }
                return Err(SimError::Timeout(self.spec.max_cycles));
            }
            if let Err(e) = self.step() {
                warn!("run stopped at cycle {}: {e}", self.cycle);
                return Err(e);
            }
        }
        info!("finished after {} cycles", self.cycle);
        for p in &self.procs {
            debug!("{}: {:?}", p.name(), p.stats());
        }
        Ok(self.cycle)
    }

    pub fn is_quiescent(&self) -> bool {
        self.l1s.iter().all(|c| c.is_idle())
            && self.mems.iter().all(|m| m.is_idle())
            && self.channels.all().iter().all(|ch| ch.borrow().is_drained())
    }

    pub fn is_done(&self) -> bool {
        self.procs.iter().all(|p| p.is_done()) && self.is_quiescent()
    }

    /// (component name, FSM state) of every component
    pub fn states(&self) -> Vec<(String, String)> {
        let procs = self.procs.iter().map(|p| (p.name().to_string(), p.state_name()));
        let l1s = self.l1s.iter().map(|c| (c.name().to_string(), c.state_name()));
        let mems = self.mems.iter().map(|m| (m.name().to_string(), m.state_name()));
        procs.chain(l1s).chain(mems).collect()
    }

    fn home(&self, addr: Addr) -> SimResult<&dyn MemController> {
        self.mems
            .iter()
            .find(|m| m.ram().covers(addr))
            .map(|m| m.as_ref())
            .ok_or_else(|| self.broken(format!("no memory covers {addr}")))
    }

    fn broken(&self, detail: String) -> SimError {
        SimError::Invariant { cycle: self.cycle, detail }
    }

    /// Checks that no cache claims more than its home directory granted:
    /// valid copies are recorded sharers, an owned copy is the sole sharer of
    /// an exclusive slot. Once quiescent, clean copies must also match memory.
    pub fn check_coherence(&self) -> SimResult<()> {
        let quiescent = self.is_quiescent();
        for c in &self.l1s {
            for (addr, state) in c.cache().valid_lines() {
                let ram = self.home(addr)?.ram();
                let slot = ram.slot(addr)?;
                if !slot.has_copy(c.id()) {
                    return Err(self.broken(format!(
                        "{} holds {addr} ({state:?}) but is not a recorded sharer", c.name())));
                }
                if state.is_owned() && (slot.state() != DirState::Exclusive || slot.owner() != Some(c.id())) {
                    return Err(self.broken(format!(
                        "{} holds {addr} {state:?} but the directory says {:?} {:?}",
                        c.name(), slot.state(), slot.sharers())));
                }
                if state.is_owned() && self.spec.protocol == Protocol::Wti {
                    return Err(self.broken(format!("{} holds {addr} {state:?} under WTI", c.name())));
                }
                if quiescent && state != LineState::Modified {
                    let cached = c.cache().read(addr).map(|(d, _)| d.to_vec()).unwrap_or_default();
                    if cached != ram.get_line(addr)? {
                        return Err(self.broken(format!(
                            "{} holds a clean copy of {addr} that differs from memory", c.name())));
                    }
                }
            }
        }
        Ok(())
    }

    /// Coherent value of a word: the modified copy if a cache has one,
    /// memory otherwise.
    pub fn peek_word(&self, addr: Addr) -> SimResult<u32> {
        for c in &self.l1s {
            if let Some((data, LineState::Modified)) = c.cache().read(addr) {
                return Ok(data[addr.word_offset(&self.spec)]);
            }
        }
        Ok(self.home(addr)?.ram().read_word(addr)?)
    }

    /// Writes straight into the backing store, for initial memory images.
    pub fn poke_word(&mut self, addr: Addr, value: u32) -> SimResult<()> {
        let mem = self
            .mems
            .iter_mut()
            .find(|m| m.ram().covers(addr))
            .ok_or_else(|| SimError::Config(format!("no memory covers {addr}")))?;
        mem.ram_mut().write_word(addr, value, 0xf)?;
        Ok(())
    }

    /// Starts or stops keeping a copy of every message pushed on any channel.
    pub fn set_recording(&mut self, on: bool) {
        for ch in self.channels.all() {
            ch.borrow_mut().set_recording(on);
        }
    }

    /// Messages recorded on the channel named `name`, in push order.
    pub fn history(&self, name: &str) -> Vec<Message> {
        self.channels
            .all()
            .iter()
            .find(|ch| ch.borrow().name() == name)
            .map(|ch| ch.borrow().history().to_vec())
            .unwrap_or_default()
    }
}
