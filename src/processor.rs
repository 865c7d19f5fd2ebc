use std::collections::VecDeque;

use log::{debug, info};

use crate::channel::ChannelRef;
use crate::common::{Addr, Id};
use crate::component::{receive, send, violation, Component};
use crate::error::SimResult;
use crate::message::{Cmd, Message};

// instructions

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Instr {
    Read(Addr),
    Write(Addr, u32),
    Other(u32), // cycles spent computing
}

pub type Insts = VecDeque<Instr>;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ProcState {
    #[default]
    Idle,
    ExecutingOther(u32), // cycles left
    WaitingForCache,
    Done,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ProcStats {
    pub cycles: u64,
    pub idle_cycles: u64,   // spent waiting for the cache
    pub loads: u64,
    pub stores: u64,
    pub others: u64,
}

/// Runs a program against its L1, one memory access at a time.
pub struct Processor {
    id: Id,
    name: String,
    l1: Id,
    proc_req: ChannelRef,
    proc_rsp: ChannelRef,
    cycle: u64,

    pub state: ProcState,
    insts: Insts,
    outstanding: Option<Instr>,
    reads: Vec<(Addr, u32)>,
    stats: ProcStats,
}

impl Processor {
    pub fn new(name: &str, id: Id, l1: Id, proc_req: ChannelRef, proc_rsp: ChannelRef, insts: Insts) -> Self {
        Processor {
            id,
            name: name.into(),
            l1,
            proc_req,
            proc_rsp,
            cycle: 0,
            state: ProcState::Idle,
            insts,
            outstanding: None,
            reads: Vec::new(),
            stats: ProcStats::default(),
        }
    }

    /// appends an instruction to the program, waking the processor if it was done
    pub fn push_instr(&mut self, instr: Instr) {
        self.insts.push_back(instr);
        if self.state == ProcState::Done {
            self.state = ProcState::Idle;
        }
    }

    /// every value returned to a read so far, in program order
    pub fn reads(&self) -> &[(Addr, u32)] {
        &self.reads
    }

    pub fn stats(&self) -> ProcStats {
        self.stats
    }

    pub fn is_done(&self) -> bool {
        self.state == ProcState::Done
    }

    fn issue(&mut self, instr: Instr) -> SimResult<ProcState> {
        let msg = match instr {
            Instr::Read(addr) => {
                self.stats.loads += 1;
                Message::new(addr, self.id, Some(self.l1), Cmd::ReadWord, self.cycle)
            }
            Instr::Write(addr, value) => {
                self.stats.stores += 1;
                Message::new(addr, self.id, Some(self.l1), Cmd::WriteWord, self.cycle)
                    .with_data(vec![value])
            }
            Instr::Other(t) => {
                self.stats.others += 1;
                return Ok(if t > 1 { ProcState::ExecutingOther(t - 1) } else { ProcState::Idle });
            }
        };
        send(&self.proc_req, &self.name, msg)?;
        self.outstanding = Some(instr);
        Ok(ProcState::WaitingForCache)
    }

    fn tick_waiting(&mut self) -> SimResult<ProcState> {
        let Some(rsp) = receive(&self.proc_rsp, self.id, &self.name)? else {
            self.stats.idle_cycles += 1;
            return Ok(ProcState::WaitingForCache);
        };
        match (self.outstanding.take(), rsp.cmd) {
            (Some(Instr::Read(addr)), Cmd::RspReadWord) if rsp.addr == addr => {
                debug!("{} read {:#x} at {}", self.name, rsp.word(), addr);
                self.reads.push((addr, rsp.word()));
            }
            (Some(Instr::Write(addr, _)), Cmd::RspWriteWord) if rsp.addr == addr => (),
            _ => return Err(violation(&self.name, self.cycle, self.state, &rsp)),
        }
        Ok(ProcState::Idle)
    }
}

impl Component for Processor {
    fn id(&self) -> Id {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn on_tick(&mut self, cycle: u64) -> SimResult<()> {
        self.cycle = cycle;
        if self.state != ProcState::Done {
            self.stats.cycles += 1;
        }
        self.state = match self.state {
            ProcState::Idle => match self.insts.pop_front() {
                Some(instr) => self.issue(instr)?,
                None => {
                    info!("{} done after {} cycles", self.name, self.stats.cycles);
                    ProcState::Done
                }
            },
            ProcState::ExecutingOther(t) if t > 1 => ProcState::ExecutingOther(t - 1),
            ProcState::ExecutingOther(_) => ProcState::Idle,
            ProcState::WaitingForCache => self.tick_waiting()?,
            ProcState::Done => ProcState::Done,
        };
        Ok(())
    }
    fn is_idle(&self) -> bool {
        self.state == ProcState::Done
    }
    fn state_name(&self) -> String {
        format!("{:?}", self.state)
    }
}
