use log::trace;

use super::{MemController, MemPorts};
use crate::common::{Addr, Id, SegmentSpec, SystemSpec};
use crate::component::{receive, send, usage, violation, Component};
use crate::directory::{Ram, SharerSet};
use crate::error::{SimError, SimResult};
use crate::message::{Cmd, Message};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FsmState {
    Idle,
    ReadLine,
    RspRead,
    WriteWord,
    Inval,
    InvalSend,
    InvalWait,
    DirUpdate,
    RspWrite,
}

/// Home controller of the write-through/invalidate protocol. The directory
/// only tracks sharers; a write is acknowledged once every other copy is gone.
pub struct MemWtiController {
    id: Id,
    name: String,
    spec: SystemSpec,
    cycle: u64,
    ram: Ram,
    ports: MemPorts,

    state: FsmState,

    req: Option<Message>,
    line: Addr,
    req_copies: SharerSet,
    rsp_copies: SharerSet,
}

impl MemWtiController {
    pub fn new(name: &str, id: Id, spec: SystemSpec, segments: &[SegmentSpec], ports: MemPorts) -> SimResult<Self> {
        Ok(MemWtiController {
            id,
            name: name.into(),
            spec,
            cycle: 0,
            ram: Ram::new(spec, segments)?,
            ports,
            state: FsmState::Idle,
            req: None,
            line: Addr(0),
            req_copies: SharerSet::new(),
            rsp_copies: SharerSet::new(),
        })
    }

    fn violation(&self, msg: &Message) -> SimError {
        violation(&self.name, self.cycle, self.state, msg)
    }

    fn current(&self) -> SimResult<Message> {
        self.req
            .clone()
            .ok_or_else(|| usage(&self.name, self.cycle, self.state, "no direct request being served"))
    }

    fn send_response(&self, req: &Message, cmd: Cmd, data: Vec<u32>) -> SimResult<()> {
        let rsp = Message::new(req.addr, self.id, Some(req.src), cmd, self.cycle).with_data(data);
        send(&self.ports.direct_rsp, &self.name, rsp)
    }

    fn fsm(&mut self) -> SimResult<()> {
        match self.state {
            FsmState::Idle => {
                let Some(req) = receive(&self.ports.direct_req, self.id, &self.name)? else {
                    return Ok(());
                };
                self.state = match req.cmd {
                    Cmd::ReadLine => FsmState::ReadLine,
                    Cmd::WriteWord => FsmState::WriteWord,
                    _ => return Err(self.violation(&req)),
                };
                self.line = req.addr.line(&self.spec);
                self.req = Some(req);
            }
            FsmState::ReadLine => {
                let req = self.current()?;
                let slot = self.ram.slot_mut(self.line)?;
                slot.add_copy(req.src);
                slot.set_valid();
                self.state = FsmState::RspRead;
            }
            FsmState::RspRead => {
                let req = self.current()?;
                let data = self.ram.get_line(self.line)?;
                self.send_response(&req, Cmd::RspReadLine, data)?;
                self.finish();
            }
            FsmState::WriteWord => {
                let req = self.current()?;
                self.ram.write_word(req.addr, req.word(), req.be)?;
                self.state = if self.ram.slot(self.line)?.has_other_copy(req.src) {
                    FsmState::Inval
                } else {
                    FsmState::RspWrite
                };
            }
            FsmState::Inval => {
                let req = self.current()?;
                self.req_copies = self.ram.slot(self.line)?.sharers().without(req.src);
                self.rsp_copies.clear();
                self.state = if self.req_copies.is_empty() {
                    FsmState::DirUpdate
                } else {
                    FsmState::InvalSend
                };
            }
            FsmState::InvalSend => {
                let Some(target) = self.req_copies.pop_next() else {
                    return Err(usage(&self.name, self.cycle, self.state, "no sharer left to invalidate"));
                };
                let inval = Message::new(self.line, self.id, Some(target), Cmd::Inval, self.cycle);
                send(&self.ports.coh_req, &self.name, inval)?;
                self.rsp_copies.insert(target);
                if self.req_copies.is_empty() {
                    self.state = FsmState::InvalWait;
                }
            }
            FsmState::InvalWait => {
                if self.rsp_copies.is_empty() {
                    self.state = FsmState::DirUpdate;
                }
            }
            FsmState::DirUpdate => {
                let req = self.current()?;
                let slot = self.ram.slot_mut(self.line)?;
                let writer_has_copy = slot.has_copy(req.src);
                slot.remove_all_copies();
                if writer_has_copy {
                    slot.add_copy(req.src);
                }
                self.state = FsmState::RspWrite;
            }
            FsmState::RspWrite => {
                let req = self.current()?;
                self.send_response(&req, Cmd::RspWriteWord, Vec::new())?;
                self.finish();
            }
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.req = None;
        self.state = FsmState::Idle;
    }

    fn rsp_fsm(&mut self) -> SimResult<()> {
        let Some(rsp) = receive(&self.ports.coh_rsp, self.id, &self.name)? else {
            return Ok(());
        };
        if rsp.cmd != Cmd::RspInvalClean || rsp.addr != self.line || !self.rsp_copies.contains(rsp.src) {
            return Err(self.violation(&rsp));
        }
        self.ram.slot_mut(self.line)?.remove_copy(rsp.src);
        self.rsp_copies.remove(rsp.src);
        Ok(())
    }
}

impl Component for MemWtiController {
    fn id(&self) -> Id {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn on_tick(&mut self, cycle: u64) -> SimResult<()> {
        self.cycle = cycle;
        self.rsp_fsm()?;
        self.fsm()?;
        trace!("{} next state: {:?}", self.name, self.state);
        Ok(())
    }
    fn is_idle(&self) -> bool {
        self.state == FsmState::Idle && self.rsp_copies.is_empty()
    }
    fn state_name(&self) -> String {
        format!("{:?}", self.state)
    }
}

impl MemController for MemWtiController {
    fn ram(&self) -> &Ram {
        &self.ram
    }
    fn ram_mut(&mut self) -> &mut Ram {
        &mut self.ram
    }
}
