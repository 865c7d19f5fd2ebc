use log::{debug, trace};

use super::{MemController, MemPorts};
use crate::common::{Addr, Id, SegmentSpec, SystemSpec};
use crate::component::{receive, send, usage, violation, Component};
use crate::directory::{DirState, Ram, SharerSet};
use crate::error::{SimError, SimResult};
use crate::message::{Cmd, Message};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FsmState {
    Idle,
    ReadLine,
    RspRead,
    WriteLine,
    GetM,
    RspGetM,
    DirUpdate,
    Inval,
    InvalSend,
    InvalWait,
}

/// Home controller of the MESI protocol.
///
/// Serves one direct request at a time. Invalidation acks are taken in every
/// cycle, before the main FSM runs.
pub struct MemMesiController {
    id: Id,
    name: String,
    spec: SystemSpec,
    cycle: u64,
    ram: Ram,
    ports: MemPorts,

    state: FsmState,

    req: Option<Message>,     // direct request being served
    line: Addr,               // its line address
    inval_cmd: Cmd,           // INVAL or INVAL_RO while invalidating
    req_copies: SharerSet,    // sharers still to contact
    rsp_copies: SharerSet,    // sharers whose ack is awaited
    requester_had_copy: bool,
}

impl MemMesiController {
    pub fn new(name: &str, id: Id, spec: SystemSpec, segments: &[SegmentSpec], ports: MemPorts) -> SimResult<Self> {
        Ok(MemMesiController {
            id,
            name: name.into(),
            spec,
            cycle: 0,
            ram: Ram::new(spec, segments)?,
            ports,
            state: FsmState::Idle,
            req: None,
            line: Addr(0),
            inval_cmd: Cmd::Nop,
            req_copies: SharerSet::new(),
            rsp_copies: SharerSet::new(),
            requester_had_copy: false,
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
        let rsp = Message::new(self.line, self.id, Some(req.src), cmd, self.cycle).with_data(data);
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
                    Cmd::WriteLine => FsmState::WriteLine,
                    Cmd::GetM | Cmd::GetMLine => FsmState::GetM,
                    _ => return Err(self.violation(&req)),
                };
                self.line = req.addr.line(&self.spec);
                self.req = Some(req);
            }
            FsmState::ReadLine => {
                let req = self.current()?;
                let slot = self.ram.slot(self.line)?;
                if slot.state() == DirState::Exclusive && slot.owner() != Some(req.src) {
                    // the owner may hold the line modified
                    self.inval_cmd = Cmd::InvalRo;
                    self.state = FsmState::Inval;
                } else {
                    self.state = FsmState::RspRead;
                }
            }
            FsmState::RspRead => {
                let req = self.current()?;
                let slot = self.ram.slot_mut(self.line)?;
                slot.add_copy(req.src);
                let cmd = if slot.nb_copies() == 1 {
                    slot.set_exclusive(self.line)?;
                    Cmd::RspReadLineEx
                } else {
                    slot.set_valid();
                    Cmd::RspReadLine
                };
                let data = self.ram.get_line(self.line)?;
                self.send_response(&req, cmd, data)?;
                self.finish();
            }
            FsmState::WriteLine => {
                let req = self.current()?;
                if self.ram.slot(self.line)?.has_copy(req.src) {
                    self.ram.write_line(self.line, &req.data)?;
                } else {
                    // an invalidation ack already brought this data back
                    debug!("{} drops stale write-back of {} from {}", self.name, self.line, req.src);
                }
                self.state = FsmState::DirUpdate;
            }
            FsmState::GetM => {
                let req = self.current()?;
                if self.ram.slot(self.line)?.has_other_copy(req.src) {
                    self.inval_cmd = Cmd::Inval;
                    self.state = FsmState::Inval;
                } else {
                    self.state = FsmState::DirUpdate;
                }
            }
            FsmState::Inval => {
                let req = self.current()?;
                self.req_copies = self.ram.slot(self.line)?.sharers().without(req.src);
                self.rsp_copies.clear();
                self.state = if self.req_copies.is_empty() {
                    self.after_inval(&req)
                } else {
                    FsmState::InvalSend
                };
            }
            FsmState::InvalSend => {
                let Some(target) = self.req_copies.pop_next() else {
                    return Err(usage(&self.name, self.cycle, self.state, "no sharer left to invalidate"));
                };
                let inval = Message::new(self.line, self.id, Some(target), self.inval_cmd, self.cycle);
                send(&self.ports.coh_req, &self.name, inval)?;
                self.rsp_copies.insert(target);
                if self.req_copies.is_empty() {
                    self.state = FsmState::InvalWait;
                }
            }
            FsmState::InvalWait => {
                if self.rsp_copies.is_empty() {
                    let req = self.current()?;
                    self.state = self.after_inval(&req);
                }
            }
            FsmState::DirUpdate => {
                let req = self.current()?;
                match req.cmd {
                    Cmd::WriteLine => {
                        self.ram.slot_mut(self.line)?.remove_copy(req.src);
                        self.send_response(&req, Cmd::RspWriteLine, Vec::new())?;
                        self.finish();
                    }
                    _ => {
                        let slot = self.ram.slot_mut(self.line)?;
                        self.requester_had_copy = slot.has_copy(req.src);
                        slot.remove_all_copies();
                        slot.add_copy(req.src);
                        slot.set_exclusive(self.line)?;
                        self.state = FsmState::RspGetM;
                    }
                }
            }
            FsmState::RspGetM => {
                let req = self.current()?;
                // a GETM whose shared copy was invalidated meanwhile needs the line
                if req.cmd == Cmd::GetM && self.requester_had_copy {
                    self.send_response(&req, Cmd::RspGetM, Vec::new())?;
                } else {
                    let data = self.ram.get_line(self.line)?;
                    self.send_response(&req, Cmd::RspGetMLine, data)?;
                }
                self.finish();
            }
        }
        Ok(())
    }

    fn after_inval(&self, req: &Message) -> FsmState {
        match req.cmd {
            Cmd::ReadLine => FsmState::RspRead,
            _ => FsmState::DirUpdate,
        }
    }

    fn finish(&mut self) {
        self.req = None;
        self.inval_cmd = Cmd::Nop;
        self.requester_had_copy = false;
        self.state = FsmState::Idle;
    }

    /// takes in one invalidation ack, if any
    fn rsp_fsm(&mut self) -> SimResult<()> {
        let Some(rsp) = receive(&self.ports.coh_rsp, self.id, &self.name)? else {
            return Ok(());
        };
        let expected = match self.inval_cmd {
            Cmd::Inval => matches!(rsp.cmd, Cmd::RspInvalClean | Cmd::RspInvalDirty),
            Cmd::InvalRo => matches!(rsp.cmd, Cmd::RspInvalRoClean | Cmd::RspInvalRoDirty),
            _ => false,
        };
        if !expected || rsp.addr != self.line || !self.rsp_copies.contains(rsp.src) {
            return Err(self.violation(&rsp));
        }
        if rsp.cmd.is_dirty_ack() {
            debug!("{} takes back dirty line {} from {}", self.name, self.line, rsp.src);
            self.ram.write_line(self.line, &rsp.data)?;
        }
        if self.inval_cmd == Cmd::Inval {
            self.ram.slot_mut(self.line)?.remove_copy(rsp.src);
        }
        self.rsp_copies.remove(rsp.src);
        Ok(())
    }
}

impl Component for MemMesiController {
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

impl MemController for MemMesiController {
    fn ram(&self) -> &Ram {
        &self.ram
    }
    fn ram_mut(&mut self) -> &mut Ram {
        &mut self.ram
    }
}
