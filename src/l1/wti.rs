use log::trace;

use super::{L1Controller, L1Ports};
use crate::cache::L1Cache;
use crate::common::{Addr, Id, SystemSpec};
use crate::component::{receive, send, usage, violation, Component};
use crate::error::{SimError, SimResult};
use crate::message::{Cmd, Message};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FsmState {
    Idle,
    Miss,
    MissWait,
    SendWrite,
    WriteWait,
    Inval,
}

/// L1 controller of the write-through/invalidate protocol. Lines are only
/// ever held shared and writes go straight to memory.
pub struct L1WtiController {
    id: Id,
    name: String,
    spec: SystemSpec,
    cycle: u64,
    cache: L1Cache,
    ports: L1Ports,

    state: FsmState,
    prev_state: FsmState,

    iss_req: Option<Message>,
    req: Option<Message>,
    cmd_req: Cmd,
    miss_rsp: Option<Message>,
    rsp_miss_ok: bool,
    rsp_write_ok: bool,
}

impl L1WtiController {
    pub fn new(name: &str, id: Id, spec: SystemSpec, ports: L1Ports) -> Self {
        L1WtiController {
            id,
            name: name.into(),
            spec,
            cycle: 0,
            cache: L1Cache::new(spec),
            ports,
            state: FsmState::Idle,
            prev_state: FsmState::Idle,
            iss_req: None,
            req: None,
            cmd_req: Cmd::Nop,
            miss_rsp: None,
            rsp_miss_ok: false,
            rsp_write_ok: false,
        }
    }

    fn violation(&self, msg: &Message) -> SimError {
        violation(&self.name, self.cycle, self.state, msg)
    }

    fn pending(&self) -> SimResult<Message> {
        self.iss_req
            .clone()
            .ok_or_else(|| usage(&self.name, self.cycle, self.state, "no processor request pending"))
    }

    fn send_iss_response(&mut self, req: &Message, cmd: Cmd, data: u32) -> SimResult<()> {
        let mut rsp = Message::new(req.addr, self.id, Some(req.src), cmd, self.cycle)
            .with_max_duration(0);
        if cmd == Cmd::RspReadWord {
            rsp = rsp.with_data(vec![data]);
        }
        self.iss_req = None;
        send(&self.ports.proc_rsp, &self.name, rsp)
    }

    fn send_request(&self, addr: Addr, cmd: Cmd, data: Vec<u32>, be: u8) -> SimResult<()> {
        let req = Message::new(addr, self.id, None, cmd, self.cycle)
            .with_data(data)
            .with_be(be);
        send(&self.ports.direct_req, &self.name, req)
    }

    fn fsm(&mut self) -> SimResult<()> {
        if self.state != FsmState::Inval {
            if let Some(req) = receive(&self.ports.coh_req, self.id, &self.name)? {
                self.prev_state = self.state;
                self.req = Some(req);
                self.state = FsmState::Inval;
                return Ok(());
            }
        }
        match self.state {
            FsmState::Idle => {
                let Some(req) = receive(&self.ports.proc_req, self.id, &self.name)? else {
                    return Ok(());
                };
                match req.cmd {
                    Cmd::ReadWord => match self.cache.read_word(req.addr) {
                        Some(word) => self.send_iss_response(&req, Cmd::RspReadWord, word)?,
                        None => {
                            self.iss_req = Some(req);
                            self.state = FsmState::Miss;
                        }
                    },
                    Cmd::WriteWord => {
                        self.iss_req = Some(req);
                        self.state = FsmState::SendWrite;
                    }
                    _ => return Err(self.violation(&req)),
                }
            }
            FsmState::Miss => {
                let req = self.pending()?;
                if self.cache.select_victim(req.addr).dirty {
                    return Err(usage(&self.name, self.cycle, self.state, "dirty line in a write-through cache"));
                }
                self.send_request(req.addr.line(&self.spec), Cmd::ReadLine, Vec::new(), 0xf)?;
                self.cmd_req = Cmd::ReadLine;
                self.state = FsmState::MissWait;
            }
            FsmState::MissWait => {
                if self.rsp_miss_ok {
                    self.rsp_miss_ok = false;
                    self.cmd_req = Cmd::Nop;
                    let req = self.pending()?;
                    let offset = req.addr.word_offset(&self.spec);
                    let word = match self.miss_rsp.take().and_then(|r| r.data.get(offset).copied()) {
                        Some(w) => w,
                        None => return Err(usage(&self.name, self.cycle, self.state, "line grant without data")),
                    };
                    self.send_iss_response(&req, Cmd::RspReadWord, word)?;
                    self.state = FsmState::Idle;
                }
            }
            FsmState::SendWrite => {
                let req = self.pending()?;
                self.send_request(req.addr, Cmd::WriteWord, vec![req.word()], req.be)?;
                self.cmd_req = Cmd::WriteWord;
                self.state = FsmState::WriteWait;
            }
            FsmState::WriteWait => {
                if self.rsp_write_ok {
                    self.rsp_write_ok = false;
                    self.cmd_req = Cmd::Nop;
                    let req = self.pending()?;
                    // keep a copy we still hold in step with memory
                    if self.cache.read(req.addr).is_some() {
                        self.cache.write_through(req.addr, req.word(), req.be)?;
                    }
                    self.send_iss_response(&req, Cmd::RspWriteWord, 0)?;
                    self.state = FsmState::Idle;
                }
            }
            FsmState::Inval => {
                let Some(req) = self.req.take() else {
                    return Err(usage(&self.name, self.cycle, self.state, "no coherence request to service"));
                };
                if req.cmd != Cmd::Inval {
                    return Err(self.violation(&req));
                }
                let line = req.addr.line(&self.spec);
                self.cache.invalidate(line, false);
                let ack = Message::new(line, self.id, Some(req.src), Cmd::RspInvalClean, self.cycle);
                send(&self.ports.coh_rsp, &self.name, ack)?;
                self.state = self.prev_state;
            }
        }
        Ok(())
    }

    fn rsp_fsm(&mut self) -> SimResult<()> {
        let Some(rsp) = receive(&self.ports.direct_rsp, self.id, &self.name)? else {
            return Ok(());
        };
        let for_pending = self.iss_req.as_ref().is_some_and(|r| {
            r.addr.line(&self.spec) == rsp.addr.line(&self.spec)
        });
        match rsp.cmd {
            Cmd::RspReadLine if self.cmd_req == Cmd::ReadLine && for_pending && !self.rsp_miss_ok => {
                self.cache.install_line(rsp.addr, &rsp.data, false)?;
                self.miss_rsp = Some(rsp);
                self.rsp_miss_ok = true;
            }
            Cmd::RspWriteWord if self.cmd_req == Cmd::WriteWord && for_pending && !self.rsp_write_ok => {
                self.rsp_write_ok = true;
            }
            _ => return Err(self.violation(&rsp)),
        }
        Ok(())
    }
}

impl Component for L1WtiController {
    fn id(&self) -> Id {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn on_tick(&mut self, cycle: u64) -> SimResult<()> {
        self.cycle = cycle;
        self.fsm()?;
        trace!("{} next state: {:?}", self.name, self.state);
        self.rsp_fsm()
    }
    fn is_idle(&self) -> bool {
        self.state == FsmState::Idle && self.iss_req.is_none()
    }
    fn state_name(&self) -> String {
        format!("{:?}", self.state)
    }
}

impl L1Controller for L1WtiController {
    fn cache(&self) -> &L1Cache {
        &self.cache
    }
}
