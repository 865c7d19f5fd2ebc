use log::{debug, trace};

use super::{L1Controller, L1Ports};
use crate::cache::{L1Cache, LineState, Victim};
use crate::common::{Addr, Id, SystemSpec};
use crate::component::{receive, send, usage, violation, Component};
use crate::error::{SimError, SimResult};
use crate::message::{Cmd, Message};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FsmState {
    Idle,
    Miss,
    MissWait,
    WriteUpdate,
    WriteBack,
    Inval,
}

/// L1 controller of the MESI protocol.
///
/// Two independent machines run every cycle: the main FSM, and the response
/// intake that takes in line grants and write-back acks from memory.
pub struct L1MesiController {
    id: Id,
    name: String,
    spec: SystemSpec,
    cycle: u64,
    cache: L1Cache,
    ports: L1Ports,

    state: FsmState,
    prev_state: FsmState,   // where to resume after an invalidation

    // registers kept between states
    iss_req: Option<Message>,   // processor request being served
    req: Option<Message>,       // coherence request being serviced
    cmd_req: Cmd,               // outstanding miss request
    miss_rsp: Option<Message>,  // grant taken in by the response intake
    rsp_miss_ok: bool,
    victim: Addr,               // modified line to evict before the refill
    wb_addr: Addr,              // line of the write-back in flight
    wb_buf: Vec<u32>,           // and its data
    current_wb: bool,           // at most one write-back in flight
}

impl L1MesiController {
    pub fn new(name: &str, id: Id, spec: SystemSpec, ports: L1Ports) -> Self {
        L1MesiController {
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
            victim: Addr(0),
            wb_addr: Addr(0),
            wb_buf: Vec::new(),
            current_wb: false,
        }
    }

    // helper functions

    fn violation(&self, msg: &Message) -> SimError {
        violation(&self.name, self.cycle, self.state, msg)
    }

    fn pending(&self) -> SimResult<Message> {
        self.iss_req
            .clone()
            .ok_or_else(|| usage(&self.name, self.cycle, self.state, "no processor request pending"))
    }

    /// answers the processor request being served
    fn send_iss_response(&mut self, req: &Message, cmd: Cmd, data: u32) -> SimResult<()> {
        let mut rsp = Message::new(req.addr, self.id, Some(req.src), cmd, self.cycle)
            .with_max_duration(0);
        if cmd == Cmd::RspReadWord {
            rsp = rsp.with_data(vec![data]);
        }
        self.iss_req = None;
        send(&self.ports.proc_rsp, &self.name, rsp)
    }

    /// line request to the home memory of `addr`
    fn send_request(&self, addr: Addr, cmd: Cmd, data: Vec<u32>) -> SimResult<()> {
        let req = Message::new(addr.line(&self.spec), self.id, None, cmd, self.cycle).with_data(data);
        send(&self.ports.direct_req, &self.name, req)
    }

    /// ack of a coherence request
    fn send_response(&self, addr: Addr, target: Id, cmd: Cmd, data: Vec<u32>) -> SimResult<()> {
        let rsp = Message::new(addr, self.id, Some(target), cmd, self.cycle).with_data(data);
        send(&self.ports.coh_rsp, &self.name, rsp)
    }

    fn start_write_back(&mut self, victim: Victim) -> SimResult<()> {
        let Some(addr) = victim.addr else {
            return Err(usage(&self.name, self.cycle, self.state, "dirty victim without an address"));
        };
        debug!("{} evicts modified line {}", self.name, addr);
        self.victim = addr;
        self.state = FsmState::WriteBack;
        Ok(())
    }

    // main FSM

    fn fsm(&mut self) -> SimResult<()> {
        // coherence requests are serviced before anything else
        if self.state != FsmState::Inval {
            if let Some(req) = receive(&self.ports.coh_req, self.id, &self.name)? {
                self.prev_state = self.state;
                self.req = Some(req);
                self.state = FsmState::Inval;
                return Ok(());
            }
        }
        match self.state {
            FsmState::Idle => self.on_idle(),
            FsmState::Miss => self.on_miss(),
            FsmState::MissWait => self.on_miss_wait(),
            FsmState::WriteUpdate => self.on_write_update(),
            FsmState::WriteBack => self.on_write_back(),
            FsmState::Inval => self.on_inval(),
        }
    }

    fn on_idle(&mut self) -> SimResult<()> {
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
                if self.cache.read_directory(req.addr).is_owned() {
                    self.cache.write_directory(req.addr, LineState::Modified);
                    self.cache.write(req.addr, req.word(), req.be)?;
                    self.send_iss_response(&req, Cmd::RspWriteWord, 0)?;
                } else {
                    self.iss_req = Some(req);
                    self.state = FsmState::Miss;
                }
            }
            _ => return Err(self.violation(&req)),
        }
        Ok(())
    }

    fn on_miss(&mut self) -> SimResult<()> {
        let req = self.pending()?;
        let addr = req.addr;
        let cmd = match req.cmd {
            Cmd::WriteWord if self.cache.read_directory(addr) == LineState::Shared => Cmd::GetM,
            Cmd::WriteWord => Cmd::GetMLine,
            _ => Cmd::ReadLine,
        };
        if cmd != Cmd::GetM {
            let victim = self.cache.select_victim(addr);
            if victim.dirty {
                return self.start_write_back(victim);
            }
        }
        self.send_request(addr, cmd, Vec::new())?;
        self.cmd_req = cmd;
        self.state = FsmState::MissWait;
        Ok(())
    }

    fn on_write_back(&mut self) -> SimResult<()> {
        if self.current_wb {
            return Ok(());  // previous write-back not acknowledged yet
        }
        match self.cache.read(self.victim) {
            Some((data, LineState::Modified)) => {
                self.wb_addr = self.victim;
                self.wb_buf = data.to_vec();
                self.send_request(self.wb_addr, Cmd::WriteLine, self.wb_buf.clone())?;
                self.cache.invalidate(self.wb_addr, false);
                self.current_wb = true;
            }
            // an invalidation serviced meanwhile already returned the data
            _ => debug!("{} victim {} no longer modified, no write-back", self.name, self.victim),
        }
        self.state = FsmState::Miss;
        Ok(())
    }

    fn on_miss_wait(&mut self) -> SimResult<()> {
        if !self.rsp_miss_ok {
            return Ok(());
        }
        self.rsp_miss_ok = false;
        let req = self.pending()?;
        let cmd_req = std::mem::replace(&mut self.cmd_req, Cmd::Nop);
        let rsp = self.miss_rsp.take();
        match cmd_req {
            Cmd::GetM | Cmd::GetMLine => self.state = FsmState::WriteUpdate,
            _ => {
                let offset = req.addr.word_offset(&self.spec);
                let word = match rsp.as_ref().and_then(|r| r.data.get(offset)) {
                    Some(w) => *w,
                    None => return Err(usage(&self.name, self.cycle, self.state, "line grant without data")),
                };
                self.send_iss_response(&req, Cmd::RspReadWord, word)?;
                self.state = FsmState::Idle;
            }
        }
        Ok(())
    }

    fn on_write_update(&mut self) -> SimResult<()> {
        let req = self.pending()?;
        if self.cache.read_directory(req.addr).is_owned() {
            self.cache.write_directory(req.addr, LineState::Modified);
            self.cache.write(req.addr, req.word(), req.be)?;
            self.send_iss_response(&req, Cmd::RspWriteWord, 0)?;
            self.state = FsmState::Idle;
        } else {
            // ownership was taken away between the grant and the write
            debug!("{} lost ownership of {} before writing, retrying", self.name, req.addr);
            self.state = FsmState::Miss;
        }
        Ok(())
    }

    fn on_inval(&mut self) -> SimResult<()> {
        let Some(req) = self.req.take() else {
            return Err(usage(&self.name, self.cycle, self.state, "no coherence request to service"));
        };
        let line = req.addr.line(&self.spec);
        let (dirty, data) = match self.cache.read(line) {
            Some((data, state)) => (state == LineState::Modified, data.to_vec()),
            None if self.current_wb && self.wb_addr == line => (true, self.wb_buf.clone()),
            None => (false, Vec::new()),
        };
        let ack = match req.cmd {
            Cmd::Inval => {
                self.cache.invalidate(line, false);
                if dirty { Cmd::RspInvalDirty } else { Cmd::RspInvalClean }
            }
            Cmd::InvalRo => {
                self.cache.downgrade(line);
                if dirty { Cmd::RspInvalRoDirty } else { Cmd::RspInvalRoClean }
            }
            _ => return Err(self.violation(&req)),
        };
        self.send_response(line, req.src, ack, if dirty { data } else { Vec::new() })?;
        self.state = self.prev_state;
        Ok(())
    }

    // response intake, equivalent to a 1-state FSM running in parallel

    fn rsp_fsm(&mut self) -> SimResult<()> {
        let Some(rsp) = receive(&self.ports.direct_rsp, self.id, &self.name)? else {
            return Ok(());
        };
        match rsp.cmd {
            Cmd::RspReadLine | Cmd::RspReadLineEx | Cmd::RspGetM | Cmd::RspGetMLine => {
                let expected = match self.cmd_req {
                    Cmd::ReadLine => matches!(rsp.cmd, Cmd::RspReadLine | Cmd::RspReadLineEx),
                    Cmd::GetM => matches!(rsp.cmd, Cmd::RspGetM | Cmd::RspGetMLine),
                    Cmd::GetMLine => rsp.cmd == Cmd::RspGetMLine,
                    _ => false,
                };
                let for_pending = self
                    .iss_req
                    .as_ref()
                    .is_some_and(|r| r.addr.line(&self.spec) == rsp.addr);
                if !expected || !for_pending || self.rsp_miss_ok {
                    return Err(self.violation(&rsp));
                }
                // fill right away so that a later invalidation finds the line
                match rsp.cmd {
                    Cmd::RspGetM => {
                        if self.cache.read_directory(rsp.addr) == LineState::Invalid {
                            return Err(self.violation(&rsp));
                        }
                        self.cache.write_directory(rsp.addr, LineState::Exclusive);
                    }
                    cmd => self.cache.install_line(rsp.addr, &rsp.data, cmd != Cmd::RspReadLine)?,
                }
                self.miss_rsp = Some(rsp);
                self.rsp_miss_ok = true;
            }
            Cmd::RspWriteLine => {
                if !self.current_wb || rsp.addr != self.wb_addr {
                    return Err(self.violation(&rsp));
                }
                self.current_wb = false;
            }
            _ => return Err(self.violation(&rsp)),
        }
        Ok(())
    }
}

impl Component for L1MesiController {
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
        self.state == FsmState::Idle && !self.current_wb && self.iss_req.is_none()
    }
    fn state_name(&self) -> String {
        format!("{:?}", self.state)
    }
}

impl L1Controller for L1MesiController {
    fn cache(&self) -> &L1Cache {
        &self.cache
    }
}
