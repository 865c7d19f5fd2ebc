// implements a routed message queue with a one cycle propagation delay

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use crate::common::{Id, SegmentSpec};
use crate::error::ChannelError;
use crate::message::{Cmd, Message};

/// Channels are shared by all producers and consumers of one role.
pub type ChannelRef = Rc<RefCell<Channel>>;

/// How a pushed message finds its consumer. Fixed once the channel is built.
#[derive(Clone, Debug)]
pub enum Routing {
    /// by the message's target id
    Target(Vec<Id>),
    /// by the segment covering the message's address
    Address(Vec<(SegmentSpec, Id)>),
}

// timed message type

/*
    `t` is the cycle from which the message may be observed. Pushing stamps it
    with the channel's current time plus one, so nothing sent during a cycle can
    be seen before the next one. Per consumer the stamps are non-decreasing,
    which keeps every queue a plain FIFO.
 */

struct TimedMsg {
    t: u64,
    msg: Message,
}

pub struct Channel {
    name: String,
    routing: Routing,
    time: u64,
    queues: BTreeMap<Id, VecDeque<TimedMsg>>,
    record: bool,
    history: Vec<Message>,
}

impl Channel {
    pub fn new(name: &str, routing: Routing) -> Self {
        let consumers: Vec<Id> = match &routing {
            Routing::Target(ids) => ids.clone(),
            Routing::Address(segs) => segs.iter().map(|(_, id)| *id).collect(),
        };
        let queues = consumers.into_iter().map(|id| (id, VecDeque::new())).collect();
        Channel { name: name.into(), routing, time: 0, queues, record: false, history: Vec::new() }
    }

    pub fn by_target(name: &str, targets: impl IntoIterator<Item = Id>) -> Self {
        Self::new(name, Routing::Target(targets.into_iter().collect()))
    }

    pub fn by_address(name: &str, segments: Vec<(SegmentSpec, Id)>) -> Self {
        Self::new(name, Routing::Address(segments))
    }

    pub fn shared(self) -> ChannelRef {
        Rc::new(RefCell::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn route(&self, msg: &Message) -> Result<Id, ChannelError> {
        match &self.routing {
            Routing::Target(ids) => {
                let target = msg.target.unwrap_or(Id::MAX);
                if ids.contains(&target) {
                    Ok(target)
                } else {
                    Err(ChannelError::NoTarget { channel: self.name.clone(), target })
                }
            }
            Routing::Address(segs) => segs
                .iter()
                .find(|(seg, _)| seg.contains(msg.addr))
                .map(|(_, id)| *id)
                .ok_or(ChannelError::NoSegment { channel: self.name.clone(), addr: msg.addr }),
        }
    }

    /// Queues `msg` for its consumer; it becomes visible next cycle.
    pub fn push(&mut self, msg: Message) -> Result<(), ChannelError> {
        if msg.cmd == Cmd::Nop {
            return Err(ChannelError::NotTransmittable { channel: self.name.clone(), cmd: msg.cmd });
        }
        let consumer = self.route(&msg)?;
        let t = self.time + 1;
        if self.record {
            self.history.push(msg.clone());
        }
        if let Some(q) = self.queues.get_mut(&consumer) {
            q.push_back(TimedMsg { t, msg });
        }
        Ok(())
    }

    /// true if `consumer` has no message it may observe this cycle
    pub fn is_empty(&self, consumer: Id) -> bool {
        self.queues
            .get(&consumer)
            .and_then(|q| q.front())
            .map_or(true, |m| m.t > self.time)
    }

    pub fn front(&self, consumer: Id) -> Result<&Message, ChannelError> {
        if self.is_empty(consumer) {
            return Err(self.empty_err(consumer));
        }
        self.queues
            .get(&consumer)
            .and_then(|q| q.front())
            .map(|m| &m.msg)
            .ok_or_else(|| self.empty_err(consumer))
    }

    pub fn pop(&mut self, consumer: Id) -> Result<Message, ChannelError> {
        if self.is_empty(consumer) {
            return Err(self.empty_err(consumer));
        }
        let err = self.empty_err(consumer);
        self.queues
            .get_mut(&consumer)
            .and_then(|q| q.pop_front())
            .map(|m| m.msg)
            .ok_or(err)
    }

    fn empty_err(&self, consumer: Id) -> ChannelError {
        ChannelError::Empty { channel: self.name.clone(), consumer }
    }

    pub fn update_time(&mut self, new_time: u64) {
        self.time = new_time;
    }

    /// messages queued for `consumer`, including the ones not yet visible
    pub fn pending(&self, consumer: Id) -> impl Iterator<Item = &Message> {
        self.queues.get(&consumer).into_iter().flat_map(|q| q.iter().map(|m| &m.msg))
    }

    /// number of messages in flight over all consumers
    pub fn len(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }

    pub fn is_drained(&self) -> bool {
        self.len() == 0
    }

    /// keep a copy of every pushed message from now on
    pub fn set_recording(&mut self, on: bool) {
        self.record = on;
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }
}
