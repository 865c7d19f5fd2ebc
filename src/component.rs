//! Everything the driver ticks once per cycle implements `Component`.
//!
//! A component reacts only to what it can observe in its input channels at
//! the start of the cycle, and whatever it pushes is observable by the
//! receiver from the next cycle on.

use std::fmt::Debug;

use log::debug;

use crate::channel::ChannelRef;
use crate::common::Id;
use crate::error::{SimError, SimResult};
use crate::message::Message;

pub trait Component {
    fn id(&self) -> Id;
    fn name(&self) -> &str;
    /// advance by one cycle
    fn on_tick(&mut self, cycle: u64) -> SimResult<()>;
    /// no transaction in progress
    fn is_idle(&self) -> bool;
    /// current FSM state, for display
    fn state_name(&self) -> String;
}

pub(crate) fn send(ch: &ChannelRef, who: &str, msg: Message) -> SimResult<()> {
    debug!("{who} sends {msg}");
    ch.borrow_mut().push(msg)?;
    Ok(())
}

/// pops the next visible message for `id`, if any
pub(crate) fn receive(ch: &ChannelRef, id: Id, who: &str) -> SimResult<Option<Message>> {
    let mut ch = ch.borrow_mut();
    if ch.is_empty(id) {
        return Ok(None);
    }
    let msg = ch.pop(id)?;
    debug!("{who} gets {msg}");
    Ok(Some(msg))
}

pub(crate) fn violation(who: &str, cycle: u64, state: impl Debug, msg: &Message) -> SimError {
    SimError::ProtocolViolation {
        component: who.into(),
        cycle,
        state: format!("{state:?}"),
        msg: Box::new(msg.clone()),
    }
}

pub(crate) fn usage(who: &str, cycle: u64, state: impl Debug, detail: &str) -> SimError {
    SimError::Usage {
        component: who.into(),
        cycle,
        state: format!("{state:?}"),
        detail: detail.into(),
    }
}
