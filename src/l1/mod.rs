mod mesi;
mod wti;

pub use mesi::L1MesiController;
pub use wti::L1WtiController;

use crate::cache::L1Cache;
use crate::channel::ChannelRef;
use crate::component::Component;

/// Channels an L1 controller is attached to.
#[derive(Clone)]
pub struct L1Ports {
    pub direct_req: ChannelRef, // misses and write-backs to the home memory
    pub direct_rsp: ChannelRef, // their responses
    pub coh_req: ChannelRef,    // invalidations from memories
    pub coh_rsp: ChannelRef,    // invalidation acks
    pub proc_req: ChannelRef,   // processor requests
    pub proc_rsp: ChannelRef,   // processor responses
}

/// Processor side controller of either protocol.
pub trait L1Controller: Component {
    fn cache(&self) -> &L1Cache;
}
