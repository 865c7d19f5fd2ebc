mod mesi;
mod wti;

pub use mesi::MemMesiController;
pub use wti::MemWtiController;

use crate::channel::ChannelRef;
use crate::component::Component;
use crate::directory::Ram;

/// Channels a memory controller is attached to.
#[derive(Clone)]
pub struct MemPorts {
    pub direct_req: ChannelRef, // line requests, routed here by segment
    pub direct_rsp: ChannelRef, // grants and write acks
    pub coh_req: ChannelRef,    // invalidations to caches
    pub coh_rsp: ChannelRef,    // their acks
}

/// Home side controller of either protocol.
pub trait MemController: Component {
    fn ram(&self) -> &Ram;
    /// for preloading memory images before the run
    fn ram_mut(&mut self) -> &mut Ram;
}
