use cachesim_dir::channel::Channel;
use cachesim_dir::common::{Addr, SegmentSpec};
use cachesim_dir::error::ChannelError;
use cachesim_dir::message::{Cmd, Message};

fn msg(addr: u32, target: Option<u32>, cmd: Cmd) -> Message {
    Message::new(Addr(addr), 0, target, cmd, 0)
}

#[test]
fn test_delayed_queue() {
    let mut ch = Channel::by_target("rsp", [1, 2]);

    ch.push(msg(0x0, Some(1), Cmd::RspReadWord)).unwrap();
    ch.push(msg(0x4, Some(1), Cmd::RspWriteWord)).unwrap();
    ch.push(msg(0x8, Some(2), Cmd::RspReadWord)).unwrap();

    // nothing is visible in the cycle it was pushed in
    assert!(ch.is_empty(1));
    assert!(ch.front(1).is_err());
    assert_eq!(ch.len(), 3);

    ch.update_time(1);
    assert_eq!(ch.front(1).unwrap().addr, Addr(0x0));
    assert_eq!(ch.pop(1).unwrap().cmd, Cmd::RspReadWord);

    // appended while draining: waits for the next cycle
    ch.push(msg(0xc, Some(1), Cmd::RspReadWord)).unwrap();
    assert_eq!(ch.pop(1).unwrap().addr, Addr(0x4));
    assert!(ch.is_empty(1));
    assert_eq!(ch.pending(1).count(), 1);

    ch.update_time(2);
    assert_eq!(ch.pop(1).unwrap().addr, Addr(0xc));
    assert_eq!(ch.pop(2).unwrap().addr, Addr(0x8));
    assert!(ch.is_drained());
}

#[test]
fn routes_by_segment() {
    let mut ch = Channel::by_address("req", vec![
        (SegmentSpec::new(0x000, 0x100), 10),
        (SegmentSpec::new(0x100, 0x100), 11),
    ]);
    ch.push(msg(0x0c0, None, Cmd::ReadLine)).unwrap();
    ch.push(msg(0x140, None, Cmd::ReadLine)).unwrap();
    ch.push(msg(0x1fc, None, Cmd::WriteLine)).unwrap();
    ch.update_time(1);
    assert_eq!(ch.pop(10).unwrap().addr, Addr(0x0c0));
    assert_eq!(ch.pop(11).unwrap().addr, Addr(0x140));
    assert_eq!(ch.pop(11).unwrap().addr, Addr(0x1fc));

    assert!(matches!(ch.push(msg(0x200, None, Cmd::ReadLine)), Err(ChannelError::NoSegment { .. })));
}

#[test]
fn rejects_unroutable_and_nop() {
    let mut ch = Channel::by_target("coh", [3]);
    assert!(matches!(ch.push(msg(0, Some(4), Cmd::Inval)), Err(ChannelError::NoTarget { target: 4, .. })));
    assert!(matches!(ch.push(msg(0, None, Cmd::Inval)), Err(ChannelError::NoTarget { .. })));
    assert!(matches!(ch.push(msg(0, Some(3), Cmd::Nop)), Err(ChannelError::NotTransmittable { .. })));
    assert!(matches!(ch.pop(3), Err(ChannelError::Empty { consumer: 3, .. })));
}

#[test]
fn records_history_when_asked() {
    let mut ch = Channel::by_target("coh", [3]);
    ch.push(msg(0, Some(3), Cmd::Inval)).unwrap();
    ch.set_recording(true);
    ch.push(msg(0x10, Some(3), Cmd::InvalRo)).unwrap();
    let cmds: Vec<Cmd> = ch.history().iter().map(|m| m.cmd).collect();
    assert_eq!(cmds, vec![Cmd::InvalRo]);
}
