use cachesim_dir::cache::LineState;
use cachesim_dir::common::{Addr, Protocol, SegmentSpec, SystemSpec};
use cachesim_dir::directory::DirState;
use cachesim_dir::message::Cmd;
use cachesim_dir::processor::{Instr, Insts};
use cachesim_dir::topology::Simulator;

// two processors, one memory: procs 0 and 1, caches 2 and 3, memory 4
const C0: u32 = 2;
const C1: u32 = 3;
const MEM: u32 = 4;

const L: Addr = Addr(0x40);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn spec(protocol: Protocol) -> SystemSpec {
    SystemSpec {
        protocol,
        words_per_line: 4,
        cache_sets: 2,
        cache_ways: 2,
        check_invariants: true,
        max_cycles: 10_000,
        ..Default::default()
    }
}

fn system(spec: SystemSpec, programs: Vec<Vec<Instr>>) -> Simulator {
    init_logger();
    let mut sim = Simulator::new(
        spec,
        &[vec![SegmentSpec::new(0, 0x1000)]],
        programs.into_iter().map(Insts::from).collect(),
    )
    .unwrap();
    sim.set_recording(true);
    sim
}

fn simulator(spec: SystemSpec, p0: Vec<Instr>, p1: Vec<Instr>) -> Simulator {
    system(spec, vec![p0, p1])
}

fn cmds(sim: &Simulator, channel: &str) -> Vec<Cmd> {
    sim.history(channel).iter().map(|m| m.cmd).collect()
}

// (command, target) of every coherence request
fn invals(sim: &Simulator) -> Vec<(Cmd, Option<u32>)> {
    sim.history("coh_req").iter().map(|m| (m.cmd, m.target)).collect()
}

#[test]
fn first_read_is_granted_exclusive() {
    let mut sim = simulator(spec(Protocol::Mesi), vec![Instr::Read(Addr(0x44))], vec![]);
    sim.poke_word(Addr(0x44), 0xabc).unwrap();
    sim.run().unwrap();

    let req = sim.history("direct_req");
    assert_eq!(req.len(), 1);
    assert_eq!((req[0].cmd, req[0].addr, req[0].src), (Cmd::ReadLine, L, C0));
    let rsp = sim.history("direct_rsp");
    assert_eq!(rsp.len(), 1);
    assert_eq!((rsp[0].cmd, rsp[0].target), (Cmd::RspReadLineEx, Some(C0)));
    assert_eq!(rsp[0].data, vec![0, 0xabc, 0, 0]);

    assert_eq!(sim.l1(0).cache().read_directory(L), LineState::Exclusive);
    assert_eq!(sim.mem(0).ram().slot(L).unwrap().owner(), Some(C0));
    assert_eq!(sim.processor(0).reads(), &[(Addr(0x44), 0xabc)]);
    assert!(invals(&sim).is_empty());
}

#[test]
fn second_reader_downgrades_the_owner() {
    let mut sim = simulator(
        spec(Protocol::Mesi),
        vec![Instr::Read(L)],
        vec![Instr::Other(20), Instr::Read(Addr(0x44))],
    );
    sim.run().unwrap();

    assert_eq!(invals(&sim), vec![(Cmd::InvalRo, Some(C0))]);
    let acks = sim.history("coh_rsp");
    assert_eq!(acks.len(), 1);
    assert_eq!((acks[0].cmd, acks[0].src, acks[0].target), (Cmd::RspInvalRoClean, C0, Some(MEM)));
    assert_eq!(cmds(&sim, "direct_rsp"), vec![Cmd::RspReadLineEx, Cmd::RspReadLine]);

    let slot = sim.mem(0).ram().slot(L).unwrap();
    assert_eq!(slot.state(), DirState::Valid);
    assert_eq!(slot.sharers().iter().collect::<Vec<_>>(), vec![C0, C1]);
    assert_eq!(sim.l1(0).cache().read_directory(L), LineState::Shared);
    assert_eq!(sim.l1(1).cache().read_directory(L), LineState::Shared);
}

#[test]
fn upgrade_invalidates_the_other_sharer() {
    let mut sim = simulator(
        spec(Protocol::Mesi),
        vec![Instr::Read(L), Instr::Other(60), Instr::Write(L, 7)],
        vec![Instr::Other(20), Instr::Read(Addr(0x44))],
    );
    sim.run().unwrap();

    assert_eq!(cmds(&sim, "direct_req"), vec![Cmd::ReadLine, Cmd::ReadLine, Cmd::GetM]);
    assert_eq!(invals(&sim), vec![(Cmd::InvalRo, Some(C0)), (Cmd::Inval, Some(C1))]);
    assert_eq!(cmds(&sim, "coh_rsp"), vec![Cmd::RspInvalRoClean, Cmd::RspInvalClean]);
    assert_eq!(cmds(&sim, "direct_rsp"), vec![Cmd::RspReadLineEx, Cmd::RspReadLine, Cmd::RspGetM]);

    let slot = sim.mem(0).ram().slot(L).unwrap();
    assert_eq!(slot.state(), DirState::Exclusive);
    assert_eq!(slot.owner(), Some(C0));
    assert_eq!(sim.l1(0).cache().read_directory(L), LineState::Modified);
    assert_eq!(sim.l1(1).cache().read_directory(L), LineState::Invalid);

    // the write lives in the cache only
    assert_eq!(sim.peek_word(L).unwrap(), 7);
    assert_eq!(sim.mem(0).ram().read_word(L).unwrap(), 0);
}

#[test]
fn dirty_victim_is_written_back_before_the_refill() {
    // one way per set: lines 0x00 and 0x20 compete for set 0
    let spec = SystemSpec { cache_ways: 1, ..spec(Protocol::Mesi) };
    let mut sim = simulator(spec, vec![Instr::Write(Addr(0x00), 5), Instr::Read(Addr(0x24))], vec![]);
    sim.run().unwrap();

    let req = sim.history("direct_req");
    let seq: Vec<_> = req.iter().map(|m| (m.cmd, m.addr)).collect();
    assert_eq!(seq, vec![
        (Cmd::GetMLine, Addr(0x00)),
        (Cmd::WriteLine, Addr(0x00)),
        (Cmd::ReadLine, Addr(0x20)),
    ]);
    assert_eq!(req[1].data, vec![5, 0, 0, 0]);
    assert_eq!(cmds(&sim, "direct_rsp"), vec![Cmd::RspGetMLine, Cmd::RspWriteLine, Cmd::RspReadLineEx]);

    assert_eq!(sim.mem(0).ram().read_word(Addr(0x00)).unwrap(), 5);
    assert_eq!(sim.mem(0).ram().slot(Addr(0x00)).unwrap().state(), DirState::Invalid);
    assert_eq!(sim.l1(0).cache().read_directory(Addr(0x00)), LineState::Invalid);
    assert_eq!(sim.l1(0).cache().read_directory(Addr(0x20)), LineState::Exclusive);
}

#[test]
fn reader_gets_the_modified_data() {
    let mut sim = simulator(
        spec(Protocol::Mesi),
        vec![Instr::Write(Addr(0x48), 9)],
        vec![Instr::Other(30), Instr::Read(Addr(0x48))],
    );
    sim.run().unwrap();

    assert_eq!(invals(&sim), vec![(Cmd::InvalRo, Some(C0))]);
    let acks = sim.history("coh_rsp");
    assert_eq!(acks[0].cmd, Cmd::RspInvalRoDirty);
    assert_eq!(acks[0].data, vec![0, 0, 9, 0]);
    assert_eq!(sim.processor(1).reads(), &[(Addr(0x48), 9)]);
    assert_eq!(sim.mem(0).ram().read_word(Addr(0x48)).unwrap(), 9);
    assert_eq!(sim.l1(0).cache().read_directory(L), LineState::Shared);
}

#[test]
fn writer_takes_a_modified_line_away() {
    let mut sim = simulator(
        spec(Protocol::Mesi),
        vec![Instr::Write(L, 1)],
        vec![Instr::Other(30), Instr::Write(Addr(0x44), 2), Instr::Read(L)],
    );
    sim.run().unwrap();

    assert_eq!(invals(&sim), vec![(Cmd::Inval, Some(C0))]);
    assert_eq!(cmds(&sim, "coh_rsp"), vec![Cmd::RspInvalDirty]);
    assert_eq!(cmds(&sim, "direct_rsp"), vec![Cmd::RspGetMLine, Cmd::RspGetMLine]);
    assert_eq!(sim.processor(1).reads(), &[(L, 1)]);
    assert_eq!(sim.l1(1).cache().read(L).unwrap().0, &[1, 2, 0, 0]);
    assert_eq!(sim.l1(0).cache().read_directory(L), LineState::Invalid);
}

#[test]
fn programs_can_be_extended_after_a_run() {
    let mut sim = simulator(spec(Protocol::Mesi), vec![Instr::Write(L, 5)], vec![]);
    let first = sim.run().unwrap();
    assert!(sim.processor(1).reads().is_empty());

    sim.processor_mut(0).push_instr(Instr::Write(Addr(0x44), 6));
    sim.processor_mut(1).push_instr(Instr::Read(L));
    sim.processor_mut(1).push_instr(Instr::Other(40));
    sim.processor_mut(1).push_instr(Instr::Read(Addr(0x44)));
    assert!(!sim.is_done());
    assert!(sim.run().unwrap() > first);

    assert_eq!(sim.processor(1).reads(), &[(L, 5), (Addr(0x44), 6)]);
    assert_eq!(sim.processor(0).stats().stores, 2);
    assert!(sim.is_done());
}

#[test]
fn queued_upgrade_that_lost_its_copy_gets_the_line() {
    // both caches share L, then both write it in the same cycle
    let mut sim = simulator(
        spec(Protocol::Mesi),
        vec![Instr::Read(L)],
        vec![Instr::Other(20), Instr::Read(Addr(0x44))],
    );
    sim.run().unwrap();
    assert_eq!(sim.l1(0).cache().read_directory(L), LineState::Shared);
    assert_eq!(sim.l1(1).cache().read_directory(L), LineState::Shared);

    sim.processor_mut(0).push_instr(Instr::Write(L, 1));
    sim.processor_mut(1).push_instr(Instr::Write(Addr(0x44), 2));
    sim.run().unwrap();

    // both ask for ownership only; C0 is served first and invalidates C1
    let req = sim.history("direct_req");
    let seq: Vec<_> = req.iter().map(|m| (m.cmd, m.src)).collect();
    assert_eq!(seq, vec![(Cmd::ReadLine, C0), (Cmd::ReadLine, C1), (Cmd::GetM, C0), (Cmd::GetM, C1)]);
    assert_eq!(invals(&sim), vec![(Cmd::InvalRo, Some(C0)), (Cmd::Inval, Some(C1)), (Cmd::Inval, Some(C0))]);
    assert_eq!(cmds(&sim, "coh_rsp"), vec![Cmd::RspInvalRoClean, Cmd::RspInvalClean, Cmd::RspInvalDirty]);

    // C1's copy is gone by the time its GETM is served, so it gets the data
    let rsp = sim.history("direct_rsp");
    let last = rsp.last().unwrap();
    assert_eq!((last.cmd, last.target), (Cmd::RspGetMLine, Some(C1)));
    assert_eq!(last.data, vec![1, 0, 0, 0]);
    assert_eq!(rsp[2].cmd, Cmd::RspGetM);

    let (data, state) = sim.l1(1).cache().read(L).unwrap();
    assert_eq!((data, state), (&[1, 2, 0, 0][..], LineState::Modified));
    assert_eq!(sim.l1(0).cache().read_directory(L), LineState::Invalid);
    assert_eq!(sim.mem(0).ram().slot(L).unwrap().owner(), Some(C1));
}

#[test]
fn write_back_overtaken_by_an_invalidation() {
    // one way per set: L (0x40) and X (0x60) compete for set 0
    const X: Addr = Addr(0x60);
    let spec = SystemSpec { cache_ways: 1, ..spec(Protocol::Mesi) };
    let mut sim = system(spec, vec![vec![Instr::Write(L, 1)], vec![], vec![]]);
    sim.run().unwrap();
    let (c0, c1, c2) = (sim.ids().cache_id(0), sim.ids().cache_id(1), sim.ids().cache_id(2));
    assert_eq!(sim.l1(0).cache().read_directory(L), LineState::Modified);

    // C0 evicts L while C1 wants to write it and C2 to read it; their
    // requests reach memory ahead of C0's write-back
    sim.processor_mut(0).push_instr(Instr::Read(X));
    sim.processor_mut(1).push_instr(Instr::Write(Addr(0x44), 2));
    sim.processor_mut(2).push_instr(Instr::Read(Addr(0x44)));
    sim.run().unwrap();

    let req = sim.history("direct_req");
    let seq: Vec<_> = req.iter().map(|m| (m.cmd, m.src, m.addr)).collect();
    assert_eq!(seq, vec![
        (Cmd::GetMLine, c0, L),
        (Cmd::GetMLine, c1, L),
        (Cmd::ReadLine, c2, L),
        (Cmd::WriteLine, c0, L),
        (Cmd::ReadLine, c0, X),
    ]);
    assert_eq!(req[3].data, vec![1, 0, 0, 0]);

    // the line was already gone, the ack carries the write-back data
    let acks = sim.history("coh_rsp");
    let acks: Vec<_> = acks.iter().map(|m| (m.cmd, m.src, m.data.clone())).collect();
    assert_eq!(acks, vec![
        (Cmd::RspInvalDirty, c0, vec![1, 0, 0, 0]),
        (Cmd::RspInvalRoDirty, c1, vec![1, 2, 0, 0]),
    ]);

    // the write-back arrives last and must not bring the old data back
    assert_eq!(sim.mem(0).ram().get_line(L).unwrap(), vec![1, 2, 0, 0]);
    assert_eq!(sim.processor(2).reads(), &[(Addr(0x44), 2)]);
    let slot = sim.mem(0).ram().slot(L).unwrap();
    assert_eq!(slot.sharers().iter().collect::<Vec<_>>(), vec![c1, c2]);
    assert!(sim.history("direct_rsp").iter().any(|m| m.cmd == Cmd::RspWriteLine && m.target == Some(c0)));
    assert_eq!(sim.l1(0).cache().read_directory(X), LineState::Exclusive);
}

// write-through / invalidate

#[test]
fn wti_reads_are_always_shared() {
    let mut sim = simulator(
        spec(Protocol::Wti),
        vec![Instr::Read(L)],
        vec![Instr::Other(20), Instr::Read(L)],
    );
    sim.run().unwrap();

    assert_eq!(cmds(&sim, "direct_rsp"), vec![Cmd::RspReadLine, Cmd::RspReadLine]);
    assert!(invals(&sim).is_empty());
    let slot = sim.mem(0).ram().slot(L).unwrap();
    assert_eq!(slot.sharers().iter().collect::<Vec<_>>(), vec![C0, C1]);
    assert_eq!(sim.l1(0).cache().read_directory(L), LineState::Shared);
    assert_eq!(sim.l1(1).cache().read_directory(L), LineState::Shared);
}

#[test]
fn wti_write_invalidates_other_copies_first() {
    let mut sim = simulator(
        spec(Protocol::Wti),
        vec![Instr::Read(L), Instr::Other(60), Instr::Write(Addr(0x44), 9)],
        vec![Instr::Other(20), Instr::Read(L)],
    );
    sim.run().unwrap();

    assert_eq!(cmds(&sim, "direct_req"), vec![Cmd::ReadLine, Cmd::ReadLine, Cmd::WriteWord]);
    assert_eq!(invals(&sim), vec![(Cmd::Inval, Some(C1))]);
    assert_eq!(cmds(&sim, "coh_rsp"), vec![Cmd::RspInvalClean]);
    assert_eq!(cmds(&sim, "direct_rsp"), vec![Cmd::RspReadLine, Cmd::RspReadLine, Cmd::RspWriteWord]);

    // memory is written at once, the writer keeps an updated copy
    assert_eq!(sim.mem(0).ram().read_word(Addr(0x44)).unwrap(), 9);
    assert_eq!(sim.l1(0).cache().read_word(Addr(0x44)), Some(9));
    assert_eq!(sim.l1(1).cache().read_directory(L), LineState::Invalid);
    let slot = sim.mem(0).ram().slot(L).unwrap();
    assert_eq!(slot.sharers().iter().collect::<Vec<_>>(), vec![C0]);
}

#[test]
fn wti_write_without_a_copy_allocates_nothing() {
    let mut sim = simulator(spec(Protocol::Wti), vec![Instr::Write(L, 3), Instr::Read(L)], vec![]);
    sim.run().unwrap();

    assert_eq!(cmds(&sim, "direct_req"), vec![Cmd::WriteWord, Cmd::ReadLine]);
    assert_eq!(sim.processor(0).reads(), &[(L, 3)]);
    assert_eq!(sim.mem(0).ram().read_word(L).unwrap(), 3);
}
