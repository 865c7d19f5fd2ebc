use std::env;
use std::path::Path;
use std::process;

use env_logger::Env;
use log::{error, info};

use cachesim_dir::common::{Addr, Protocol, SegmentSpec, SystemSpec};
use cachesim_dir::error::SimResult;
use cachesim_dir::processor::{Instr, Insts};
use cachesim_dir::topology::Simulator;
use cachesim_dir::trace::load_traces;

const MEM_SIZE: u32 = 0x10_0000; // bytes, one memory at address 0

// two processors sharing a line, then one of them thrashing its set
fn demo_programs() -> Vec<Insts> {
    vec![
        Insts::from([
            Instr::Read(Addr(0x00)),
            Instr::Write(Addr(0x04), 1),
            Instr::Other(4),
            Instr::Write(Addr(0x200), 2),
            Instr::Write(Addr(0x400), 3),
            Instr::Read(Addr(0x00)),
        ]),
        Insts::from([
            Instr::Other(2),
            Instr::Read(Addr(0x04)),
            Instr::Write(Addr(0x08), 4),
            Instr::Read(Addr(0x200)),
        ]),
    ]
}

fn run() -> SimResult<()> {
    // usage: cachesim-dir [MESI|WTI] [trace name] [trace dir]
    let args: Vec<String> = env::args().collect();
    let protocol = match args.get(1) {
        Some(p) => p.parse::<Protocol>()?,
        None => Protocol::Mesi,
    };
    let programs = match args.get(2) {
        Some(name) => {
            let dir = args.get(3).map(String::as_str).unwrap_or("datasets");
            load_traces(Path::new(dir), name)?
        }
        None => demo_programs(),
    };

    let spec = SystemSpec { protocol, check_invariants: true, ..Default::default() };
    let mut sim = Simulator::new(spec, &[vec![SegmentSpec::new(0, MEM_SIZE)]], programs)?;
    for seg in sim.mem(0).ram().segments() {
        info!("mem0 serves {:#x}..{:#x}", seg.base, seg.base + seg.size);
    }
    if let Err(e) = sim.run() {
        error!("stopped at cycle {}", sim.cycle());
        return Err(e);
    }

    for i in 0..sim.num_procs() {
        let p = sim.processor(i);
        let stats = p.stats();
        info!("proc{i}: {} loads, {} stores, {} cycles ({} waiting for the cache)",
            stats.loads, stats.stores, stats.cycles, stats.idle_cycles);
        for (addr, value) in p.reads() {
            info!("  read {addr} = {value:#x}");
        }
    }
    info!("done, cycles: {}", sim.cycle());
    Ok(())
}

fn main() {
    // logging
    let env = Env::default()
        .filter_or("MY_LOG_LEVEL", "info")
        .write_style_or("MY_LOG_STYLE", "always");
    env_logger::init_from_env(env);

    if let Err(e) = run() {
        error!("{e}");
        process::exit(1);
    }
}
