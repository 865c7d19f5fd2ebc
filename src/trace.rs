// reads processor programs from text traces
//
//   <kind> <hex addr> [hex value]
//
// kind 0 reads, 1 writes `value` (0 when omitted), 2 computes for `addr` cycles.
// Blank lines and `#` comments are skipped.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::common::Addr;
use crate::error::{SimError, SimResult};
use crate::processor::{Instr, Insts};

fn parse_hex(s: &str) -> Option<u32> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u32::from_str_radix(digits, 16).ok()
}

/// Parses one program. `path` is only used in error messages.
pub fn parse_trace(path: &Path, text: &str) -> SimResult<Insts> {
    let err = |line: usize, detail: String| SimError::Trace { path: path.to_path_buf(), line, detail };
    let mut insts = Insts::new();
    for (n, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let kind = parts.next().unwrap_or("");
        let Some(val) = parts.next().and_then(parse_hex) else {
            return Err(err(n + 1, format!("missing or malformed hex operand in '{line}'")));
        };
        let value = match parts.next() {
            Some(v) => parse_hex(v).ok_or_else(|| err(n + 1, format!("malformed value '{v}'")))?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(err(n + 1, format!("trailing fields in '{line}'")));
        }
        insts.push_back(match kind {
            "0" => Instr::Read(Addr(val)),
            "1" => Instr::Write(Addr(val), value),
            "2" => Instr::Other(val),
            _ => return Err(err(n + 1, format!("invalid instruction kind '{kind}'"))),
        });
    }
    Ok(insts)
}

/// Reads every `<name>*.data` file of `dir`, one program per file, ordered
/// by file name.
pub fn load_traces(dir: &Path, name: &str) -> SimResult<Vec<Insts>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.file_name()
                .and_then(|f| f.to_str())
                .is_some_and(|f| f.starts_with(name) && f.ends_with(".data"))
        })
        .collect();
    paths.sort();
    paths
        .iter()
        .map(|p| {
            info!("reading file: {}", p.display());
            parse_trace(p, &fs::read_to_string(p)?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_kinds() {
        let text = "# warm up\n0 0x40\n1 0x44 0xdead\n\n2 0xa  # think\n1 48\n";
        let insts = parse_trace(Path::new("t.data"), text).unwrap();
        assert_eq!(
            insts.into_iter().collect::<Vec<_>>(),
            vec![
                Instr::Read(Addr(0x40)),
                Instr::Write(Addr(0x44), 0xdead),
                Instr::Other(10),
                Instr::Write(Addr(0x48), 0),
            ]
        );
    }

    #[test]
    fn reports_the_bad_line() {
        let err = parse_trace(Path::new("t.data"), "0 0x0\n7 0x4\n").unwrap_err();
        match err {
            SimError::Trace { line, .. } => assert_eq!(line, 2),
            e => panic!("unexpected error {e}"),
        }
        assert!(parse_trace(Path::new("t.data"), "0 zz\n").is_err());
        assert!(parse_trace(Path::new("t.data"), "1 0x0 0x1 0x2\n").is_err());
    }
}
