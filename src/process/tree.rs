// src/process/tree.rs

//! Process-table helpers: descendant discovery, per-PID CPU ticks and
//! signal delivery.
//!
//! Discovery reads `<proc_root>/<pid>/stat` for every numeric entry, so the
//! same code runs against a fake tree in tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::Path;

use tracing::{debug, warn};

/// Fields of `/proc/<pid>/stat` that we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcStat {
    pub pid: u32,
    pub ppid: u32,
    /// User + system time in clock ticks.
    pub cpu_ticks: u64,
}

/// Parse one `stat` line.
///
/// The command name sits in parentheses and may itself contain spaces or
/// parentheses, so fields are counted from the last `)`.
pub fn parse_stat_line(line: &str) -> Option<ProcStat> {
    let open = line.find('(')?;
    let close = line.rfind(')')?;
    let pid: u32 = line[..open].trim().parse().ok()?;

    // After ")" the fields start at `state` (field 3 of the man page).
    let rest: Vec<&str> = line[close + 1..].split_whitespace().collect();
    let ppid: u32 = rest.get(1)?.parse().ok()?;
    let utime: u64 = rest.get(11)?.parse().ok()?;
    let stime: u64 = rest.get(12)?.parse().ok()?;

    Some(ProcStat {
        pid,
        ppid,
        cpu_ticks: utime + stime,
    })
}

pub fn read_stat(pid: u32, proc_root: &Path) -> Option<ProcStat> {
    let path = proc_root.join(pid.to_string()).join("stat");
    let line = std::fs::read_to_string(path).ok()?;
    parse_stat_line(&line)
}

/// Snapshot the parent -> children mapping of the whole process table.
fn children_map(proc_root: &Path) -> io::Result<HashMap<u32, Vec<u32>>> {
    let mut map: HashMap<u32, Vec<u32>> = HashMap::new();

    for entry in std::fs::read_dir(proc_root)? {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name();
        let Ok(pid) = name.to_string_lossy().parse::<u32>() else {
            continue;
        };
        // Processes can vanish between readdir and open.
        if let Some(stat) = read_stat(pid, proc_root) {
            map.entry(stat.ppid).or_default().push(pid);
        }
    }

    Ok(map)
}

/// `root` followed by every transitive descendant, breadth first.
pub fn descendants(root: u32, proc_root: &Path) -> Vec<u32> {
    let map = match children_map(proc_root) {
        Ok(m) => m,
        Err(e) => {
            warn!(root, error = %e, "failed to scan process table");
            return vec![root];
        }
    };

    let mut out = Vec::new();
    let mut seen: HashSet<u32> = HashSet::new();
    let mut queue = VecDeque::from([root]);

    while let Some(pid) = queue.pop_front() {
        if !seen.insert(pid) {
            continue;
        }
        out.push(pid);
        if let Some(kids) = map.get(&pid) {
            queue.extend(kids.iter().copied());
        }
    }

    out
}

/// Clock ticks per second used by `stat` CPU fields.
pub fn clock_ticks() -> f64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as f64 } else { 100.0 }
}

/// Signal a whole process group. A group that is already gone is not an error.
pub fn signal_group(pgid: u32, signal: i32) -> io::Result<()> {
    deliver(-(pgid as i32), signal)
}

/// Signal one process. A process that is already gone is not an error.
pub fn signal_pid(pid: u32, signal: i32) -> io::Result<()> {
    deliver(pid as i32, signal)
}

fn deliver(target: i32, signal: i32) -> io::Result<()> {
    let rc = unsafe { libc::kill(target, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}

/// SIGKILL `root` and every descendant individually.
///
/// Descendants are collected before any signal is sent so that reparenting
/// of orphans does not hide them.
pub fn kill_tree(root: u32, proc_root: &Path) {
    let pids = descendants(root, proc_root);
    debug!(root, count = pids.len(), "sending SIGKILL to process tree");
    for pid in pids {
        if let Err(e) = signal_pid(pid, libc::SIGKILL) {
            warn!(pid, error = %e, "SIGKILL failed");
        }
    }
}
