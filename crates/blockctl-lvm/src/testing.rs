//! In-memory stand-in for the host tools
//!
//! [`FakeRunner`] answers the commands the controller issues with the
//! behaviour of the real tools, keeping loop devices, LVM objects, tgt
//! targets and vblade daemons in memory. Logical volumes are regular
//! files under the fake LVM root so copies and sizes can be checked.
//! `dd` and LVM snapshots only copy the first [`COPY_PREFIX`] bytes and
//! extend the target to the source length, which keeps sparse GiB-sized
//! test volumes cheap.

use crate::runner::{CommandOutput, CommandRunner};
use blockctl_common::LVM_HEADER_LENGTH;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Bytes actually copied by the fake `dd` and snapshot
pub const COPY_PREFIX: u64 = 1024 * 1024;

const DEFAULT_LOOP_DEVICES: usize = 8;

enum Matcher {
    Tool(String),
    Arg(String),
}

impl Matcher {
    fn matches(&self, args: &[String]) -> bool {
        match self {
            Self::Tool(tool) => args.first() == Some(tool),
            Self::Arg(arg) => args.iter().any(|a| a == arg),
        }
    }
}

#[derive(Default)]
struct State {
    loops: Vec<Option<PathBuf>>,
    pvs: BTreeSet<String>,
    vgs: BTreeMap<String, Vec<String>>,
    targets: BTreeMap<u32, BTreeSet<u32>>,
    accounts: BTreeSet<String>,
    daemons: BTreeMap<u32, String>,
    next_pid: u32,
    daemons_die: bool,
    calls: Vec<Vec<String>>,
    overrides: Vec<(Matcher, CommandOutput)>,
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        status: Some(0),
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

fn fail(status: i32, stderr: impl Into<String>) -> CommandOutput {
    CommandOutput {
        status: Some(status),
        stdout: String::new(),
        stderr: stderr.into(),
    }
}

fn copy_prefix(source: &Path, target: &Path) -> io::Result<()> {
    let source_len = fs::metadata(source)?.len();
    let mut buf = Vec::new();
    fs::File::open(source)?
        .take(COPY_PREFIX)
        .read_to_end(&mut buf)?;
    let mut out = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(target)?;
    out.write_all(&buf)?;
    if out.metadata()?.len() < source_len {
        out.set_len(source_len)?;
    }
    Ok(())
}

/// Scripted host for tests
pub struct FakeRunner {
    lvm_root: PathBuf,
    state: Mutex<State>,
}

impl FakeRunner {
    pub fn new(lvm_root: impl Into<PathBuf>) -> Self {
        Self::with_loop_devices(lvm_root, DEFAULT_LOOP_DEVICES)
    }

    pub fn with_loop_devices(lvm_root: impl Into<PathBuf>, count: usize) -> Self {
        Self {
            lvm_root: lvm_root.into(),
            state: Mutex::new(State {
                loops: vec![None; count],
                next_pid: 4000,
                ..State::default()
            }),
        }
    }

    /// Answer every call of `tool` with `output`
    pub fn script(&self, tool: &str, output: CommandOutput) {
        self.state
            .lock()
            .overrides
            .push((Matcher::Tool(tool.to_string()), output));
    }

    /// Answer every call carrying `arg` with `output`
    pub fn fail_matching(&self, arg: &str, output: CommandOutput) {
        self.state
            .lock()
            .overrides
            .push((Matcher::Arg(arg.to_string()), output));
    }

    /// Spawned daemons exit immediately
    pub fn set_daemons_die(&self, die: bool) {
        self.state.lock().daemons_die = die;
    }

    /// Every argv seen so far, without the helper prefix
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state.lock().calls.clone()
    }

    /// Attach a fresh backing file of `size` bytes to `device`
    pub fn add_backing(&self, device: &str, size: u64) {
        let mut state = self.state.lock();
        let idx = Self::loop_index(&state, device).expect("unknown loop device");
        let file = self.lvm_root.join(format!(".backing-{idx}"));
        fs::File::create(&file).unwrap().set_len(size).unwrap();
        state.loops[idx] = Some(file);
    }

    pub fn attached_loops(&self) -> Vec<String> {
        self.state
            .lock()
            .loops
            .iter()
            .enumerate()
            .filter(|(_, file)| file.is_some())
            .map(|(idx, _)| format!("/dev/loop{idx}"))
            .collect()
    }

    pub fn physical_volumes(&self) -> Vec<String> {
        self.state.lock().pvs.iter().cloned().collect()
    }

    pub fn volume_groups(&self) -> Vec<String> {
        self.state.lock().vgs.keys().cloned().collect()
    }

    pub fn group_members(&self, vg: &str) -> Vec<String> {
        self.state.lock().vgs.get(vg).cloned().unwrap_or_default()
    }

    pub fn iscsi_targets(&self) -> Vec<u32> {
        self.state.lock().targets.keys().copied().collect()
    }

    pub fn live_daemons(&self) -> Vec<u32> {
        self.state.lock().daemons.keys().copied().collect()
    }

    /// Daemons die and tgt forgets its configuration
    pub fn restart_daemons(&self) {
        let mut state = self.state.lock();
        state.daemons.clear();
        state.targets.clear();
        state.accounts.clear();
    }

    /// Host restart: daemons gone and every loop device detached
    pub fn reboot(&self) {
        self.restart_daemons();
        for slot in &mut self.state.lock().loops {
            *slot = None;
        }
    }

    fn loop_index(state: &State, device: &str) -> Option<usize> {
        device
            .strip_prefix("/dev/loop")?
            .parse::<usize>()
            .ok()
            .filter(|idx| *idx < state.loops.len())
    }

    fn in_group(state: &State, pv: &str) -> bool {
        state.vgs.values().any(|members| members.iter().any(|m| m == pv))
    }

    fn simulate(&self, state: &mut State, args: &[&str]) -> CommandOutput {
        match args {
            ["lvm", "version"] => ok("  LVM version:     2.03.16(2) (2022-05-18)\n"),
            ["which", tool] => ok(format!("/usr/sbin/{tool}\n")),
            ["losetup", "-f"] => match state.loops.iter().position(Option::is_none) {
                Some(idx) => ok(format!("/dev/loop{idx}\n")),
                None => fail(1, "losetup: cannot find an unused loop device"),
            },
            ["losetup", "-d", device] => match Self::loop_index(state, device) {
                Some(idx) if state.loops[idx].is_some() => {
                    state.loops[idx] = None;
                    ok("")
                }
                _ => fail(1, format!("losetup: {device}: detach failed")),
            },
            ["losetup", device] => match Self::loop_index(state, device)
                .and_then(|idx| state.loops[idx].clone())
            {
                Some(file) => ok(format!("{device}: [0801]:1234 ({})\n", file.display())),
                None => fail(1, format!("losetup: {device}: No such device or address")),
            },
            ["losetup", device, file] => match Self::loop_index(state, device) {
                Some(idx) if state.loops[idx].is_none() && Path::new(file).exists() => {
                    state.loops[idx] = Some(PathBuf::from(file));
                    ok("")
                }
                _ => fail(1, "losetup: failed to set up loop device: Device or resource busy"),
            },
            ["pvcreate", device] => {
                let attached = Self::loop_index(state, device)
                    .is_some_and(|idx| state.loops[idx].is_some());
                if attached && state.pvs.insert((*device).to_string()) {
                    ok(format!("  Physical volume \"{device}\" successfully created.\n"))
                } else {
                    fail(5, format!("  Cannot use {device}"))
                }
            }
            ["vgcreate", vg, pv] => {
                if state.pvs.contains(*pv)
                    && !Self::in_group(state, pv)
                    && !state.vgs.contains_key(*vg)
                    && fs::create_dir_all(self.lvm_root.join(vg)).is_ok()
                {
                    state.vgs.insert((*vg).to_string(), vec![(*pv).to_string()]);
                    ok(format!("  Volume group \"{vg}\" successfully created\n"))
                } else {
                    fail(5, format!("  Cannot create volume group {vg}"))
                }
            }
            ["vgextend", vg, pv] => {
                if state.pvs.contains(*pv) && !Self::in_group(state, pv) {
                    if let Some(members) = state.vgs.get_mut(*vg) {
                        members.push((*pv).to_string());
                        return ok(format!("  Volume group \"{vg}\" successfully extended\n"));
                    }
                }
                fail(5, format!("  Cannot extend {vg}"))
            }
            ["vgreduce", vg, pv] => match state.vgs.get_mut(*vg) {
                Some(members) if members.iter().any(|m| m == pv) => {
                    members.retain(|m| m != pv);
                    ok(format!("  Removed \"{pv}\" from volume group \"{vg}\"\n"))
                }
                _ => fail(5, format!("  {pv} is not in {vg}")),
            },
            ["lvcreate", "-n", lv, "-s", "-l", "100%FREE", origin] => {
                let origin = Path::new(origin);
                match origin.parent().map(|vg_dir| vg_dir.join(lv)) {
                    Some(target) if origin.is_file() && copy_prefix(origin, &target).is_ok() => {
                        ok(format!("  Logical volume \"{lv}\" created.\n"))
                    }
                    _ => fail(5, format!("  Cannot snapshot {}", origin.display())),
                }
            }
            ["lvcreate", "-n", lv, "-l", "100%FREE", vg] => {
                let Some(members) = state.vgs.get(*vg) else {
                    return fail(5, format!("  Volume group \"{vg}\" not found"));
                };
                let vg_dir = self.lvm_root.join(vg);
                let total: u64 = members
                    .iter()
                    .filter_map(|pv| Self::loop_index(state, pv))
                    .filter_map(|idx| state.loops[idx].as_ref())
                    .filter_map(|file| fs::metadata(file).ok())
                    .map(|meta| meta.len().saturating_sub(LVM_HEADER_LENGTH))
                    .sum();
                let used: u64 = fs::read_dir(&vg_dir)
                    .map(|entries| {
                        entries
                            .filter_map(Result::ok)
                            .filter_map(|e| e.metadata().ok())
                            .map(|m| m.len())
                            .sum()
                    })
                    .unwrap_or(0);
                let free = total.saturating_sub(used);
                let created = fs::File::create(vg_dir.join(lv)).and_then(|f| f.set_len(free));
                if free > 0 && created.is_ok() {
                    ok(format!("  Logical volume \"{lv}\" created.\n"))
                } else {
                    fail(5, format!("  Insufficient free space in {vg}"))
                }
            }
            ["lvremove", "-f", path] => match fs::remove_file(path) {
                Ok(()) => ok(format!("  Logical volume \"{path}\" successfully removed\n")),
                Err(e) => fail(5, format!("  Failed to find logical volume {path}: {e}")),
            },
            ["vgremove", vg] => {
                let vg_dir = self.lvm_root.join(vg);
                let empty = fs::read_dir(&vg_dir).is_ok_and(|mut d| d.next().is_none());
                if empty && state.vgs.remove(*vg).is_some() && fs::remove_dir(&vg_dir).is_ok() {
                    ok(format!("  Volume group \"{vg}\" successfully removed\n"))
                } else {
                    fail(5, format!("  Cannot remove {vg}"))
                }
            }
            ["pvremove", device] => {
                if !Self::in_group(state, device) && state.pvs.remove(*device) {
                    ok(format!(
                        "  Labels on physical volume \"{device}\" successfully wiped.\n"
                    ))
                } else {
                    fail(5, format!("  Cannot remove {device}"))
                }
            }
            ["lvchange", "-ay", path] => {
                if Path::new(path).exists() {
                    ok("")
                } else {
                    fail(5, format!("  Failed to find logical volume {path}"))
                }
            }
            ["dd", input, output, _] => {
                let (Some(source), Some(target)) =
                    (input.strip_prefix("if="), output.strip_prefix("of="))
                else {
                    return fail(1, "dd: bad operands");
                };
                match copy_prefix(Path::new(source), Path::new(target)) {
                    Ok(()) => CommandOutput {
                        stderr: "1+0 records in\n1+0 records out\n".into(),
                        ..ok("")
                    },
                    Err(e) => fail(1, format!("dd: {e}")),
                }
            }
            ["kill", pid] => match pid.parse::<u32>().ok().and_then(|p| state.daemons.remove(&p)) {
                Some(_) => ok(""),
                None => fail(1, format!("kill: ({pid}) - No such process")),
            },
            ["tgtadm", "--lld", "iscsi", rest @ ..] => Self::tgtadm(state, rest),
            _ => fail(127, format!("unknown command {args:?}")),
        }
    }

    fn tgtadm(state: &mut State, args: &[&str]) -> CommandOutput {
        let opts: BTreeMap<&str, &str> = args
            .chunks(2)
            .filter_map(|pair| match pair {
                [key, value] => Some((*key, *value)),
                _ => None,
            })
            .collect();
        let tid = opts.get("--tid").and_then(|t| t.parse::<u32>().ok());
        let lun = opts.get("--lun").and_then(|l| l.parse::<u32>().ok());
        let op = opts.get("--op").copied().unwrap_or_default();
        let mode = opts.get("--mode").copied().unwrap_or_default();

        match (op, mode, tid) {
            ("new", "target", Some(tid)) => {
                if state.targets.contains_key(&tid) {
                    return fail(22, "tgtadm: this target already exists");
                }
                state.targets.insert(tid, BTreeSet::new());
                ok("")
            }
            ("new", "logicalunit", Some(tid)) => match state.targets.get_mut(&tid) {
                Some(luns) => {
                    if luns.insert(lun.unwrap_or_default()) {
                        ok("")
                    } else {
                        fail(22, "tgtadm: this logical unit number already exists")
                    }
                }
                None => fail(22, "tgtadm: can't find the target"),
            },
            ("new", "account", _) => {
                let user = opts.get("--user").copied().unwrap_or_default();
                if state.accounts.insert(user.to_string()) {
                    ok("")
                } else {
                    fail(22, "tgtadm: this account already exists")
                }
            }
            ("bind", _, Some(tid)) if state.targets.contains_key(&tid) => ok(""),
            ("delete", "logicalunit", Some(tid)) => {
                let removed = state
                    .targets
                    .get_mut(&tid)
                    .is_some_and(|luns| luns.remove(&lun.unwrap_or_default()));
                if removed {
                    ok("")
                } else {
                    fail(22, "tgtadm: can't find the logical unit")
                }
            }
            ("delete", "target", Some(tid)) => match state.targets.remove(&tid) {
                Some(_) => ok(""),
                None => fail(22, "tgtadm: can't find the target"),
            },
            _ => fail(22, format!("tgtadm: invalid request {args:?}")),
        }
    }
}

impl CommandRunner for FakeRunner {
    fn execute(&self, argv: &[String]) -> io::Result<CommandOutput> {
        let args = argv
            .get(1..)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))?
            .to_vec();
        let mut state = self.state.lock();
        state.calls.push(args.clone());
        if let Some((_, output)) = state.overrides.iter().find(|(m, _)| m.matches(&args)) {
            return Ok(output.clone());
        }
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        Ok(self.simulate(&mut state, &refs))
    }

    fn spawn(&self, argv: &[String]) -> io::Result<u32> {
        let args = argv.get(1..).unwrap_or_default().to_vec();
        let mut state = self.state.lock();
        let pid = state.next_pid;
        state.next_pid += 1;
        if !state.daemons_die {
            state.daemons.insert(pid, args.join(" "));
        }
        state.calls.push(args);
        Ok(pid)
    }

    fn process_cmdline(&self, pid: u32) -> String {
        self.state
            .lock()
            .daemons
            .get(&pid)
            .cloned()
            .unwrap_or_default()
    }
}
