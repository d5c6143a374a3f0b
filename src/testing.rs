//! An in-memory [`Kernel`] for exercising privilege drops in tests.
//!
//! [`RecordingKernel`] records every call it receives and keeps just enough
//! state (euid, bounding set, cwd, root, links, environment) for callers to
//! check the outcome of a whole pipeline run.

use crate::caps::{CapData, Capability, CapabilityRecord, LINUX_CAPABILITY_VERSION_3};
use crate::kernel::Kernel;
use nix::errno::Errno;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};

const FAKE_PID: i32 = 4242;

/// A kernel call observed by [`RecordingKernel`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    CapbsetDrop(Capability),
    Capset(CapabilityRecord),
    BindMount { source: PathBuf, target: PathBuf },
    HardLink { src: PathBuf, dst: PathBuf },
    Chdir(PathBuf),
    Chroot(PathBuf),
    Setgroups(Vec<u32>),
    Setresgid(u32),
    Setresuid(u32),
    SetEnv(String, String),
    Preload,
}

/// Operations whose outcome can be forced with [`RecordingKernel::fail`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Capset,
    BindMount,
    HardLink,
    Chdir,
    Chroot,
    Setgroups,
    Setresgid,
    Setresuid,
}

#[derive(Debug)]
struct State {
    euid: u32,
    egid: u32,
    groups: Vec<u32>,
    bounding: u64,
    caps: CapabilityRecord,
    cwd: PathBuf,
    root: PathBuf,
    links: BTreeSet<PathBuf>,
    env: BTreeMap<String, String>,
    calls: Vec<Call>,
    failures: HashMap<Op, Errno>,
    cap_failures: HashMap<Capability, Errno>,
}

/// A fake kernel that records calls instead of performing them
#[derive(Debug)]
pub struct RecordingKernel {
    state: RefCell<State>,
}

impl RecordingKernel {
    /// A process running with effective uid `euid` and a full bounding set.
    ///
    /// A root process also starts with every capability effective and permitted.
    pub fn new(euid: u32) -> Self {
        let mut caps = CapabilityRecord::empty(FAKE_PID);
        if euid == 0 {
            caps.data = [CapData {
                effective: u32::MAX,
                permitted: u32::MAX,
                inheritable: 0,
            }; 2];
        }
        RecordingKernel {
            state: RefCell::new(State {
                euid,
                egid: euid,
                groups: vec![euid],
                bounding: u64::MAX,
                caps,
                cwd: PathBuf::from("/"),
                root: PathBuf::from("/"),
                links: BTreeSet::new(),
                env: BTreeMap::new(),
                calls: Vec::new(),
                failures: HashMap::new(),
                cap_failures: HashMap::new(),
            }),
        }
    }

    /// Make every later `op` fail with `errno`
    pub fn fail(&self, op: Op, errno: Errno) {
        self.state.borrow_mut().failures.insert(op, errno);
    }

    /// Make bounding set drops of `cap` fail with `errno`
    pub fn fail_capability(&self, cap: Capability, errno: Errno) {
        self.state.borrow_mut().cap_failures.insert(cap, errno);
    }

    /// Pretend `path` already exists, so that linking to it fails
    pub fn add_existing(&self, path: impl AsRef<Path>) {
        self.state
            .borrow_mut()
            .links
            .insert(path.as_ref().to_owned());
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn euid(&self) -> u32 {
        self.state.borrow().euid
    }

    pub fn egid(&self) -> u32 {
        self.state.borrow().egid
    }

    pub fn groups(&self) -> Vec<u32> {
        self.state.borrow().groups.clone()
    }

    pub fn cwd(&self) -> PathBuf {
        self.state.borrow().cwd.clone()
    }

    /// The directory the process was last chrooted to, as seen from the host
    pub fn root(&self) -> PathBuf {
        self.state.borrow().root.clone()
    }

    pub fn env(&self, key: &str) -> Option<String> {
        self.state.borrow().env.get(key).cloned()
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }

    fn check(&self, op: Op) -> nix::Result<()> {
        match self.state.borrow().failures.get(&op) {
            Some(&errno) => Err(errno),
            None => Ok(()),
        }
    }
}

impl Kernel for RecordingKernel {
    fn geteuid(&self) -> u32 {
        self.euid()
    }

    fn getpid(&self) -> i32 {
        FAKE_PID
    }

    fn capbset_drop(&self, cap: Capability) -> nix::Result<()> {
        self.record(Call::CapbsetDrop(cap));
        let mut state = self.state.borrow_mut();
        if let Some(&errno) = state.cap_failures.get(&cap) {
            return Err(errno);
        }
        if state.euid != 0 {
            return Err(Errno::EPERM);
        }
        state.bounding &= !(1u64 << cap.as_u8());
        Ok(())
    }

    fn capbset_read(&self, cap: Capability) -> nix::Result<bool> {
        Ok(self.state.borrow().bounding & (1u64 << cap.as_u8()) != 0)
    }

    fn capget(&self, record: &mut CapabilityRecord) -> nix::Result<()> {
        if record.header.version != LINUX_CAPABILITY_VERSION_3 {
            return Err(Errno::EINVAL);
        }
        record.data = self.state.borrow().caps.data;
        Ok(())
    }

    fn capset(&self, record: &CapabilityRecord) -> nix::Result<()> {
        self.record(Call::Capset(*record));
        self.check(Op::Capset)?;
        if record.header.version != LINUX_CAPABILITY_VERSION_3 {
            return Err(Errno::EINVAL);
        }
        self.state.borrow_mut().caps.data = record.data;
        Ok(())
    }

    fn bind_mount(&self, source: &Path, target: &Path) -> nix::Result<()> {
        self.record(Call::BindMount {
            source: source.to_owned(),
            target: target.to_owned(),
        });
        self.check(Op::BindMount)
    }

    fn hard_link(&self, src: &Path, dst: &Path) -> io::Result<()> {
        self.record(Call::HardLink {
            src: src.to_owned(),
            dst: dst.to_owned(),
        });
        self.check(Op::HardLink)
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
        if !self.state.borrow_mut().links.insert(dst.to_owned()) {
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }
        Ok(())
    }

    fn chdir(&self, path: &Path) -> nix::Result<()> {
        self.record(Call::Chdir(path.to_owned()));
        self.check(Op::Chdir)?;
        let mut state = self.state.borrow_mut();
        let cwd = state.cwd.join(path);
        state.cwd = cwd;
        Ok(())
    }

    fn chroot(&self, path: &Path) -> nix::Result<()> {
        self.record(Call::Chroot(path.to_owned()));
        self.check(Op::Chroot)?;
        let mut state = self.state.borrow_mut();
        if state.euid != 0 {
            return Err(Errno::EPERM);
        }
        let relative = path.strip_prefix("/").unwrap_or(path);
        let root = state.root.join(relative);
        state.root = root;
        Ok(())
    }

    fn setgroups(&self, gids: &[u32]) -> nix::Result<()> {
        self.record(Call::Setgroups(gids.to_vec()));
        self.check(Op::Setgroups)?;
        let mut state = self.state.borrow_mut();
        if state.euid != 0 {
            return Err(Errno::EPERM);
        }
        state.groups = gids.to_vec();
        Ok(())
    }

    fn setresgid(&self, gid: u32) -> nix::Result<()> {
        self.record(Call::Setresgid(gid));
        self.check(Op::Setresgid)?;
        let mut state = self.state.borrow_mut();
        if state.euid != 0 && state.egid != gid {
            return Err(Errno::EPERM);
        }
        state.egid = gid;
        Ok(())
    }

    fn setresuid(&self, uid: u32) -> nix::Result<()> {
        self.record(Call::Setresuid(uid));
        self.check(Op::Setresuid)?;
        let mut state = self.state.borrow_mut();
        if state.euid != 0 && state.euid != uid {
            return Err(Errno::EPERM);
        }
        state.euid = uid;
        if uid != 0 {
            state.caps.data = [CapData::default(); 2];
        }
        Ok(())
    }

    fn set_env(&self, key: &str, value: &str) {
        self.record(Call::SetEnv(key.to_owned(), value.to_owned()));
        self.state
            .borrow_mut()
            .env
            .insert(key.to_owned(), value.to_owned());
    }

    fn preload(&self) {
        self.record(Call::Preload);
    }
}
