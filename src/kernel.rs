//! The system calls used while dropping privileges.
//!
//! Every privilege-affecting operation in this crate goes through the
//! [`Kernel`] trait, so the whole sequence can be replayed against
//! [`RecordingKernel`](crate::testing::RecordingKernel) without touching the
//! identity of the test process.

use crate::caps::{CapHeader, Capability, CapabilityRecord};
use nix::errno::Errno;
use nix::mount::{mount, MsFlags};
use nix::unistd::{self, Gid, Uid};
use std::io;
use std::path::Path;

/// Process-wide operations needed by the privilege drop pipeline
pub trait Kernel {
    /// Effective user id of the calling process
    fn geteuid(&self) -> u32;

    /// Process id of the calling process
    fn getpid(&self) -> i32;

    /// `prctl(PR_CAPBSET_DROP, cap)`
    fn capbset_drop(&self, cap: Capability) -> nix::Result<()>;

    /// `prctl(PR_CAPBSET_READ, cap)`
    fn capbset_read(&self, cap: Capability) -> nix::Result<bool>;

    /// `capget(2)`; the header of `record` selects the version and target pid
    fn capget(&self, record: &mut CapabilityRecord) -> nix::Result<()>;

    /// `capset(2)`
    fn capset(&self, record: &CapabilityRecord) -> nix::Result<()>;

    /// Non-recursive bind mount of `source` onto `target`
    fn bind_mount(&self, source: &Path, target: &Path) -> nix::Result<()>;

    /// Create a hard link `dst` pointing to `src`
    fn hard_link(&self, src: &Path, dst: &Path) -> io::Result<()>;

    /// Change the working directory
    fn chdir(&self, path: &Path) -> nix::Result<()>;

    /// Change the root directory; the working directory is left untouched
    fn chroot(&self, path: &Path) -> nix::Result<()>;

    /// Replace the supplementary group list
    fn setgroups(&self, gids: &[u32]) -> nix::Result<()>;

    /// Set the real, effective and saved group ids to `gid`
    fn setresgid(&self, gid: u32) -> nix::Result<()>;

    /// Set the real, effective and saved user ids to `uid`
    fn setresuid(&self, uid: u32) -> nix::Result<()>;

    /// Set a variable in the process environment
    fn set_env(&self, key: &str, value: &str);

    /// Initialize libc state that would otherwise be loaded lazily from files
    /// that are no longer reachable after a chroot
    fn preload(&self) {}
}

impl<K: Kernel + ?Sized> Kernel for &K {
    fn geteuid(&self) -> u32 {
        (**self).geteuid()
    }

    fn getpid(&self) -> i32 {
        (**self).getpid()
    }

    fn capbset_drop(&self, cap: Capability) -> nix::Result<()> {
        (**self).capbset_drop(cap)
    }

    fn capbset_read(&self, cap: Capability) -> nix::Result<bool> {
        (**self).capbset_read(cap)
    }

    fn capget(&self, record: &mut CapabilityRecord) -> nix::Result<()> {
        (**self).capget(record)
    }

    fn capset(&self, record: &CapabilityRecord) -> nix::Result<()> {
        (**self).capset(record)
    }

    fn bind_mount(&self, source: &Path, target: &Path) -> nix::Result<()> {
        (**self).bind_mount(source, target)
    }

    fn hard_link(&self, src: &Path, dst: &Path) -> io::Result<()> {
        (**self).hard_link(src, dst)
    }

    fn chdir(&self, path: &Path) -> nix::Result<()> {
        (**self).chdir(path)
    }

    fn chroot(&self, path: &Path) -> nix::Result<()> {
        (**self).chroot(path)
    }

    fn setgroups(&self, gids: &[u32]) -> nix::Result<()> {
        (**self).setgroups(gids)
    }

    fn setresgid(&self, gid: u32) -> nix::Result<()> {
        (**self).setresgid(gid)
    }

    fn setresuid(&self, uid: u32) -> nix::Result<()> {
        (**self).setresuid(uid)
    }

    fn set_env(&self, key: &str, value: &str) {
        (**self).set_env(key, value)
    }

    fn preload(&self) {
        (**self).preload()
    }
}

/// The running Linux kernel
#[derive(Default, Clone, Copy, Debug)]
pub struct LinuxKernel;

impl Kernel for LinuxKernel {
    fn geteuid(&self) -> u32 {
        unistd::geteuid().as_raw()
    }

    fn getpid(&self) -> i32 {
        unistd::getpid().as_raw()
    }

    fn capbset_drop(&self, cap: Capability) -> nix::Result<()> {
        let res = unsafe {
            libc::prctl(
                libc::PR_CAPBSET_DROP,
                libc::c_ulong::from(cap.as_u8()),
                0 as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
            )
        };
        Errno::result(res).map(drop)
    }

    fn capbset_read(&self, cap: Capability) -> nix::Result<bool> {
        let res = unsafe {
            libc::prctl(
                libc::PR_CAPBSET_READ,
                libc::c_ulong::from(cap.as_u8()),
                0 as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
            )
        };
        Errno::result(res).map(|v| v == 1)
    }

    fn capget(&self, record: &mut CapabilityRecord) -> nix::Result<()> {
        // SAFETY: header and data are #[repr(C)] and sized for version 3,
        // which is what the header announces.
        let res = unsafe {
            libc::syscall(
                libc::SYS_capget,
                &mut record.header as *mut CapHeader,
                record.data.as_mut_ptr(),
            )
        };
        Errno::result(res).map(drop)
    }

    fn capset(&self, record: &CapabilityRecord) -> nix::Result<()> {
        // SAFETY: see capget; the kernel only reads from both pointers.
        let res = unsafe {
            libc::syscall(
                libc::SYS_capset,
                &record.header as *const CapHeader,
                record.data.as_ptr(),
            )
        };
        Errno::result(res).map(drop)
    }

    fn bind_mount(&self, source: &Path, target: &Path) -> nix::Result<()> {
        mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
    }

    fn hard_link(&self, src: &Path, dst: &Path) -> io::Result<()> {
        std::fs::hard_link(src, dst)
    }

    fn chdir(&self, path: &Path) -> nix::Result<()> {
        unistd::chdir(path)
    }

    fn chroot(&self, path: &Path) -> nix::Result<()> {
        unistd::chroot(path)
    }

    fn setgroups(&self, gids: &[u32]) -> nix::Result<()> {
        let gids: Vec<Gid> = gids.iter().map(|&gid| Gid::from_raw(gid)).collect();
        unistd::setgroups(&gids)
    }

    fn setresgid(&self, gid: u32) -> nix::Result<()> {
        let gid = Gid::from_raw(gid);
        unistd::setresgid(gid, gid, gid)
    }

    fn setresuid(&self, uid: u32) -> nix::Result<()> {
        let uid = Uid::from_raw(uid);
        unistd::setresuid(uid, uid, uid)
    }

    fn set_env(&self, key: &str, value: &str) {
        std::env::set_var(key, value)
    }

    fn preload(&self) {
        let c_locale = b"C\0".as_ptr() as *const libc::c_char;
        unsafe {
            libc::strerror(1);
            libc::setlocale(libc::LC_CTYPE, c_locale);
            libc::setlocale(libc::LC_COLLATE, c_locale);
            let mut now: libc::time_t = 0;
            libc::time(&mut now);
            libc::localtime(&now);
        }
    }
}
