//! Building and entering a chroot jail.

use crate::errors::*;
use crate::kernel::Kernel;
use std::io;
use std::path::Path;

const HOST_PROC: &str = "/proc";
const HOST_DEV: &str = "/dev";
const HOST_RESOLV_CONF: &str = "/etc/resolv.conf";

/// Make `new_root` usable as a jail.
///
/// `/proc` and `/dev` are bind mounted into `new_root` (sub-mounts such as
/// `binfmt_misc` are not carried over), and `/etc/resolv.conf` is hard linked
/// to `new_root/etc/resolv.conf`. The link requires `new_root` to be on the
/// same filesystem as `/etc`. `new_root/{proc,dev,etc}` must already exist.
///
/// Calling this again on a jail whose resolver file is already linked
/// does not fail at the link step.
pub fn prepare<K: Kernel>(kernel: &K, new_root: &Path) -> Result<(), PrivDropError> {
    kernel.bind_mount(Path::new(HOST_PROC), &new_root.join("proc"))?;
    kernel.bind_mount(Path::new(HOST_DEV), &new_root.join("dev"))?;
    log::debug!("Bind mounted {} and {} into {}", HOST_PROC, HOST_DEV, new_root.display());

    let resolv_conf = new_root.join("etc").join("resolv.conf");
    match kernel.hard_link(Path::new(HOST_RESOLV_CONF), &resolv_conf) {
        Ok(()) => Ok(()),
        Err(ref e) if e.kind() == io::ErrorKind::AlreadyExists => {
            log::debug!("{} already exists", resolv_conf.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Change the root directory of the process to `new_root`.
///
/// The process must still hold `CAP_SYS_CHROOT`. The working directory is
/// `/` of the jail afterwards.
pub fn enter<K: Kernel>(kernel: &K, new_root: &Path) -> Result<(), PrivDropError> {
    kernel.chdir(new_root)?;
    kernel.chroot(new_root)?;
    kernel.chdir(Path::new("/"))?;
    Ok(())
}
