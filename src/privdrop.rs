use crate::caps::{BoundingSetReport, CapabilityModel};
use crate::context::PrivilegeContext;
use crate::errors::*;
use crate::kernel::{Kernel, LinuxKernel};
use crate::lookup::{AccountResolver, DefaultResolver};
use std::path::{Path, PathBuf};

/// PrivDrop structure
///
/// # Example
/// ```no_run
/// use capjail::PrivDrop;
///
/// PrivDrop::default().chroot("/var/jail").user("nobody").apply().unwrap();
/// ```
#[derive(Default, Clone, Debug)]
pub struct PrivDrop {
    chroot: Option<PathBuf>,
    user: Option<String>,
    skip_jail_setup: bool,
    strict_bounding_set: bool,
    clear_capabilities: bool,
}

impl PrivDrop {
    /// chroot() to a specific directory before switching to a non-root user
    pub fn chroot<T: AsRef<Path>>(mut self, path: T) -> Self {
        self.chroot = Some(path.as_ref().to_owned());
        self
    }

    /// Set the name of a user to switch to
    pub fn user<T: AsRef<str>>(mut self, user: T) -> Self {
        self.user = Some(user.as_ref().to_owned());
        self
    }

    /// Enter the chroot directory as is, without bind mounting /proc and /dev
    /// or linking /etc/resolv.conf into it
    pub fn skip_jail_setup(mut self) -> Self {
        self.skip_jail_setup = true;
        self
    }

    /// Fail if any capability could not be removed from the bounding set
    pub fn strict_bounding_set(mut self) -> Self {
        self.strict_bounding_set = true;
        self
    }

    /// Clear the remaining capability sets after switching user
    pub fn clear_capabilities(mut self) -> Self {
        self.clear_capabilities = true;
        self
    }

    /// Apply the changes
    pub fn apply(self) -> Result<(), PrivDropError> {
        self.apply_with(LinuxKernel, &DefaultResolver::default())?;
        Ok(())
    }

    /// Apply the changes through `kernel`, looking the user up with `resolver`
    pub fn apply_with<K: Kernel, R: AccountResolver + ?Sized>(
        self,
        kernel: K,
        resolver: &R,
    ) -> Result<BoundingSetReport, PrivDropError> {
        self.apply_with_model(kernel, resolver, CapabilityModel::host())
    }

    /// Same as [`apply_with`](Self::apply_with), for an explicit capability model
    pub fn apply_with_model<K: Kernel, R: AccountResolver + ?Sized>(
        self,
        kernel: K,
        resolver: &R,
        model: CapabilityModel,
    ) -> Result<BoundingSetReport, PrivDropError> {
        // The user database may live outside of the jail
        let account = match self.user {
            None => None,
            Some(ref user) => Some(resolver.resolve_by_name(user)?),
        };
        kernel.preload();

        let ctx = PrivilegeContext::with_model(kernel, model).drop_bounding_set();
        self.check_bounding_set(ctx.bounding_set_report())?;

        let chroot = self.chroot.as_ref().filter(|path| !path.as_os_str().is_empty());
        let ctx = match (chroot, account) {
            (None, None) => return Ok(ctx.into_bounding_set_report()),
            (None, Some(account)) => ctx.drop_identity(&account)?,
            (Some(chroot), account) => {
                let ctx = ctx.enter_jail(chroot, !self.skip_jail_setup)?;
                match account {
                    None => return Ok(ctx.into_bounding_set_report()),
                    Some(account) => ctx.drop_identity(&account)?,
                }
            }
        };
        if self.clear_capabilities {
            return Ok(ctx.clear_capabilities()?.into_bounding_set_report());
        }
        Ok(ctx.into_bounding_set_report())
    }

    fn check_bounding_set(&self, report: &BoundingSetReport) -> Result<(), PrivDropError> {
        if report.is_complete() {
            return Ok(());
        }
        if let Some((cap, ref e)) = report.first_error {
            log::warn!(
                "Dropped {} of {} capabilities from the bounding set, {}: {}",
                report.dropped,
                report.attempted,
                cap,
                e
            );
        }
        if self.strict_bounding_set {
            return Err(PrivDropError::detail(
                ErrorKind::PartialBoundingSet,
                format!(
                    "only {} of {} capabilities dropped from the bounding set",
                    report.dropped, report.attempted
                ),
            ));
        }
        Ok(())
    }
}

/// Chroot to `new_root` and switch to `user`.
///
/// `/proc` and `/dev` are bind mounted into the jail and `/etc/resolv.conf`
/// is linked into it first. An empty `new_root` skips the jail. The user is
/// resolved before anything is changed; the bounding set is emptied and the
/// jail entered while still privileged, so a failure there leaves the process
/// running as root, possibly already confined.
pub fn drop_root_and_chroot<T: AsRef<Path>>(new_root: T, user: &str) -> Result<(), PrivDropError> {
    PrivDrop::default().chroot(new_root).user(user).apply()
}
