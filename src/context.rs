//! Privilege drop phases as types.
//!
//! A [`PrivilegeContext`] owns the [`Kernel`] it acts on and moves through
//! the phases
//!
//! `Privileged` → `BoundingSetDropped` → `Jailed` (optional) →
//! `IdentityDropped` → `CapabilitiesCleared` (optional)
//!
//! Every transition consumes the context, so no phase can be entered twice
//! or before the ones preceding it:
//!
//! ```compile_fail
//! use capjail::{LinuxKernel, PrivilegeContext};
//!
//! let ctx = PrivilegeContext::new(LinuxKernel);
//! // The bounding set must be dropped before entering a jail
//! let _ = ctx.enter_jail("/var/jail", true);
//! ```
//!
//! ```compile_fail
//! use capjail::{LinuxKernel, PrivilegeContext};
//!
//! let ctx = PrivilegeContext::new(LinuxKernel).drop_bounding_set();
//! let jailed = ctx.enter_jail("/var/jail", true).unwrap();
//! // chroot can only happen once
//! let _ = jailed.enter_jail("/var/jail", true);
//! ```

use crate::caps::{self, BoundingSetReport, CapabilityModel};
use crate::chroot;
use crate::errors::*;
use crate::identity;
use crate::kernel::Kernel;
use crate::lookup::AccountRecord;
use std::marker::PhantomData;
use std::path::Path;

/// Still running with the privileges the process started with
#[derive(Debug)]
pub struct Privileged;

/// The capability bounding set has been emptied
#[derive(Debug)]
pub struct BoundingSetDropped;

/// The process is confined to its chroot jail
#[derive(Debug)]
pub struct Jailed;

/// The process runs as the target user
#[derive(Debug)]
pub struct IdentityDropped;

/// Effective, permitted and inheritable capabilities are empty
#[derive(Debug)]
pub struct CapabilitiesCleared;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Privileged {}
    impl Sealed for super::BoundingSetDropped {}
    impl Sealed for super::Jailed {}
    impl Sealed for super::IdentityDropped {}
    impl Sealed for super::CapabilitiesCleared {}
}

/// A privilege drop phase
pub trait Phase: sealed::Sealed {
    const NAME: &'static str;
}

impl Phase for Privileged {
    const NAME: &'static str = "privileged";
}

impl Phase for BoundingSetDropped {
    const NAME: &'static str = "bounding set dropped";
}

impl Phase for Jailed {
    const NAME: &'static str = "jailed";
}

impl Phase for IdentityDropped {
    const NAME: &'static str = "identity dropped";
}

impl Phase for CapabilitiesCleared {
    const NAME: &'static str = "capabilities cleared";
}

/// Phases from which the process may switch to an unprivileged user
pub trait BeforeIdentityDrop: Phase {}

impl BeforeIdentityDrop for BoundingSetDropped {}
impl BeforeIdentityDrop for Jailed {}

/// The privilege state of the current process
#[derive(Debug)]
pub struct PrivilegeContext<K, P> {
    kernel: K,
    model: CapabilityModel,
    bounding_set: BoundingSetReport,
    _phase: PhantomData<P>,
}

impl<K: Kernel, P: Phase> PrivilegeContext<K, P> {
    fn advance<N: Phase>(self) -> PrivilegeContext<K, N> {
        log::debug!("Privilege phase: {} -> {}", P::NAME, N::NAME);
        PrivilegeContext {
            kernel: self.kernel,
            model: self.model,
            bounding_set: self.bounding_set,
            _phase: PhantomData,
        }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Name of the current phase
    pub fn phase(&self) -> &'static str {
        P::NAME
    }

    /// Outcome of the bounding set drop; empty before it happened
    pub fn bounding_set_report(&self) -> &BoundingSetReport {
        &self.bounding_set
    }

    /// Give up the context, keeping only the bounding set report
    pub fn into_bounding_set_report(self) -> BoundingSetReport {
        self.bounding_set
    }
}

impl<K: Kernel> PrivilegeContext<K, Privileged> {
    /// A context for the capabilities known to the running kernel
    pub fn new(kernel: K) -> Self {
        Self::with_model(kernel, CapabilityModel::host())
    }

    pub fn with_model(kernel: K, model: CapabilityModel) -> Self {
        PrivilegeContext {
            kernel,
            model,
            bounding_set: BoundingSetReport::default(),
            _phase: PhantomData,
        }
    }

    /// Drop every known capability from the bounding set.
    ///
    /// This is best effort; see [`bounding_set_report`](Self::bounding_set_report).
    pub fn drop_bounding_set(self) -> PrivilegeContext<K, BoundingSetDropped> {
        let report = caps::empty_bounding_set(&self.kernel, &self.model);
        let mut next = self.advance::<BoundingSetDropped>();
        next.bounding_set = report;
        next
    }
}

impl<K: Kernel> PrivilegeContext<K, BoundingSetDropped> {
    /// Optionally prepare `new_root`, then chroot into it
    pub fn enter_jail<T: AsRef<Path>>(
        self,
        new_root: T,
        prepare: bool,
    ) -> Result<PrivilegeContext<K, Jailed>, PrivDropError> {
        let new_root = new_root.as_ref();
        if prepare {
            chroot::prepare(&self.kernel, new_root)?;
        }
        chroot::enter(&self.kernel, new_root)?;
        log::info!("Entered chroot jail {}", new_root.display());
        Ok(self.advance())
    }
}

impl<K: Kernel, P: BeforeIdentityDrop> PrivilegeContext<K, P> {
    /// Switch to the uid and gid of `account`, for good
    pub fn drop_identity(
        self,
        account: &AccountRecord,
    ) -> Result<PrivilegeContext<K, IdentityDropped>, PrivDropError> {
        identity::drop_to(&self.kernel, account)?;
        Ok(self.advance())
    }
}

impl<K: Kernel> PrivilegeContext<K, IdentityDropped> {
    /// Clear the effective, permitted and inheritable capability sets
    pub fn clear_capabilities(self) -> Result<PrivilegeContext<K, CapabilitiesCleared>, PrivDropError> {
        caps::clear_all(&self.kernel)?;
        Ok(self.advance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::Capability;
    use crate::testing::{Call, Op, RecordingKernel};
    use nix::errno::Errno;
    use std::path::PathBuf;

    fn nobody() -> AccountRecord {
        AccountRecord {
            uid: "65534".to_string(),
            gid: "65534".to_string(),
            username: "nobody".to_string(),
            name: String::new(),
            home: "/".to_string(),
        }
    }

    #[test]
    fn full_sequence() {
        let kernel = RecordingKernel::new(0);
        let ctx = PrivilegeContext::with_model(&kernel, CapabilityModel::with_max(Capability::BPF));
        assert_eq!(ctx.phase(), "privileged");

        let ctx = ctx.drop_bounding_set();
        assert_eq!(ctx.bounding_set_report().dropped, 40);

        let ctx = ctx.enter_jail("/var/jail", true).unwrap();
        assert_eq!(ctx.phase(), "jailed");

        let ctx = ctx.drop_identity(&nobody()).unwrap();
        let ctx = ctx.clear_capabilities().unwrap();
        assert_eq!(ctx.phase(), "capabilities cleared");

        assert_eq!(kernel.euid(), 65534);
        assert_eq!(kernel.root(), PathBuf::from("/var/jail"));
        assert_eq!(kernel.cwd(), PathBuf::from("/"));
        assert!(matches!(kernel.calls().last(), Some(Call::Capset(_))));
    }

    #[test]
    fn jail_is_optional() {
        let kernel = RecordingKernel::new(0);
        let ctx = PrivilegeContext::with_model(&kernel, CapabilityModel::default())
            .drop_bounding_set()
            .drop_identity(&nobody())
            .unwrap();
        assert_eq!(ctx.phase(), "identity dropped");
        assert_eq!(kernel.root(), PathBuf::from("/"));
    }

    #[test]
    fn jail_without_preparation() {
        let kernel = RecordingKernel::new(0);
        PrivilegeContext::with_model(&kernel, CapabilityModel::default())
            .drop_bounding_set()
            .enter_jail("/var/empty", false)
            .unwrap();
        assert!(!kernel
            .calls()
            .iter()
            .any(|call| matches!(call, Call::BindMount { .. } | Call::HardLink { .. })));
    }

    #[test]
    fn failed_chroot_stops_the_sequence() {
        let kernel = RecordingKernel::new(0);
        kernel.fail(Op::Chroot, Errno::ENOENT);
        let res = PrivilegeContext::with_model(&kernel, CapabilityModel::default())
            .drop_bounding_set()
            .enter_jail("/var/jail", true);
        assert!(res.is_err());
        assert_eq!(kernel.euid(), 0);
    }
}
