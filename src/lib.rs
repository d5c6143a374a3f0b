/*!
# capjail

Shed root privileges for good on Linux: empty the capability bounding set,
confine the process to a chroot jail and switch to an unprivileged user.

## Overview

Daemons often need root to start (binding low ports, opening protected files)
but should handle untrusted input without it. This crate performs the
privilege drop in a fixed order:

1. Resolving the target user, while the whole user database is still reachable
2. Preloading libc state that would not be loadable from inside the jail
3. Dropping every capability from the bounding set
4. Bind mounting `/proc` and `/dev` into the jail, linking `/etc/resolv.conf`,
   and entering the jail with `chroot`
5. Switching the real, effective and saved gid and uid to the target user

Capabilities and the filesystem root are locked down while the process is
still privileged, so a failure there is reported before the uid is given up.
No step is rolled back on failure.

## Basic Example

```no_run
use capjail::drop_root_and_chroot;

fn main() {
    drop_root_and_chroot("/var/jail", "nobody")
        .unwrap_or_else(|e| panic!("Failed to drop privileges: {}", e));

    // Continue running with dropped privileges...
}
```

## Advanced Example

```no_run
use capjail::{PasswdFile, PrivDrop, LinuxKernel};

fn main() {
    let report = PrivDrop::default()
        .chroot("/var/empty")       // Change root directory
        .skip_jail_setup()          // Don't mount /proc and /dev into it
        .user("nobody")             // Switch to non-root user
        .strict_bounding_set()      // Fail unless every capability is dropped
        .clear_capabilities()       // Clear the remaining capability sets
        .apply_with(LinuxKernel, &PasswdFile::default())
        .unwrap_or_else(|e| panic!("Failed to drop privileges: {}", e));

    assert!(report.is_complete());
}
```

## Step by step

[`PrivilegeContext`] exposes the individual phases. Its type changes with
every phase, so the steps cannot be reordered or repeated.

```no_run
use capjail::{lookup, LinuxKernel, PrivilegeContext};

let account = lookup("nobody").unwrap();
let ctx = PrivilegeContext::new(LinuxKernel).drop_bounding_set();
let ctx = ctx.enter_jail("/var/jail", true).unwrap();
let _ctx = ctx.drop_identity(&account).unwrap();
```

## User lookup

With the default `native-lookup` feature, users are resolved through the
host name service. Without it, `/etc/passwd` is parsed directly, which
also works in fully static binaries.
*/

pub use self::caps::*;
pub use self::context::*;
pub use self::errors::*;
pub use self::kernel::*;
pub use self::lookup::*;
pub use self::privdrop::*;

pub mod caps;
pub mod chroot;
mod context;
mod errors;
pub mod identity;
mod kernel;
mod lookup;
mod privdrop;
pub mod testing;

/// Reexported dependencies for use in consuming crates.
///
/// This module provides access to the underlying dependencies used by this crate,
/// allowing consumers to utilize the same versions without specifying them separately.
///
/// ## Available Reexports
///
/// - `libc`: Low-level bindings to the C standard library
/// - `nix`: Rust friendly bindings to *nix APIs with user, mount and filesystem features
pub mod reexports {
    pub use {libc, nix};
}
