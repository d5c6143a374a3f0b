//! End-to-end privilege drop runs.
//!
//! Most tests go through `RecordingKernel`. The ones touching the real process
//! need root and are ignored by default; run them one at a time with
//! `cargo test -- --ignored --test-threads=1` in a disposable environment.

use capjail::testing::{Call, RecordingKernel};
use capjail::{
    bound_contains, drop_bound, drop_root_and_chroot, Capability, CapabilityModel, CapabilityRecord,
    ErrorKind, LinuxKernel, PasswdFile, PrivDrop, PrivilegeContext,
};
use std::io::Write;
use std::path::PathBuf;

const NOBODY: &str = "nobody:x:65534:65534::/:/bin/false\n";

fn passwd_file(data: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data.as_bytes()).unwrap();
    file
}

#[test]
fn nobody_in_a_jail() {
    let file = passwd_file(&format!("root:x:0:0:root:/root:/bin/sh\n{}", NOBODY));
    let kernel = RecordingKernel::new(0);
    let model = CapabilityModel::with_max(Capability::CHECKPOINT_RESTORE);

    let report = PrivDrop::default()
        .chroot("/var/jail")
        .user("nobody")
        .apply_with_model(&kernel, &PasswdFile::new(file.path()), model)
        .unwrap();

    assert!(report.is_complete());
    for cap in model.iter() {
        assert!(!bound_contains(&kernel, cap).unwrap(), "{} still bounded", cap);
    }
    assert_eq!(kernel.euid(), 65534);
    assert_eq!(kernel.egid(), 65534);
    assert_eq!(kernel.groups(), vec![65534]);
    assert_eq!(kernel.root(), PathBuf::from("/var/jail"));
    assert_eq!(kernel.cwd(), PathBuf::from("/"));
    assert_eq!(kernel.env("HOME").as_deref(), Some("/"));
    assert!(CapabilityRecord::current(&kernel).unwrap().is_empty());
}

#[test]
fn pipeline_can_be_retried_after_a_lookup_failure() {
    let kernel = RecordingKernel::new(0);
    let file = passwd_file("daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n");
    let resolver = PasswdFile::new(file.path());

    let e = PrivDrop::default()
        .chroot("/var/jail")
        .user("nobody")
        .apply_with_model(&kernel, &resolver, CapabilityModel::default())
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::UnknownAccount);
    assert!(kernel.calls().is_empty());

    PrivDrop::default()
        .chroot("/var/jail")
        .user("daemon")
        .apply_with_model(&kernel, &resolver, CapabilityModel::default())
        .unwrap();
    assert_eq!(kernel.euid(), 1);
}

#[test]
fn jail_preparation_is_repeatable() {
    let kernel = RecordingKernel::new(0);
    kernel.add_existing("/var/jail/etc/resolv.conf");
    PrivilegeContext::with_model(&kernel, CapabilityModel::default())
        .drop_bounding_set()
        .enter_jail("/var/jail", true)
        .unwrap();
    let links = kernel
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::HardLink { .. }))
        .count();
    assert_eq!(links, 1);
}

#[test]
fn host_capability_model_is_usable() {
    let model = CapabilityModel::host();
    assert_eq!(model.min(), Capability::CHOWN);
    let expected = model.max().map_or(0, |max| usize::from(max.as_u8()) + 1);
    assert_eq!(model.iter().count(), expected);
}

#[test]
#[ignore = "requires root; permanently shrinks the bounding set of the test process"]
fn drops_the_real_bounding_set() {
    let kernel = LinuxKernel;
    let model = CapabilityModel::host();
    for cap in model.iter() {
        drop_bound(&kernel, cap).unwrap();
        assert!(!bound_contains(&kernel, cap).unwrap());
    }
}

#[test]
#[ignore = "requires root, a prepared /var/jail and a nobody account; changes the process identity"]
fn real_drop_root_and_chroot() {
    drop_root_and_chroot("/var/jail", "nobody").unwrap();
    assert_eq!(nix::unistd::getuid().as_raw(), 65534);
    assert_eq!(nix::unistd::getgid().as_raw(), 65534);
    assert_eq!(std::env::current_dir().unwrap(), PathBuf::from("/"));
    assert_eq!(std::env::var("HOME").unwrap(), "/");
}
