use crate::errors::*;
use crate::kernel::Kernel;
use crate::lookup::AccountRecord;

/// Permanently switch the process to the uid and gid of `account`.
///
/// When running as root, supplementary groups are reduced to the primary
/// group. Then the real, effective and saved gid are set, then the uids. The
/// group has to go first: once the uid is not 0 anymore, the gid cannot be
/// changed. `USER`, `LOGNAME` and `HOME` are updated to describe the new user.
pub fn drop_to<K: Kernel>(kernel: &K, account: &AccountRecord) -> Result<(), PrivDropError> {
    let gid: u32 = account.gid.parse()?;
    let uid: u32 = account.uid.parse()?;

    // Only root may change the supplementary group list
    if kernel.geteuid() == 0 {
        kernel.setgroups(&[gid])?;
    }
    kernel.setresgid(gid)?;
    kernel.setresuid(uid)?;
    log::info!("Switched to user {} (uid={}, gid={})", account.username, uid, gid);

    kernel.set_env("USER", &account.username);
    kernel.set_env("LOGNAME", &account.username);
    kernel.set_env("HOME", &account.home);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, Op, RecordingKernel};
    use nix::errno::Errno;

    fn account(uid: &str, gid: &str) -> AccountRecord {
        AccountRecord {
            uid: uid.to_string(),
            gid: gid.to_string(),
            username: "svc".to_string(),
            name: "Service".to_string(),
            home: "/srv/svc".to_string(),
        }
    }

    #[test]
    fn gid_is_set_before_uid() {
        let kernel = RecordingKernel::new(0);
        drop_to(&kernel, &account("1001", "1002")).unwrap();
        assert_eq!(
            kernel.calls(),
            vec![
                Call::Setgroups(vec![1002]),
                Call::Setresgid(1002),
                Call::Setresuid(1001),
                Call::SetEnv("USER".to_string(), "svc".to_string()),
                Call::SetEnv("LOGNAME".to_string(), "svc".to_string()),
                Call::SetEnv("HOME".to_string(), "/srv/svc".to_string()),
            ]
        );
        assert_eq!(kernel.euid(), 1001);
        assert_eq!(kernel.egid(), 1002);
        assert_eq!(kernel.groups(), vec![1002]);
    }

    #[test]
    fn malformed_ids_fail_before_any_change() {
        let kernel = RecordingKernel::new(0);
        for (uid, gid) in [("abc", "1"), ("1", ""), ("-1", "1"), ("1", "4294967296")] {
            let e = drop_to(&kernel, &account(uid, gid)).unwrap_err();
            assert_eq!(e.kind(), ErrorKind::InvalidId);
        }
        assert!(kernel.calls().is_empty());
        assert_eq!(kernel.euid(), 0);
    }

    #[test]
    fn setresgid_failure_keeps_the_uid() {
        let kernel = RecordingKernel::new(0);
        kernel.fail(Op::Setresgid, Errno::EPERM);
        let e = drop_to(&kernel, &account("1001", "1001")).unwrap_err();
        assert_eq!(e.errno(), Some(Errno::EPERM));
        assert_eq!(kernel.euid(), 0);
        assert_eq!(kernel.env("HOME"), None);
    }

    #[test]
    fn unprivileged_process_keeps_its_groups() {
        let kernel = RecordingKernel::new(1001);
        drop_to(&kernel, &account("1001", "1001")).unwrap();
        assert!(!kernel.calls().iter().any(|c| matches!(c, Call::Setgroups(_))));
        assert_eq!(kernel.env("USER").as_deref(), Some("svc"));
    }

    #[test]
    fn no_way_back_to_root() {
        let kernel = RecordingKernel::new(0);
        drop_to(&kernel, &account("1001", "1001")).unwrap();
        assert!(drop_to(&kernel, &account("0", "0")).is_err());
        assert_eq!(kernel.euid(), 1001);
    }
}
