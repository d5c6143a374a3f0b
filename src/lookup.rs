//! Resolve a user name to the account it should run as.
//!
//! Two resolvers are provided: [`NativeResolver`] asks the host name service,
//! and [`PasswdFile`] reads `/etc/passwd` directly, which keeps working in
//! fully static binaries where NSS modules cannot be loaded. [`DefaultResolver`]
//! is selected by the `native-lookup` feature.

use crate::errors::*;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

/// Default location of the flat account database
pub const PASSWD_PATH: &str = "/etc/passwd";

/// Longest line `PasswdFile` accepts by default
pub const DEFAULT_LINE_CAPACITY: usize = 4096;

const PASSWD_FIELDS: usize = 7;
const FIELD_USERNAME: usize = 0;
const FIELD_UID: usize = 2;
const FIELD_GID: usize = 3;
const FIELD_GECOS: usize = 4;
const FIELD_HOME: usize = 5;

/// A user account, as found in the user database
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountRecord {
    /// Numeric user id, as a decimal string
    pub uid: String,
    /// Numeric primary group id, as a decimal string
    pub gid: String,
    pub username: String,
    /// Display name, the first comma-separated item of the GECOS field
    pub name: String,
    pub home: String,
}

/// Something that can map a user name to an account
pub trait AccountResolver {
    fn resolve_by_name(&self, name: &str) -> Result<AccountRecord, PrivDropError>;
}

impl<R: AccountResolver + ?Sized> AccountResolver for &R {
    fn resolve_by_name(&self, name: &str) -> Result<AccountRecord, PrivDropError> {
        (**self).resolve_by_name(name)
    }
}

// The GECOS field is not standardized; by convention the full name comes first
fn display_name(gecos: &str) -> &str {
    gecos.split(',').next().unwrap_or_default()
}

fn unknown_account(name: &str) -> PrivDropError {
    PrivDropError::detail(ErrorKind::UnknownAccount, format!("unknown user {}", name))
}

/// Resolve users through the host name service (`getpwnam_r`)
#[derive(Default, Clone, Copy, Debug)]
pub struct NativeResolver;

impl AccountResolver for NativeResolver {
    fn resolve_by_name(&self, name: &str) -> Result<AccountRecord, PrivDropError> {
        let user = nix::unistd::User::from_name(name)?.ok_or_else(|| unknown_account(name))?;
        let gecos = user.gecos.to_string_lossy();
        Ok(AccountRecord {
            uid: user.uid.as_raw().to_string(),
            gid: user.gid.as_raw().to_string(),
            name: display_name(&gecos).to_owned(),
            username: user.name,
            home: user.dir.to_string_lossy().into_owned(),
        })
    }
}

/// Resolve users by parsing a passwd(5) file
#[derive(Clone, Debug)]
pub struct PasswdFile {
    path: PathBuf,
    line_capacity: usize,
}

impl Default for PasswdFile {
    fn default() -> Self {
        PasswdFile::new(PASSWD_PATH)
    }
}

impl PasswdFile {
    /// Read accounts from `path`
    pub fn new<T: AsRef<Path>>(path: T) -> Self {
        PasswdFile {
            path: path.as_ref().to_owned(),
            line_capacity: DEFAULT_LINE_CAPACITY,
        }
    }

    /// Change the longest accepted line
    pub fn line_capacity(mut self, line_capacity: usize) -> Self {
        self.line_capacity = line_capacity;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look `username` up in passwd-formatted data.
    ///
    /// The first line starting with `username:` wins. Any line longer than
    /// the line capacity encountered before it aborts the search.
    pub fn parse<R: BufRead>(&self, reader: R, username: &str) -> Result<AccountRecord, PrivDropError> {
        let prefix = format!("{}:", username);
        let mut reader = reader;
        let mut line = Vec::with_capacity(self.line_capacity.min(DEFAULT_LINE_CAPACITY));
        loop {
            line.clear();
            // One extra byte tells a full line apart from an overlong one
            let limit = (self.line_capacity as u64).saturating_add(1);
            let read = (&mut reader).take(limit).read_until(b'\n', &mut line)?;
            if read == 0 {
                break;
            }
            if line.last() == Some(&b'\n') {
                line.pop();
            } else if line.len() > self.line_capacity {
                return Err(PrivDropError::detail(
                    ErrorKind::LineTooLong,
                    format!(
                        "{}: line too long: '{}'",
                        self.path.display(),
                        String::from_utf8_lossy(&line)
                    ),
                ));
            }
            if !line.starts_with(prefix.as_bytes()) {
                continue;
            }
            let line = String::from_utf8_lossy(&line);
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() != PASSWD_FIELDS {
                return Err(PrivDropError::detail(
                    ErrorKind::MalformedRecord,
                    format!(
                        "{}: wrong number of fields ({}): {}",
                        self.path.display(),
                        fields.len(),
                        line
                    ),
                ));
            }
            return Ok(AccountRecord {
                uid: fields[FIELD_UID].to_owned(),
                gid: fields[FIELD_GID].to_owned(),
                username: fields[FIELD_USERNAME].to_owned(),
                name: display_name(fields[FIELD_GECOS]).to_owned(),
                home: fields[FIELD_HOME].to_owned(),
            });
        }
        Err(unknown_account(username))
    }
}

impl AccountResolver for PasswdFile {
    fn resolve_by_name(&self, name: &str) -> Result<AccountRecord, PrivDropError> {
        let file = File::open(&self.path)?;
        self.parse(BufReader::new(file), name)
    }
}

/// The resolver used when none is given explicitly
#[cfg(feature = "native-lookup")]
pub type DefaultResolver = NativeResolver;

/// The resolver used when none is given explicitly
#[cfg(not(feature = "native-lookup"))]
pub type DefaultResolver = PasswdFile;

/// Resolve `name` with the default resolver
pub fn lookup(name: &str) -> Result<AccountRecord, PrivDropError> {
    DefaultResolver::default().resolve_by_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
alice:x:1000:1000:Alice Smith,,,:/home/alice:/bin/sh
nobody:x:65534:65534::/:/bin/false
";

    fn parse(data: &str, name: &str) -> Result<AccountRecord, PrivDropError> {
        PasswdFile::default().parse(Cursor::new(data), name)
    }

    #[test]
    fn finds_a_user() {
        let account = parse(PASSWD, "alice").unwrap();
        assert_eq!(
            account,
            AccountRecord {
                uid: "1000".to_string(),
                gid: "1000".to_string(),
                username: "alice".to_string(),
                name: "Alice Smith".to_string(),
                home: "/home/alice".to_string(),
            }
        );
    }

    #[test]
    fn empty_gecos_gives_an_empty_name() {
        let account = parse(PASSWD, "nobody").unwrap();
        assert_eq!(account.name, "");
        assert_eq!(account.home, "/");
        assert_eq!(account.uid, "65534");
    }

    #[test]
    fn unknown_user() {
        let e = parse(PASSWD, "bob").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::UnknownAccount);
    }

    #[test]
    fn username_must_match_exactly() {
        let e = parse(PASSWD, "ali").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::UnknownAccount);
        let e = parse("alice2:x:1:1::/:/bin/sh\n", "alice").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::UnknownAccount);
    }

    #[test]
    fn first_match_wins() {
        let data = "svc:x:10:10:First:/a:/bin/sh\nsvc:x:20:20:Second:/b:/bin/sh\n";
        assert_eq!(parse(data, "svc").unwrap().uid, "10");
    }

    #[test]
    fn last_line_without_newline() {
        let account = parse("svc:x:10:11:Service,Room 1:/srv:/bin/sh", "svc").unwrap();
        assert_eq!(account.gid, "11");
        assert_eq!(account.name, "Service");
    }

    #[test]
    fn malformed_matching_line() {
        let e = parse("alice:x:1000:1000:/home/alice:/bin/sh\n", "alice").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::MalformedRecord);
    }

    #[test]
    fn malformed_lines_of_other_users_are_ignored() {
        let data = "broken:x\nalice:x:1000:1000:Alice:/home/alice:/bin/sh\n";
        assert_eq!(parse(data, "alice").unwrap().username, "alice");
    }

    #[test]
    fn overlong_line_before_the_match() {
        let data = format!("{}\nalice:x:1:1::/:/bin/sh\n", "x".repeat(64));
        let passwd = PasswdFile::default().line_capacity(32);
        let e = passwd.parse(Cursor::new(data), "alice").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::LineTooLong);
    }

    #[test]
    fn unbounded_line_capacity() {
        let passwd = PasswdFile::default().line_capacity(usize::MAX);
        let data = format!("{}\na:x:1:1::/:/bin/sh\n", "x".repeat(2 * DEFAULT_LINE_CAPACITY));
        assert_eq!(passwd.parse(Cursor::new(data), "a").unwrap().uid, "1");
    }

    #[test]
    fn line_at_capacity_is_accepted() {
        let line = "alice:x:1:1::/:/bin/sh";
        let passwd = PasswdFile::default().line_capacity(line.len());
        let data = format!("{}\n{}\n", line, line);
        assert_eq!(passwd.parse(Cursor::new(data), "alice").unwrap().uid, "1");
    }

    #[test]
    fn reads_from_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PASSWD.as_bytes()).unwrap();
        let passwd = PasswdFile::new(file.path());
        assert_eq!(passwd.resolve_by_name("daemon").unwrap().home, "/usr/sbin");
        assert_eq!(
            passwd.resolve_by_name("nope").unwrap_err().kind(),
            ErrorKind::UnknownAccount
        );
    }

    #[test]
    fn missing_file_is_a_system_error() {
        let dir = tempfile::tempdir().unwrap();
        let passwd = PasswdFile::new(dir.path().join("passwd"));
        let e = passwd.resolve_by_name("root").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::SysError);
    }

    #[test]
    fn native_lookup_of_root() {
        let account = NativeResolver.resolve_by_name("root").unwrap();
        assert_eq!(account.uid, "0");
        assert_eq!(account.username, "root");
    }
}
