use nix::sched::{setns, CloneFlags};
use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const HOST_NETNS: &str = "/proc/self/ns/net";

/// An open network namespace.
///
/// Owns the namespace file for the duration of one command; dropping the
/// handle closes it on every exit path.
#[derive(Debug)]
pub struct NetNs {
    file: File,
    path: PathBuf,
}

/// Restores the host namespace when a [`NetNs::run`] scope ends.
struct RestoreNetns {
    host: File,
}

impl Drop for RestoreNetns {
    fn drop(&mut self) {
        if let Err(err) = setns(self.host.as_raw_fd(), CloneFlags::CLONE_NEWNET) {
            // The thread is stranded in the container namespace; nothing
            // sane can run after this, so make it loud.
            tracing::error!("failed to restore host netns: {}", err);
        }
    }
}

impl NetNs {
    /// Open a namespace by path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| Error::NamespaceOpen {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { file, path })
    }

    /// Namespace path as handed to us by the runtime.
    pub fn path(&self) -> String {
        self.path.display().to_string()
    }

    /// File descriptor for kernel calls that take a target namespace.
    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Run a closure with the calling thread switched into this namespace.
    ///
    /// setns(2) is thread-scoped, so the caller must be pinned to one OS
    /// thread for the whole scope; the plugin guarantees that by driving
    /// everything on a current-thread runtime. The host namespace is
    /// restored when the closure returns, on success and error alike.
    pub fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let host = File::open(HOST_NETNS).map_err(|source| Error::NamespaceOpen {
            path: HOST_NETNS.to_string(),
            source,
        })?;

        setns(self.file.as_raw_fd(), CloneFlags::CLONE_NEWNET).map_err(|err| {
            Error::NamespaceOpen {
                path: self.path(),
                source: std::io::Error::from(err),
            }
        })?;
        let _restore = RestoreNetns { host };

        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_path_is_a_namespace_error() {
        let err = NetNs::open("/var/run/netns/does-not-exist").unwrap_err();
        assert!(matches!(err, Error::NamespaceOpen { .. }));
        assert!(err.to_string().contains("does-not-exist"));
    }

    // Entering a namespace needs CAP_SYS_ADMIN; exercised by the root-gated
    // integration tests instead.
    #[test]
    fn own_netns_opens_and_reports_path() {
        let ns = NetNs::open(HOST_NETNS).unwrap();
        assert_eq!(ns.path(), HOST_NETNS);
        assert!(ns.fd() >= 0);
    }
}
