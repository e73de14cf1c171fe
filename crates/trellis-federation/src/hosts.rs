//! Local name resolution entries for peers on the same network.
//!
//! Two nodes behind the same external address cannot reach each other through
//! that address, so a hosts-file line maps the peer's qualified name to its
//! local address instead. Unrelated lines are preserved as-is.

use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use trellis_types::{is_valid_host_name, PeerDescriptor};

#[derive(Debug, Error)]
pub enum HostsError {
    #[error("hosts file i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The entry would not be a single well-formed hosts(5) line.
    #[error("refusing hosts entry {name:?} -> {ip:?}")]
    InvalidEntry { name: String, ip: String },

    #[error("hosts file lock poisoned")]
    LockPoisoned,
}

/// A hosts(5) file shared with the rest of the system.
#[derive(Debug)]
pub struct HostsFile {
    path: PathBuf,
    lock: Mutex<()>,
}

fn line_names(line: &str) -> impl Iterator<Item = &str> {
    let content = line.split('#').next().unwrap_or("");
    content.split_whitespace().skip(1)
}

impl HostsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<String, HostsError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, contents: &str) -> Result<(), HostsError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let staged = tempfile::NamedTempFile::new_in(dir).and_then(|mut tmp| {
            tmp.write_all(contents.as_bytes())?;
            tmp.as_file().sync_all()?;
            Ok(tmp)
        });

        // Bind-mounted files (containers) can not be replaced by rename.
        match staged.map(|tmp| tmp.persist(&self.path)) {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                tracing::debug!(path = %self.path.display(), error = %e.error, "rename failed, writing in place");
                std::fs::write(&self.path, contents)?;
                Ok(())
            }
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "staging failed, writing in place");
                std::fs::write(&self.path, contents)?;
                Ok(())
            }
        }
    }

    /// Returns the address mapped to `name`, if any.
    pub fn lookup(&self, name: &str) -> Result<Option<String>, HostsError> {
        let contents = self.read()?;
        Ok(contents.lines().find_map(|line| {
            if line_names(line).any(|n| n == name) {
                line.split_whitespace().next().map(str::to_string)
            } else {
                None
            }
        }))
    }

    /// Maps `name` to `ip`, replacing any existing entry for the name.
    pub fn set_entry(&self, name: &str, ip: &str) -> Result<(), HostsError> {
        if name.is_empty() || !is_valid_host_name(name) || ip.parse::<IpAddr>().is_err() {
            return Err(HostsError::InvalidEntry {
                name: name.to_string(),
                ip: ip.to_string(),
            });
        }
        let _guard = self.lock.lock().map_err(|_| HostsError::LockPoisoned)?;
        let contents = self.read()?;

        let mut lines: Vec<&str> = contents
            .lines()
            .filter(|line| !line_names(line).any(|n| n == name))
            .collect();
        let entry = format!("{ip}\t{name}");
        lines.push(&entry);

        let mut out = lines.join("\n");
        out.push('\n');
        self.write(&out)
    }

    /// Removes every entry for `name`. Returns `false` if there was none.
    pub fn remove_entry(&self, name: &str) -> Result<bool, HostsError> {
        let _guard = self.lock.lock().map_err(|_| HostsError::LockPoisoned)?;
        let contents = self.read()?;

        let kept: Vec<&str> = contents
            .lines()
            .filter(|line| !line_names(line).any(|n| n == name))
            .collect();
        if kept.len() == contents.lines().count() {
            return Ok(false);
        }

        let mut out = kept.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        self.write(&out)?;
        Ok(true)
    }

    /// Adds an entry for `peer` when it shares `local`'s external address.
    ///
    /// Returns `true` if an entry was written.
    pub fn mirror(&self, local: &PeerDescriptor, peer: &PeerDescriptor) -> Result<bool, HostsError> {
        let name = peer.qualified_name();
        if !local.shares_network_with(peer) || name.is_empty() || peer.local_ip_address.is_empty()
        {
            return Ok(false);
        }
        self.set_entry(&name, &peer.local_ip_address)?;
        tracing::info!(name = %name, ip = %peer.local_ip_address, "added local hosts entry");
        Ok(true)
    }

    /// Removes the entry written by [`HostsFile::mirror`] for `peer`.
    pub fn unmirror(
        &self,
        local: &PeerDescriptor,
        peer: &PeerDescriptor,
    ) -> Result<bool, HostsError> {
        let name = peer.qualified_name();
        if !local.shares_network_with(peer) || name.is_empty() {
            return Ok(false);
        }
        let removed = self.remove_entry(&name)?;
        if removed {
            tracing::info!(name = %name, "removed local hosts entry");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(hostname: &str, external: &str, local: &str) -> PeerDescriptor {
        PeerDescriptor {
            hostname: hostname.to_string(),
            domain: "example.com".to_string(),
            external_ip_address: external.to_string(),
            local_ip_address: local.to_string(),
            mac: hostname.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn set_entry_replaces_and_preserves_other_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1\tlocalhost\n# comment\n10.0.0.9 b.example.com\n").unwrap();

        let hosts = HostsFile::new(&path);
        hosts.set_entry("b.example.com", "10.0.0.2").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("127.0.0.1\tlocalhost"));
        assert!(contents.contains("# comment"));
        assert!(!contents.contains("10.0.0.9"));
        assert_eq!(
            hosts.lookup("b.example.com").unwrap().as_deref(),
            Some("10.0.0.2")
        );
    }

    #[test]
    fn mirror_requires_shared_external_address() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = HostsFile::new(dir.path().join("hosts"));
        let local = descriptor("a", "1.2.3.4", "10.0.0.1");

        let remote = descriptor("far", "5.6.7.8", "10.0.0.2");
        assert!(!hosts.mirror(&local, &remote).unwrap());
        assert_eq!(hosts.lookup("far.example.com").unwrap(), None);

        let near = descriptor("near", "1.2.3.4", "10.0.0.3");
        assert!(hosts.mirror(&local, &near).unwrap());
        assert_eq!(
            hosts.lookup("near.example.com").unwrap().as_deref(),
            Some("10.0.0.3")
        );

        assert!(hosts.unmirror(&local, &near).unwrap());
        assert!(!hosts.unmirror(&local, &near).unwrap());
        assert_eq!(hosts.lookup("near.example.com").unwrap(), None);
    }

    #[test]
    fn injected_lines_are_never_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1\tlocalhost\n").unwrap();
        let hosts = HostsFile::new(&path);
        let local = descriptor("a", "1.2.3.4", "10.0.0.1");

        let newline_name = descriptor("x\n6.6.6.6\tbank.com\n#", "1.2.3.4", "10.0.0.5");
        assert!(matches!(
            hosts.mirror(&local, &newline_name),
            Err(HostsError::InvalidEntry { .. })
        ));

        let spaced_ip = descriptor("near", "1.2.3.4", "10.0.0.5 bank.com");
        assert!(matches!(
            hosts.mirror(&local, &spaced_ip),
            Err(HostsError::InvalidEntry { .. })
        ));

        assert!(hosts.set_entry("ok.example.com", "not-an-ip").is_err());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "127.0.0.1\tlocalhost\n"
        );
    }
}
