//! Persistent slave-id to firmware-signature cache.
//!
//! A small JSON file of append-ordered records. Lookups scan from the end
//! so the newest record for an address wins; the file is bounded to the
//! most recent entries. Cache trouble is never fatal: a missing or
//! unreadable file just means an empty cache.

use busflash_core::device::BusAddress;
use busflash_core::resolve::IdentityStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound on stored records; the oldest are dropped past this.
const MAX_RECORDS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Record {
    port: String,
    slave_id: u8,
    signature: String,
}

pub struct JsonIdentityStore {
    path: PathBuf,
    records: Vec<Record>,
    dirty: bool,
    flushed: bool,
}

impl JsonIdentityStore {
    /// Open the store at `path`, starting empty when the file is missing
    /// or unreadable.
    pub fn open(path: &Path) -> Self {
        let records = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<Record>>(&bytes) {
                Ok(records) => records,
                Err(e) => {
                    log::warn!(
                        "identity cache {} is corrupt ({e}); starting empty",
                        path.display()
                    );
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                log::warn!(
                    "cannot read identity cache {} ({e}); starting empty",
                    path.display()
                );
                Vec::new()
            }
        };
        Self {
            path: path.to_path_buf(),
            records,
            dirty: false,
            flushed: false,
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl IdentityStore for JsonIdentityStore {
    fn get(&mut self, address: &BusAddress) -> Option<String> {
        self.records
            .iter()
            .rev()
            .find(|r| r.port == address.port && r.slave_id == address.slave_id)
            .map(|r| r.signature.clone())
    }

    fn put(&mut self, address: &BusAddress, signature: &str) {
        if self.get(address).as_deref() == Some(signature) {
            return;
        }
        self.records.push(Record {
            port: address.port.clone(),
            slave_id: address.slave_id,
            signature: signature.to_string(),
        });
        if self.records.len() > MAX_RECORDS {
            let excess = self.records.len() - MAX_RECORDS;
            self.records.drain(..excess);
        }
        self.dirty = true;
    }

    fn flush(&mut self) {
        if self.flushed {
            return;
        }
        self.flushed = true;
        if !self.dirty {
            return;
        }
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("cannot create {} ({e}); cache not saved", parent.display());
                return;
            }
        }
        match serde_json::to_vec_pretty(&self.records) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.path, bytes) {
                    log::warn!(
                        "cannot write identity cache {} ({e}); cache not saved",
                        self.path.display()
                    );
                }
            }
            Err(e) => log::warn!("cannot serialise identity cache: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(slave_id: u16) -> BusAddress {
        BusAddress::new("/dev/ttyRS485-1", slave_id).unwrap()
    }

    #[test]
    fn roundtrip_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.json");
        {
            let mut store = JsonIdentityStore::open(&path);
            store.put(&addr(5), "msw3");
            store.put(&addr(6), "mrgbw");
            store.flush();
        }
        let mut store = JsonIdentityStore::open(&path);
        assert_eq!(store.get(&addr(5)).as_deref(), Some("msw3"));
        assert_eq!(store.get(&addr(6)).as_deref(), Some("mrgbw"));
        assert_eq!(store.get(&addr(7)), None);
    }

    #[test]
    fn last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonIdentityStore::open(&dir.path().join("identities.json"));
        store.put(&addr(5), "msw3");
        store.put(&addr(5), "mrgbw");
        assert_eq!(store.get(&addr(5)).as_deref(), Some("mrgbw"));
    }

    #[test]
    fn unchanged_signature_is_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonIdentityStore::open(&dir.path().join("identities.json"));
        store.put(&addr(5), "msw3");
        store.put(&addr(5), "msw3");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn record_count_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonIdentityStore::open(&dir.path().join("identities.json"));
        for i in 1..=(MAX_RECORDS as u16 + 20) {
            let slave = (i % 247) + 1;
            store.put(&BusAddress::new(format!("/dev/p{i}"), slave).unwrap(), "sig");
        }
        assert_eq!(store.len(), MAX_RECORDS);
    }

    #[test]
    fn flush_writes_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.json");
        let mut store = JsonIdentityStore::open(&path);
        store.put(&addr(5), "msw3");
        store.flush();
        // Later puts are intentionally not persisted by a second flush.
        store.put(&addr(6), "mrgbw");
        store.flush();
        let mut reloaded = JsonIdentityStore::open(&path);
        assert_eq!(reloaded.get(&addr(6)), None);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.json");
        std::fs::write(&path, b"{not json").unwrap();
        let mut store = JsonIdentityStore::open(&path);
        assert_eq!(store.get(&addr(5)), None);
    }
}
