use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::Digest;

/// Truncated SHA-256 of a store key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyDigest([u8; 16]);

impl KeyDigest {
    pub fn from_key(key: &str) -> Self {
        let digest = sha2::Sha256::digest(key.as_bytes());
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        Self(out)
    }
}

impl fmt::Debug for KeyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyDigest")
            .field(&hex::encode(self.0))
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AccessMeta {
    pub created_ms: u64,
    pub last_access_ms: u64,
}

/// Last-access bookkeeping that survives restarts.
///
/// `cacache` only records write times, so reads are tracked here and written
/// out as a compact binary snapshot.
#[derive(Debug)]
pub struct AccessIndex {
    path: PathBuf,
    entries: HashMap<KeyDigest, AccessMeta>,
    dirty: bool,
    last_flushed_ms: u64,
}

impl AccessIndex {
    pub const FILE_NAME: &'static str = "access-index-v1.bin";
    const MAGIC: [u8; 8] = *b"STRATA01";
    const VERSION: u32 = 1;
    const HEADER_LEN: usize = 8 + 4 + 4;
    const RECORD_LEN: usize = 16 + 8 + 8;

    pub fn load_or_default(path: PathBuf, now_ms: u64) -> Self {
        let entries = match load_file(&path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    "disk store access index unreadable, starting empty: {e}"
                );
                HashMap::new()
            }
        };
        Self {
            path,
            entries,
            dirty: false,
            last_flushed_ms: now_ms,
        }
    }

    pub fn touch(&mut self, digest: KeyDigest, now_ms: u64) {
        self.entries
            .entry(digest)
            .and_modify(|m| m.last_access_ms = now_ms)
            .or_insert(AccessMeta {
                created_ms: now_ms,
                last_access_ms: now_ms,
            });
        self.dirty = true;
    }

    /// A written entry starts over, even when it replaced an older one.
    pub fn insert_on_write(&mut self, digest: KeyDigest, now_ms: u64) {
        self.entries.insert(
            digest,
            AccessMeta {
                created_ms: now_ms,
                last_access_ms: now_ms,
            },
        );
        self.dirty = true;
    }

    pub fn last_access_ms(&self, digest: &KeyDigest) -> Option<u64> {
        self.entries.get(digest).map(|m| m.last_access_ms)
    }

    pub fn remove(&mut self, digest: &KeyDigest) -> bool {
        let removed = self.entries.remove(digest).is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.dirty = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn prune_not_in_set(&mut self, present: &HashSet<KeyDigest>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| present.contains(k));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    pub fn should_flush(
        &self,
        now_ms: u64,
        flush_interval_ms: u64,
        under_pressure: bool,
    ) -> bool {
        if !self.dirty {
            return false;
        }
        if under_pressure {
            return true;
        }
        now_ms.saturating_sub(self.last_flushed_ms) >= flush_interval_ms
    }

    pub fn prepare_flush(&mut self, now_ms: u64) -> Option<(PathBuf, Vec<u8>)> {
        if !self.dirty {
            return None;
        }
        let bytes = self.serialize();
        self.dirty = false;
        self.last_flushed_ms = now_ms;
        Some((self.path.clone(), bytes))
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            Self::HEADER_LEN + self.entries.len() * Self::RECORD_LEN,
        );
        out.extend_from_slice(&Self::MAGIC);
        out.extend_from_slice(&Self::VERSION.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (digest, meta) in &self.entries {
            out.extend_from_slice(&digest.0);
            out.extend_from_slice(&meta.created_ms.to_le_bytes());
            out.extend_from_slice(&meta.last_access_ms.to_le_bytes());
        }
        out
    }
}

/// Parse a snapshot. Unknown magic or version and truncated records yield
/// whatever could be read; only I/O failures are errors.
fn load_file(path: &Path) -> std::io::Result<HashMap<KeyDigest, AccessMeta>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(HashMap::new());
        }
        Err(e) => return Err(e),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(parse(&buf))
}

fn parse(buf: &[u8]) -> HashMap<KeyDigest, AccessMeta> {
    let mut reader = Reader { buf, cursor: 0 };

    let Some(magic) = reader.take::<8>() else {
        return HashMap::new();
    };
    if magic != AccessIndex::MAGIC {
        return HashMap::new();
    }
    if reader.u32() != Some(AccessIndex::VERSION) {
        return HashMap::new();
    }
    let Some(count) = reader.u32() else {
        return HashMap::new();
    };

    let mut out = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let (Some(digest), Some(created_ms), Some(last_access_ms)) =
            (reader.take::<16>(), reader.u64(), reader.u64())
        else {
            break;
        };
        out.insert(
            KeyDigest(digest),
            AccessMeta {
                created_ms,
                last_access_ms,
            },
        );
    }
    out
}

struct Reader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let end = self.cursor.checked_add(N)?;
        let bytes: [u8; N] = self.buf.get(self.cursor..end)?.try_into().ok()?;
        self.cursor = end;
        Some(bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Option<u64> {
        self.take::<8>().map(u64::from_le_bytes)
    }
}

/// Write `bytes` to `path` atomically (temp file, fsync, rename).
pub fn write_snapshot_sync(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "index path has no parent",
        )
    })?;
    std::fs::create_dir_all(parent)?;

    let tmp_path = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn snapshot_survives_a_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(AccessIndex::FILE_NAME);

        let mut index = AccessIndex::load_or_default(path.clone(), 0);
        let a = KeyDigest::from_key("a");
        let b = KeyDigest::from_key("b");
        index.insert_on_write(a, 10);
        index.insert_on_write(b, 20);
        index.touch(a, 30);

        let (snapshot_path, bytes) = index.prepare_flush(30).unwrap();
        write_snapshot_sync(&snapshot_path, &bytes).unwrap();
        assert!(index.prepare_flush(31).is_none(), "flush clears dirty");

        let reloaded = AccessIndex::load_or_default(path, 40);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.last_access_ms(&a), Some(30));
        assert_eq!(reloaded.last_access_ms(&b), Some(20));
    }

    #[test]
    fn foreign_or_truncated_files_load_what_they_can() {
        assert!(parse(b"NOTANINDEX-------").is_empty());
        assert!(parse(b"").is_empty());

        let mut index = AccessIndex::load_or_default(PathBuf::from("x"), 0);
        index.touch(KeyDigest::from_key("a"), 1);
        index.touch(KeyDigest::from_key("b"), 2);
        let (_, mut bytes) = index.prepare_flush(2).unwrap();
        bytes.truncate(bytes.len() - 4);

        assert_eq!(parse(&bytes).len(), 1);
    }

    #[test]
    fn flush_waits_for_interval_unless_under_pressure() {
        let mut index = AccessIndex::load_or_default(PathBuf::from("x"), 100);
        assert!(!index.should_flush(10_000, 1_000, true), "clean index");

        index.touch(KeyDigest::from_key("a"), 150);
        assert!(!index.should_flush(500, 1_000, false));
        assert!(index.should_flush(500, 1_000, true));
        assert!(index.should_flush(1_100, 1_000, false));
    }

    #[test]
    fn prune_drops_digests_missing_from_the_store() {
        let mut index = AccessIndex::load_or_default(PathBuf::from("x"), 0);
        let keep = KeyDigest::from_key("keep");
        index.touch(keep, 1);
        index.touch(KeyDigest::from_key("gone"), 1);

        let present = HashSet::from([keep]);
        assert_eq!(index.prune_not_in_set(&present), 1);
        assert_eq!(index.len(), 1);
        assert!(index.last_access_ms(&keep).is_some());
    }
}
