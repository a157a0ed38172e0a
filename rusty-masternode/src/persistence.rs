//! On-disk cache of the registry (`mncache.dat`).
//!
//! Layout: a bincode-encoded format version string followed by the bincode
//! encoded [`RegistryCache`]. A cache written by another format version is
//! thrown away and the registry is rebuilt from peers.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

use log::{info, warn};
use rusty_shared_types::MasternodeRecord;
use serde::{Deserialize, Serialize};

use crate::admission::SeenMessages;
use crate::error::MasternodeError;
use crate::sync::SyncThrottles;

pub const CACHE_FILE_NAME: &str = "mncache.dat";
pub const CACHE_VERSION: &str = "rusty-masternode-cache-1";

/// Everything worth keeping across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryCache {
    pub records: Vec<MasternodeRecord>,
    pub sync_throttles: SyncThrottles,
    pub seen: SeenMessages,
    pub last_watchdog_vote_time: u64,
}

/// Writes the cache atomically (temporary file, then rename).
pub fn save_cache(path: &Path, cache: &RegistryCache) -> Result<(), MasternodeError> {
    let tmp_path = path.with_extension("dat.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        bincode::serialize_into(&mut writer, CACHE_VERSION)?;
        bincode::serialize_into(&mut writer, cache)?;
        writer.flush()?;
    }
    fs::rename(&tmp_path, path)?;
    info!("Saved {} masternodes to {}", cache.records.len(), path.display());
    Ok(())
}

/// Reads a cache, failing on version mismatch or corrupt content.
pub fn read_cache(path: &Path) -> Result<RegistryCache, MasternodeError> {
    // Decoding from a slice bounds every length prefix by the file size.
    let bytes = fs::read(path)?;
    let version: String = bincode::deserialize(&bytes)?;
    if version != CACHE_VERSION {
        return Err(MasternodeError::PersistedStateVersionMismatch {
            expected: CACHE_VERSION.to_string(),
            found: version,
        });
    }
    let offset = bincode::serialized_size(&version)? as usize;
    Ok(bincode::deserialize(&bytes[offset..])?)
}

/// Loads the cache if there is a usable one.
///
/// A missing, outdated or corrupt file yields `Ok(None)`; only I/O failures are errors.
pub fn load_cache(path: &Path) -> Result<Option<RegistryCache>, MasternodeError> {
    match read_cache(path) {
        Ok(cache) => {
            info!("Loaded {} masternodes from {}", cache.records.len(), path.display());
            Ok(Some(cache))
        }
        Err(MasternodeError::Io(err)) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(MasternodeError::Io(err)) => Err(MasternodeError::Io(err)),
        Err(err) => {
            warn!("Discarding masternode cache {}: {}", path.display(), err);
            Ok(None)
        }
    }
}
