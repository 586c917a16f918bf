//! On-disk copy of each server's replication topology.
//!
//! One file per server hash holds the server's topology document verbatim, so
//! a client that starts while the primary is down still knows where the
//! replicas are. Failures here never reach the caller: they are logged and
//! read as "nothing cached".

use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct LocalCache {
    dir: PathBuf,
}

impl LocalCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        LocalCache { dir: dir.into() }
    }

    pub fn path_for(&self, server_hash: &str) -> PathBuf {
        self.dir
            .join(format!("replication-destinations-{}.json", server_hash))
    }

    /// The cached topology document for `server_hash`, or `None` when it is
    /// missing or unreadable.
    pub fn try_load(&self, server_hash: &str) -> Option<serde_json::Value> {
        let path = self.path_for(server_hash);
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<serde_json::Value>(&content) {
                Ok(document) => Some(document),
                Err(e) => {
                    tracing::warn!(
                        "Could not parse cached replication information {}: {}",
                        path.display(),
                        e
                    );
                    None
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Could not read cached replication information {}: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// Replace the cached document for `server_hash`. Returns whether the
    /// write landed.
    pub fn try_save(&self, server_hash: &str, document: &serde_json::Value) -> bool {
        match self.save(server_hash, document) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "Could not persist replication information for {}: {}",
                    server_hash,
                    e
                );
                false
            }
        }
    }

    /// The whole document goes to a temp file in the same directory, which is
    /// then renamed over the old file, so readers never see a partial write.
    fn save(&self, server_hash: &str, document: &serde_json::Value) -> ravelin::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_vec_pretty(document)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(server_hash))
            .map_err(|e| ravelin::RavelinError::Io(e.error.to_string()))?;
        Ok(())
    }
}
