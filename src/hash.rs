use sha2::{Digest, Sha256};

/// Stable identifier for a server URL, used to key its local cache file.
///
/// Trailing slashes and ASCII case are normalized away so `http://Node-A:8080/`
/// and `http://node-a:8080` share one cache entry.
pub fn server_hash(url: &str) -> String {
    let normalized = url.trim().trim_end_matches('/').to_ascii_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(digest)
}
