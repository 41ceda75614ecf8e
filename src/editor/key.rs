use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Key length ceiling imposed by the document server protocol.
pub const KEY_LEN: usize = 20;

/// Version key for a document: truncated SHA-256 of `path|mtime_nanos`.
///
/// Pure function of its inputs. Two versions of the same path get different keys,
/// which is what tells the document server to drop its cached copy.
pub fn compute_key(path: &str, modified: DateTime<Utc>) -> String {
    let nanos: i128 = match modified.timestamp_nanos_opt() {
        Some(n) => i128::from(n),
        // outside the i64 nanosecond range (years before 1677 / after 2262)
        None => i128::from(modified.timestamp()) * 1_000_000_000 + i128::from(modified.timestamp_subsec_nanos()),
    };
    let digest = Sha256::digest(format!("{path}|{nanos}").as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(KEY_LEN);
    key
}
