//! Incremental commit sync: drop commits that are already persisted.

use std::collections::HashSet;

use crate::models::RemoteCommit;

/// Keep the candidates whose hash is not in `persisted_hashes`, in
/// candidate order. Applying it twice gives the same result as once.
pub fn filter_unseen(
    candidates: Vec<RemoteCommit>,
    persisted_hashes: &[String],
) -> Vec<RemoteCommit> {
    let seen: HashSet<&str> = persisted_hashes.iter().map(String::as_str).collect();
    candidates
        .into_iter()
        .filter(|c| !seen.contains(c.hash.as_str()))
        .collect()
}
