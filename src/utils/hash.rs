//! Path hashing
//!
//! Derives short stable identifiers from job paths.

/// Compute the stable identifier for a job path.
///
/// Based on Java's `String.hashCode`: a simple rolling hash, not rigorously
/// collision resistant. Identical paths always produce identical values,
/// which is what makes hashes usable as external selectors ("run only this
/// job", "rerun failed"). The hash runs over UTF-16 code units of the path
/// segments joined with an information separator, and renders as 8 hex
/// digits so selectors stay compact in query strings and saved run files.
pub fn generate_hash(path: &[String]) -> String {
    let joined = path.join("\u{1C}");
    let mut hash: i32 = 0;

    for unit in joined.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }

    format!("{:08x}", hash as u32)
}
