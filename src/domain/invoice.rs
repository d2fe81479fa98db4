//! Invoice code generation.

use chrono::{DateTime, Utc};
use rand::Rng;

const SUFFIX_LEN: usize = 6;
const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Maximum attempts at generating a collision-free invoice code before the
/// checkout fails closed.
pub const MAX_GENERATION_ATTEMPTS: u32 = 5;

/// Generates a human-readable invoice code: `PREFIX` + `YYYYMMDD` + `-` +
/// random suffix. The charset omits ambiguous characters (0/O, 1/I).
///
/// Uniqueness is not guaranteed here; the caller checks the store and retries
/// up to [`MAX_GENERATION_ATTEMPTS`] times.
pub fn generate_invoice_code(prefix: &str, now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("{}{}-{}", prefix, now.format("%Y%m%d"), suffix)
}
