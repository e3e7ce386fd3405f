//! Readable random subdomains

use rand::Rng;

/// Lowercase letters and digits without look-alikes (`i`, `l`, `o`, `0`, `1`)
const READABLE: &[u8] = b"abcdefghjkmnpqrstuvwxyz23456789";

const TOKEN_LEN: usize = 10;

/// `{prefix}-{token}` with a 10 character readable token
pub fn generate_subdomain(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let token: String = (0..TOKEN_LEN)
        .map(|_| READABLE[rng.gen_range(0..READABLE.len())] as char)
        .collect();
    format!("{prefix}-{token}")
}
