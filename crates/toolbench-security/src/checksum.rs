use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha512};

/// Archives are hashed in chunks of this size (1 MiB).
pub const DEFAULT_BUF_SIZE: usize = 0x100000;

pub fn sha512_hex(bytes: &[u8]) -> String {
    hex::encode(Sha512::digest(bytes))
}

pub fn sha512_reader(reader: &mut impl Read) -> Result<String> {
    let mut hasher = Sha512::new();
    let mut buffer = vec![0_u8; DEFAULT_BUF_SIZE];
    loop {
        let read = reader
            .read(&mut buffer)
            .context("failed reading content to hash")?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha512_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    sha512_reader(&mut file).with_context(|| format!("failed to hash {}", path.display()))
}

/// Compares a computed hex digest against a declared one, ignoring case and
/// surrounding whitespace.
pub fn checksums_match(actual_hex: &str, expected_hex: &str) -> bool {
    actual_hex.eq_ignore_ascii_case(expected_hex.trim())
}
