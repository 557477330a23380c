mod checksum;

pub use checksum::{checksums_match, sha512_file, sha512_hex, sha512_reader, DEFAULT_BUF_SIZE};
