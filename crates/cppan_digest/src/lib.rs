#![deny(missing_docs)]

//! Hashing helpers shared by the cppan crates.
//!
//! Everything content-addressed in the package store is keyed by hex encoded
//! digests: package directories, archive stamps and generated-config caches.
//! This crate wraps the [RustCrypto/hashes](https://github.com/RustCrypto/hashes)
//! algorithms with the few operations the rest of the workspace needs:
//!
//! - [`compute_bytes_digest`] / [`compute_file_digest`] for one-shot hashing,
//! - [`HashingReader`] / [`HashingWriter`] for hashing streams while they are
//!   being consumed (archive downloads hash their body on the fly),
//! - [`hash_hex`] / [`shorten_hash`] for the textual forms stored in the
//!   databases and on disk.

use std::{fs::File, io::Read, io::Write, path::Path};

pub use digest;
use digest::{Digest, Output};

pub use md5::Md5;
pub use sha2::Sha256;

/// A type alias for the output of a SHA256 hash.
pub type Sha256Hash = sha2::digest::Output<Sha256>;

/// A type alias for the output of an MD5 hash.
pub type Md5Hash = md5::digest::Output<Md5>;

/// The number of hex characters kept in a "short" hash. Short hashes name
/// storage shards and synthesized local package paths.
pub const SHORT_HASH_LENGTH: usize = 8;

/// Compute a hash of the specified bytes.
pub fn compute_bytes_digest<D: Digest + Default>(bytes: impl AsRef<[u8]>) -> Output<D> {
    let mut hasher = D::default();
    hasher.update(bytes);
    hasher.finalize()
}

/// Compute a hash of the file at the specified location.
pub fn compute_file_digest<D: Digest + Default + Write>(
    path: impl AsRef<Path>,
) -> Result<Output<D>, std::io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = D::default();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Renders a digest as a lowercase hex string.
pub fn hash_hex<D: Digest>(digest: &Output<D>) -> String {
    hex::encode(digest)
}

/// Computes the hex encoded sha256 of the given bytes.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    hash_hex::<Sha256>(&compute_bytes_digest::<Sha256>(bytes))
}

/// Computes the short form of the hex encoded sha256 of the given bytes.
pub fn sha256_short(bytes: impl AsRef<[u8]>) -> String {
    shorten_hash(&sha256_hex(bytes)).to_owned()
}

/// Truncates a hex hash to [`SHORT_HASH_LENGTH`] characters. Hashes that are
/// already short are returned unchanged.
pub fn shorten_hash(hash: &str) -> &str {
    if hash.len() <= SHORT_HASH_LENGTH {
        hash
    } else {
        &hash[..SHORT_HASH_LENGTH]
    }
}

/// Parses a hex representation of a digest into its byte form.
pub fn parse_digest_from_hex<D: Digest>(str: &str) -> Option<Output<D>> {
    let mut hash = <Output<D>>::default();
    match hex::decode_to_slice(str, &mut hash) {
        Ok(_) => Some(hash),
        Err(_) => None,
    }
}

/// A simple object that provides a [`Read`] implementation that also
/// immediately hashes the bytes read from it. Call [`HashingReader::finalize`]
/// to retrieve both the original `impl Read` object as well as the hash.
pub struct HashingReader<R, D: Digest> {
    reader: R,
    hasher: D,
}

impl<R, D: Digest + Default> HashingReader<R, D> {
    /// Constructs a new instance from a reader and a new (empty) hasher.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            hasher: Default::default(),
        }
    }
}

impl<R, D: Digest> HashingReader<R, D> {
    /// Consumes this instance and returns the original reader and the hash of
    /// all bytes read from this instance.
    pub fn finalize(self) -> (R, Output<D>) {
        (self.reader, self.hasher.finalize())
    }
}

impl<R: Read, D: Digest> Read for HashingReader<R, D> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes_read = self.reader.read(buf)?;
        self.hasher.update(&buf[..bytes_read]);
        Ok(bytes_read)
    }
}

/// A simple object that provides a [`Write`] implementation that also
/// immediately hashes the bytes written to it. Call
/// [`HashingWriter::finalize`] to retrieve both the original `impl Write`
/// object as well as the hash.
pub struct HashingWriter<W, D: Digest> {
    writer: W,
    hasher: D,
}

impl<W, D: Digest + Default> HashingWriter<W, D> {
    /// Constructs a new instance from a writer and a new (empty) hasher.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: Default::default(),
        }
    }
}

impl<W, D: Digest> HashingWriter<W, D> {
    /// Consumes this instance and returns the original writer and the hash of
    /// all bytes written to this instance.
    pub fn finalize(self) -> (W, Output<D>) {
        (self.writer, self.hasher.finalize())
    }
}

impl<W: Write, D: Digest> Write for HashingWriter<W, D> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let bytes = self.writer.write(buf)?;
        self.hasher.update(&buf[..bytes]);
        Ok(bytes)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use rstest::rstest;
    use sha2::Sha256;

    use super::HashingReader;

    #[rstest]
    #[case(
        "1234567890",
        "c775e7b757ede630cd0aa1113bd102661ab38829ca52a6422ab782862f268646"
    )]
    #[case(
        "Hello, world!",
        "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
    )]
    fn test_compute_file_sha256(#[case] input: &str, #[case] expected_hash: &str) {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test");
        std::fs::write(&file_path, input).unwrap();
        let hash = super::compute_file_digest::<sha2::Sha256>(&file_path).unwrap();

        assert_eq!(format!("{hash:x}"), expected_hash);
    }

    #[rstest]
    #[case(
        "1234567890",
        "c775e7b757ede630cd0aa1113bd102661ab38829ca52a6422ab782862f268646"
    )]
    fn test_hashing_reader_sha256(#[case] input: &str, #[case] expected_hash: &str) {
        let mut cursor = HashingReader::<_, Sha256>::new(std::io::Cursor::new(input));
        let mut cursor_string = String::new();
        cursor.read_to_string(&mut cursor_string).unwrap();
        assert_eq!(&cursor_string, input);
        let (_, hash) = cursor.finalize();
        assert_eq!(format!("{hash:x}"), expected_hash);
    }

    #[test]
    fn test_shorten_hash() {
        let h = super::sha256_hex("org.example/1.2.3");
        assert_eq!(h.len(), 64);
        assert_eq!(super::shorten_hash(&h), &h[..8]);
        assert_eq!(super::shorten_hash("abc"), "abc");
    }
}
