//! Integrity hashing: an algorithm-agnostic incremental hasher plus a
//! constant-time digest comparison.
//!
//! The transfer state machine never knows which algorithm it is
//! feeding; it only calls [`Hasher::update`] on each chunk it writes
//! and, at EOF, [`Hasher::finalize`]. Enum dispatch keeps every
//! algorithm's state behind one object-safe trait rather than
//! generics, so a `Request` can carry a `HashAlgorithm` value without
//! the crate's public API becoming generic over hash type.

use sha2::Digest as _;
use std::hash::Hasher as _;
use subtle::ConstantTimeEq;

/// Hash algorithm used for integrity verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-256, the standard cryptographic choice for package mirrors.
    Sha256,
    /// SHA-1, kept for compatibility with older checksum manifests.
    Sha1,
    /// MD5, kept for compatibility with older checksum manifests.
    Md5,
    /// BLAKE3, fast and cryptographically secure.
    Blake3,
    /// XXH3, ultra-fast non-cryptographic hash for change detection.
    Xxh3,
    /// XXH64, ultra-fast non-cryptographic hash for change detection.
    Xxh64,
}

impl HashAlgorithm {
    /// Construct a fresh incremental hasher for this algorithm.
    pub fn hasher(self) -> Box<dyn Hasher> {
        match self {
            Self::Sha256 => Box::new(Sha256Hasher(sha2::Sha256::new())),
            Self::Sha1 => Box::new(Sha1Hasher(sha1::Sha1::new())),
            Self::Md5 => Box::new(Md5Hasher(md5::Md5::new())),
            Self::Blake3 => Box::new(Blake3Hasher(blake3::Hasher::new())),
            Self::Xxh3 => Box::new(Xxh3Hasher(xxhash_rust::xxh3::Xxh3::new())),
            Self::Xxh64 => Box::new(Xxh64Hasher(xxhash_rust::xxh64::Xxh64::new(0))),
        }
    }

    /// Short lowercase name, used for benchmark and log labeling.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
            Self::Blake3 => "blake3",
            Self::Xxh3 => "xxh3",
            Self::Xxh64 => "xxh64",
        }
    }
}

/// Incremental write-sink producing a fixed-length digest.
///
/// A capability interface rather than a base class: any type that can
/// consume bytes and eventually produce a digest can be plugged into a
/// [`crate::request::Request`] via [`HashAlgorithm`], or implemented
/// directly for a custom algorithm.
pub trait Hasher: Send {
    /// Feed more data into the hasher.
    fn update(&mut self, data: &[u8]);

    /// Consume the hasher and produce its digest.
    fn finalize(self: Box<Self>) -> Vec<u8>;
}

struct Sha256Hasher(sha2::Sha256);
impl Hasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }
    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().to_vec()
    }
}

struct Sha1Hasher(sha1::Sha1);
impl Hasher for Sha1Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }
    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().to_vec()
    }
}

struct Md5Hasher(md5::Md5);
impl Hasher for Md5Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }
    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().to_vec()
    }
}

struct Blake3Hasher(blake3::Hasher);
impl Hasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }
    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().as_bytes().to_vec()
    }
}

struct Xxh3Hasher(xxhash_rust::xxh3::Xxh3);
impl Hasher for Xxh3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }
    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.0.digest128().to_be_bytes().to_vec()
    }
}

struct Xxh64Hasher(xxhash_rust::xxh64::Xxh64);
impl Hasher for Xxh64Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.write(data);
    }
    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.0.finish().to_be_bytes().to_vec()
    }
}

/// Compare two digests in constant time.
///
/// Used to compare the computed digest against a caller-supplied
/// checksum so that digest comparison does not leak timing
/// information about how many leading bytes matched.
pub fn digests_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sha256_matches_known_vector() {
        let mut h = HashAlgorithm::Sha256.hasher();
        h.update(b"hello world");
        let digest = h.finalize();
        assert_eq!(
            hex::encode(digest),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn blake3_is_deterministic() {
        let mut h1 = HashAlgorithm::Blake3.hasher();
        h1.update(b"chunk one");
        h1.update(b"chunk two");
        let d1 = h1.finalize();

        let mut h2 = HashAlgorithm::Blake3.hasher();
        h2.update(b"chunk onechunk two");
        let d2 = h2.finalize();

        assert_eq!(d1, d2);
    }

    #[test]
    fn digests_equal_rejects_length_mismatch() {
        assert!(!digests_equal(&[1, 2, 3], &[1, 2]));
    }

    #[test]
    fn digests_equal_compares_bytes() {
        assert!(digests_equal(&[1, 2, 3], &[1, 2, 3]));
        assert!(!digests_equal(&[1, 2, 3], &[1, 2, 4]));
    }

    #[test]
    fn xxh3_streaming_matches_oneshot() {
        let mut h1 = HashAlgorithm::Xxh3.hasher();
        h1.update(b"abc");
        h1.update(b"def");
        let d1 = h1.finalize();

        let mut h2 = HashAlgorithm::Xxh3.hasher();
        h2.update(b"abcdef");
        let d2 = h2.finalize();

        assert_eq!(d1, d2);
    }

    proptest::proptest! {
        /// Feeding a byte string in one call or split across two calls
        /// must produce the same digest, for every algorithm and every
        /// split point.
        #[test]
        fn chunking_never_changes_the_digest(data: Vec<u8>, split in 0usize..64) {
            for algo in [
                HashAlgorithm::Sha256,
                HashAlgorithm::Sha1,
                HashAlgorithm::Md5,
                HashAlgorithm::Blake3,
                HashAlgorithm::Xxh3,
                HashAlgorithm::Xxh64,
            ] {
                let split = split.min(data.len());
                let mut whole = algo.hasher();
                whole.update(&data);

                let mut split_hasher = algo.hasher();
                split_hasher.update(&data[..split]);
                split_hasher.update(&data[split..]);

                prop_assert_eq!(whole.finalize(), split_hasher.finalize());
            }
        }

        /// `digests_equal` must agree with plain slice equality.
        #[test]
        fn digests_equal_matches_slice_eq(a: Vec<u8>, b: Vec<u8>) {
            prop_assert_eq!(digests_equal(&a, &b), a == b);
        }
    }
}
