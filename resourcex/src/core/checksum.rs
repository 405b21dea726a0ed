use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write;
use std::str;
use std::str::FromStr;

use anyhow::{Context, Result, bail, ensure};
use data_encoding::{Encoding, HEXLOWER_PERMISSIVE};
use serde::{Deserialize, Serialize};
use sha2::Digest as _;

/// A SHA-256 content address in the `sha256:<hex>` syntax.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum([u8; 32]);

impl Checksum {
    const HASH_FUNC_TYPE: &'static str = "sha256";
    const ENCODING: Encoding = HEXLOWER_PERMISSIVE;

    /// Hash a byte sequence already held in memory.
    pub fn compute(bytes: impl AsRef<[u8]>) -> Self {
        Digest::new().update(bytes.as_ref()).finish()
    }

    pub fn parse(s: &str) -> Result<Self> {
        fn inner(s: &str) -> Result<Checksum> {
            let Some((hash_func_type, hash)) = s.split_once(':') else {
                bail!("checksum is missing hash function type prefix");
            };

            ensure!(
                hash_func_type == Checksum::HASH_FUNC_TYPE,
                "unsupported hash function type: {hash_func_type}",
            );

            let mut buffer = [0u8; 32];
            let expected_len = buffer.len();

            let decode_len = Checksum::ENCODING.decode_len(hash.len())?;
            ensure!(
                decode_len == expected_len,
                "invalid checksum length {decode_len}, should be {expected_len}"
            );

            let len = Checksum::ENCODING
                .decode_mut(hash.as_bytes(), &mut buffer)
                .map_err(|e| e.error)?;
            ensure!(
                len == expected_len,
                "invalid checksum length {len}, should be {expected_len}"
            );

            Ok(Checksum(buffer))
        }

        inner(s).with_context(|| format!("failed to parse checksum: {s}"))
    }

    /// The hex portion of the address, without the `sha256:` prefix.
    /// This is the blob file name in the on-disk store layout.
    pub fn hex(&self) -> String {
        Self::ENCODING.encode(&self.0)
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        Self::parse(&format!("{}:{hex}", Self::HASH_FUNC_TYPE))
    }
}

impl FromStr for Checksum {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Checksum::parse(s)
    }
}

impl TryFrom<&str> for Checksum {
    type Error = anyhow::Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl TryFrom<String> for Checksum {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Checksum> for String {
    fn from(c: Checksum) -> Self {
        c.to_string()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Checksum::HASH_FUNC_TYPE)?;
        f.write_char(':')?;

        let mut buffer = [0u8; 64];
        Checksum::ENCODING.encode_mut(&self.0, &mut buffer);
        // SAFETY: We just generated this hexadecimal string.
        let string = unsafe { str::from_utf8_unchecked(&buffer) };
        f.write_str(string)?;

        Ok(())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({self})")
    }
}

/// Streaming SHA-256 builder.
pub struct Digest(sha2::Sha256);

impl Digest {
    pub fn new() -> Self {
        Self(sha2::Sha256::new())
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(bytes);
        self
    }

    pub fn finish(&mut self) -> Checksum {
        Checksum(self.0.finalize_reset().into())
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}

/// Digest of a whole file set: SHA-256 over the filename-sorted
/// concatenation of `name:digest\n` lines, one per file.
///
/// The map is ordered by file name, so the result does not depend on the
/// order files were inserted in.
pub fn digest_file_set(files: &BTreeMap<String, Checksum>) -> Checksum {
    let mut digest = Digest::new();
    for (name, checksum) in files {
        digest.update(name.as_bytes());
        digest.update(b":");
        digest.update(checksum.to_string().as_bytes());
        digest.update(b"\n");
    }
    digest.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT: &[u8] = b"Hello, World!";

    #[test]
    fn checksum_parse_display_roundtrip() {
        let s = "sha256:dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";
        let checksum = Checksum::parse(s).unwrap();
        assert_eq!(checksum.to_string(), s);
        assert_eq!(checksum, Checksum::compute(CONTENT));
    }

    #[test]
    fn rejects_bad_prefix_and_length() {
        assert!(Checksum::parse("md5:abcd").is_err());
        assert!(Checksum::parse("sha256:abcd").is_err());
        assert!(Checksum::parse("deadbeef").is_err());
    }

    #[test]
    fn hex_strips_prefix() {
        let checksum = Checksum::compute(CONTENT);
        assert_eq!(format!("sha256:{}", checksum.hex()), checksum.to_string());
        assert_eq!(Checksum::from_hex(&checksum.hex()).unwrap(), checksum);
    }

    #[test]
    fn streaming_equals_oneshot() {
        let streamed = Digest::new().update(b"Hello, ").update(b"World!").finish();
        assert_eq!(streamed, Checksum::compute(CONTENT));
    }

    #[test]
    fn file_set_digest_ignores_insertion_order() {
        let a = Checksum::compute(b"a");
        let b = Checksum::compute(b"b");

        let mut forward = BTreeMap::new();
        forward.insert("one".to_string(), a);
        forward.insert("two".to_string(), b);

        let mut reverse = BTreeMap::new();
        reverse.insert("two".to_string(), b);
        reverse.insert("one".to_string(), a);

        assert_eq!(digest_file_set(&forward), digest_file_set(&reverse));
    }

    #[test]
    fn file_set_digest_depends_on_names() {
        let a = Checksum::compute(b"a");

        let mut one = BTreeMap::new();
        one.insert("one".to_string(), a);

        let mut other = BTreeMap::new();
        other.insert("uno".to_string(), a);

        assert_ne!(digest_file_set(&one), digest_file_set(&other));
    }

    #[test]
    fn serde_roundtrip() {
        let checksum = Checksum::compute(CONTENT);
        let json = serde_json::to_string(&checksum).unwrap();
        assert_eq!(json, format!("\"{checksum}\""));
        let back: Checksum = serde_json::from_str(&json).unwrap();
        assert_eq!(back, checksum);
    }
}
