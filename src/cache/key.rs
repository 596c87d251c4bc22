//! Cache-store key derivation.

use sha2::{Digest, Sha256};

/// Derive the cache-store key for a path under a scheme.
///
/// The scheme and path are joined URI-style before hashing so that
/// `("x", "a/b")` and `("xa", "b")` cannot meet. SHA-256 gives a stable,
/// fixed-length key.
pub fn entry_key(scheme: &str, path: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(format!("{}://{}", scheme, path).as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_is_stable() {
    assert_eq!(entry_key("public", "a.txt"), entry_key("public", "a.txt"));
    assert_eq!(entry_key("public", "a.txt").len(), 64);
  }

  #[test]
  fn test_scheme_and_path_do_not_blur() {
    assert_ne!(entry_key("x", "a/b"), entry_key("xa", "b"));
    assert_ne!(entry_key("x", "ab"), entry_key("xa", "b"));
    assert_ne!(entry_key("public", "x"), entry_key("private", "x"));
  }

  #[test]
  fn test_known_digest() {
    assert_eq!(
      entry_key("s", "p"),
      hex::encode(Sha256::digest(b"s://p"))
    );
  }
}
