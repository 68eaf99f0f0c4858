//! Zeroize-on-drop byte buffers
//!
//! Holds credentials and block-hash material. The backing memory is wiped
//! when the buffer is dropped, using `explicit_bzero` on Unix so the
//! compiler cannot elide the wipe; elsewhere a volatile write loop is
//! used. Equality is constant-time via the `subtle` crate.

use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

/// SHA-256 fingerprint of arbitrary bytes, held in a secure buffer so
/// integrity material is wiped when no longer needed. Compare with
/// [`SecureBuffer::ct_eq`]; render with [`SecureBuffer::to_hex`].
pub fn sha256_fingerprint(data: &[u8]) -> SecureBuffer {
    let mut hasher = Sha256::new();
    hasher.update(data);
    SecureBuffer::from_vec(hasher.finalize().to_vec())
}

/// A byte buffer that zeroizes its contents on drop.
///
/// `Debug` is redacted. There is intentionally no `Clone`: duplicating
/// secret material should be an explicit `from_slice` at the call site.
pub struct SecureBuffer {
    data: Vec<u8>,
}

impl SecureBuffer {
    /// A zero-filled buffer of the given length.
    pub fn zeroed(len: usize) -> Self {
        SecureBuffer {
            data: vec![0u8; len],
        }
    }

    /// Take ownership of existing bytes. The source vector's allocation
    /// becomes the secure allocation; no copy is left behind.
    pub fn from_vec(data: Vec<u8>) -> Self {
        SecureBuffer { data }
    }

    /// Copy from a slice.
    pub fn from_slice(data: &[u8]) -> Self {
        SecureBuffer {
            data: data.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Constant-time equality. Length inequality returns false without
    /// leaking where the contents differ.
    pub fn ct_eq(&self, other: &SecureBuffer) -> bool {
        bool::from(self.data.as_slice().ct_eq(other.data.as_slice()))
    }

    /// Wipe now, keeping the allocation. Called automatically on drop.
    pub fn wipe(&mut self) {
        wipe_bytes(&mut self.data);
    }

    /// Lowercase hex rendering (for audit metadata). Deliberately
    /// explicit: hex-dumping a secret should look like a decision.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.data)
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        wipe_bytes(&mut self.data);
    }
}

impl fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureBuffer({} bytes, redacted)", self.data.len())
    }
}

#[cfg(unix)]
fn wipe_bytes(bytes: &mut [u8]) {
    if bytes.is_empty() {
        return;
    }
    unsafe {
        libc::explicit_bzero(bytes.as_mut_ptr().cast(), bytes.len());
    }
}

#[cfg(not(unix))]
fn wipe_bytes(bytes: &mut [u8]) {
    // Volatile writes survive dead-store elimination.
    for b in bytes.iter_mut() {
        unsafe { std::ptr::write_volatile(b, 0) };
    }
    std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed() {
        let buf = SecureBuffer::zeroed(16);
        assert_eq!(buf.len(), 16);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_ct_eq_equal() {
        let a = SecureBuffer::from_slice(b"hunter2");
        let b = SecureBuffer::from_slice(b"hunter2");
        assert!(a.ct_eq(&b));
    }

    #[test]
    fn test_ct_eq_differs() {
        let a = SecureBuffer::from_slice(b"hunter2");
        let b = SecureBuffer::from_slice(b"hunter3");
        assert!(!a.ct_eq(&b));
    }

    #[test]
    fn test_ct_eq_length_mismatch() {
        let a = SecureBuffer::from_slice(b"short");
        let b = SecureBuffer::from_slice(b"much longer secret");
        assert!(!a.ct_eq(&b));
    }

    #[test]
    fn test_wipe_clears_contents() {
        let mut buf = SecureBuffer::from_slice(b"api-key-material");
        buf.wipe();
        assert!(buf.as_slice().iter().all(|&b| b == 0));
        assert_eq!(buf.len(), 16); // length unchanged
    }

    #[test]
    fn test_debug_is_redacted() {
        let buf = SecureBuffer::from_slice(b"secret");
        let rendered = format!("{:?}", buf);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_fingerprint_is_stable_and_comparable() {
        let a = sha256_fingerprint(b"block code");
        let b = sha256_fingerprint(b"block code");
        let c = sha256_fingerprint(b"other code");
        assert!(a.ct_eq(&b));
        assert!(!a.ct_eq(&c));
        assert_eq!(a.to_hex().len(), 64);
        assert_eq!(a.to_hex(), b.to_hex());
    }
}
