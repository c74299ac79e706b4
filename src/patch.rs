//! Patch and file-key value types.
//!
//! A [`Patch`] is an opaque, immutable unit of document change produced by
//! the edit-capture layer. The queue never inspects its contents; ordering
//! comes entirely from the position a patch holds in its offering order.

use serde::{Deserialize, Serialize};

/// Identifier scoping one independent buffer/flush lifecycle.
///
/// Two different keys never interact: each gets its own buffer, timer,
/// and in-flight apply call.
pub type FileKey = String;

/// An opaque, immutable unit of document change.
///
/// Equality and any intrinsic identity are the caller's concern; the
/// queue only preserves offer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    payload: Vec<u8>,
}

impl Patch {
    /// Wrap raw edit bytes in a patch.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// The opaque edit payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the patch, returning its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_wraps_payload() {
        let patch = Patch::new(vec![1, 2, 3]);
        assert_eq!(patch.payload(), &[1, 2, 3]);
        assert_eq!(patch.len(), 3);
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_patch_from_slice() {
        let patch = Patch::new(b"insert:hello".to_vec());
        assert_eq!(patch.into_payload(), b"insert:hello");
    }

    #[test]
    fn test_empty_patch_allowed() {
        let patch = Patch::new(Vec::new());
        assert!(patch.is_empty());
        assert_eq!(patch.len(), 0);
    }

    #[test]
    fn test_patch_equality_is_payload_equality() {
        assert_eq!(Patch::new(vec![7]), Patch::new(vec![7]));
        assert_ne!(Patch::new(vec![7]), Patch::new(vec![8]));
    }
}
