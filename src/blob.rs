//! Component H — the opaque per-stage binary blobs (DRAM init, stage1,
//! stage2) the orchestrator uploads. See spec §4.H.
//!
//! This crate treats these blobs as caller-supplied data: it has no
//! opinion on where they come from, only on how they're looked up by
//! variant and stage. Callers load them from disk, a resource bundle, or
//! wherever their deployment keeps them and hand them to a `BlobProvider`.

use std::collections::HashMap;

use crate::error::Error;
use crate::identity::Variant;

/// Which stage blob is being requested.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BlobKind {
    DramInit,
    Stage1,
    Stage2,
}

/// Supplies the binary blobs the bootstrap orchestrator uploads at each
/// stage, keyed by variant and kind.
pub trait BlobProvider {
    fn blob(&self, variant: Variant, kind: BlobKind) -> Result<&[u8], Error>;
}

/// An in-memory `BlobProvider` backed by a fixed table, suitable for
/// embedding blobs at build time or loading them once from disk at
/// startup.
#[derive(Default)]
pub struct StaticBlobProvider {
    blobs: HashMap<(Variant, BlobKind), Vec<u8>>,
}

impl StaticBlobProvider {
    pub fn new() -> Self {
        StaticBlobProvider::default()
    }

    /// Registers `data` as the blob for `variant`/`kind`, replacing any
    /// previous registration.
    pub fn insert(&mut self, variant: Variant, kind: BlobKind, data: Vec<u8>) -> &mut Self {
        self.blobs.insert((variant, kind), data);
        self
    }
}

impl BlobProvider for StaticBlobProvider {
    fn blob(&self, variant: Variant, kind: BlobKind) -> Result<&[u8], Error> {
        self.blobs
            .get(&(variant, kind))
            .map(Vec::as_slice)
            .ok_or_else(|| {
                Error::BadParameter(format!(
                    "no {:?} blob registered for variant {:?}",
                    kind, variant
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_blob_is_bad_parameter() {
        let provider = StaticBlobProvider::new();
        let err = provider.blob(Variant::T31, BlobKind::Stage1).unwrap_err();
        assert_eq!(err.status(), crate::error::OperationStatus::BadParameter);
    }

    #[test]
    fn registered_blob_is_returned() {
        let mut provider = StaticBlobProvider::new();
        provider.insert(Variant::T31, BlobKind::Stage1, vec![1, 2, 3]);
        assert_eq!(provider.blob(Variant::T31, BlobKind::Stage1).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn blobs_are_keyed_independently_per_variant() {
        let mut provider = StaticBlobProvider::new();
        provider.insert(Variant::T31, BlobKind::Stage1, vec![1]);
        provider.insert(Variant::T41, BlobKind::Stage1, vec![2]);
        assert_eq!(provider.blob(Variant::T31, BlobKind::Stage1).unwrap(), &[1]);
        assert_eq!(provider.blob(Variant::T41, BlobKind::Stage1).unwrap(), &[2]);
    }
}
