use thiserror::Error;

use crate::recognition::domain::identity::{Descriptor, Identity};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("identity store unavailable during {operation}: {reason}")]
    Unavailable {
        operation: &'static str,
        reason: String,
    },
    #[error("malformed identity data: {0}")]
    Malformed(String),
}

/// Acknowledgement returned after a descriptor is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReceipt {
    pub ok: bool,
    pub total_identity_count: usize,
}

/// Durable home of identities, consulted and mutated off the detection loop.
///
/// Implementations block; callers run them on background threads.
pub trait IdentityStore: Send + Sync {
    /// Full snapshot of every identity, in store order.
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError>;

    /// Creates an identity with no descriptors and returns its id.
    fn allocate_identity(&self) -> Result<String, StoreError>;

    /// Appends `descriptor` to `id`, creating the identity if the store has
    /// never seen it.
    fn append_descriptor(&self, id: &str, descriptor: &Descriptor)
        -> Result<SaveReceipt, StoreError>;
}

/// Rejects the requests the store contract calls invalid: a blank id or an
/// empty descriptor.
pub fn validate_append(id: &str, descriptor: &Descriptor) -> Result<(), StoreError> {
    if id.trim().is_empty() {
        return Err(StoreError::InvalidPayload("missing identity id".into()));
    }
    if descriptor.is_empty() {
        return Err(StoreError::InvalidPayload("missing descriptor".into()));
    }
    Ok(())
}
