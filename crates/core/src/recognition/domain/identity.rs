use serde::{Deserialize, Serialize};

/// Fixed-length face embedding produced by the analyzer.
pub type Descriptor = Vec<f32>;

/// A known person: a unique id and the reference descriptors recorded for it.
///
/// Descriptors are only ever appended by the store; the loop treats a
/// snapshot of identities as read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub descriptors: Vec<Descriptor>,
}

impl Identity {
    pub fn new(id: impl Into<String>, descriptors: Vec<Descriptor>) -> Self {
        Self {
            id: id.into(),
            descriptors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_round_trips_field_names() {
        let identity = Identity::new("user1", vec![vec![0.5, -0.25]]);
        let json = serde_json::to_string(&identity).unwrap();
        assert_eq!(json, r#"{"id":"user1","descriptors":[[0.5,-0.25]]}"#);
    }

    #[test]
    fn test_missing_descriptors_deserialize_as_empty() {
        let identity: Identity = serde_json::from_str(r#"{"id":"user2"}"#).unwrap();
        assert_eq!(identity.id, "user2");
        assert!(identity.descriptors.is_empty());
    }
}
