use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::recognition::domain::identity::{Descriptor, Identity};
use crate::recognition::domain::identity_store::{
    validate_append, IdentityStore, SaveReceipt, StoreError,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity store reached over HTTP + JSON.
///
/// Endpoints, relative to `base_url`:
/// - `GET  /users.json`   → `[{"id", "descriptors"}]`
/// - `POST /register_new` → `{"id"}`
/// - `POST /save` with `{"id", "descriptor"}` → `{"ok", "usersCount"}`
pub struct HttpIdentityStore {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct AllocateResponse {
    id: Option<String>,
}

#[derive(Serialize)]
struct SaveRequest<'a> {
    id: &'a str,
    descriptor: &'a [f32],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    users_count: usize,
}

impl HttpIdentityStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| unavailable("connect", e))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

fn unavailable(operation: &'static str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable {
        operation,
        reason: e.to_string(),
    }
}

/// Maps a non-success status to the store taxonomy: 400 means the request
/// itself was rejected, anything else means the store could not serve it.
fn check_status(
    operation: &'static str,
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    if status == StatusCode::BAD_REQUEST {
        Err(StoreError::InvalidPayload(body))
    } else {
        Err(unavailable(operation, format!("HTTP {status}: {body}")))
    }
}

impl IdentityStore for HttpIdentityStore {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let response = self
            .client
            .get(self.url("users.json"))
            .send()
            .map_err(|e| unavailable("list_identities", e))?;
        check_status("list_identities", response)?
            .json::<Vec<Identity>>()
            .map_err(|e| StoreError::Malformed(e.to_string()))
    }

    fn allocate_identity(&self) -> Result<String, StoreError> {
        let response = self
            .client
            .post(self.url("register_new"))
            .send()
            .map_err(|e| unavailable("allocate_identity", e))?;
        let body: AllocateResponse = check_status("allocate_identity", response)?
            .json()
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        body.id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StoreError::Malformed("register_new returned no id".into()))
    }

    fn append_descriptor(
        &self,
        id: &str,
        descriptor: &Descriptor,
    ) -> Result<SaveReceipt, StoreError> {
        validate_append(id, descriptor)?;
        let response = self
            .client
            .post(self.url("save"))
            .json(&SaveRequest { id, descriptor })
            .send()
            .map_err(|e| unavailable("append_descriptor", e))?;
        let body: SaveResponse = check_status("append_descriptor", response)?
            .json()
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        Ok(SaveReceipt {
            ok: body.ok,
            total_identity_count: body.users_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_normalized() {
        let store = HttpIdentityStore::new("http://localhost:3001/").unwrap();
        assert_eq!(store.url("users.json"), "http://localhost:3001/users.json");
    }

    #[test]
    fn test_save_request_wire_format() {
        let body = serde_json::to_string(&SaveRequest {
            id: "user1",
            descriptor: &[0.5, 1.0],
        })
        .unwrap();
        assert_eq!(body, r#"{"id":"user1","descriptor":[0.5,1.0]}"#);
    }

    #[test]
    fn test_save_response_reads_users_count() {
        let body: SaveResponse = serde_json::from_str(r#"{"ok":true,"usersCount":3}"#).unwrap();
        assert!(body.ok);
        assert_eq!(body.users_count, 3);
    }

    #[test]
    fn test_invalid_payload_rejected_before_any_request() {
        let store = HttpIdentityStore::new("http://invalid.nonexistent.example.com").unwrap();
        assert!(matches!(
            store.append_descriptor("", &vec![0.1]),
            Err(StoreError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_unreachable_store_is_unavailable() {
        let store = HttpIdentityStore::new("http://invalid.nonexistent.example.com").unwrap();
        assert!(matches!(
            store.allocate_identity(),
            Err(StoreError::Unavailable { .. })
        ));
    }
}
