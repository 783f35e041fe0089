pub mod http_identity_store;
pub mod json_file_identity_store;
