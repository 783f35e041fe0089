pub mod descriptor_matcher;
pub mod identity;
pub mod identity_store;
pub mod registration_coordinator;
