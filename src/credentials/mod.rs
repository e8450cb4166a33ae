// Gateway module for credentials - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod store;
mod types;

// Public re-exports - the ONLY way to access credential functionality
pub use store::{CredentialStore, LEGACY_KEY_ID};
pub use types::{mask_secret, ApiKeyRecord, MaskedKey};
