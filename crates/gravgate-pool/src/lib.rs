pub mod identity;
pub mod pool;
pub mod refresh;

pub use identity::IdentityCache;
pub use pool::{CredentialPool, CredentialUsage, UsageSnapshot};
pub use refresh::{RefreshError, TokenGrant, TokenRefresher, WreqTokenRefresher};
