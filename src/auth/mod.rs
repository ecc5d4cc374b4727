// Authentication module
// Token state, single-flight grants and token endpoint calls

mod grant;
mod manager;
mod types;

pub use grant::{classify_status, TokenEndpoint};
pub use manager::AuthManager;
pub use types::{AuthOperation, AuthState, Credentials, TokenResponse, TokenState};
