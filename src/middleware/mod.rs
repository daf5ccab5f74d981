pub mod bearer_auth;
pub mod security_headers;

pub use bearer_auth::{authenticate_headers, extract_bearer_token, require_auth, CurrentUser};
pub use security_headers::add_security_headers;
