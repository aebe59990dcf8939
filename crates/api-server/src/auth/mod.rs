pub mod extract;
pub mod google;
pub mod token;

pub use extract::{ClientAddr, CurrentUser};
pub use google::{GoogleOAuth, GoogleUser};
pub use token::{Claims, TokenIssuer};

pub const INVALID_AUTH: &str = "Invalid auth data.";
pub const UNAUTHORISED: &str = "Unauthorised request.";
pub const NOT_AUTHENTICATED: &str = "Not authenticated.";
pub const INVALID_SCHEME: &str = "Invalid authentication scheme.";
