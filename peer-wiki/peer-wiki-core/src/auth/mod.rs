//! Authentication: portal handshake tokens, sessions and login throttling.

pub mod handshake;
pub mod session;
pub mod throttle;
pub mod token;

pub use handshake::PortalHandshake;
pub use session::{Claims, SessionKeys};
pub use throttle::LoginThrottle;
pub use token::{AuthToken, TokenStore};
