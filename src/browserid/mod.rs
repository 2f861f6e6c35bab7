//! BrowserID-style identity material: the RSA key pair the account
//! certifies, and the assertion builder that proves the certification
//! to a relying service.
pub mod jwt;
pub mod rsa;

pub use self::rsa::RsaBrowserIdKeyPair;
pub use jwt::create_assertion;
