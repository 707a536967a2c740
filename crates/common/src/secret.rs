//! Secret types for keeping credentials out of logs.
//!
//! Registry connection strings routinely embed a password
//! (`redis://:password@host:6379`). Wrapping them in [`SecretString`] means any
//! struct deriving `Debug` around them, and any `tracing` field formatted with
//! `?`, prints a redacted placeholder instead of the credential.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct RegistryEndpoint {
//!     key: String,
//!     url: SecretString,
//! }
//!
//! let endpoint = RegistryEndpoint {
//!     key: "sessionid".to_string(),
//!     url: SecretString::from("redis://:hunter2@cache:6379"),
//! };
//!
//! assert!(!format!("{endpoint:?}").contains("hunter2"));
//! assert_eq!(endpoint.url.expose_secret(), "redis://:hunter2@cache:6379");
//! ```
//!
//! Secrets are zeroized on drop. Call `expose_secret()` only at the point the
//! value is handed to the client library that needs it.

pub use secrecy::{ExposeSecret, SecretString};
