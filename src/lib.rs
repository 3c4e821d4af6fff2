//! webhook-ca - certificate authority lifecycle for admission webhooks
//!
//! Keeps a self-signed CA in a Secret, rotates it on expiry, and makes sure
//! every admission webhook served from inside the cluster trusts it.
//!
//! # Reconcile pass
//!
//! 1. Load the CA Secret and decide whether the stored CA is still usable
//! 2. Generate a new CA when it is missing or expired
//! 3. Push the CA bundle to the mutating and validating webhook
//!    configurations, one task each, retrying version conflicts
//! 4. Persist the CA Secret
//! 5. If the Secret was rewritten, empty the leaf TLS Secret so its issuer
//!    re-signs it with the new CA
//! 6. Requeue for the CA's expiry
//!
//! # Modules
//!
//! - [`controller`] - Reconcile logic and kube-runtime entry points
//! - [`pki`] - CA generation and parsing
//! - [`store`] - Versioned object access with optimistic concurrency
//! - [`webhook`] - CA bundle injection into webhook configurations
//! - [`retry`] - Backoff and retry-on-conflict
//! - [`config`] - Controller settings
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod error;
pub mod pki;
pub mod retry;
pub mod store;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
