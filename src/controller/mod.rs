//! CA controller
//!
//! Watches the CA Secret and keeps it, the webhook configurations that
//! trust it and the leaf serving certificate signed by it consistent.

mod ca;
mod cascade;
mod propagate;

pub use ca::{
    bootstrap_ca, ensure_ca_secret, error_policy, evaluate, load_ca, persist_ca, reconcile,
    reconcile_ca, Bootstrap, CaState, Context, ReconcileOutcome, RegenerateReason,
};
pub use cascade::{invalidate_leaf_secret, LeafInvalidation};
pub use propagate::{propagate_ca_bundle, BundleTarget, SyncOutcome, TargetOutcome, WebhookTarget};
