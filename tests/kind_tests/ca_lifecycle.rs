//! Stories about the CA lifecycle against a real API server

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, PostParams};

use webhook_ca::config::ControllerConfig;
use webhook_ca::controller::{
    bootstrap_ca, reconcile_ca, Bootstrap, Context, LeafInvalidation, RegenerateReason,
};
use webhook_ca::pki::CertificateAuthority;
use webhook_ca::store::OperationResult;
use webhook_ca::webhook::CaBundleConsumer;

use super::helpers::{
    cleanup, ensure_namespace, leaf_secret, mutating_config, test_client, validating_config,
    EXTERNAL_BUNDLE,
};

fn test_config(prefix: &str) -> ControllerConfig {
    ControllerConfig {
        namespace: format!("{}-system", prefix),
        ca_secret_name: format!("{}-ca", prefix),
        tls_secret_name: format!("{}-tls", prefix),
        mutating_webhook_configuration: format!("{}-mutating", prefix),
        validating_webhook_configuration: format!("{}-validating", prefix),
        ..Default::default()
    }
}

async fn stored_ca(secrets: &Api<Secret>, name: &str) -> CertificateAuthority {
    let secret = secrets.get(name).await.expect("CA secret should exist");
    CertificateAuthority::from_secret_data(secret.data.as_ref())
        .expect("CA should decode")
        .expect("CA should be present")
}

/// Story: the controller starts on a fresh cluster
///
/// The webhook configurations exist but carry no CA bundle. Startup
/// issues the CA, creating its Secret, and every service-backed webhook
/// entry ends up trusting it. URL-backed entries keep their own bundle.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_bootstrap_fills_both_webhook_configurations() {
    let client = test_client().await.expect("failed to connect to cluster");
    let config = test_config("webhook-ca-bootstrap");
    cleanup(
        &client,
        &config.namespace,
        &config.mutating_webhook_configuration,
        &config.validating_webhook_configuration,
    )
    .await;

    ensure_namespace(&client, &config.namespace)
        .await
        .expect("failed to create namespace");
    let mutating: Api<MutatingWebhookConfiguration> = Api::all(client.clone());
    mutating
        .create(
            &PostParams::default(),
            &mutating_config(&config.mutating_webhook_configuration, &config.namespace),
        )
        .await
        .expect("failed to create mutating configuration");
    let validating: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());
    validating
        .create(
            &PostParams::default(),
            &validating_config(&config.validating_webhook_configuration, &config.namespace),
        )
        .await
        .expect("failed to create validating configuration");

    let ctx = Context::from_client(client.clone(), &config);

    // Act: startup
    let bootstrap = bootstrap_ca(&ctx, &ctx.retry)
        .await
        .expect("startup should succeed");
    let Bootstrap::Issued(outcome) = bootstrap else {
        panic!("expected Issued, got {:?}", bootstrap);
    };
    assert_eq!(outcome.regenerated, Some(RegenerateReason::Missing));
    assert_eq!(outcome.persistence, OperationResult::Created);
    assert_eq!(outcome.leaf, None);
    assert_eq!(outcome.targets_updated(), 2);

    // Assert: both configurations trust the stored CA
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &config.namespace);
    let ca = stored_ca(&secrets, &config.ca_secret_name).await;

    let m = mutating
        .get(&config.mutating_webhook_configuration)
        .await
        .expect("mutating configuration");
    assert!(m.ca_bundle_in_sync(ca.ca_bundle()));
    let v = validating
        .get(&config.validating_webhook_configuration)
        .await
        .expect("validating configuration");
    assert!(v.ca_bundle_in_sync(ca.ca_bundle()));

    // Assert: URL entries were not touched
    for client_config in m.client_configs().into_iter().chain(v.client_configs()) {
        if client_config.url.is_some() {
            assert_eq!(
                client_config.ca_bundle.as_ref().map(|b| b.0.as_slice()),
                Some(EXTERNAL_BUNDLE)
            );
        }
    }

    // Act: second pass is a no-op
    let again = reconcile_ca(&ctx).await.expect("second pass should succeed");
    assert_eq!(again.persistence, OperationResult::Unchanged);
    assert_eq!(again.regenerated, None);

    cleanup(
        &client,
        &config.namespace,
        &config.mutating_webhook_configuration,
        &config.validating_webhook_configuration,
    )
    .await;
}

/// Story: an operator forces a CA rotation
///
/// Emptying the CA Secret makes the next pass generate a new CA. The leaf
/// TLS secret signed by the old one is emptied so its issuer re-signs it.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_forced_rotation_invalidates_leaf_secret() {
    let client = test_client().await.expect("failed to connect to cluster");
    let config = test_config("webhook-ca-rotation");
    cleanup(
        &client,
        &config.namespace,
        &config.mutating_webhook_configuration,
        &config.validating_webhook_configuration,
    )
    .await;

    ensure_namespace(&client, &config.namespace)
        .await
        .expect("failed to create namespace");
    let mutating: Api<MutatingWebhookConfiguration> = Api::all(client.clone());
    mutating
        .create(
            &PostParams::default(),
            &mutating_config(&config.mutating_webhook_configuration, &config.namespace),
        )
        .await
        .expect("failed to create mutating configuration");
    let validating: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());
    validating
        .create(
            &PostParams::default(),
            &validating_config(&config.validating_webhook_configuration, &config.namespace),
        )
        .await
        .expect("failed to create validating configuration");

    let ctx = Context::from_client(client.clone(), &config);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &config.namespace);

    // Arrange: a CA and a leaf secret signed by it
    let first = reconcile_ca(&ctx).await.expect("bootstrap pass");
    assert_eq!(first.persistence, OperationResult::Created);
    let old = stored_ca(&secrets, &config.ca_secret_name).await;
    secrets
        .create(
            &PostParams::default(),
            &leaf_secret(&config.tls_secret_name, &config.namespace),
        )
        .await
        .expect("failed to create leaf secret");

    // Act: operator empties the CA secret
    let mut ca_secret = secrets
        .get(&config.ca_secret_name)
        .await
        .expect("CA secret");
    ca_secret.data = None;
    secrets
        .replace(&config.ca_secret_name, &PostParams::default(), &ca_secret)
        .await
        .expect("failed to empty CA secret");

    let outcome = reconcile_ca(&ctx).await.expect("rotation pass");

    // Assert: new CA, distributed, leaf emptied
    assert_eq!(outcome.persistence, OperationResult::Updated);
    assert_eq!(outcome.leaf, Some(LeafInvalidation::Cleared));

    let new = stored_ca(&secrets, &config.ca_secret_name).await;
    assert_ne!(new.cert_pem(), old.cert_pem());

    let m = mutating
        .get(&config.mutating_webhook_configuration)
        .await
        .expect("mutating configuration");
    assert!(m.ca_bundle_in_sync(new.ca_bundle()));
    let v = validating
        .get(&config.validating_webhook_configuration)
        .await
        .expect("validating configuration");
    assert!(v.ca_bundle_in_sync(new.ca_bundle()));

    let leaf = secrets
        .get(&config.tls_secret_name)
        .await
        .expect("leaf secret");
    assert!(leaf.data.unwrap_or_default().is_empty());

    cleanup(
        &client,
        &config.namespace,
        &config.mutating_webhook_configuration,
        &config.validating_webhook_configuration,
    )
    .await;
}
