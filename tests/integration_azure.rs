//! Azure Key Vault end-to-end tests against a local HTTP fake.
//!
//! A single wiremock server plays both the Entra ID token endpoint (via
//! `authority_host`) and the vault itself, so discovery, credential
//! derivation, token exchange and the secret read all run for real.

#![cfg(feature = "azure")]

use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;
use vaultlink::backends::azure::AzureKeyVaultConfig;
use vaultlink::registry::{AzureKeyVaultFamily, ConfigOrigin};
use vaultlink::{init_all, EnvSnapshot, VaultRegistry, VaultlinkError, VAULT_TYPE_AZURE_KEY_VAULT};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LEAF_THUMBPRINT: &str = "WlZgxa3vZu6WPy9a5SD_2Xmx-MQ";

fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn jwt_env(server: &MockServer) -> EnvSnapshot {
    EnvSnapshot::new("test")
        .with_var("APP_AZURE_KEY_VAULT_TENANT_ID", "t1")
        .with_var("APP_AZURE_KEY_VAULT_CLIENT_ID", "c1")
        .with_var("APP_AZURE_KEY_VAULT_URL", server.uri())
        .with_var("APP_AZURE_KEY_VAULT_JWT", "abc")
        .with_var("APP_AZURE_KEY_VAULT_AUTHORITY_HOST", server.uri())
}

async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/t1/oauth2/v2.0/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": "tok-1"
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_secret(server: &MockServer, secret_path: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(secret_path))
        .and(query_param("api-version", "7.4"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_discovery_and_read_with_jwt() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    mount_secret(
        &server,
        "/secrets/github-token",
        ResponseTemplate::new(200).set_body_json(json!({
            "value": "ghp_abc",
            "id": format!("{}/secrets/github-token/1", server.uri())
        })),
    )
    .await;

    let vaults = init_all("APP_", &jwt_env(&server)).unwrap();
    assert_eq!(vaults.len(), 1);

    let vault = VaultRegistry::lookup(&vaults, VAULT_TYPE_AZURE_KEY_VAULT).unwrap();
    assert_eq!(vault.get_secret("github-token", "").await.unwrap(), "ghp_abc");

    // The cached token serves the second read.
    assert_eq!(vault.get_latest("github-token").await.unwrap(), "ghp_abc");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_share_token_cache() {
    let server = MockServer::start().await;
    // Cold concurrent reads may each miss the cache; warm ones must not.
    Mock::given(method("POST"))
        .and(path("/t1/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "expires_in": 3599,
            "access_token": "tok-1"
        })))
        .expect(1..=3)
        .mount(&server)
        .await;
    for name in ["alpha", "beta", "gamma"] {
        mount_secret(
            &server,
            &format!("/secrets/{name}"),
            ResponseTemplate::new(200).set_body_json(json!({"value": format!("{name}-value")})),
        )
        .await;
    }

    let vaults = init_all("APP_", &jwt_env(&server)).unwrap();
    let vault = VaultRegistry::lookup(&vaults, VAULT_TYPE_AZURE_KEY_VAULT).unwrap();

    for _ in 0..3 {
        let (a, b, c) = tokio::join!(
            vault.get_secret("alpha", ""),
            vault.get_secret("beta", ""),
            vault.get_secret("gamma", ""),
        );
        assert_eq!(a.unwrap(), "alpha-value");
        assert_eq!(b.unwrap(), "beta-value");
        assert_eq!(c.unwrap(), "gamma-value");
    }
}

#[tokio::test]
async fn test_jwt_is_presented_as_client_assertion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/t1/oauth2/v2.0/token"))
        .and(body_string_contains("client_assertion=abc"))
        .and(body_string_contains(
            "client_assertion_type=urn%3Aietf%3Aparams%3Aoauth%3Aclient-assertion-type%3Ajwt-bearer",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "expires_in": 3599,
            "access_token": "tok-1"
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_secret(
        &server,
        "/secrets/db-password/0123abcd",
        ResponseTemplate::new(200).set_body_json(json!({"value": "v1"})),
    )
    .await;

    let vaults = init_all("APP_", &jwt_env(&server)).unwrap();
    let vault = &vaults[VAULT_TYPE_AZURE_KEY_VAULT];
    assert_eq!(vault.get_secret("db-password", "0123abcd").await.unwrap(), "v1");
}

#[tokio::test]
async fn test_empty_and_missing_values() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    mount_secret(
        &server,
        "/secrets/blank",
        ResponseTemplate::new(200).set_body_json(json!({"value": ""})),
    )
    .await;
    mount_secret(
        &server,
        "/secrets/ghost",
        ResponseTemplate::new(200).set_body_json(json!({"id": "x"})),
    )
    .await;

    let vaults = init_all("APP_", &jwt_env(&server)).unwrap();
    let vault = &vaults[VAULT_TYPE_AZURE_KEY_VAULT];

    assert_eq!(vault.get_secret("blank", "").await.unwrap(), "");

    let err = vault.get_secret("ghost", "").await.unwrap_err();
    assert!(matches!(
        err.root_cause(),
        VaultlinkError::ContractViolation(msg) if msg == "secret value is nil"
    ));
}

#[tokio::test]
async fn test_status_errors_are_wrapped_with_secret_name() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    mount_secret(
        &server,
        "/secrets/missing",
        ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": "SecretNotFound", "message": "A secret with (name/id) missing was not found"}
        })),
    )
    .await;
    mount_secret(
        &server,
        "/secrets/forbidden",
        ResponseTemplate::new(403).set_body_json(json!({
            "error": {"code": "Forbidden", "message": "caller lacks secrets/get"}
        })),
    )
    .await;

    let vaults = init_all("APP_", &jwt_env(&server)).unwrap();
    let vault = &vaults[VAULT_TYPE_AZURE_KEY_VAULT];

    let err = vault.get_secret("missing", "").await.unwrap_err();
    assert!(err.to_string().starts_with("azure_key_vault: get missing:"));
    assert!(matches!(err.root_cause(), VaultlinkError::NotFound(_)));

    let err = vault.get_secret("forbidden", "").await.unwrap_err();
    assert!(matches!(err.root_cause(), VaultlinkError::PermissionDenied(_)));
}

#[tokio::test]
async fn test_transient_vault_failure_is_retried() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/secrets/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_secret(
        &server,
        "/secrets/flaky",
        ResponseTemplate::new(200).set_body_json(json!({"value": "ok"})),
    )
    .await;

    let vaults = init_all("APP_", &jwt_env(&server)).unwrap();
    let vault = &vaults[VAULT_TYPE_AZURE_KEY_VAULT];
    assert_eq!(vault.get_secret("flaky", "").await.unwrap(), "ok");
}

#[tokio::test]
async fn test_rejected_assertion_is_token_stage_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/t1/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "AADSTS700024: Client assertion is not within its valid time range."
        })))
        .mount(&server)
        .await;

    let vaults = init_all("APP_", &jwt_env(&server)).unwrap();
    let vault = &vaults[VAULT_TYPE_AZURE_KEY_VAULT];

    let err = vault.get_secret("anything", "").await.unwrap_err();
    assert!(matches!(
        err.root_cause(),
        VaultlinkError::Credential {
            stage: vaultlink::CredentialStage::Token,
            ..
        }
    ));
    assert!(err.to_string().contains("invalid_client"));
}

#[tokio::test]
async fn test_certificate_from_config_file() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    mount_secret(
        &server,
        "/secrets/api-key",
        ResponseTemplate::new(200).set_body_json(json!({"value": "sk-123"})),
    )
    .await;

    let mut file = NamedTempFile::new().unwrap();
    let config = json!({
        "tenant_id": "t1",
        "client_id": "c1",
        "url": server.uri(),
        "cert_path": fixture("client_encrypted.pem"),
        "cert_password": "hunter2",
        "authority_host": server.uri()
    });
    file.write_all(config.to_string().as_bytes()).unwrap();

    let env = EnvSnapshot::new("test")
        .with_var("APP_AZURE_KEY_VAULT_CONFIG_PATH", file.path().to_str().unwrap());
    let vaults = init_all("APP_", &env).unwrap();
    let vault = &vaults[VAULT_TYPE_AZURE_KEY_VAULT];
    assert_eq!(vault.get_secret("api-key", "").await.unwrap(), "sk-123");

    // The token request carried a self-signed assertion for our certificate.
    let requests = server.received_requests().await.unwrap();
    let token_request = requests
        .iter()
        .find(|r| r.url.path() == "/t1/oauth2/v2.0/token")
        .unwrap();
    let form: std::collections::HashMap<String, String> =
        url::form_urlencoded::parse(&token_request.body).into_owned().collect();

    let assertion = &form["client_assertion"];
    let header = jsonwebtoken::decode_header(assertion).unwrap();
    assert_eq!(header.alg, jsonwebtoken::Algorithm::RS256);
    assert_eq!(header.x5t.as_deref(), Some(LEAF_THUMBPRINT));
}

#[test]
fn test_file_and_env_configs_are_equal() {
    let cert = fixture("client.pem");

    let mut file = NamedTempFile::new().unwrap();
    let config = json!({
        "tenant_id": "t1",
        "client_id": "c1",
        "url": "https://kv.example",
        "cert_path": cert,
        "proxy": {
            "https": {"url": "http://proxy.internal:3128", "username": "u", "password": "p"},
            "noProxy": ["localhost", ".svc"]
        }
    });
    file.write_all(config.to_string().as_bytes()).unwrap();

    let family = AzureKeyVaultFamily::new();
    let file_env = EnvSnapshot::new("file")
        .with_var("APP_AZURE_KEY_VAULT_CONFIG_PATH", file.path().to_str().unwrap());
    let (from_file, origin) = family.resolve_config("APP_", &file_env).unwrap();
    assert_eq!(origin, ConfigOrigin::File(file.path().to_path_buf()));

    let discrete = EnvSnapshot::new("env")
        .with_var("APP_AZURE_KEY_VAULT_TENANT_ID", "t1")
        .with_var("APP_AZURE_KEY_VAULT_CLIENT_ID", "c1")
        .with_var("APP_AZURE_KEY_VAULT_URL", "https://kv.example")
        .with_var("APP_AZURE_KEY_VAULT_CERT_PATH", cert.as_str())
        .with_var(
            "APP_AZURE_KEY_VAULT_CONTROLLER_MANAGER_AZURE_VAULT_HTTPS_PROXY_URL",
            "http://proxy.internal:3128",
        )
        .with_var(
            "APP_AZURE_KEY_VAULT_CONTROLLER_MANAGER_AZURE_VAULT_HTTPS_PROXY_USERNAME",
            "u",
        )
        .with_var(
            "APP_AZURE_KEY_VAULT_CONTROLLER_MANAGER_AZURE_VAULT_HTTPS_PROXY_PASSWORD",
            "p",
        )
        .with_var(
            "APP_AZURE_KEY_VAULT_CONTROLLER_MANAGER_AZURE_VAULT_NO_PROXY",
            "localhost, .svc",
        );
    let (from_env, origin) = family.resolve_config("APP_", &discrete).unwrap();
    assert_eq!(origin, ConfigOrigin::Env);

    assert_eq!(from_file, from_env);
    assert!(from_env.validate().is_ok());
}

#[test]
fn test_jwt_and_certificate_together_fail_discovery() {
    let env = EnvSnapshot::new("test")
        .with_var("APP_AZURE_KEY_VAULT_TENANT_ID", "t1")
        .with_var("APP_AZURE_KEY_VAULT_CLIENT_ID", "c1")
        .with_var("APP_AZURE_KEY_VAULT_URL", "https://kv.example")
        .with_var("APP_AZURE_KEY_VAULT_JWT", "abc")
        .with_var("APP_AZURE_KEY_VAULT_CERT_PATH", fixture("client.pem"));

    let err = init_all("APP_", &env).err().unwrap();
    assert_eq!(
        err.to_string(),
        "failed to instantiate azure key vault from env: failed to validate config: both jwt and cert_path provided"
    );
    assert!(err.is_config());
}

#[test]
fn test_strategy_selection() {
    let jwt = AzureKeyVaultConfig::new("t1", "c1", "https://kv.example").with_jwt("abc");
    let vault = vaultlink::AzureKeyVault::new(jwt).unwrap();
    assert_eq!(
        vault.credential_kind(),
        Some(vaultlink::credential::CredentialKind::Assertion)
    );

    let cert = AzureKeyVaultConfig::new("t1", "c1", "https://kv.example")
        .with_cert_path(fixture("client_pkcs1.pem"));
    let vault = vaultlink::AzureKeyVault::new(cert).unwrap();
    assert_eq!(
        vault.credential_kind(),
        Some(vaultlink::credential::CredentialKind::Certificate)
    );
}

#[tokio::test]
async fn test_requests_follow_proxy_per_target() {
    // The fake doubles as a plain HTTP proxy: absolute-form requests for
    // non-loopback hosts land on it with their original path.
    let proxy = MockServer::start().await;
    mount_token(&proxy, 1).await;
    mount_secret(
        &proxy,
        "/secrets/proxied",
        ResponseTemplate::new(200).set_body_json(json!({"value": "via-proxy"})),
    )
    .await;

    let env = EnvSnapshot::new("test")
        .with_var("APP_AZURE_KEY_VAULT_TENANT_ID", "t1")
        .with_var("APP_AZURE_KEY_VAULT_CLIENT_ID", "c1")
        .with_var("APP_AZURE_KEY_VAULT_URL", "http://kv.vaultlink.test")
        .with_var("APP_AZURE_KEY_VAULT_JWT", "abc")
        .with_var("APP_AZURE_KEY_VAULT_AUTHORITY_HOST", "http://login.vaultlink.test")
        .with_var(
            "APP_AZURE_KEY_VAULT_CONTROLLER_MANAGER_AZURE_VAULT_HTTP_PROXY_URL",
            proxy.uri(),
        );

    let vaults = init_all("APP_", &env).unwrap();
    let vault = &vaults[VAULT_TYPE_AZURE_KEY_VAULT];
    assert_eq!(vault.get_secret("proxied", "").await.unwrap(), "via-proxy");
}
