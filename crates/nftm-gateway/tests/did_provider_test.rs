//! Contract tests for DidProviderClient against the provider's operation
//! endpoint.
//!
//! | Method | Path | Test |
//! |--------|------|------|
//! | POST   | `/api/v1/operations` | `*_operation_*` |

use nftm_gateway::did::{decode, DidReply, IssuedCredential};
use nftm_gateway::{
    DidOperation, DidProviderClient, DidTransport, GatewayConfig, GatewayError, ProviderReply,
};
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(mock_server: &MockServer) -> DidProviderClient {
    let mut config = GatewayConfig::local_mock(19_000).unwrap();
    config.did_url = mock_server.uri().parse().unwrap();
    DidProviderClient::new(&config).unwrap()
}

fn impatient_client(mock_server: &MockServer) -> DidProviderClient {
    let mut config = GatewayConfig::local_mock(19_000).unwrap();
    config.did_url = mock_server.uri().parse().unwrap();
    config.timeout_secs = 1;
    DidProviderClient::new(&config).unwrap()
}

fn slow_success() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_json(json!({"result": "Success"}))
        .set_delay(Duration::from_millis(1500))
}

#[tokio::test]
async fn wallet_create_operation_sends_envelope_and_credentials() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/operations"))
        .and(header("authorization", "Bearer jwt-1"))
        .and(header("x-service-key", "test-service-key"))
        .and(body_partial_json(json!({
            "operation": "AvatarVirtualWalletCreate",
            "payload": {"nickname": "alice"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "Success",
            "did": "did:avatar:alice"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let reply = client
        .call(
            DidOperation::CreateWallet,
            Some("jwt-1"),
            json!({"nickname": "alice"}),
        )
        .await
        .unwrap();

    match reply {
        ProviderReply::Success(payload) => {
            let did: DidReply = decode(DidOperation::CreateWallet, payload).unwrap();
            assert_eq!(did.did, "did:avatar:alice");
        }
        other => panic!("expected success, got: {other:?}"),
    }
}

#[tokio::test]
async fn connect_operation_omits_bearer_when_no_session() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/operations"))
        .and(body_partial_json(json!({"operation": "UserConnectingAuthentication"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "Success",
            "jwt": "fresh"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let reply = client
        .call(
            DidOperation::ConnectUser,
            None,
            json!({"email": "a@example.com", "nickname": "a"}),
        )
        .await
        .unwrap();
    assert!(matches!(reply, ProviderReply::Success(_)));

    let requests = mock_server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn failure_operation_reply_is_returned_as_data() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/operations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "Fail",
            "failureReason": "NoRegistration",
            "failureMessage": "user unknown"
        })))
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let reply = client
        .call(DidOperation::IssueCredential, Some("jwt"), json!({}))
        .await
        .unwrap();

    match reply {
        ProviderReply::Failure(f) => {
            assert_eq!(f.failure_reason, "NoRegistration");
            assert_eq!(f.failure_message.as_deref(), Some("user unknown"));
        }
        other => panic!("expected failure, got: {other:?}"),
    }
}

#[tokio::test]
async fn unauthorized_operation_with_failure_body_is_a_failure_reply() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/operations"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "result": "Fail",
            "failureReason": "io.jsonwebtoken.ExpiredJwtException: JWT expired at 2026-01-01"
        })))
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let reply = client
        .call(DidOperation::FetchMeta, Some("old"), json!({}))
        .await
        .unwrap();
    assert!(matches!(reply, ProviderReply::Failure(_)));
}

#[tokio::test]
async fn server_error_operation_maps_to_api_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/operations"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let err = client
        .call(DidOperation::FetchDetail, Some("jwt"), json!({}))
        .await
        .unwrap_err();

    match err {
        GatewayError::ApiError { status, body, .. } => {
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("expected ApiError, got: {other:?}"),
    }
}

#[tokio::test]
async fn issued_credential_operation_payload_decodes() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/operations"))
        .and(body_partial_json(json!({"operation": "AvatarCredentialIssue"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "Success",
            "vcId": "vc-42",
            "issuerName": "Market Authority",
            "typeName": "NftOwnership"
        })))
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let reply = client
        .call(DidOperation::IssueCredential, Some("jwt"), json!({}))
        .await
        .unwrap();
    let ProviderReply::Success(payload) = reply else {
        panic!("expected success");
    };
    let issued: IssuedCredential = decode(DidOperation::IssueCredential, payload).unwrap();
    assert_eq!(issued.vc_id, "vc-42");
    assert_eq!(issued.type_name, "NftOwnership");
}

#[tokio::test]
async fn timed_out_issue_operation_is_sent_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/operations"))
        .respond_with(slow_success())
        .mount(&mock_server)
        .await;

    let err = impatient_client(&mock_server)
        .call(DidOperation::IssueCredential, Some("jwt-1"), json!({"did": "did:avatar:alice"}))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Http { .. }), "{err:?}");
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn timed_out_meta_operation_is_resent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/operations"))
        .respond_with(slow_success())
        .mount(&mock_server)
        .await;

    let err = impatient_client(&mock_server)
        .call(DidOperation::FetchMeta, Some("jwt-1"), json!({"did": "did:avatar:alice"}))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Http { .. }), "{err:?}");
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
}

#[test]
fn only_reads_and_logins_are_idempotent() {
    assert!(DidOperation::ConnectUser.is_idempotent());
    assert!(DidOperation::FetchMeta.is_idempotent());
    assert!(DidOperation::FetchDetail.is_idempotent());
    assert!(!DidOperation::CreateWallet.is_idempotent());
    assert!(!DidOperation::GenerateCredentialDid.is_idempotent());
    assert!(!DidOperation::IssueCredential.is_idempotent());
    assert!(!DidOperation::RegisterCredential.is_idempotent());
}
