//! Contract tests for MintClient.
//!
//! | Method | Path | Test |
//! |--------|------|------|
//! | POST   | `/mint` | `mint_*` |

use std::time::Duration;

use nftm_core::{Address, AssetId, ListingId, ProductId};
use nftm_gateway::{GatewayConfig, GatewayError, MintClient, MintRequest, MintTransport};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(mock_server: &MockServer) -> MintClient {
    let mut config = GatewayConfig::local_mock(19_100).unwrap();
    config.minter_url = mock_server.uri().parse().unwrap();
    MintClient::new(&config).unwrap()
}

fn request() -> MintRequest {
    MintRequest {
        asset_ref: AssetId(11),
        product_ref: ProductId(12),
        issued_to_address: Address::new("0xseller").unwrap(),
        issue_count: 5,
        market_listing_id: ListingId(99),
    }
}

#[tokio::test]
async fn mint_posts_camel_case_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mint"))
        .and(body_json(json!({
            "assetRef": 11,
            "productRef": 12,
            "issuedToAddress": "0xseller",
            "issueCount": 5,
            "marketListingId": 99
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&mock_server)
        .await;

    test_client(&mock_server).mint(&request()).await.unwrap();
}

#[tokio::test]
async fn mint_rejection_maps_to_api_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mint"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unknown asset"))
        .mount(&mock_server)
        .await;

    let err = test_client(&mock_server).mint(&request()).await.unwrap_err();
    match err {
        GatewayError::ApiError { status, body, .. } => {
            assert_eq!(status, 422);
            assert_eq!(body, "unknown asset");
        }
        other => panic!("expected ApiError, got: {other:?}"),
    }
}

#[tokio::test]
async fn mint_timeout_is_not_resent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mint"))
        .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_millis(1500)))
        .mount(&mock_server)
        .await;

    let mut config = GatewayConfig::local_mock(19_100).unwrap();
    config.minter_url = mock_server.uri().parse().unwrap();
    config.timeout_secs = 1;
    let err = MintClient::new(&config).unwrap().mint(&request()).await.unwrap_err();

    assert!(matches!(err, GatewayError::Http { .. }), "{err:?}");
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}
