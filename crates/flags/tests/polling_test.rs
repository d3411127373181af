use serde_json::json;
use std::time::Duration;
use test_log::test;
use vercel_flags_core::{ConfigOrigin, FlagsClient, FlagsError, Mode};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::{SDK_KEY, bundle_artifact, datafile_json, test_options};

#[test(tokio::test)]
async fn polls_the_datafile_when_streaming_is_disabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/datafile"))
        .and(header("Authorization", format!("Bearer {SDK_KEY}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(datafile_json(100)))
        .expect(1..)
        .mount(&server)
        .await;

    let options = test_options(&server.uri())
        .without_streaming()
        .with_polling(Duration::from_secs(30));
    let client = FlagsClient::new(SDK_KEY, options).unwrap();

    let result = client.evaluate("bool-flag", None, None).await.unwrap();
    assert_eq!(result.value, Some(json!(true)));
    assert_eq!(result.metrics.datafile.mode, Mode::Polling);
    assert_eq!(result.metrics.datafile.origin, Some(ConfigOrigin::InMemory));

    // the first fetch happens exactly once; the next is 30s out
    let datafile_calls = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.url.path() == "/v1/datafile")
        .count();
    assert_eq!(datafile_calls, 1);

    client.shutdown().await;
}

#[test(tokio::test)]
async fn polling_below_the_minimum_interval_fails_construction() {
    let options = test_options("http://localhost")
        .without_streaming()
        .with_polling(Duration::from_secs(10));
    assert!(matches!(
        FlagsClient::new(SDK_KEY, options),
        Err(FlagsError::InvalidOption(_))
    ));
}

#[test(tokio::test)]
async fn first_poll_failure_falls_back_to_the_bundle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/datafile"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let bundle = bundle_artifact(SDK_KEY, datafile_json(10));
    let options = test_options(&server.uri())
        .without_streaming()
        .with_polling(Duration::from_secs(30))
        .with_bundle_path(bundle.path());
    let client = FlagsClient::new(SDK_KEY, options).unwrap();

    let result = client.evaluate("bool-flag", None, None).await.unwrap();
    assert_eq!(result.value, Some(json!(true)));
    assert_eq!(result.metrics.datafile.origin, Some(ConfigOrigin::Embedded));

    client.shutdown().await;
}

#[test(tokio::test)]
async fn polling_auth_failure_falls_back_and_stops() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/datafile"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let bundle = bundle_artifact(SDK_KEY, datafile_json(10));
    let options = test_options(&server.uri())
        .without_streaming()
        .with_polling(Duration::from_secs(30))
        .with_bundle_path(bundle.path());
    let client = FlagsClient::new(SDK_KEY, options).unwrap();

    let result = client.evaluate("bool-flag", None, None).await.unwrap();
    assert_eq!(result.value, Some(json!(true)));
    assert_eq!(result.metrics.datafile.origin, Some(ConfigOrigin::Embedded));

    client.shutdown().await;
}
