use serde_json::json;
use test_log::test;
use vercel_flags_core::{
    CacheStatus, ConfigOrigin, Datafile, FlagsClient, FlagsError, FlagsOptions, OutcomeKind,
    Reason,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::{SDK_KEY, bundle_artifact, datafile_json, entities, test_options};

fn offline_client_with(datafile: serde_json::Value) -> FlagsClient {
    let datafile: Datafile = serde_json::from_value(datafile).unwrap();
    let options = FlagsOptions {
        datafile: Some(datafile),
        ..test_options("http://localhost:9").without_streaming()
    };
    FlagsClient::new(SDK_KEY, options).unwrap()
}

#[test(tokio::test)]
async fn paused_boolean_resolves_to_its_variant() {
    let client = offline_client_with(json!({
        "environment": "production",
        "definitions": {
            "flag": {"variants": [false, true], "environments": {"production": 1}}
        }
    }));

    let result = client.evaluate("flag", None, None).await.unwrap();
    assert_eq!(result.value, Some(json!(true)));
    assert_eq!(result.reason, Reason::Paused);
    assert_eq!(result.outcome_type, Some(OutcomeKind::Value));

    client.shutdown().await;
}

#[test(tokio::test)]
async fn targeted_string_matches_the_second_target() {
    let client = offline_client_with(json!({
        "environment": "production",
        "definitions": {
            "flag": {
                "variants": ["default", "targeted"],
                "environments": {
                    "production": {
                        "targets": [{}, {"user": {"id": ["user-123"]}}],
                        "fallthrough": 0
                    }
                }
            }
        }
    }));

    let ents = entities(json!({"user": {"id": "user-123"}}));
    let result = client.evaluate("flag", None, Some(&ents)).await.unwrap();
    assert_eq!(result.value, Some(json!("targeted")));
    assert_eq!(result.reason, Reason::TargetMatch);
    assert_eq!(result.outcome_type, Some(OutcomeKind::Value));

    client.shutdown().await;
}

#[test(tokio::test)]
async fn rule_with_segment_reference_matches() {
    let client = offline_client_with(json!({
        "environment": "production",
        "definitions": {
            "flag": {
                "variants": [false, true],
                "environments": {
                    "production": {
                        "rules": [
                            {"conditions": [["segment", "ONE_OF", ["segment1"]]], "outcome": 1}
                        ],
                        "fallthrough": 0
                    }
                }
            }
        },
        "segments": {
            "segment1": {"include": {"user": {"id": ["uid1"]}}}
        }
    }));

    let ents = entities(json!({"user": {"id": "uid1"}}));
    let result = client.evaluate("flag", None, Some(&ents)).await.unwrap();
    assert_eq!(result.value, Some(json!(true)));
    assert_eq!(result.reason, Reason::RuleMatch);
    assert_eq!(result.outcome_type, Some(OutcomeKind::Value));

    client.shutdown().await;
}

#[test(tokio::test)]
async fn split_assignment_is_stable_across_evaluations() {
    let client = offline_client_with(json!({
        "environment": "production",
        "definitions": {
            "flag": {
                "variants": ["control", "treatment"],
                "seed": 7,
                "environments": {
                    "production": {
                        "fallthrough": {
                            "type": "split",
                            "base": ["user", "id"],
                            "weights": [0, 10000],
                            "defaultVariant": 0
                        }
                    }
                }
            }
        }
    }));

    let ents = entities(json!({"user": {"id": "uid1"}}));
    let first = client.evaluate("flag", None, Some(&ents)).await.unwrap();
    assert_eq!(first.value, Some(json!("treatment")));
    assert_eq!(first.outcome_type, Some(OutcomeKind::Split));
    for _ in 0..10 {
        let again = client.evaluate("flag", None, Some(&ents)).await.unwrap();
        assert_eq!(again.value, first.value);
    }

    client.shutdown().await;
}

#[test(tokio::test)]
async fn get_datafile_fetches_remotely_when_not_connected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/datafile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(datafile_json(321)))
        .expect(1)
        .mount(&server)
        .await;

    let options = test_options(&server.uri()).without_streaming();
    let client = FlagsClient::new(SDK_KEY, options).unwrap();

    let snapshot = client.get_datafile().await.unwrap();
    assert_eq!(snapshot.datafile.config_updated_at, Some(321));
    assert_eq!(snapshot.metrics.origin, Some(ConfigOrigin::Remote));
    assert_eq!(snapshot.metrics.cache_status, CacheStatus::Miss);

    client.shutdown().await;
}

#[test(tokio::test)]
async fn get_fallback_datafile_never_touches_the_network() {
    let bundle = bundle_artifact(SDK_KEY, datafile_json(55));
    // host that would refuse connections if it were ever contacted
    let options = test_options("http://localhost:9").with_bundle_path(bundle.path());
    let client = FlagsClient::new(SDK_KEY, options).unwrap();

    let fallback = client.get_fallback_datafile().await.unwrap();
    assert_eq!(fallback.config_updated_at, Some(55));

    client.shutdown().await;
}

#[test(tokio::test)]
async fn get_fallback_datafile_errors_name_what_is_missing() {
    let options = test_options("http://localhost:9");
    let client = FlagsClient::new(SDK_KEY, options).unwrap();
    assert!(matches!(
        client.get_fallback_datafile().await,
        Err(FlagsError::FallbackNotFound)
    ));

    let bundle = bundle_artifact("vf_some_other_key", datafile_json(1));
    let options = test_options("http://localhost:9").with_bundle_path(bundle.path());
    let client = FlagsClient::new(SDK_KEY, options).unwrap();
    assert!(matches!(
        client.get_fallback_datafile().await,
        Err(FlagsError::FallbackEntryNotFound)
    ));
}

#[test(tokio::test)]
async fn shutdown_twice_is_a_no_op() {
    let client = offline_client_with(json!({
        "environment": "production",
        "definitions": {
            "flag": {"variants": [true], "environments": {"production": 0}}
        }
    }));
    client.evaluate("flag", None, None).await.unwrap();

    client.shutdown().await;
    client.shutdown().await;

    // evaluations after shutdown fail with a closed error
    assert!(matches!(
        client.evaluate("flag", None, None).await,
        Err(FlagsError::Closed)
    ));
}
