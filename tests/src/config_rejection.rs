//! Configuration rejection tests
//!
//! An invalid scenario is refused before anything is spawned: the engine
//! never sees an attach.

use std::net::Ipv4Addr;
use std::sync::Arc;

use integration_tests::MockEngine;
use nextgsim_tester::{ConfigValidationError, Scenario, ScenarioConfig};

fn rejected(config: ScenarioConfig) -> (ConfigValidationError, MockEngine) {
    let engine = MockEngine::new();
    let err = Scenario::new(config, Ipv4Addr::new(127, 0, 0, 10), Arc::new(engine.clone()))
        .unwrap_err();
    (err, engine)
}

#[tokio::test]
async fn test_rejected_configs_spawn_nothing() {
    let cases = [
        ScenarioConfig {
            tunnel_enabled: true,
            ..Default::default()
        },
        ScenarioConfig {
            tunnel_enabled: true,
            dedicated_gnb: true,
            time_between_registration_ms: 499,
            ..Default::default()
        },
        ScenarioConfig {
            num_pdu_sessions: 17,
            ..Default::default()
        },
        ScenarioConfig {
            num_ues: 0,
            ..Default::default()
        },
        ScenarioConfig {
            num_ues: 513,
            ..Default::default()
        },
        ScenarioConfig {
            msin: "12ab".to_string(),
            ..Default::default()
        },
        ScenarioConfig {
            msin: "9999999999".to_string(),
            num_ues: 2,
            ..Default::default()
        },
        ScenarioConfig {
            gnb_id: "not-hex".to_string(),
            ..Default::default()
        },
        ScenarioConfig {
            num_ues: 2,
            dedicated_gnb: true,
            gnb_id: "FFFFFFFF".to_string(),
            ..Default::default()
        },
    ];

    for config in cases {
        let description = format!("{config:?}");
        let (_, engine) = rejected(config);
        assert!(engine.entries().await.is_empty(), "{description}");
    }
}

#[test]
fn test_rejection_reasons() {
    let (err, _) = rejected(ScenarioConfig {
        tunnel_enabled: true,
        ..Default::default()
    });
    assert_eq!(err, ConfigValidationError::TunnelRequiresDedicatedGnb);
    assert_eq!(err.to_string(), "--tunnel requires --dedicated-gnb");

    let (err, _) = rejected(ScenarioConfig {
        tunnel_enabled: true,
        dedicated_gnb: true,
        time_between_registration_ms: 100,
        ..Default::default()
    });
    assert_eq!(
        err,
        ConfigValidationError::RegistrationIntervalTooShort {
            interval_ms: 100,
            min_ms: 500,
        }
    );

    let (err, _) = rejected(ScenarioConfig {
        num_pdu_sessions: 20,
        ..Default::default()
    });
    assert_eq!(err, ConfigValidationError::TooManyPduSessions(20));

    // Dedicated gNB IDs past 0xFFFFFFFF are refused up front
    let (err, _) = rejected(ScenarioConfig {
        num_ues: 2,
        dedicated_gnb: true,
        gnb_id: "FFFFFFFF".to_string(),
        ..Default::default()
    });
    assert!(matches!(err, ConfigValidationError::InvalidGnbId(_)));
}

/// The boundary values themselves are accepted.
#[test]
fn test_boundaries_accepted() {
    let engine = Arc::new(MockEngine::new());
    let accepted = [
        ScenarioConfig {
            tunnel_enabled: true,
            dedicated_gnb: true,
            time_between_registration_ms: 500,
            ..Default::default()
        },
        ScenarioConfig {
            num_pdu_sessions: 16,
            num_ues: 512,
            ..Default::default()
        },
        ScenarioConfig {
            num_pdu_sessions: 0,
            ..Default::default()
        },
    ];
    for config in accepted {
        assert!(Scenario::new(config, Ipv4Addr::new(127, 0, 0, 10), engine.clone()).is_ok());
    }
}
