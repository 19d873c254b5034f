//! Tunnel provisioning integration tests
//!
//! Drives the tunnel configurator against the in-memory kernel, both
//! directly and through full tunnel-enabled scenarios.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use integration_tests::{
    init_test_logging, wait_for_condition, MockEngine, MockEngineConfig, MockKernel, Recorded,
    DEFAULT_TEST_TIMEOUT,
};
use nextgsim_common::Ipv4Prefix;
use nextgsim_gtp::{
    interface_name, DeviceMessage, FarAction, TunnelConfigurator, TunnelError, DOWNLINK_FAR_ID,
    UPLINK_FAR_ID,
};
use nextgsim_tester::{RunReport, Scenario, ScenarioConfig};
use tokio::sync::watch;
use tokio::time::timeout;

const RUN_TIMEOUT: Duration = Duration::from_secs(600);
const LINK_TIMEOUT: Duration = Duration::from_millis(1000);

fn configurator(kernel: &Arc<MockKernel>) -> TunnelConfigurator {
    let prefix: Ipv4Prefix = "30.103.12.0/24".parse().unwrap();
    TunnelConfigurator::new(kernel.clone(), prefix, LINK_TIMEOUT)
}

fn device_message() -> DeviceMessage {
    DeviceMessage {
        gnb_ip: Ipv4Addr::new(127, 0, 0, 10),
        upf_ip: Ipv4Addr::new(127, 0, 0, 8),
        o_teid: 0x1001,
        i_teid: 0x2001,
    }
}

fn tunnel_scenario() -> ScenarioConfig {
    ScenarioConfig {
        num_ues: 3,
        tunnel_enabled: true,
        dedicated_gnb: true,
        time_between_registration_ms: 500,
        time_before_deregistration_ms: 3000,
        ..Default::default()
    }
}

async fn run_with_kernel(
    config: ScenarioConfig,
    engine: MockEngine,
    kernel: &Arc<MockKernel>,
) -> RunReport {
    let scenario = Scenario::new(config, Ipv4Addr::new(127, 0, 0, 10), Arc::new(engine))
        .unwrap()
        .with_tunnel(configurator(kernel));
    let (_stop_tx, stop_rx) = watch::channel(false);
    timeout(RUN_TIMEOUT, scenario.run(stop_rx)).await.unwrap()
}

fn tunnel_engine() -> MockEngine {
    MockEngine::with_config(MockEngineConfig {
        send_device_message: true,
        ..Default::default()
    })
}

#[tokio::test]
async fn test_provision_installs_full_chain() {
    init_test_logging();
    let kernel = Arc::new(MockKernel::new());
    let configurator = configurator(&kernel);
    let ue_ip = Ipv4Addr::new(10, 60, 0, 1);

    let resources = configurator
        .provision("0000000120", ue_ip, &device_message())
        .await
        .unwrap();
    assert_eq!(resources.interface(), "val0000000120");
    assert_eq!(resources.table(), 0x1001);

    let link = kernel.link("val0000000120").await.unwrap();
    assert_eq!(link.local, Some(Ipv4Addr::new(127, 0, 0, 10)));
    assert_eq!(link.fars.len(), 2);
    assert_eq!(link.pdrs.len(), 2);
    assert_eq!(link.addrs, vec![Ipv4Prefix::host(ue_ip)]);

    let uplink = link.fars.iter().find(|f| f.id == UPLINK_FAR_ID).unwrap();
    assert!(uplink.header_creation.is_none());
    let downlink = link.fars.iter().find(|f| f.id == DOWNLINK_FAR_ID).unwrap();
    assert_eq!(downlink.action, FarAction::Forward);
    let header = downlink.header_creation.as_ref().unwrap();
    assert_eq!(header.teid, 0x1001);
    assert_eq!(header.peer, Ipv4Addr::new(127, 0, 0, 8));

    let routes = kernel.routes().await;
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].table, 0x1001);
    assert_eq!(routes[0].dst.to_string(), "30.103.12.0/24");

    let rules = kernel.rules().await;
    assert_eq!(rules.len(), 2);
    assert!(rules.iter().all(|r| r.iif == "val0000000120" && r.table == 0x1001));
    assert!(rules.iter().any(|r| r.src == Some(Ipv4Prefix::host(ue_ip))));
}

#[tokio::test]
async fn test_provision_twice_is_idempotent() {
    let kernel = Arc::new(MockKernel::new());
    let configurator = configurator(&kernel);
    let ue_ip = Ipv4Addr::new(10, 60, 0, 1);

    configurator
        .provision("0000000120", ue_ip, &device_message())
        .await
        .unwrap();
    configurator
        .provision("0000000120", ue_ip, &device_message())
        .await
        .unwrap();

    assert_eq!(kernel.link_names().await, vec!["val0000000120".to_string()]);
    assert_eq!(kernel.rules().await.len(), 2);
    assert_eq!(kernel.routes().await.len(), 1);
}

#[tokio::test]
async fn test_teardown_leaves_nothing() {
    let kernel = Arc::new(MockKernel::new());
    let configurator = configurator(&kernel);

    let resources = configurator
        .provision("0000000120", Ipv4Addr::new(10, 60, 0, 1), &device_message())
        .await
        .unwrap();
    configurator.teardown(&resources).await;

    assert!(kernel.link_names().await.is_empty());
    assert!(kernel.routes().await.is_empty());
    assert!(kernel.rules().await.is_empty());
}

#[tokio::test]
async fn test_failed_step_is_named() {
    let kernel = Arc::new(MockKernel::failing_on("add_pdr"));
    let configurator = configurator(&kernel);
    let ue_ip = Ipv4Addr::new(10, 60, 0, 1);
    let msg = device_message();

    let err = configurator
        .provision("0000000120", ue_ip, &msg)
        .await
        .unwrap_err();
    assert!(matches!(err, TunnelError::Kernel { .. }));
    assert!(err.to_string().starts_with("uplink PDR failed"));

    // The partial interface stays until discarded
    assert_eq!(kernel.link_names().await.len(), 1);
    configurator.discard("0000000120", ue_ip, msg.table()).await;
    assert!(kernel.link_names().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_link_timeout() {
    let kernel = Arc::new(MockKernel::with_link_delay(Duration::from_secs(5)));
    let configurator = configurator(&kernel);

    let err = configurator
        .provision("0000000120", Ipv4Addr::new(10, 60, 0, 1), &device_message())
        .await
        .unwrap_err();
    match err {
        TunnelError::LinkTimeout { name, timeout_ms } => {
            assert_eq!(name, interface_name("0000000120"));
            assert_eq!(timeout_ms, 1000);
        }
        other => panic!("expected a link timeout, got {other}"),
    }

    // The aborted creation never reaches the kernel
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(kernel.link_names().await.is_empty());
}

/// Every UE of a tunnel scenario gets its own interface while registered,
/// and none is left once the run is over.
#[tokio::test(start_paused = true)]
async fn test_scenario_tunnels_lifecycle() {
    init_test_logging();
    let kernel = Arc::new(MockKernel::new());
    let scenario = Scenario::new(
        tunnel_scenario(),
        Ipv4Addr::new(127, 0, 0, 10),
        Arc::new(tunnel_engine()),
    )
    .unwrap()
    .with_tunnel(configurator(&kernel));
    let (_stop_tx, stop_rx) = watch::channel(false);
    let run = tokio::spawn(scenario.run(stop_rx));

    // All three UEs are up before the first one deregisters
    let provisioned = wait_for_condition(
        || async { kernel.rules().await.len() == 6 },
        Duration::from_millis(2500),
    )
    .await;
    assert!(provisioned.is_ok(), "tunnels not provisioned: {:?}", kernel.calls().await);
    assert_eq!(
        kernel.link_names().await,
        vec![
            "val0000000120".to_string(),
            "val0000000121".to_string(),
            "val0000000122".to_string(),
        ]
    );
    // Each interface is anchored on its UE's own gNB
    let mut anchors = HashSet::new();
    for name in kernel.link_names().await {
        anchors.insert(kernel.link(&name).await.unwrap().local.unwrap());
    }
    assert_eq!(anchors.len(), 3);
    assert_eq!(kernel.rules().await.len(), 6);
    assert_eq!(kernel.routes().await.len(), 3);

    let report = timeout(RUN_TIMEOUT, run).await.unwrap().unwrap();
    assert_eq!(report.waves[0].completed, 3);
    assert!(kernel.link_names().await.is_empty());
    assert!(kernel.routes().await.is_empty());
    assert!(kernel.rules().await.is_empty());
}

/// A kernel failure fails the UE with a tunnel reason and leaves no
/// interface behind.
#[tokio::test(start_paused = true)]
async fn test_scenario_tunnel_failure() {
    init_test_logging();
    let kernel = Arc::new(MockKernel::failing_on("add_pdr"));

    let report = run_with_kernel(tunnel_scenario(), tunnel_engine(), &kernel).await;

    let wave = &report.waves[0];
    assert_eq!(wave.failed, 3);
    assert!(wave
        .failures
        .iter()
        .all(|(_, reason)| reason.starts_with("tunnel: uplink PDR failed")));
    assert!(kernel.link_names().await.is_empty());
    assert!(kernel.rules().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_scenario_link_timeout() {
    let kernel = Arc::new(MockKernel::with_link_delay(Duration::from_secs(5)));
    let config = ScenarioConfig {
        num_ues: 1,
        ..tunnel_scenario()
    };

    let report = run_with_kernel(config, tunnel_engine(), &kernel).await;

    let wave = &report.waves[0];
    assert_eq!(wave.failed, 1);
    let (supi, reason) = &wave.failures[0];
    assert_eq!(supi, "imsi-0000000120");
    assert!(reason.contains("not created within 1000 ms"), "{reason}");
    assert!(kernel.link_names().await.is_empty());
}

/// A looping tunnel scenario replaces a UE still creating its interface:
/// the replacement, which shares the interface name, only starts once the
/// previous occupant has torn its tunnel down.
#[tokio::test(start_paused = true)]
async fn test_replacement_waits_for_teardown() {
    init_test_logging();
    let kernel = Arc::new(MockKernel::with_link_delay(Duration::from_millis(700)));
    let engine = tunnel_engine();
    let config = ScenarioConfig {
        num_ues: 1,
        loop_waves: true,
        time_before_deregistration_ms: 2000,
        ..tunnel_scenario()
    };
    let scenario = Scenario::new(config, Ipv4Addr::new(127, 0, 0, 10), Arc::new(engine.clone()))
        .unwrap()
        .with_tunnel(configurator(&kernel));
    let (stop_tx, stop_rx) = watch::channel(false);
    let run = tokio::spawn(scenario.run(stop_rx));

    // The second wave is spawned once the first UE has let go of the slot
    wait_for_condition(
        || async { !engine.lifecycle("0000000120", 2).await.is_empty() },
        DEFAULT_TEST_TIMEOUT,
    )
    .await
    .unwrap();
    stop_tx.send_replace(true);
    let report = timeout(RUN_TIMEOUT, run).await.unwrap().unwrap();

    assert_eq!(report.waves.len(), 2);
    assert_eq!(report.waves[0].killed, 1);
    assert_eq!(report.waves[1].completed, 1);

    let first = engine.lifecycle("0000000120", 1).await;
    let second = engine.lifecycle("0000000120", 2).await;
    let released = first.last().unwrap();
    assert_eq!(released.what, Recorded::LinkClosed);
    // The first interface only appeared 740 ms in; its teardown came after
    assert!(second[0].at - first[0].at >= Duration::from_millis(740));
    assert!(second[0].at >= released.at);

    let creations = kernel
        .calls()
        .await
        .iter()
        .filter(|call| call.starts_with("link_add_gtp"))
        .count();
    assert_eq!(creations, 2);
    assert!(kernel.link_names().await.is_empty());
    assert!(kernel.rules().await.is_empty());
}
