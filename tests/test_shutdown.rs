mod common;

use std::time::Duration;

use reqwest::Client;

use boardmux::proxy::ProxyServer;

use common::{manager_with, test_config, test_settings, LaunchMode, MockLauncher};

#[tokio::test]
async fn test_shutdown_stops_all_backends() {
    let (_root, config) = test_config();
    let launcher = MockLauncher::new(LaunchMode::Healthy);
    let manager = manager_with(test_settings(), launcher.clone());

    let mut server = ProxyServer::with_manager(&config, manager.clone()).unwrap();
    let addr = server.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let handle = server.handle();
    let running = tokio::spawn(server.run());

    let client = Client::new();
    for logdir in ["runs/a", "runs/b"] {
        let resp = client
            .get(format!("http://{}/?logdir={}", addr, logdir))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }
    assert_eq!(manager.len(), 2);

    handle.shutdown();
    let report = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("router did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(report.stopped, 2);
    assert!(report.errors.is_empty());
    assert!(manager.is_empty());
    assert!(manager.is_shutting_down());
    assert!(launcher.probes().iter().all(|p| p.was_terminated()));
}

#[tokio::test]
async fn test_listener_closed_after_shutdown() {
    let (_root, config) = test_config();
    let manager = manager_with(test_settings(), MockLauncher::new(LaunchMode::Healthy));

    let mut server = ProxyServer::with_manager(&config, manager).unwrap();
    let addr = server.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let handle = server.handle();
    let running = tokio::spawn(server.run());

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("router did not stop")
        .unwrap()
        .unwrap();

    let result = Client::new()
        .get(format!("http://{}/_router/health", addr))
        .timeout(Duration::from_secs(1))
        .send()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_run_without_bind_fails() {
    let (_root, config) = test_config();
    let manager = manager_with(test_settings(), MockLauncher::new(LaunchMode::Healthy));
    let server = ProxyServer::with_manager(&config, manager).unwrap();

    let err = server.run().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
}
