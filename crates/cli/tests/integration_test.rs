use qtrade_alpaca::{PaperBroker, PaperBrokerConfig, RateLimiters, RequestExecutor};
use qtrade_bot_orchestrator::{spawn_status_aggregator, BalancePoller, TradingCycle};
use qtrade_core::{AppConfig, BotEvent, BrokerApi, BrokerKind};
use qtrade_web_api::{ApiServer, AppState};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn paper_config(q_table: std::path::PathBuf) -> AppConfig {
    let mut config = AppConfig::default();
    config.broker.kind = BrokerKind::Paper;
    config.trading.symbols = vec!["AAPL".to_string(), "MSFT".to_string()];
    config.trading.settle_delay_ms = 10;
    config.trading.cycle_interval_secs = 1;
    config.agent.seed = Some(42);
    config.agent.q_table_path = Some(q_table);
    config
}

#[tokio::test]
async fn test_paper_trader_end_to_end() {
    let dir = std::env::temp_dir().join(format!("qtrade-e2e-{}", std::process::id()));
    let q_table = dir.join("q_table.json");
    let config = paper_config(q_table.clone());
    config.validate().expect("paper config should be valid");

    let paper = PaperBroker::new(PaperBrokerConfig::frozen());
    paper.set_price("AAPL", dec!(190.50));
    paper.set_price("MSFT", dec!(410.25));
    let broker: Arc<dyn BrokerApi> = Arc::new(paper);

    let (trigger, shutdown) = qtrade_core::shutdown::channel();
    let executor = Arc::new(RequestExecutor::new(
        Arc::new(RateLimiters::from_config(&config.rate_limits)),
        config.retry.clone(),
        shutdown.clone(),
    ));
    let (event_tx, mut events) = broadcast::channel(1024);
    let (mut status_rx, status_handle) =
        spawn_status_aggregator(event_tx.subscribe(), shutdown.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ApiServer::new(AppState {
        status: status_rx.clone(),
        events: event_tx.clone(),
        executor: executor.clone(),
        shutdown: shutdown.clone(),
    });
    let server_handle = tokio::spawn(server.serve_on(listener));

    let balance_handle = tokio::spawn(
        BalancePoller::new(
            broker.clone(),
            executor.clone(),
            Duration::from_millis(50),
            event_tx.clone(),
            shutdown.clone(),
        )
        .run(),
    );
    let trading_handle = tokio::spawn(
        TradingCycle::new(&config, broker, executor, event_tx, shutdown).run(),
    );

    tokio::time::timeout(
        Duration::from_secs(10),
        status_rx.wait_for(|status| status.cycles_completed >= 1 && status.balance.is_some()),
    )
    .await
    .expect("first cycle should complete")
    .unwrap();

    let client = reqwest::Client::new();
    let health: serde_json::Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let status: serde_json::Value = client
        .get(format!("http://{addr}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(status["cycles_completed"].as_u64().unwrap() >= 1);
    assert!(status["agent"]["num_updates"].as_u64().unwrap() >= 2);
    assert_eq!(status["rate_limits"].as_array().unwrap().len(), 4);
    assert!(status["executor"]["attempts"].as_u64().unwrap() >= 4);
    assert_eq!(status["balance"]["account_status"], "ACTIVE");
    drop(client);

    trigger.trigger();
    trading_handle.await.unwrap().unwrap();
    balance_handle.await.unwrap();
    server_handle.await.unwrap().unwrap();
    status_handle.await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind());
        if let BotEvent::Decision(decision) = event {
            assert!(["AAPL", "MSFT"].contains(&decision.symbol.as_str()));
            // Prices are frozen, so every completed decision has zero move.
            if let Some(after) = decision.price_after {
                assert!((after - decision.price_before).abs() < 1e-9);
            }
        }
    }
    assert!(kinds.contains(&"decision"));
    assert!(kinds.contains(&"portfolio_update"));
    assert!(kinds.contains(&"cycle_completed"));
    assert!(kinds.contains(&"balance_update"));

    let saved = qtrade_agent::QTable::load(&q_table).expect("Q-table saved on shutdown");
    assert!(!saved.is_empty());

    let _ = std::fs::remove_dir_all(&dir);
}
