use tileworld_server::{transport::TcpTransport, GameServer};
use tileworld_tests::{fixture_config, fixture_storage};

/// Smoke test: server can run a few ticks without panicking.
#[tokio::test]
async fn server_runs_few_ticks() -> anyhow::Result<()> {
    let cfg = fixture_config();
    let (transport, mut events) = TcpTransport::bind("127.0.0.1:0", cfg.max_sessions).await?;
    let mut server = GameServer::new(cfg, fixture_storage()?, transport);
    for _ in 0..3 {
        while let Ok(event) = events.try_recv() {
            server.handle_event(event);
        }
        server.synchronize();
    }
    assert_eq!(server.tick(), 3);
    assert_eq!(server.session_count(), 0);
    Ok(())
}
