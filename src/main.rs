use aegis_relay::{auth, config, db, local_cache, logger, server};

fn spawn_maintenance_tasks() {
    tokio::spawn(async {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(6 * 3600));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            local_cache::sweep_expired();
            logger::debug("maintenance", "swept expired local-tier cache entries");
        }
    });

    tokio::spawn(async {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(24 * 3600));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            auth::cache::invalidate_all_local();
            logger::info("maintenance", "invalidated local tenant cache to refresh rate-limit overrides");
        }
    });
}

#[tokio::main]
async fn main() {
    aegis_relay::install_panic_hook();

    let cfg = config::load();
    logger::init();
    db::init();

    logger::info(
        "app",
        &format!("aegis-relay starting in {:?} mode on port {}", cfg.environment, cfg.port),
    );

    spawn_maintenance_tasks();
    server::serve().await;
}
