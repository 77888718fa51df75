/// Aurora Gate - identity and access-control server
use aurora_gate::{
    config::ServerConfig, context::AppContext, error::IdentityResult, jobs, server,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> IdentityResult<()> {
    // Load configuration before logging so the log format can follow it
    let config = ServerConfig::from_env()?;

    init_tracing(&config);
    print_banner();

    // Create application context
    let ctx = Arc::new(AppContext::new(config).await?);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn init_tracing(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("aurora_gate={},tower_http=debug", config.logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn print_banner() {
    println!(
        r#"
    ___                                   ______      __
   /   | __  ___________  _________ _   / ____/___ _/ /____
  / /| |/ / / / ___/ __ \/ ___/ __ `/  / / __/ __ `/ __/ _ \
 / ___ / /_/ / /  / /_/ / /  / /_/ /  / /_/ / /_/ / /_/  __/
/_/  |_\__,_/_/   \____/_/   \__,_/   \____/\__,_/\__/\___/

        Identity and Access Control v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
