use chrono::Local;
use lidom_scrape::{config::Config, info_time, process::process_site, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer())
        .init();

    let start_time = Local::now();
    let config = Config::from_env()?;
    process_site(&config).await?;
    info_time!(start_time, "Full program time:");

    Ok(())
}
