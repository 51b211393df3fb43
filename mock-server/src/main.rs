use mock_server::Store;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let profiles = std::env::var("SEED_PROFILES")
        .ok()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);
    let store = Store::new()
        .with_database(1, "main", &["orders", "visits"])
        .with_profiles(1, profiles);

    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, profiles, "mock CRM listening");
    mock_server::run_with(listener, store).await
}
