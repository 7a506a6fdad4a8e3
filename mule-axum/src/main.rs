use std::sync::Arc;

use anyhow::Result;
use mule_broker::{Broker, LeaseSweeper};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let host = std::env::var("HTTP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("HTTP_PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("{host}:{port}");

    let broker = Arc::new(Broker::new());
    LeaseSweeper::spawn(Arc::clone(&broker));

    println!("[mule] listening on http://{addr}");

    mule_axum::serve(addr, broker).await
}
