use std::{env, net::SocketAddr};

use anyhow::Result;
use tokio::net::TcpListener;

use crate::handlers::{AppState, create_app};

pub async fn start_server(state: AppState) -> Result<()> {
    let app = create_app(state);

    // 3000 unless PORT says otherwise
    let port = env::var("PORT")
        .ok()
        .and_then(|p| p.trim().parse::<u16>().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("uplan server starting on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
