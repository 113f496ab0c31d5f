use std::{fs, sync::Arc};

use anyhow::{Context, Result};
use uplan_core::{ClientKey, prelude::*};

/// Wires the service from the environment. The CLI runs as a single
/// process, so the cache lives in memory.
pub async fn build_service() -> Result<FeedService> {
    let settings = Settings::from_env()?;
    let store = FeedStore::connect(&settings.database_url, settings.database_max_connections)
        .await
        .with_context(|| format!("Failed to open database {}", settings.database_url))?;
    let fetcher = HttpFetcher::new(&settings.user_agent, settings.upstream_timeout)?;

    Ok(FeedService::new(
        settings,
        Arc::new(MemoryCache::new()),
        Arc::new(fetcher),
        store,
    )?)
}

pub async fn create_command(
    service: &FeedService,
    courses: &str,
    semester: Option<&str>,
    json: bool,
) -> Result<()> {
    tracing::info!("Creating feed for {}", courses);
    let response = service
        .create_feed(courses, semester, &ClientKey::Internal)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("✓ Feed: {}", response.url);
    for course in &response.courses {
        println!("  {course}");
    }
    Ok(())
}

pub async fn render_command(
    service: &FeedService,
    path: &str,
    output: Option<String>,
) -> Result<()> {
    let calendar = service.render_feed(path, &ClientKey::Internal).await?;

    let output_file = output.unwrap_or_else(|| format!("{path}.ics"));
    fs::write(&output_file, calendar)
        .with_context(|| format!("Failed to write {output_file}"))?;
    println!("✓ Calendar saved to {output_file}");

    Ok(())
}

pub async fn semester_command(service: &FeedService) -> Result<()> {
    println!("{}", service.current_semester().await?);
    Ok(())
}
