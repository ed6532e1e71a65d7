use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::cascade::{CascadeEngine, CascadeOptions, ChartGenerator, ChartInfo, ChartRegistryStore};
use crate::config::Config;
use crate::interval;
use crate::llm::LLMClient;
use crate::upstream::{ChartApiClient, ChartRequest, RequestDescriptor};

/// Print interval labels highest timeframe first
pub fn sort(intervals: Vec<String>) -> Result<()> {
    let unknown: Vec<_> = intervals.iter().filter(|i| !interval::is_recognized(i)).collect();
    if !unknown.is_empty() {
        eprintln!("Unrecognized intervals sort last: {:?}", unknown);
    }

    let sorted = interval::sort_descending(&intervals);
    println!("{}", serde_json::to_string_pretty(&sorted)?);
    Ok(())
}

/// List exchanges supported by the chart API
pub async fn exchanges(config: &Config, refresh: bool) -> Result<()> {
    let client = ChartApiClient::from_config(&config.chart_api)?;
    let request = ChartRequest::ExchangeList;
    let descriptor = if refresh {
        RequestDescriptor::refresh(request)
    } else {
        request.into()
    };

    let response = client.invoke(descriptor).await?;
    let entries = response.listing().unwrap_or_default();
    info!("Fetched {} exchanges", entries.len());

    println!("{}", serde_json::to_string_pretty(entries)?);
    Ok(())
}

/// List symbols for one exchange
pub async fn symbols(config: &Config, exchange: String, refresh: bool) -> Result<()> {
    let client = ChartApiClient::from_config(&config.chart_api)?;
    let request = ChartRequest::SymbolList { exchange };
    let descriptor = if refresh {
        RequestDescriptor::refresh(request)
    } else {
        request.into()
    };

    let response = client.invoke(descriptor).await?;
    let entries = response.listing().unwrap_or_default();
    info!("Fetched {} symbols", entries.len());

    println!("{}", serde_json::to_string_pretty(entries)?);
    Ok(())
}

/// Render charts and optionally analyze them as one cascade
pub async fn generate(
    config: &Config,
    symbol: String,
    intervals: Vec<String>,
    studies: Vec<String>,
    analyze: bool,
    rules: Option<String>,
) -> Result<()> {
    let client = Arc::new(ChartApiClient::from_config(&config.chart_api)?);
    let registries = Arc::new(ChartRegistryStore::new());
    let generator = ChartGenerator::new(client.clone(), registries.clone());

    let request_id = Uuid::new_v4().to_string();
    let charts = generator
        .generate(&request_id, &symbol, &intervals, &studies)
        .await
        .with_context(|| format!("Chart generation failed for {}", symbol))?;

    let budget = client.budget().snapshot().await;
    info!(
        request_id = %request_id,
        remaining_today = budget.remaining_today,
        "Generated {} charts",
        charts.len()
    );

    if !analyze {
        println!("{}", serde_json::to_string_pretty(&charts)?);
        return Ok(());
    }

    let analyzer = Arc::new(LLMClient::from_config(config)?);
    let engine = CascadeEngine::new(analyzer, config.cascade.clone()).with_registries(registries);
    let options = CascadeOptions {
        trading_rules: rules,
        symbol: Some(symbol),
        ..CascadeOptions::default()
    };

    let outcome = engine.analyze_request(&request_id, &options).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// Analyze previously rendered charts read from a JSON file
pub async fn analyze(config: &Config, charts_path: PathBuf, flexible: bool, rules: Option<String>) -> Result<()> {
    let raw = tokio::fs::read_to_string(&charts_path)
        .await
        .with_context(|| format!("Failed to read {}", charts_path.display()))?;
    let charts: Vec<ChartInfo> =
        serde_json::from_str(&raw).with_context(|| format!("Invalid chart list in {}", charts_path.display()))?;

    let analyzer = Arc::new(LLMClient::from_config(config)?);
    let engine = CascadeEngine::new(analyzer, config.cascade.clone());
    let options = CascadeOptions {
        trading_rules: rules,
        flexible,
        ..CascadeOptions::default()
    };

    let outcome = engine.analyze(charts, &options).await?;
    info!(
        recommendation = ?outcome.synthesis.recommendation,
        confidence = outcome.synthesis.confidence,
        "Cascade analysis finished in {}ms",
        outcome.elapsed_ms
    );

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
