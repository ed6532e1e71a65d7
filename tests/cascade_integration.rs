//! Integration tests for the cascade engine
//! A scripted vision analyzer stands in for the LLM; no network is touched

use anyhow::Result;
use async_trait::async_trait;
use chartpilot::cascade::{
    Alignment, CascadeEngine, CascadeError, CascadeOptions, ChartInfo, ChartRegistryStore, ChartRole, EntryZone,
    KeyLevels, OrderingMode, Recommendation, TimeframeAnalysis, TimeframeRequest, Trend, TrendStrength,
    VisionAnalyzer,
};
use chartpilot::config::CascadeConfig;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
struct Read {
    trend: Trend,
    aligns: bool,
    levels: KeyLevels,
    entry_zone: Option<EntryZone>,
}

fn read(trend: Trend, aligns: bool) -> Read {
    Read {
        trend,
        aligns,
        levels: KeyLevels::default(),
        entry_zone: None,
    }
}

/// Returns a canned read per interval and records what each step was shown
#[derive(Default)]
struct ScriptedAnalyzer {
    reads: HashMap<String, Read>,
    fail_on: Option<String>,
    delay: Option<Duration>,
    /// (interval, number of prior analyses visible) per call
    calls: Mutex<Vec<(String, usize)>>,
}

impl ScriptedAnalyzer {
    fn with_reads(reads: &[(&str, Read)]) -> Self {
        Self {
            reads: reads.iter().map(|(i, r)| (i.to_string(), r.clone())).collect(),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl VisionAnalyzer for ScriptedAnalyzer {
    async fn analyze_timeframe(&self, request: TimeframeRequest<'_>) -> Result<TimeframeAnalysis> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((request.interval.to_string(), request.prior_context.len()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on.as_deref() == Some(request.interval) {
            anyhow::bail!("model returned malformed JSON");
        }

        let canned = self
            .reads
            .get(request.interval)
            .cloned()
            .unwrap_or_else(|| read(Trend::Neutral, false));
        Ok(TimeframeAnalysis {
            interval: request.interval.to_string(),
            position: request.position,
            trend: canned.trend,
            trend_strength: TrendStrength::Strong,
            key_levels: canned.levels,
            aligns_with_higher_tf: canned.aligns,
            signals: vec!["structure intact".to_string()],
            entry_zone: canned.entry_zone,
            reasoning: format!("{} read", request.interval),
        })
    }
}

fn chart(interval: &str) -> ChartInfo {
    ChartInfo {
        id: format!("chart-{}", interval),
        role: None,
        image_url: format!("https://storage.example.com/{}.png", interval),
        symbol: "BINANCE:BTCUSDT".to_string(),
        interval: interval.to_string(),
        indicators: Vec::new(),
        generated_at: Utc::now(),
    }
}

fn config() -> CascadeConfig {
    CascadeConfig {
        deadline_seconds: 180,
        max_rules_chars: 2000,
    }
}

#[tokio::test]
async fn test_charts_analyzed_highest_timeframe_first() -> Result<()> {
    let analyzer = Arc::new(ScriptedAnalyzer::default());
    let engine = CascadeEngine::new(analyzer.clone(), config());

    let outcome = engine
        .analyze(vec![chart("15m"), chart("1D"), chart("4h")], &CascadeOptions::default())
        .await?;

    assert_eq!(outcome.mode, OrderingMode::Sorted);
    assert_eq!(
        analyzer.calls(),
        vec![("1D".to_string(), 0), ("4h".to_string(), 1), ("15m".to_string(), 2)]
    );

    let positions: Vec<_> = outcome
        .timeframe_analyses
        .iter()
        .map(|a| (a.interval.as_str(), a.position))
        .collect();
    assert_eq!(positions, vec![("1D", 0), ("4h", 1), ("15m", 2)]);
    // the root is always treated as aligned
    assert!(outcome.timeframe_analyses[0].aligns_with_higher_tf);
    Ok(())
}

#[tokio::test]
async fn test_fully_aligned_bullish_cascade_goes_long() -> Result<()> {
    let mut entry = read(Trend::Bullish, true);
    entry.entry_zone = Some(EntryZone { low: 100.0, high: 102.0 });
    entry.levels = KeyLevels {
        support: vec![97.0],
        resistance: vec![110.0],
    };
    let mut daily = read(Trend::Bullish, true);
    daily.levels = KeyLevels {
        support: vec![90.0],
        resistance: vec![120.0],
    };

    let analyzer = Arc::new(ScriptedAnalyzer::with_reads(&[
        ("1W", read(Trend::Bullish, true)),
        ("1D", daily),
        ("4h", entry),
    ]));
    let engine = CascadeEngine::new(analyzer, config());

    let outcome = engine
        .analyze(vec![chart("4h"), chart("1W"), chart("1D")], &CascadeOptions::default())
        .await?;

    let synthesis = &outcome.synthesis;
    assert_eq!(synthesis.recommendation, Recommendation::Long);
    assert_eq!(synthesis.alignment, Alignment::Full);
    assert!(synthesis.confidence >= 0.75 && synthesis.confidence <= 0.95);

    let plan = synthesis.trade_plan.as_ref().expect("long setup has a plan");
    assert_eq!(plan.entry, 101.0);
    assert_eq!(plan.stop_loss, 97.0);
    assert!(!plan.take_profit.is_empty());
    assert!(plan.take_profit.iter().all(|tp| *tp > plan.entry));

    let json = serde_json::to_value(&outcome)?;
    assert_eq!(json["synthesis"]["recommendation"], "LONG");
    assert_eq!(json["synthesis"]["alignment"], "full");
    assert!(json["synthesis"]["tradePlan"]["takeProfit"].is_array());
    Ok(())
}

#[tokio::test]
async fn test_partial_alignment_lowers_confidence() -> Result<()> {
    let mut entry = read(Trend::Bearish, false);
    entry.entry_zone = Some(EntryZone { low: 50.0, high: 52.0 });

    let analyzer = Arc::new(ScriptedAnalyzer::with_reads(&[
        ("1D", read(Trend::Bullish, true)),
        ("4h", read(Trend::Bullish, true)),
        ("15m", entry),
    ]));
    let engine = CascadeEngine::new(analyzer, config());

    let outcome = engine
        .analyze(vec![chart("1D"), chart("4h"), chart("15m")], &CascadeOptions::default())
        .await?;

    assert_eq!(outcome.synthesis.alignment, Alignment::Partial);
    assert!(outcome.synthesis.confidence >= 0.50 && outcome.synthesis.confidence <= 0.70);
    Ok(())
}

#[tokio::test]
async fn test_too_few_charts_fail_before_any_call() {
    let analyzer = Arc::new(ScriptedAnalyzer::default());
    let engine = CascadeEngine::new(analyzer.clone(), config());

    let err = engine
        .analyze(vec![chart("1D")], &CascadeOptions::default())
        .await
        .expect_err("one chart is not a cascade");
    assert!(matches!(err, CascadeError::InsufficientCharts { provided: 1 }));

    let err = engine
        .analyze(Vec::new(), &CascadeOptions::default())
        .await
        .expect_err("no charts");
    assert!(matches!(err, CascadeError::InsufficientCharts { provided: 0 }));

    assert!(analyzer.calls().is_empty());
}

#[tokio::test]
async fn test_mid_chain_failure_aborts_the_cascade() {
    let analyzer = Arc::new(ScriptedAnalyzer {
        fail_on: Some("1D".to_string()),
        ..ScriptedAnalyzer::default()
    });
    let engine = CascadeEngine::new(analyzer.clone(), config());

    let err = engine
        .analyze(vec![chart("4h"), chart("1D"), chart("1W")], &CascadeOptions::default())
        .await
        .expect_err("1D step fails");

    match err {
        CascadeError::IncompleteCascade { position, interval, .. } => {
            assert_eq!(position, 1);
            assert_eq!(interval, "1D");
        }
        other => panic!("unexpected error: {other}"),
    }

    // lower timeframes are never attempted after a failure
    let intervals: Vec<_> = analyzer.calls().into_iter().map(|(i, _)| i).collect();
    assert_eq!(intervals, vec!["1W", "1D"]);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_covers_the_whole_cascade() {
    let analyzer = Arc::new(ScriptedAnalyzer {
        delay: Some(Duration::from_secs(10)),
        ..ScriptedAnalyzer::default()
    });
    let engine = CascadeEngine::new(analyzer.clone(), config());
    let options = CascadeOptions {
        deadline: Some(Duration::from_secs(15)),
        ..CascadeOptions::default()
    };

    let err = engine
        .analyze(vec![chart("1D"), chart("4h"), chart("15m")], &options)
        .await
        .expect_err("three 10s steps exceed 15s");

    assert!(matches!(err, CascadeError::DeadlineExceeded { deadline_ms: 15_000 }));
    assert_eq!(analyzer.calls().len(), 2);
}

#[tokio::test]
async fn test_analyze_registered_request() -> Result<()> {
    let store = Arc::new(ChartRegistryStore::new());
    let registry = store.create("req-42");
    registry.register(chart("15m"));
    registry.register(chart("1h"));

    let analyzer = Arc::new(ScriptedAnalyzer::default());
    let engine = CascadeEngine::new(analyzer.clone(), config()).with_registries(store);

    let outcome = engine.analyze_request("req-42", &CascadeOptions::default()).await?;
    assert_eq!(outcome.request_id.as_deref(), Some("req-42"));
    assert_eq!(outcome.symbol, "BINANCE:BTCUSDT");
    assert_eq!(analyzer.calls()[0].0, "1h");

    let err = engine
        .analyze_request("req-missing", &CascadeOptions::default())
        .await
        .expect_err("unknown request");
    assert!(matches!(err, CascadeError::RegistryNotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn test_legacy_roles_keep_their_positions() -> Result<()> {
    let tagged = |interval: &str, role: ChartRole| {
        let mut c = chart(interval);
        c.role = Some(role);
        c
    };
    let charts = vec![
        tagged("15m", ChartRole::Ltf),
        tagged("1D", ChartRole::Htf),
        tagged("1h", ChartRole::Etf),
    ];

    let analyzer = Arc::new(ScriptedAnalyzer::default());
    let engine = CascadeEngine::new(analyzer.clone(), config());

    let outcome = engine.analyze(charts.clone(), &CascadeOptions::default()).await?;
    assert_eq!(outcome.mode, OrderingMode::LegacyRoles);
    let order: Vec<_> = analyzer.calls().into_iter().map(|(i, _)| i).collect();
    assert_eq!(order, vec!["1D", "1h", "15m"]);

    let flexible = CascadeOptions {
        flexible: true,
        ..CascadeOptions::default()
    };
    let outcome = engine.analyze(charts, &flexible).await?;
    assert_eq!(outcome.mode, OrderingMode::Sorted);
    Ok(())
}
