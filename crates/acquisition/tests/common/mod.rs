//! Scripted source adapter shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use marketfeed_acquisition::{
    AcquisitionEngine, CanonicalRecord, EngineConfig, OperationParams, ParseFailure, Quote,
    RawPayload, RawRecord, RecordKind, SourceAdapter, SourceConfig, UpstreamFailure,
};

/// What the adapter does on one `fetch_raw` call.
#[derive(Clone, Debug)]
pub enum Step {
    /// Answer with `{"close", "high", "low"}`.
    Quote {
        close: &'static str,
        high: &'static str,
        low: &'static str,
    },
    Fail(UpstreamFailure),
    /// Never answer; only a timeout or cancellation ends the call.
    Hang,
}

impl Step {
    pub fn price(close: &'static str) -> Self {
        Step::Quote {
            close,
            high: close,
            low: close,
        }
    }

    pub fn network() -> Self {
        Step::Fail(UpstreamFailure::connection("connection reset by peer"))
    }

    pub fn status(status: u16) -> Self {
        Step::Fail(UpstreamFailure::http(status, "upstream said no"))
    }
}

/// Adapter that plays a script, then repeats a fallback step.
pub struct ScriptedAdapter {
    id: String,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicU32,
    config: SourceConfig,
}

impl ScriptedAdapter {
    pub fn new(id: &str, fallback: Step) -> Arc<Self> {
        Self::with_script(id, Vec::new(), fallback)
    }

    pub fn with_script(id: &str, script: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
            config: SourceConfig {
                requests_per_second: 100,
                requests_per_minute: 1_000,
                requests_per_hour: 10_000,
                burst_limit: 100,
                timeout: Duration::from_secs(5),
                ..SourceConfig::default()
            },
        })
    }

    pub fn with_config(id: &str, fallback: Step, config: SourceConfig) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicU32::new(0),
            config,
        })
    }

    /// Queue a step ahead of the fallback.
    pub fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn config(&self) -> SourceConfig {
        self.config.clone()
    }

    async fn fetch_raw(&self, params: &OperationParams) -> Result<RawPayload, UpstreamFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Quote { close, high, low } => Ok(RawPayload::json(&json!({
                "symbol": params.symbol,
                "close": close,
                "high": high,
                "low": low,
            }))),
            Step::Fail(failure) => Err(failure),
            Step::Hang => std::future::pending().await,
        }
    }

    fn parse(&self, payload: &RawPayload) -> Result<RawRecord, ParseFailure> {
        serde_json::from_slice::<Value>(&payload.body)
            .map(RawRecord)
            .map_err(|e| ParseFailure::new(e.to_string()))
    }

    fn to_canonical(&self, raw: RawRecord, _kind: RecordKind) -> Result<CanonicalRecord, ParseFailure> {
        let price = |name: &str| -> Result<Decimal, ParseFailure> {
            raw.field(name)
                .and_then(Value::as_str)
                .ok_or_else(|| ParseFailure::field(name, "missing"))?
                .parse()
                .map_err(|_| ParseFailure::field(name, "not a decimal"))
        };
        let symbol = raw
            .field("symbol")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut quote = Quote::new(symbol, Utc::now(), price("close")?, "USD");
        quote.high = Some(price("high")?);
        quote.low = Some(price("low")?);
        Ok(quote.into())
    }
}

/// Engine over `adapters` with default settings.
pub fn engine_with(adapters: &[Arc<ScriptedAdapter>], config: EngineConfig) -> AcquisitionEngine {
    let mut builder = AcquisitionEngine::builder().config(config);
    for adapter in adapters {
        builder = builder.adapter(adapter.clone());
    }
    builder.build().expect("engine should build")
}

pub fn engine(adapters: &[Arc<ScriptedAdapter>]) -> AcquisitionEngine {
    engine_with(adapters, EngineConfig::default())
}
