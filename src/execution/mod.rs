//! Source fan-out executor
//!
//! Expands a `FetchPlan` into independent fetch tasks, runs them all
//! concurrently on the runtime and collects one entry per task. A task that
//! errors or panics only ever affects its own key.

use crate::models::{error_marker, FetchPlan, FetchResults, DEEP_RESEARCH_KEY, SONAR_KEY};
use crate::providers::Providers;
use crate::Result;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// News items requested per ticker.
const NEWS_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchKind {
    Sonar,
    DeepResearch,
    Price { ticker: String, crypto: bool },
    Financials(String),
    InsiderTrades(String),
    SecFilings(String),
    News(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub key: String,
    pub kind: FetchKind,
}

impl FetchTask {
    fn global(key: &str, kind: FetchKind) -> Self {
        Self {
            key: key.to_string(),
            kind,
        }
    }

    fn ticker(ticker: &str, suffix: &str, kind: FetchKind) -> Self {
        Self {
            key: format!("{}_{}", ticker, suffix),
            kind,
        }
    }
}

/// Turn a plan into its task list. Repeated tickers are only fetched once.
pub fn expand_tasks(plan: &FetchPlan) -> Vec<FetchTask> {
    let mut tasks = Vec::new();

    if plan.call_sonar {
        tasks.push(FetchTask::global(SONAR_KEY, FetchKind::Sonar));
    }
    if plan.call_deep_research {
        tasks.push(FetchTask::global(DEEP_RESEARCH_KEY, FetchKind::DeepResearch));
    }

    let mut seen = HashSet::new();
    for ticker in plan.tickers.iter().filter(|t| seen.insert(t.as_str())) {
        let t = ticker.clone();

        if plan.need_price {
            tasks.push(FetchTask::ticker(
                ticker,
                "price",
                FetchKind::Price {
                    ticker: t.clone(),
                    crypto: plan.is_crypto,
                },
            ));
        }
        if plan.need_financials {
            tasks.push(FetchTask::ticker(ticker, "financials", FetchKind::Financials(t.clone())));
        }
        if plan.need_insider_trades {
            tasks.push(FetchTask::ticker(ticker, "insider_trades", FetchKind::InsiderTrades(t.clone())));
        }
        if plan.need_sec_filings {
            tasks.push(FetchTask::ticker(ticker, "sec_filings", FetchKind::SecFilings(t.clone())));
        }
        if plan.call_sonar {
            tasks.push(FetchTask::ticker(ticker, "news", FetchKind::News(t)));
        }
    }

    tasks
}

/// Runs fetch tasks in parallel against the configured providers
pub struct FanOutExecutor {
    providers: Providers,
}

impl FanOutExecutor {
    pub fn new(providers: Providers) -> Self {
        Self { providers }
    }

    /// Execute every task the plan implies. Never fails; failed tasks are
    /// recorded as `{"error": ...}` under their key.
    ///
    /// Tasks are spawned, so they run to completion even if the caller is
    /// dropped mid-way.
    pub async fn execute(&self, plan: &FetchPlan, query: &str) -> FetchResults {
        let tasks = expand_tasks(plan);
        let mut results = FetchResults::new();

        if tasks.is_empty() {
            debug!("Fetch plan has no tasks");
            return results;
        }

        let start = Instant::now();
        info!(task_count = tasks.len(), "Dispatching fetch tasks");

        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| {
                let providers = self.providers.clone();
                let query = query.to_string();
                let key = task.key;
                let kind = task.kind;
                (key, tokio::spawn(async move { run_task(&providers, &kind, &query).await }))
            })
            .collect();

        for (key, handle) in handles {
            let value = match handle.await {
                Ok(Ok(payload)) => payload,
                Ok(Err(e)) => {
                    warn!(task = %key, error = %e, "Fetch task failed");
                    error_marker(e.to_string())
                }
                Err(e) => {
                    warn!(task = %key, error = %e, "Fetch task aborted");
                    error_marker(format!("task aborted: {}", e))
                }
            };
            results.insert(key, value);
        }

        debug!(
            completed = results.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fetch tasks completed"
        );

        results
    }
}

async fn run_task(providers: &Providers, kind: &FetchKind, query: &str) -> Result<Value> {
    match kind {
        FetchKind::Sonar => providers.search.sonar_search(query).await,
        FetchKind::DeepResearch => providers.search.deep_research(query).await,
        FetchKind::Price { ticker, crypto: true } => providers.market.crypto_price(ticker).await,
        FetchKind::Price { ticker, crypto: false } => providers.market.equity_price(ticker).await,
        FetchKind::News(ticker) => providers.market.company_news(ticker, NEWS_LIMIT).await,
        FetchKind::SecFilings(ticker) => providers.filings.sec_filings(ticker).await,
        FetchKind::Financials(ticker) => match providers.filings.financial_statements(ticker).await {
            Ok(data) => Ok(data),
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Filings provider failed, trying market data financials");
                providers.market.financials(ticker).await
            }
        },
        FetchKind::InsiderTrades(ticker) => match providers.filings.insider_trades(ticker).await {
            Ok(data) => Ok(data),
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Filings provider failed, trying market data insider trades");
                providers.market.insider_trades(ticker).await
            }
        },
    }
}
