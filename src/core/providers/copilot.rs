use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde_json::Value;
use tracing::debug;

use crate::core::auth::{token_field, CredentialChain, CredentialSource};
use crate::core::error::ProviderError;
use crate::core::models::usage::UsageSnapshot;
use crate::core::normalize::values::{date, number, string};
use crate::core::providers::fetch::{http_client, send, status_error, HttpResponse, USAGE_TIMEOUT};
use crate::core::providers::{
    FetchSettings, Provider, ProviderContext, UsageProvider, DEFAULT_COPILOT_ALLOWANCE,
};
use crate::core::secrets::{SecretStore, COPILOT_ACCESS_TOKEN};

const API_BASE: &str = "https://api.github.com";

const DATE_KEYS: &[&str] = &[
    "date",
    "day",
    "usageDate",
    "usage_date",
    "timestamp",
    "createdAt",
    "created_at",
];
const QUANTITY_KEYS: &[&str] = &[
    "quantity",
    "netQuantity",
    "net_quantity",
    "grossQuantity",
    "gross_quantity",
    "premium_requests",
    "premiumRequests",
    "requests",
    "count",
    "value",
];
const MONTHLY_TOTAL_KEYS: &[&str] = &[
    "totalQuantity",
    "total_quantity",
    "monthlyTotal",
    "monthly_total",
    "netQuantity",
];

pub struct CopilotProvider {
    chain: CredentialChain,
    store: Arc<dyn SecretStore>,
    client: reqwest::Client,
}

impl CopilotProvider {
    pub fn new(ctx: &ProviderContext) -> Self {
        let home = &ctx.home;
        let chain = CredentialChain::new()
            .source(CredentialSource::Env(&["GH_TOKEN", "GITHUB_TOKEN", "COPILOT_TOKEN"]))
            .source(CredentialSource::Secret {
                key: COPILOT_ACCESS_TOKEN,
                extract: None,
            })
            .json_files(
                [
                    home.join(".copilot").join("config.json"),
                    home.join(".config").join("github-copilot").join("apps.json"),
                    home.join(".config").join("github-copilot").join("hosts.json"),
                ],
                token_field,
            )
            .source(CredentialSource::TokenLines {
                path: home.join(".config").join("gh").join("hosts.yml"),
                prefix: "oauth_token:",
            })
            .command("gh", &["auth", "token"]);
        Self {
            chain,
            store: ctx.store.clone(),
            client: http_client(USAGE_TIMEOUT),
        }
    }

    async fn get(&self, url: &str, token: &str) -> Result<HttpResponse, ProviderError> {
        let request = self
            .client
            .get(url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        send(request).await
    }

    async fn login(&self, token: &str) -> Result<String, ProviderError> {
        let response = self.get(&format!("{API_BASE}/user"), token).await?;
        if !response.is_success() {
            return Err(status_error(&response));
        }
        let doc = response.json()?;
        doc.as_object()
            .and_then(|user| string(user, &["login"]))
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse("GitHub user has no login".into()))
    }
}

#[async_trait]
impl UsageProvider for CopilotProvider {
    fn kind(&self) -> Provider {
        Provider::Copilot
    }

    fn is_available(&self) -> bool {
        self.chain.is_present(self.store.as_ref())
    }

    async fn fetch_usage(&self, settings: &FetchSettings) -> Result<UsageSnapshot, ProviderError> {
        let credential = self.chain.resolve(self.store.as_ref()).await?;
        let login = self.login(&credential.access_token).await?;
        debug!(%login, "fetching Copilot premium request usage");

        let url = format!("{API_BASE}/users/{login}/settings/billing/premium_request/usage");
        let response = self.get(&url, &credential.access_token).await?;
        match response.status {
            404 => return Err(ProviderError::NotConfigured),
            _ if !response.is_success() => return Err(status_error(&response)),
            _ => {}
        }
        Ok(project(&response.json()?, Utc::now(), settings.copilot_monthly_allowance))
    }
}

/// Non-positive allowances fall back to the default plan size.
pub fn effective_allowance(configured: f64) -> f64 {
    if configured.is_finite() && configured > 0.0 {
        configured
    } else {
        DEFAULT_COPILOT_ALLOWANCE
    }
}

#[derive(Debug, Default)]
struct UsagePoints {
    by_day: BTreeMap<NaiveDate, f64>,
    undated: f64,
}

fn collect_points(value: &Value, points: &mut UsagePoints) {
    match value {
        Value::Object(map) => {
            if let Some(quantity) = number(map, QUANTITY_KEYS).filter(|q| *q >= 0.0) {
                match date(map, DATE_KEYS) {
                    Some(day) => *points.by_day.entry(day.date_naive()).or_default() += quantity,
                    None => points.undated += quantity,
                }
            }
            for child in map.values() {
                collect_points(child, points);
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_points(child, points);
            }
        }
        _ => {}
    }
}

fn month_bounds(now: DateTime<Utc>) -> (NaiveDate, NaiveDate) {
    let start = now.date_naive().with_day(1).unwrap_or_else(|| now.date_naive());
    let next = if start.month() == 12 {
        NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
    };
    (start, next.unwrap_or(start + Duration::days(31)))
}

fn start_of(day: NaiveDate) -> Option<DateTime<Utc>> {
    day.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive))
}

/// Project a premium-request usage report onto session (today against a
/// daily share of the allowance) and weekly (trailing seven days against a
/// weekly share) percentages. Days are UTC days.
pub fn project(payload: &Value, now: DateTime<Utc>, monthly_allowance: f64) -> UsageSnapshot {
    let allowance = effective_allowance(monthly_allowance);
    let mut points = UsagePoints::default();
    collect_points(payload, &mut points);

    let today = now.date_naive();
    let week_start = today - Duration::days(6);
    let (month_start, month_end) = month_bounds(now);

    let sum_since = |from: NaiveDate| -> f64 {
        points.by_day.range(from..).map(|(_, q)| q).sum()
    };
    let today_requests = sum_since(today);
    let week_requests = sum_since(week_start);

    let summary = payload.as_object().and_then(|map| number(map, MONTHLY_TOTAL_KEYS));
    let monthly_total = summary.unwrap_or_else(|| {
        if points.by_day.is_empty() {
            points.undated
        } else {
            points.by_day.range(month_start..month_end).map(|(_, q)| q).sum()
        }
    });

    let days_in_month = (month_end - month_start).num_days().max(28) as f64;
    let daily_allowance = allowance / days_in_month;
    let weekly_allowance = daily_allowance * 7.0;

    let (session, weekly) = if today_requests > 0.0 || week_requests > 0.0 {
        (
            Some(today_requests / daily_allowance * 100.0),
            Some(week_requests / weekly_allowance * 100.0),
        )
    } else if monthly_total > 0.0 {
        (None, Some(monthly_total / allowance * 100.0))
    } else {
        (None, None)
    };

    let month_reset = start_of(month_end);
    UsageSnapshot::at(Provider::Copilot, now)
        .with_session(session, start_of(today + Duration::days(1)))
        .with_weekly(weekly, None)
        .with_credits(Some((allowance - monthly_total).max(0.0)))
        .with_reset_date(month_reset)
}
