//! Apify Google Maps actor client used as the lead collector.
//!
//! Epistemic foundation:
//! - K_i: Actor runs are asynchronous: start → poll status → read dataset
//! - K_i: SUCCEEDED, FAILED, ABORTED, TIMED-OUT are terminal
//! - B_i: Run finishes within the collection timeout (might not → abort)
//! - I^B: Poll requests may fail transiently → log and keep polling

use crate::models::{ApifyConfig, CollectionError, Lead, LeadgenError, Result};
use crate::pipeline::{Collector, Interrupt};
use async_trait::async_trait;
use chrono::Local;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Run states after which the actor does no more work.
pub const TERMINAL_STATES: [&str; 4] = ["SUCCEEDED", "FAILED", "ABORTED", "TIMED-OUT"];

/// How long to wait for an actor run: 30 s per requested result, clamped to [120 s, 600 s].
pub fn collection_timeout(max_results: u32) -> Duration {
    Duration::from_secs((u64::from(max_results) * 30).clamp(120, 600))
}

/// `{"data": {...}}` envelope used by the run endpoints.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActorRun {
    id: String,
    status: String,
    #[serde(default)]
    default_dataset_id: Option<String>,
}

/// Apify API client.
pub struct ApifyClient {
    client: reqwest::Client,
    token: Option<String>,
    token_env: String,
    base_url: String,
    actor_id: String,
    language: String,
    skip_closed: bool,
    scrape_contacts: bool,
    poll_interval: Duration,
    interrupt: Interrupt,
    raw_dump_dir: Option<PathBuf>,
}

impl ApifyClient {
    /// Create a new client. A missing token fails at collect time with
    /// [`CollectionError::MissingToken`].
    pub fn new(config: &ApifyConfig, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(LeadgenError::Network)?;

        Ok(Self {
            client,
            token,
            token_env: config.api_token_env.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            actor_id: config.actor_id.clone(),
            language: config.language.clone(),
            skip_closed: config.skip_closed,
            scrape_contacts: config.scrape_contacts,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            interrupt: Interrupt::never(),
            raw_dump_dir: None,
        })
    }

    /// Abort the remote run when this interrupt fires.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Save the raw dataset items under `dir` before mapping them.
    pub fn with_raw_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.raw_dump_dir = Some(dir.into());
        self
    }

    fn headers(&self) -> std::result::Result<HeaderMap, CollectionError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| CollectionError::MissingToken {
                env_var: self.token_env.clone(),
            })?;
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| CollectionError::AuthenticationFailed)?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    /// Map a non-success response to a collection error.
    async fn api_error(response: reqwest::Response) -> CollectionError {
        let status = response.status().as_u16();
        if status == 401 {
            return CollectionError::AuthenticationFailed;
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| body.chars().take(200).collect());
        CollectionError::Api { status, message }
    }

    async fn start_run(
        &self,
        headers: &HeaderMap,
        queries: &[String],
        location: &str,
        max_results: u32,
    ) -> std::result::Result<ActorRun, CollectionError> {
        let input = json!({
            "searchStringsArray": queries,
            "locationQuery": location,
            "maxCrawledPlacesPerSearch": max_results,
            "language": self.language,
            "skipClosedPlaces": self.skip_closed,
            "scrapeContacts": self.scrape_contacts,
            "scrapePlaceDetailPage": true,
            "maxReviews": 0,
            "maxImages": 0,
        });

        let url = format!("{}/acts/{}/runs", self.base_url, self.actor_id);
        let response = self
            .client
            .post(&url)
            .headers(headers.clone())
            .json(&input)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let run: Envelope<ActorRun> = response.json().await.map_err(|e| {
            CollectionError::InvalidResponse(format!("Failed to parse run start response: {e}"))
        })?;
        Ok(run.data)
    }

    async fn get_run(
        &self,
        headers: &HeaderMap,
        run_id: &str,
    ) -> std::result::Result<ActorRun, CollectionError> {
        let url = format!("{}/actor-runs/{run_id}", self.base_url);
        let response = self.client.get(&url).headers(headers.clone()).send().await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let run: Envelope<ActorRun> = response.json().await.map_err(|e| {
            CollectionError::InvalidResponse(format!("Failed to parse run status: {e}"))
        })?;
        Ok(run.data)
    }

    /// Best effort: a failed abort is only logged.
    async fn abort_run(&self, headers: &HeaderMap, run_id: &str) {
        let url = format!("{}/actor-runs/{run_id}/abort", self.base_url);
        match self.client.post(&url).headers(headers.clone()).send().await {
            Ok(r) if r.status().is_success() => {
                info!(run_id, "Actor run aborted");
            }
            Ok(r) => warn!(
                run_id,
                status = r.status().as_u16(),
                "Could not abort actor run; check it in the Apify console"
            ),
            Err(e) => warn!(run_id, error = %e, "Could not abort actor run"),
        }
    }

    /// Poll until the run reaches a terminal state, the timeout passes or the user interrupts.
    async fn wait_for_run(
        &self,
        headers: &HeaderMap,
        run: ActorRun,
        timeout: Duration,
    ) -> std::result::Result<ActorRun, CollectionError> {
        let start = Instant::now();
        let mut current = run;

        while !TERMINAL_STATES.contains(&current.status.as_str()) {
            if start.elapsed() >= timeout {
                self.abort_run(headers, &current.id).await;
                return Err(CollectionError::Timeout {
                    run_id: current.id,
                    waited: start.elapsed(),
                });
            }

            tokio::select! {
                biased;
                _ = self.interrupt.triggered() => {
                    warn!(run_id = %current.id, "Interrupted, aborting actor run");
                    self.abort_run(headers, &current.id).await;
                    return Err(CollectionError::Interrupted);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            match self.get_run(headers, &current.id).await {
                Ok(run) => {
                    debug!(
                        run_id = %run.id,
                        status = %run.status,
                        elapsed_secs = start.elapsed().as_secs(),
                        timeout_secs = timeout.as_secs(),
                        "Polled actor run"
                    );
                    current = run;
                }
                Err(CollectionError::Api { status, message })
                    if !matches!(status, 401 | 403 | 404) =>
                {
                    warn!(status, message = %message, "Actor run poll failed, retrying");
                }
                Err(CollectionError::Network(e)) => {
                    warn!(error = %e, "Actor run poll failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(current)
    }

    async fn fetch_items(
        &self,
        headers: &HeaderMap,
        dataset_id: &str,
    ) -> std::result::Result<Vec<Value>, CollectionError> {
        let url = format!("{}/datasets/{dataset_id}/items", self.base_url);
        let response = self
            .client
            .get(&url)
            .headers(headers.clone())
            .query(&[("clean", "true"), ("format", "json")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        response.json().await.map_err(|e| {
            CollectionError::InvalidResponse(format!("Failed to parse dataset items: {e}"))
        })
    }

    /// Dump raw items for debugging; failures only warn.
    fn dump_raw(&self, items: &[Value]) -> Option<PathBuf> {
        let dir = self.raw_dump_dir.as_deref()?;
        let path = dir.join(format!("gmaps_raw_{}.json", Local::now().format("%Y%m%d_%H%M%S")));
        match write_json(&path, items) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not save raw scrape data");
                None
            }
        }
    }
}

fn write_json(path: &Path, items: &[Value]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(items)?;
    std::fs::write(path, content)
}

fn validate_search(
    queries: &[String],
    location: &str,
    max_results: u32,
) -> std::result::Result<(), CollectionError> {
    if queries.iter().all(|q| q.trim().is_empty()) {
        return Err(CollectionError::InvalidSearch(
            "at least one search query is required".to_string(),
        ));
    }
    if location.trim().is_empty() {
        return Err(CollectionError::InvalidSearch(
            "location must not be empty".to_string(),
        ));
    }
    if max_results < 1 {
        return Err(CollectionError::InvalidSearch(format!(
            "max results must be >= 1, got {max_results}"
        )));
    }
    Ok(())
}

/// Map one raw dataset item to a lead.
pub fn lead_from_item(item: &Value) -> Lead {
    let text = |key: &str| item[key].as_str().unwrap_or_default().trim().to_string();
    let optional = |value: &Value| {
        value
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let email = optional(&item["email"])
        .or_else(|| optional(&item["emails"][0]))
        .or_else(|| optional(&item["contactInfo"]["email"]));

    Lead {
        name: text("title"),
        category: text("categoryName"),
        address: text("address"),
        city: text("city"),
        state: text("state"),
        phone: text("phone"),
        website: optional(&item["website"]),
        email,
        ..Default::default()
    }
}

#[async_trait]
impl Collector for ApifyClient {
    async fn collect(
        &self,
        queries: &[String],
        location: &str,
        max_results: u32,
    ) -> std::result::Result<Vec<Lead>, CollectionError> {
        validate_search(queries, location, max_results)?;
        let headers = self.headers()?;
        let timeout = collection_timeout(max_results);

        info!(
            actor = %self.actor_id,
            queries = ?queries,
            location,
            max_results,
            timeout_secs = timeout.as_secs(),
            "Starting Apify actor"
        );

        let run = self.start_run(&headers, queries, location, max_results).await?;
        info!(run_id = %run.id, "Actor run started");

        let run = self.wait_for_run(&headers, run, timeout).await?;
        if run.status != "SUCCEEDED" {
            return Err(CollectionError::RunFailed {
                run_id: run.id,
                status: run.status,
            });
        }

        let dataset_id = run.default_dataset_id.ok_or_else(|| {
            CollectionError::InvalidResponse(format!("Run {} returned no dataset id", run.id))
        })?;

        let items = self.fetch_items(&headers, &dataset_id).await?;
        info!(count = items.len(), "Received raw results");
        if let Some(path) = self.dump_raw(&items) {
            debug!(path = %path.display(), "Raw data saved");
        }

        Ok(items.iter().map(lead_from_item).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, token: Option<&str>) -> ApifyClient {
        let config = ApifyConfig {
            base_url: server.uri(),
            poll_interval_ms: 1,
            ..Default::default()
        };
        ApifyClient::new(&config, token.map(str::to_string)).unwrap()
    }

    fn run(status: &str) -> Value {
        json!({"data": {"id": "run-1", "status": status, "defaultDatasetId": "ds-1"}})
    }

    #[test]
    fn test_collection_timeout_scales_and_clamps() {
        assert_eq!(collection_timeout(1), Duration::from_secs(120));
        assert_eq!(collection_timeout(5), Duration::from_secs(150));
        assert_eq!(collection_timeout(10), Duration::from_secs(300));
        assert_eq!(collection_timeout(50), Duration::from_secs(600));
    }

    #[test]
    fn test_lead_from_item_maps_fields() {
        let item = json!({
            "title": "Joe's Pizza",
            "categoryName": "Pizza restaurant",
            "address": "7 Carmine St, New York, NY 10014",
            "city": "New York",
            "state": "New York",
            "phone": "+1 212-366-1182",
            "website": "https://www.joespizzanyc.com/",
            "emails": ["info@joespizzanyc.com"]
        });

        let lead = lead_from_item(&item);
        assert_eq!(lead.name, "Joe's Pizza");
        assert_eq!(lead.category, "Pizza restaurant");
        assert_eq!(lead.address, "7 Carmine St, New York, NY 10014");
        assert_eq!(lead.phone, "+1 212-366-1182");
        assert_eq!(lead.website.as_deref(), Some("https://www.joespizzanyc.com/"));
        assert_eq!(lead.email.as_deref(), Some("info@joespizzanyc.com"));
        assert!(lead.business_info.is_none());
    }

    #[test]
    fn test_lead_from_item_email_precedence_and_nulls() {
        let direct = json!({"title": "A", "email": "a@x.com", "emails": ["b@x.com"]});
        assert_eq!(lead_from_item(&direct).email.as_deref(), Some("a@x.com"));

        let nested = json!({"title": "B", "contactInfo": {"email": "c@x.com"}});
        assert_eq!(lead_from_item(&nested).email.as_deref(), Some("c@x.com"));

        let nulls = json!({"title": "C", "phone": null, "website": null, "email": null});
        let lead = lead_from_item(&nulls);
        assert_eq!(lead.phone, "");
        assert!(lead.website.is_none());
        assert!(lead.email.is_none());
    }

    #[tokio::test]
    async fn test_invalid_search_makes_no_request() {
        let server = MockServer::start().await;
        let client = client(&server, Some("tok"));

        let err = client.collect(&[], "Chicago, USA", 5).await.unwrap_err();
        assert!(matches!(err, CollectionError::InvalidSearch(_)));
        let err = client
            .collect(&["Plumbers".to_string()], "  ", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::InvalidSearch(_)));
        let err = client
            .collect(&["Plumbers".to_string()], "Chicago, USA", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::InvalidSearch(_)));

        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_missing_token() {
        let server = MockServer::start().await;
        let err = client(&server, None)
            .collect(&["Plumbers".to_string()], "Chicago, USA", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::MissingToken { .. }));
    }

    #[tokio::test]
    async fn test_collect_happy_path() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();

        Mock::given(method("POST"))
            .and(path("/acts/compass~crawler-google-places/runs"))
            .and(header("authorization", "Bearer tok"))
            .and(body_partial_json(json!({
                "searchStringsArray": ["Plumbers"],
                "locationQuery": "Chicago, USA",
                "maxCrawledPlacesPerSearch": 5
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(run("RUNNING")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/actor-runs/run-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(run("SUCCEEDED")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/datasets/ds-1/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"title": "Quick Fix Plumbing", "address": "123 Main St", "city": "Chicago", "state": "Illinois"},
                {"title": "Windy City Drains", "address": "9 Lake St", "categoryName": "Plumber"}
            ])))
            .mount(&server)
            .await;

        let client = client(&server, Some("tok")).with_raw_dump_dir(tmp.path());
        let leads = client
            .collect(&["Plumbers".to_string()], "Chicago, USA", 5)
            .await
            .unwrap();

        assert_eq!(leads.len(), 2);
        assert_eq!(leads[0].name, "Quick Fix Plumbing");
        assert_eq!(leads[0].locality(), "Chicago, Illinois");
        assert_eq!(leads[1].category, "Plumber");

        let dumps: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(dumps.len(), 1);
    }

    #[tokio::test]
    async fn test_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"type": "token-not-valid", "message": "User was not found"}
            })))
            .mount(&server)
            .await;

        let err = client(&server, Some("bad"))
            .collect(&["Plumbers".to_string()], "Chicago, USA", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::AuthenticationFailed));
    }

    #[tokio::test]
    async fn test_failed_run_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/acts/compass~crawler-google-places/runs"))
            .respond_with(ResponseTemplate::new(201).set_body_json(run("RUNNING")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/actor-runs/run-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(run("FAILED")))
            .mount(&server)
            .await;

        let err = client(&server, Some("tok"))
            .collect(&["Plumbers".to_string()], "Chicago, USA", 5)
            .await
            .unwrap_err();
        match err {
            CollectionError::RunFailed { run_id, status } => {
                assert_eq!(run_id, "run-1");
                assert_eq!(status, "FAILED");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_interrupt_aborts_run() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/acts/compass~crawler-google-places/runs"))
            .respond_with(ResponseTemplate::new(201).set_body_json(run("RUNNING")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/actor-runs/run-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(run("RUNNING")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/actor-runs/run-1/abort"))
            .respond_with(ResponseTemplate::new(200).set_body_json(run("ABORTING")))
            .expect(1)
            .mount(&server)
            .await;

        let (trigger, interrupt) = Interrupt::pair();
        let client = client(&server, Some("tok")).with_interrupt(interrupt);
        trigger.trigger();

        let err = client
            .collect(&["Plumbers".to_string()], "Chicago, USA", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::Interrupted));
    }
}
