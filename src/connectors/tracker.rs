use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::query::{render, QueryClause};
use super::{ConnectorError, IssuePatch, NewIssue, TrackerApi};
use crate::model::issue::{FieldCatalog, TrackerIssue, Transition};
use crate::model::time_entry::Worklog;

const PAGE_SIZE: usize = 100;

pub struct TrackerClient {
    base_url: String,
    auth_header: String,
    client: reqwest::Client,
}

impl TrackerClient {
    pub fn new(base_url: String, email: String, api_token: String) -> Self {
        let creds = format!("{email}:{api_token}");
        let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: format!("Basic {encoded}"),
            client: reqwest::Client::new(),
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
    }

    fn send_json(&self, builder: reqwest::RequestBuilder, body: &Value) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .json(body)
    }

    fn issue_fields(&self, catalog: &FieldCatalog) -> String {
        let mut fields = vec![
            "summary".to_string(),
            "description".to_string(),
            "status".to_string(),
            "priority".to_string(),
            "labels".to_string(),
            "assignee".to_string(),
            "timetracking".to_string(),
        ];
        if let Some(id) = &catalog.epic_link {
            fields.push(id.clone());
        }
        if let Some(id) = &catalog.story_points {
            fields.push(id.clone());
        }
        fields.join(",")
    }

    fn to_issue(&self, raw: RawIssue, catalog: &FieldCatalog) -> TrackerIssue {
        let fields = raw.fields;
        let description = fields
            .description
            .as_ref()
            .and_then(extract_text)
            .unwrap_or_default();
        let parent_link = catalog
            .epic_link
            .as_ref()
            .and_then(|id| fields.extra.get(id))
            .and_then(|v| v.as_str())
            .map(String::from);
        let story_points = catalog
            .story_points
            .as_ref()
            .and_then(|id| fields.extra.get(id))
            .and_then(Value::as_f64);

        TrackerIssue {
            key: raw.key,
            summary: fields.summary.unwrap_or_default(),
            description,
            priority: fields.priority.map(|p| p.name),
            status: fields.status.map(|s| s.name).unwrap_or_default(),
            labels: fields.labels,
            parent_link,
            story_points,
            remaining_seconds: fields
                .timetracking
                .and_then(|t| t.remaining_estimate_seconds),
            assignee: fields.assignee.map(|a| a.account_id),
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total: usize,
    issues: Vec<RawIssue>,
}

#[derive(Deserialize)]
struct RawIssue {
    key: String,
    fields: RawFields,
}

#[derive(Deserialize)]
struct RawFields {
    summary: Option<String>,
    description: Option<Value>,
    status: Option<NamedField>,
    priority: Option<NamedField>,
    #[serde(default)]
    labels: Vec<String>,
    assignee: Option<AccountField>,
    timetracking: Option<TimeTracking>,
    #[serde(flatten)]
    extra: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct NamedField {
    name: String,
}

#[derive(Deserialize)]
struct AccountField {
    #[serde(rename = "accountId")]
    account_id: String,
}

#[derive(Deserialize)]
struct TimeTracking {
    #[serde(rename = "remainingEstimateSeconds")]
    remaining_estimate_seconds: Option<i64>,
}

#[derive(Deserialize)]
struct FieldDef {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct CreatedIssue {
    key: Option<String>,
}

#[derive(Deserialize)]
struct WorklogPage {
    #[serde(default)]
    total: usize,
    worklogs: Vec<RawWorklog>,
}

#[derive(Deserialize)]
struct RawWorklog {
    id: String,
    author: Option<AccountField>,
    started: String,
    #[serde(rename = "timeSpentSeconds")]
    time_spent_seconds: i64,
}

fn parse_started(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.3f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Flatten the tracker's rich-text document format to plain text.
fn extract_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(arr) => {
            let parts: Vec<String> = arr.iter().filter_map(extract_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        }
        Value::Object(obj) => {
            if obj.get("type").and_then(|v| v.as_str()) == Some("text") {
                return obj.get("text").and_then(|v| v.as_str()).map(String::from);
            }
            obj.get("content").and_then(extract_text)
        }
        _ => None,
    }
}

/// Wrap plain text in the tracker's rich-text document format.
fn text_document(body: &str) -> Value {
    json!({
        "type": "doc",
        "version": 1,
        "content": [{
            "type": "paragraph",
            "content": [{ "type": "text", "text": body }]
        }]
    })
}

async fn ensure_success(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(ConnectorError::Http {
            status: resp.status().as_u16(),
            url: url.to_string(),
        }
        .into())
    }
}

#[async_trait]
impl TrackerApi for TrackerClient {
    async fn field_catalog(&self) -> Result<FieldCatalog> {
        let url = format!("{}/rest/api/3/field", self.base_url);
        let resp = self.get(&url).send().await.context("tracker field list failed")?;
        let fields: Vec<FieldDef> = ensure_success(resp, &url)
            .await?
            .json()
            .await
            .context("failed to parse tracker field list")?;

        let mut catalog = FieldCatalog::default();
        for field in fields {
            match field.name.as_str() {
                "Epic Name" => catalog.epic_name = Some(field.id),
                "Epic Link" => catalog.epic_link = Some(field.id),
                "Story Points" => catalog.story_points = Some(field.id),
                _ => {}
            }
        }
        Ok(catalog)
    }

    async fn search(
        &self,
        clauses: &[QueryClause],
        catalog: &FieldCatalog,
    ) -> Result<Vec<TrackerIssue>> {
        let jql = render(clauses);
        let fields = self.issue_fields(catalog);
        let mut issues = Vec::new();
        let mut start_at = 0usize;

        loop {
            let url = format!(
                "{}/rest/api/3/search?jql={}&fields={}&startAt={}&maxResults={}",
                self.base_url,
                urlencoding::encode(&jql),
                fields,
                start_at,
                PAGE_SIZE
            );
            let resp = self.get(&url).send().await.context("tracker search failed")?;
            let page: SearchResponse = ensure_success(resp, &url)
                .await?
                .json()
                .await
                .context("failed to parse tracker search response")?;

            let fetched = page.issues.len();
            issues.extend(page.issues.into_iter().map(|raw| self.to_issue(raw, catalog)));
            start_at += fetched;
            if fetched == 0 || start_at >= page.total {
                break;
            }
        }

        Ok(issues)
    }

    async fn get_issue(
        &self,
        key: &str,
        catalog: &FieldCatalog,
    ) -> Result<Option<TrackerIssue>> {
        let url = format!(
            "{}/rest/api/3/issue/{}?fields={}",
            self.base_url,
            key,
            self.issue_fields(catalog)
        );
        let resp = self.get(&url).send().await.context("tracker issue lookup failed")?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let raw: RawIssue = ensure_success(resp, &url)
            .await?
            .json()
            .await
            .context("failed to parse tracker issue")?;
        Ok(Some(self.to_issue(raw, catalog)))
    }

    async fn create_issue(&self, issue: &NewIssue, catalog: &FieldCatalog) -> Result<String> {
        let mut fields = serde_json::Map::new();
        fields.insert("project".into(), json!({ "key": issue.project }));
        fields.insert("issuetype".into(), json!({ "name": issue.issue_type }));
        fields.insert("summary".into(), json!(issue.summary));
        fields.insert("description".into(), text_document(&issue.description));
        if let Some(priority) = &issue.priority {
            fields.insert("priority".into(), json!({ "name": priority }));
        }
        if !issue.labels.is_empty() {
            fields.insert("labels".into(), json!(issue.labels));
        }
        if let (Some(name), Some(field_id)) = (&issue.epic_name, &catalog.epic_name) {
            fields.insert(field_id.clone(), json!(name));
        }

        let url = format!("{}/rest/api/3/issue", self.base_url);
        let body = json!({ "fields": fields });
        let resp = self
            .send_json(self.client.post(&url), &body)
            .send()
            .await
            .context("tracker issue create failed")?;
        let created: CreatedIssue = ensure_success(resp, &url)
            .await?
            .json()
            .await
            .context("failed to parse tracker create response")?;

        match created.key {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(ConnectorError::Malformed {
                url,
                detail: "create response carried no issue key".into(),
            }
            .into()),
        }
    }

    async fn update_issue(&self, key: &str, patch: &IssuePatch) -> Result<()> {
        let mut fields = serde_json::Map::new();
        if let Some(summary) = &patch.summary {
            fields.insert("summary".into(), json!(summary));
        }
        if let Some(description) = &patch.description {
            fields.insert("description".into(), text_document(description));
        }
        if let Some(priority) = &patch.priority {
            fields.insert("priority".into(), json!({ "name": priority }));
        }
        if let Some(labels) = &patch.labels {
            fields.insert("labels".into(), json!(labels));
        }
        if fields.is_empty() {
            return Ok(());
        }

        let url = format!("{}/rest/api/3/issue/{}", self.base_url, key);
        let body = json!({ "fields": fields });
        let resp = self
            .send_json(self.client.put(&url), &body)
            .send()
            .await
            .context("tracker issue update failed")?;
        ensure_success(resp, &url).await?;
        Ok(())
    }

    async fn delete_issue(&self, key: &str) -> Result<()> {
        let url = format!("{}/rest/api/3/issue/{}", self.base_url, key);
        let resp = self
            .client
            .delete(&url)
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .context("tracker issue delete failed")?;
        ensure_success(resp, &url).await?;
        Ok(())
    }

    async fn add_comment(&self, key: &str, body: &str) -> Result<()> {
        let url = format!("{}/rest/api/3/issue/{}/comment", self.base_url, key);
        let payload = json!({ "body": text_document(body) });
        let resp = self
            .send_json(self.client.post(&url), &payload)
            .send()
            .await
            .context("tracker comment failed")?;
        ensure_success(resp, &url).await?;
        Ok(())
    }

    async fn add_web_link(&self, key: &str, link_url: &str, title: &str) -> Result<()> {
        let url = format!("{}/rest/api/3/issue/{}/remotelink", self.base_url, key);
        let payload = json!({ "object": { "url": link_url, "title": title } });
        let resp = self
            .send_json(self.client.post(&url), &payload)
            .send()
            .await
            .context("tracker web link failed")?;
        ensure_success(resp, &url).await?;
        Ok(())
    }

    async fn worklogs(&self, key: &str) -> Result<Vec<Worklog>> {
        let mut logs = Vec::new();
        let mut start_at = 0usize;

        loop {
            let url = format!(
                "{}/rest/api/3/issue/{}/worklog?startAt={}&maxResults={}",
                self.base_url, key, start_at, PAGE_SIZE
            );
            let resp = self.get(&url).send().await.context("tracker worklog fetch failed")?;
            let page: WorklogPage = ensure_success(resp, &url)
                .await?
                .json()
                .await
                .context("failed to parse tracker worklogs")?;

            let fetched = page.worklogs.len();
            for raw in page.worklogs {
                let Ok(id) = raw.id.parse::<i64>() else {
                    warn!(issue = key, worklog = %raw.id, "non-numeric worklog id, skipping");
                    continue;
                };
                let Some(started) = parse_started(&raw.started) else {
                    warn!(issue = key, worklog = id, "unparseable worklog start, skipping");
                    continue;
                };
                logs.push(Worklog {
                    id,
                    author: raw.author.map(|a| a.account_id),
                    started,
                    spent_seconds: raw.time_spent_seconds,
                });
            }
            start_at += fetched;
            if fetched == 0 || start_at >= page.total {
                break;
            }
        }

        Ok(logs)
    }

    async fn transitions(&self, key: &str) -> Result<Vec<Transition>> {
        let url = format!("{}/rest/api/3/issue/{}/transitions", self.base_url, key);
        let resp = self.get(&url).send().await.context("tracker transitions failed")?;
        let raw: Value = ensure_success(resp, &url)
            .await?
            .json()
            .await
            .context("failed to parse tracker transitions")?;

        let transitions = raw
            .get("transitions")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|t| {
                        Some(Transition {
                            id: t.get("id")?.as_str()?.to_string(),
                            name: t.get("name")?.as_str()?.to_string(),
                            to_status: t
                                .get("to")
                                .and_then(|to| to.get("name"))
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(transitions)
    }

    async fn run_transition(&self, key: &str, transition_id: &str) -> Result<()> {
        let url = format!("{}/rest/api/3/issue/{}/transitions", self.base_url, key);
        let payload = json!({ "transition": { "id": transition_id } });
        let resp = self
            .send_json(self.client.post(&url), &payload)
            .send()
            .await
            .context("tracker transition failed")?;
        ensure_success(resp, &url).await?;
        Ok(())
    }

    fn issue_url(&self, key: &str) -> String {
        format!("{}/browse/{}", self.base_url, key)
    }
}
