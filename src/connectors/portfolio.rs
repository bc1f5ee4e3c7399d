use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{ConnectorError, ItemPatch, OwnerDelta, PortfolioApi};
use crate::model::time_entry::TimeEntry;
use crate::model::work_item::{AssetState, ItemKind, WorkItem};

const ITEM_SELECTION: &str = "Name,Description,Number,Scope,Scope.Name,Reference,\
Priority.Name,Status.Name,AssetState,Super.Reference,Owners";

const TIME_ENTRY_SELECTION: &str = "Date,Value,Reference,Member,Scope,Workitem";

pub struct PortfolioClient {
    base_url: String,
    auth_header: String,
    client: reqwest::Client,
}

impl PortfolioClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: format!("Bearer {token}"),
            client: reqwest::Client::new(),
        }
    }

    fn data_url(&self, asset: &str) -> String {
        format!("{}/rest-1.v1/Data/{}", self.base_url, asset)
    }

    /// Turn an asset oid ("Epic:1234") into its URL path ("Epic/1234").
    fn oid_path(&self, local_id: &str) -> String {
        local_id.replace(':', "/")
    }

    async fn query_assets(&self, asset: &str, sel: &str, query: &[(&str, &str)])
        -> Result<Vec<Asset>> {
        let mut url = format!("{}?sel={}", self.data_url(asset), urlencoding::encode(sel));
        for (name, value) in query {
            url.push('&');
            url.push_str(name);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }

        let resp = self
            .client
            .get(&url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .send()
            .await
            .context("portfolio query failed")?;
        let list: AssetList = ensure_success(resp, &url)
            .await?
            .json()
            .await
            .context("failed to parse portfolio assets")?;
        Ok(list.assets)
    }

    async fn post_asset(&self, path: &str, attributes: Value) -> Result<Asset> {
        let url = format!("{}/rest-1.v1/Data/{}", self.base_url, path);
        let body = json!({ "Attributes": attributes });
        let resp = self
            .client
            .post(&url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .context("portfolio write failed")?;
        let asset: Asset = ensure_success(resp, &url)
            .await?
            .json()
            .await
            .context("failed to parse portfolio write response")?;
        Ok(asset)
    }

    fn to_work_item(&self, asset: Asset) -> WorkItem {
        WorkItem {
            local_id: asset.id.clone(),
            number: asset.attr_str("Number"),
            name: asset.attr_str("Name"),
            description: asset.attr_str("Description"),
            scope_id: asset.attr_idref("Scope"),
            scope_name: asset.attr_str("Scope.Name"),
            reference: non_empty(asset.attr_str("Reference")),
            priority: non_empty(asset.attr_str("Priority.Name")),
            status: non_empty(asset.attr_str("Status.Name")),
            asset_state: asset.asset_state(),
            parent_reference: non_empty(asset.attr_str("Super.Reference")),
            owner_ids: asset.attr_idrefs("Owners"),
        }
    }

    fn to_time_entry(&self, asset: Asset) -> TimeEntry {
        TimeEntry {
            local_id: asset.id.clone(),
            date: asset.attr_str("Date"),
            hours: asset.attr_str("Value"),
            reference: asset.attr_str("Reference"),
            member_id: asset.attr_idref("Member"),
            scope_id: asset.attr_idref("Scope"),
            work_item_id: asset.attr_idref("Workitem"),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn set(value: impl Into<Value>) -> Value {
    json!({ "value": value.into(), "act": "set" })
}

fn set_relation(idref: &str) -> Value {
    json!({ "value": { "idref": idref }, "act": "set" })
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

#[derive(Deserialize)]
struct AssetList {
    #[serde(rename = "Assets", default)]
    assets: Vec<Asset>,
}

#[derive(Deserialize)]
struct Asset {
    id: String,
    #[serde(rename = "Attributes", default)]
    attributes: Map<String, Value>,
}

impl Asset {
    fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).and_then(|a| a.get("value"))
    }

    fn attr_str(&self, name: &str) -> String {
        match self.attr(name) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    fn attr_idref(&self, name: &str) -> String {
        self.attr(name)
            .and_then(|v| v.get("idref"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    fn attr_idrefs(&self, name: &str) -> Vec<String> {
        self.attr(name)
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.get("idref").and_then(Value::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn asset_state(&self) -> AssetState {
        // The portfolio API reports lifecycle state as a numeric code.
        match self.attr_str("AssetState").as_str() {
            "128" => AssetState::Closed,
            "255" => AssetState::Deleted,
            _ => AssetState::Active,
        }
    }
}

#[async_trait]
impl PortfolioApi for PortfolioClient {
    async fn fetch_items(
        &self,
        kind: ItemKind,
        scope_id: &str,
        category: Option<&str>,
    ) -> Result<Vec<WorkItem>> {
        let mut filter = format!("Scope='{scope_id}'");
        if let Some(category) = category {
            filter.push_str(&format!(";Category='{category}'"));
        }
        let assets = self
            .query_assets(kind.asset_name(), ITEM_SELECTION, &[("where", &filter)])
            .await?;
        Ok(assets.into_iter().map(|a| self.to_work_item(a)).collect())
    }

    async fn fetch_deleted_items(
        &self,
        kind: ItemKind,
        scope_id: &str,
    ) -> Result<Vec<WorkItem>> {
        let filter = format!("Scope='{scope_id}'");
        let assets = self
            .query_assets(
                kind.asset_name(),
                ITEM_SELECTION,
                &[("where", &filter), ("deleted", "true")],
            )
            .await?;
        Ok(assets
            .into_iter()
            .map(|a| self.to_work_item(a))
            .filter(|item| item.asset_state == AssetState::Deleted)
            .collect())
    }

    async fn create_item(&self, kind: ItemKind, item: &WorkItem) -> Result<WorkItem> {
        let mut attributes = Map::new();
        attributes.insert("Name".into(), set(item.name.clone()));
        attributes.insert("Description".into(), set(item.description.clone()));
        attributes.insert("Scope".into(), set_relation(&item.scope_id));
        if let Some(reference) = &item.reference {
            attributes.insert("Reference".into(), set(reference.clone()));
        }
        if let Some(priority) = &item.priority {
            attributes.insert("Priority".into(), set(priority.clone()));
        }
        if let Some(status) = &item.status {
            attributes.insert("Status".into(), set(status.clone()));
        }
        if !item.owner_ids.is_empty() {
            let owners: Vec<Value> = item
                .owner_ids
                .iter()
                .map(|id| json!({ "idref": id, "act": "add" }))
                .collect();
            attributes.insert("Owners".into(), json!(owners));
        }

        let asset = self.post_asset(kind.asset_name(), Value::Object(attributes)).await?;
        if asset.id.is_empty() {
            return Err(ConnectorError::Malformed {
                url: self.data_url(kind.asset_name()),
                detail: "create response carried no asset id".into(),
            }
            .into());
        }

        let mut created = item.clone();
        created.local_id = asset.id.clone();
        created.number = asset.attr_str("Number");
        Ok(created)
    }

    async fn update_item(&self, local_id: &str, patch: &ItemPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut attributes = Map::new();
        if let Some(name) = &patch.name {
            attributes.insert("Name".into(), set(name.clone()));
        }
        if let Some(description) = &patch.description {
            attributes.insert("Description".into(), set(description.clone()));
        }
        if let Some(priority) = &patch.priority {
            attributes.insert("Priority".into(), set(priority.clone()));
        }
        if let Some(status) = &patch.status {
            attributes.insert("Status".into(), set(status.clone()));
        }
        if let Some(parent) = &patch.parent {
            attributes.insert("Super".into(), set_relation(parent));
        }
        if let Some(estimate) = &patch.estimate {
            attributes.insert("Estimate".into(), set(estimate.clone()));
        }
        if let Some(to_do) = &patch.to_do {
            attributes.insert("ToDo".into(), set(to_do.clone()));
        }

        self.post_asset(&self.oid_path(local_id), Value::Object(attributes)).await?;
        Ok(())
    }

    async fn update_owners(&self, local_id: &str, delta: &OwnerDelta) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }
        let mut entries: Vec<Value> = Vec::new();
        for id in &delta.add {
            entries.push(json!({ "idref": id, "act": "add" }));
        }
        for id in &delta.remove {
            entries.push(json!({ "idref": id, "act": "remove" }));
        }
        self.post_asset(&self.oid_path(local_id), json!({ "Owners": entries })).await?;
        Ok(())
    }

    async fn set_reference(&self, local_id: &str, reference: &str) -> Result<()> {
        self.post_asset(
            &self.oid_path(local_id),
            json!({ "Reference": set(reference) }),
        )
        .await?;
        Ok(())
    }

    async fn clear_reference(&self, local_id: &str) -> Result<()> {
        self.post_asset(&self.oid_path(local_id), json!({ "Reference": set("") }))
            .await?;
        Ok(())
    }

    async fn run_operation(&self, local_id: &str, op: &str) -> Result<()> {
        let url = format!(
            "{}/rest-1.v1/Data/{}?op={}",
            self.base_url,
            self.oid_path(local_id),
            op
        );
        let resp = self
            .client
            .post(&url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .send()
            .await
            .context("portfolio operation failed")?;
        ensure_success(resp, &url).await?;
        Ok(())
    }

    async fn add_link(&self, local_id: &str, url: &str, title: &str) -> Result<()> {
        let attributes = json!({
            "URL": set(url),
            "Name": set(title),
            "OnMenu": set(true),
            "Asset": set_relation(local_id),
        });
        self.post_asset("Link", attributes).await?;
        Ok(())
    }

    fn item_url(&self, number: &str) -> String {
        format!("{}/assetdetail.v1?Number={}", self.base_url, number)
    }

    async fn resolve_member(&self, tracker_account: &str) -> Result<Option<String>> {
        let filter = format!("Nickname='{tracker_account}'");
        let assets = self
            .query_assets("Member", "Name,Nickname", &[("where", &filter)])
            .await?;
        Ok(assets.into_iter().next().map(|a| a.id))
    }

    async fn fetch_time_entries(&self, work_item_id: &str) -> Result<Vec<TimeEntry>> {
        let filter = format!("Workitem='{work_item_id}'");
        let assets = self
            .query_assets("Actual", TIME_ENTRY_SELECTION, &[("where", &filter)])
            .await?;
        Ok(assets.into_iter().map(|a| self.to_time_entry(a)).collect())
    }

    async fn create_time_entry(&self, entry: &TimeEntry) -> Result<TimeEntry> {
        let attributes = json!({
            "Value": set(entry.hours.clone()),
            "Date": set(entry.date.clone()),
            "Reference": set(entry.reference.clone()),
            "Member": set_relation(&entry.member_id),
            "Scope": set_relation(&entry.scope_id),
            "Workitem": set_relation(&entry.work_item_id),
        });
        let asset = self.post_asset("Actual", attributes).await?;
        let mut created = entry.clone();
        created.local_id = asset.id;
        Ok(created)
    }

    async fn update_time_entry(
        &self,
        local_id: &str,
        date: Option<&str>,
        hours: &str,
    ) -> Result<()> {
        let mut attributes = Map::new();
        attributes.insert("Value".into(), set(hours));
        if let Some(date) = date {
            attributes.insert("Date".into(), set(date));
        }
        self.post_asset(&self.oid_path(local_id), Value::Object(attributes)).await?;
        Ok(())
    }
}
