//! Gmail provider adapter
//!
//! Translates between the canonical spec types and the Gmail API's native
//! shapes: `users.labels` objects (name, visibility flags, palette color)
//! and `users.settings.filters` objects (criteria + action keyed by label
//! ids). Flag-style sub-actions ride on system label ids: star adds
//! STARRED, mark-read removes UNREAD, never-spam removes SPAM, archive
//! removes INBOX.
//!
//! The adapter expects an already-authenticated bearer token; acquiring
//! and refreshing credentials is the caller's problem.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::capability::{profiles, CapabilitySet};
use crate::error::{classify_status, Result, SyncError};
use crate::provider::{
    ProviderAdapter, ProviderKind, RemoteFilter, RemoteLabel, RemoteSnapshot,
};
use crate::signature::resolved_add_labels;
use crate::spec::{
    FilterAction, FilterMatch, FilterSpec, LabelColor, LabelSpec, ListVisibility,
    MessageVisibility, SizeComparison, NAMED_COLORS,
};

const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct GmailAdapter {
    http: reqwest::Client,
    token: String,
    base_url: String,
    capabilities: CapabilitySet,
    name_to_id: HashMap<String, String>,
    id_to_name: HashMap<String, String>,
}

impl GmailAdapter {
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Permanent(format!("http client: {e}")))?;
        Ok(GmailAdapter {
            http,
            token: access_token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            capabilities: profiles::gmail(),
            name_to_id: HashMap::new(),
            id_to_name: HashMap::new(),
        })
    }

    /// Point the adapter at a non-default endpoint (local test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/{}", self.base_url, path);
        let mut req = self
            .http
            .request(method, &url)
            .bearer_auth(&self.token);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(serde_json::Value::Null);
        }
        let text = resp.text().await?;
        if text.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Resolve a label name to its remote id. System names (all-caps ids
    /// like INBOX or CATEGORY_PROMOTIONS) are their own ids.
    fn label_id(&self, name: &str) -> Result<String> {
        if let Some(id) = self.name_to_id.get(name) {
            return Ok(id.clone());
        }
        if name.chars().all(|c| !c.is_ascii_lowercase()) {
            return Ok(name.to_string());
        }
        Err(SyncError::Permanent(format!(
            "filter references unknown label: {name}"
        )))
    }

    fn label_name(&self, id: &str) -> String {
        self.id_to_name.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    fn label_to_wire(&self, spec: &LabelSpec) -> serde_json::Value {
        let mut body = json!({ "name": spec.path.to_string() });
        if let Some(v) = spec.list_visibility {
            body["labelListVisibility"] = json!(match v {
                ListVisibility::Show => "labelShow",
                ListVisibility::ShowIfUnread => "labelShowIfUnread",
                ListVisibility::Hide => "labelHide",
            });
        }
        if let Some(v) = spec.message_visibility {
            body["messageListVisibility"] = json!(match v {
                MessageVisibility::Show => "show",
                MessageVisibility::Hide => "hide",
            });
        }
        if let Some(color) = &spec.color {
            let (background, text) = match color {
                LabelColor::Palette { background, text } => (
                    background.clone(),
                    text.clone().unwrap_or_else(|| "#ffffff".into()),
                ),
                LabelColor::Named(name) => {
                    let needle = name.trim().to_ascii_lowercase();
                    NAMED_COLORS
                        .iter()
                        .find(|(n, _, _)| *n == needle)
                        .map(|(_, bg, fg)| (bg.to_string(), fg.to_string()))
                        .unwrap_or_else(|| ("#999999".into(), "#ffffff".into()))
                }
            };
            body["color"] = json!({ "backgroundColor": background, "textColor": text });
        }
        body
    }

    fn filter_to_wire(&self, spec: &FilterSpec) -> Result<serde_json::Value> {
        let m = &spec.matcher;
        let mut criteria = serde_json::Map::new();
        let mut put = |key: &str, value: Option<&str>| {
            if let Some(v) = value {
                criteria.insert(key.into(), json!(v));
            }
        };
        put("from", m.from.as_deref());
        put("to", m.to.as_deref());
        put("subject", m.subject.as_deref());
        put("query", m.query.as_deref());
        put("negatedQuery", m.negated_query.as_deref());
        if let Some(flag) = m.has_attachment {
            criteria.insert("hasAttachment".into(), json!(flag));
        }
        if let Some(size) = m.size {
            criteria.insert("size".into(), json!(size));
            criteria.insert(
                "sizeComparison".into(),
                json!(match m.size_comparison {
                    Some(SizeComparison::Smaller) => "smaller",
                    _ => "larger",
                }),
            );
        }

        let action = &spec.action;
        let mut add_ids: Vec<String> = Vec::new();
        for name in resolved_add_labels(action)? {
            add_ids.push(self.label_id(&name)?);
        }
        if action.star {
            add_ids.push("STARRED".into());
        }
        let mut remove_ids: Vec<String> = Vec::new();
        for name in &action.remove_labels {
            remove_ids.push(self.label_id(name)?);
        }
        if action.mark_read {
            remove_ids.push("UNREAD".into());
        }
        if action.never_spam {
            remove_ids.push("SPAM".into());
        }
        if action.archive {
            remove_ids.push("INBOX".into());
        }

        let mut wire_action = serde_json::Map::new();
        if !add_ids.is_empty() {
            wire_action.insert("addLabelIds".into(), json!(add_ids));
        }
        if !remove_ids.is_empty() {
            wire_action.insert("removeLabelIds".into(), json!(remove_ids));
        }
        if let Some(forward) = &action.forward {
            wire_action.insert("forward".into(), json!(forward));
        }

        Ok(json!({ "criteria": criteria, "action": wire_action }))
    }

    fn filter_from_wire(&self, wire: &WireFilter) -> FilterSpec {
        let c = &wire.criteria;
        let matcher = FilterMatch {
            from: c.from.clone(),
            to: c.to.clone(),
            subject: c.subject.clone(),
            query: c.query.clone(),
            negated_query: c.negated_query.clone(),
            has_attachment: c.has_attachment,
            size: c.size,
            size_comparison: c.size_comparison,
        };

        let mut action = FilterAction::default();
        for id in &wire.action.add_label_ids {
            match id.as_str() {
                "STARRED" => action.star = true,
                other => action.add_labels.push(self.label_name(other)),
            }
        }
        for id in &wire.action.remove_label_ids {
            match id.as_str() {
                "UNREAD" => action.mark_read = true,
                "SPAM" => action.never_spam = true,
                "INBOX" => action.archive = true,
                other => action.remove_labels.push(self.label_name(other)),
            }
        }
        action.forward = wire.action.forward.clone();

        FilterSpec { matcher, action }
    }
}

// Wire shapes, field names exactly as the Gmail API emits them.

#[derive(Debug, Deserialize)]
struct WireLabelList {
    #[serde(default)]
    labels: Vec<WireLabel>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireLabel {
    id: String,
    name: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    label_list_visibility: Option<String>,
    #[serde(default)]
    message_list_visibility: Option<String>,
    #[serde(default)]
    color: Option<WireColor>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireColor {
    #[serde(default)]
    background_color: Option<String>,
    #[serde(default)]
    text_color: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireFilterList {
    #[serde(default)]
    filter: Vec<WireFilter>,
}

#[derive(Debug, Deserialize)]
struct WireFilter {
    id: String,
    #[serde(default)]
    criteria: WireCriteria,
    #[serde(default)]
    action: WireAction,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCriteria {
    from: Option<String>,
    to: Option<String>,
    subject: Option<String>,
    query: Option<String>,
    negated_query: Option<String>,
    has_attachment: Option<bool>,
    size: Option<u64>,
    size_comparison: Option<SizeComparison>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAction {
    #[serde(default)]
    add_label_ids: Vec<String>,
    #[serde(default)]
    remove_label_ids: Vec<String>,
    forward: Option<String>,
}

fn label_from_wire(wire: &WireLabel) -> LabelSpec {
    LabelSpec {
        path: crate::spec::LabelPath::new(&wire.name),
        list_visibility: wire.label_list_visibility.as_deref().and_then(|v| match v {
            "labelShow" => Some(ListVisibility::Show),
            "labelShowIfUnread" => Some(ListVisibility::ShowIfUnread),
            "labelHide" => Some(ListVisibility::Hide),
            _ => None,
        }),
        message_visibility: wire.message_list_visibility.as_deref().and_then(|v| match v {
            "show" => Some(MessageVisibility::Show),
            "hide" => Some(MessageVisibility::Hide),
            _ => None,
        }),
        color: wire.color.as_ref().and_then(|c| {
            c.background_color.as_ref().map(|bg| LabelColor::Palette {
                background: bg.clone(),
                text: c.text_color.clone(),
            })
        }),
    }
}

#[async_trait]
impl ProviderAdapter for GmailAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gmail
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    async fn list(&mut self) -> Result<RemoteSnapshot> {
        let raw = self
            .request(reqwest::Method::GET, "labels", None)
            .await?;
        let label_list: WireLabelList = serde_json::from_value(raw)?;

        self.name_to_id.clear();
        self.id_to_name.clear();
        let mut labels = Vec::with_capacity(label_list.labels.len());
        for wire in &label_list.labels {
            self.name_to_id.insert(wire.name.clone(), wire.id.clone());
            self.id_to_name.insert(wire.id.clone(), wire.name.clone());
            labels.push(RemoteLabel {
                id: wire.id.clone(),
                spec: label_from_wire(wire),
                protected: wire.kind.as_deref() == Some("system"),
            });
        }

        let raw = self
            .request(reqwest::Method::GET, "settings/filters", None)
            .await?;
        let filter_list: WireFilterList = serde_json::from_value(raw)?;
        let filters = filter_list
            .filter
            .iter()
            .map(|wire| RemoteFilter {
                id: wire.id.clone(),
                spec: self.filter_from_wire(wire),
            })
            .collect();

        debug!(labels = labels.len(), "listed gmail configuration");
        Ok(RemoteSnapshot { labels, filters })
    }

    async fn create_label(&mut self, spec: &LabelSpec) -> Result<String> {
        let body = self.label_to_wire(spec);
        let raw = self
            .request(reqwest::Method::POST, "labels", Some(body))
            .await?;
        let created: WireLabel = serde_json::from_value(raw)?;
        self.name_to_id.insert(created.name.clone(), created.id.clone());
        self.id_to_name.insert(created.id.clone(), created.name);
        Ok(created.id)
    }

    async fn update_label(&mut self, id: &str, spec: &LabelSpec) -> Result<()> {
        let body = self.label_to_wire(spec);
        self.request(reqwest::Method::PATCH, &format!("labels/{id}"), Some(body))
            .await?;
        Ok(())
    }

    async fn delete_label(&mut self, id: &str) -> Result<()> {
        self.request(reqwest::Method::DELETE, &format!("labels/{id}"), None)
            .await?;
        if let Some(name) = self.id_to_name.remove(id) {
            self.name_to_id.remove(&name);
        }
        Ok(())
    }

    async fn create_filter(&mut self, spec: &FilterSpec) -> Result<String> {
        let body = self.filter_to_wire(spec)?;
        let raw = self
            .request(reqwest::Method::POST, "settings/filters", Some(body))
            .await?;
        let id = raw
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SyncError::Parse("filter create response missing id".into()))?;
        Ok(id.to_string())
    }

    async fn update_filter(&mut self, _id: &str, _spec: &FilterSpec) -> Result<()> {
        // Gmail filters are immutable; the plan builder lowers updates to
        // delete + create before execution ever gets here.
        Err(SyncError::Permanent(
            "gmail does not support filter update".into(),
        ))
    }

    async fn delete_filter(&mut self, id: &str) -> Result<()> {
        self.request(
            reqwest::Method::DELETE,
            &format!("settings/filters/{id}"),
            None,
        )
        .await?;
        Ok(())
    }
}
