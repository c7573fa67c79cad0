//! Outlook provider adapter
//!
//! Speaks Microsoft Graph v1.0. Labels map onto master categories
//! (`/me/outlook/masterCategories`), filters onto inbox message rules
//! (`/me/mailFolders/inbox/messageRules`). Categories are flat, so label
//! paths keep their slashes as literal name text, and Graph has no notion
//! of a system category, so nothing is reported protected.
//!
//! Rules match on sender, recipient, subject, and attachment presence
//! only; the planner strips criteria Graph cannot express before a spec
//! reaches this adapter.
//!
//! Rule actions that name a destination folder go through a folder
//! resolver that walks `/me/mailFolders`, creating missing path segments
//! on the way down.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::capability::{profiles, CapabilitySet};
use crate::error::{classify_status, Result, SyncError};
use crate::provider::{
    ProviderAdapter, ProviderKind, RemoteFilter, RemoteLabel, RemoteSnapshot,
};
use crate::spec::{FilterAction, FilterMatch, FilterSpec, LabelColor, LabelSpec};

const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Graph category presets and the color names they stand for. Only the
/// first eight presets are mapped; the rest have no named counterpart and
/// round-trip as opaque preset strings.
const CATEGORY_PRESETS: &[(&str, &str)] = &[
    ("preset0", "red"),
    ("preset1", "orange"),
    ("preset3", "yellow"),
    ("preset4", "green"),
    ("preset5", "teal"),
    ("preset7", "blue"),
    ("preset8", "purple"),
    ("preset10", "gray"),
];

pub struct OutlookAdapter {
    http: reqwest::Client,
    token: String,
    base_url: String,
    capabilities: CapabilitySet,
    folder_ids: HashMap<String, String>,
}

impl OutlookAdapter {
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Permanent(format!("http client: {e}")))?;
        Ok(OutlookAdapter {
            http,
            token: access_token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            capabilities: profiles::outlook(),
            folder_ids: HashMap::new(),
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
        let text = resp.text().await?;
        if text.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Resolve a slash-separated folder path to a Graph folder id,
    /// creating missing segments under the inbox.
    async fn ensure_folder(&mut self, path: &str) -> Result<String> {
        if let Some(id) = self.folder_ids.get(path) {
            return Ok(id.clone());
        }
        let mut parent: Option<String> = None;
        let mut walked = String::new();
        for segment in path.split('/').filter(|s| !s.trim().is_empty()) {
            let segment = segment.trim();
            if !walked.is_empty() {
                walked.push('/');
            }
            walked.push_str(segment);
            if let Some(id) = self.folder_ids.get(&walked) {
                parent = Some(id.clone());
                continue;
            }
            let list_path = match &parent {
                Some(id) => format!("me/mailFolders/{id}/childFolders"),
                None => "me/mailFolders".to_string(),
            };
            let raw = self.request(reqwest::Method::GET, &list_path, None).await?;
            let listing: GraphList<WireFolder> = serde_json::from_value(raw)?;
            let found = listing
                .value
                .iter()
                .find(|f| f.display_name.eq_ignore_ascii_case(segment))
                .map(|f| f.id.clone());
            let id = match found {
                Some(id) => id,
                None => {
                    let raw = self
                        .request(
                            reqwest::Method::POST,
                            &list_path,
                            Some(json!({ "displayName": segment })),
                        )
                        .await?;
                    let created: WireFolder = serde_json::from_value(raw)?;
                    created.id
                }
            };
            self.folder_ids.insert(walked.clone(), id.clone());
            parent = Some(id);
        }
        parent.ok_or_else(|| SyncError::Permanent(format!("empty folder path: {path:?}")))
    }

    fn rule_to_wire(&self, spec: &FilterSpec) -> serde_json::Value {
        let m = &spec.matcher;
        let mut conditions = serde_json::Map::new();
        if let Some(from) = &m.from {
            conditions.insert("senderContains".into(), json!([from]));
        }
        if let Some(to) = &m.to {
            conditions.insert("recipientContains".into(), json!([to]));
        }
        if let Some(subject) = &m.subject {
            conditions.insert("subjectContains".into(), json!([subject]));
        }
        if m.has_attachment == Some(true) {
            conditions.insert("hasAttachments".into(), json!(true));
        }

        let action = &spec.action;
        let mut actions = serde_json::Map::new();
        if !action.add_labels.is_empty() {
            let names: Vec<String> =
                action.add_labels.iter().map(|n| n.to_string()).collect();
            actions.insert("assignCategories".into(), json!(names));
        }
        if action.mark_read {
            actions.insert("markAsRead".into(), json!(true));
        }

        json!({
            "displayName": rule_display_name(spec),
            "sequence": 1,
            "isEnabled": true,
            "conditions": conditions,
            "actions": actions,
        })
    }

    fn rule_from_wire(&self, wire: &WireRule, folder_names: &HashMap<String, String>) -> FilterSpec {
        let c = wire.conditions.as_ref();
        let matcher = FilterMatch {
            from: c.and_then(|c| c.sender_contains.first().cloned()),
            to: c.and_then(|c| c.recipient_contains.first().cloned()),
            subject: c.and_then(|c| c.subject_contains.first().cloned()),
            has_attachment: c.and_then(|c| c.has_attachments).filter(|v| *v),
            ..Default::default()
        };

        let a = wire.actions.as_ref();
        let action = FilterAction {
            add_labels: a
                .map(|a| a.assign_categories.clone())
                .unwrap_or_default(),
            move_to_folder: a.and_then(|a| {
                a.move_to_folder
                    .as_ref()
                    .map(|id| folder_names.get(id).cloned().unwrap_or_else(|| id.clone()))
            }),
            forward: a.and_then(|a| {
                a.forward_to
                    .first()
                    .and_then(|r| r.email_address.as_ref())
                    .and_then(|e| e.address.clone())
            }),
            mark_read: a.and_then(|a| a.mark_as_read).unwrap_or(false),
            ..Default::default()
        };

        FilterSpec { matcher, action }
    }
}

fn rule_display_name(spec: &FilterSpec) -> String {
    let m = &spec.matcher;
    let keyed = m
        .from
        .as_deref()
        .or(m.subject.as_deref())
        .or(m.to.as_deref())
        .unwrap_or("rule");
    format!("mailkeeper: {keyed}")
}

fn category_color(color: Option<&LabelColor>) -> &'static str {
    let name = match color {
        Some(LabelColor::Named(n)) => n.trim().to_ascii_lowercase(),
        Some(LabelColor::Palette { .. }) | None => return "none",
    };
    CATEGORY_PRESETS
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(preset, _)| *preset)
        .unwrap_or("none")
}

fn color_from_preset(preset: &str) -> Option<LabelColor> {
    CATEGORY_PRESETS
        .iter()
        .find(|(p, _)| *p == preset)
        .map(|(_, name)| LabelColor::Named((*name).to_string()))
}

// Graph wire shapes.

#[derive(Debug, Deserialize)]
struct GraphList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCategory {
    id: String,
    display_name: String,
    #[serde(default)]
    color: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFolder {
    id: String,
    display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRule {
    id: String,
    #[serde(default)]
    conditions: Option<WireConditions>,
    #[serde(default)]
    actions: Option<WireActions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireConditions {
    #[serde(default)]
    sender_contains: Vec<String>,
    #[serde(default)]
    recipient_contains: Vec<String>,
    #[serde(default)]
    subject_contains: Vec<String>,
    #[serde(default)]
    has_attachments: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireActions {
    #[serde(default)]
    assign_categories: Vec<String>,
    #[serde(default)]
    move_to_folder: Option<String>,
    #[serde(default)]
    forward_to: Vec<WireRecipient>,
    #[serde(default)]
    mark_as_read: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecipient {
    #[serde(default)]
    email_address: Option<WireEmailAddress>,
}

#[derive(Debug, Deserialize)]
struct WireEmailAddress {
    #[serde(default)]
    address: Option<String>,
}

#[async_trait]
impl ProviderAdapter for OutlookAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Outlook
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    async fn list(&mut self) -> Result<RemoteSnapshot> {
        let raw = self
            .request(reqwest::Method::GET, "me/outlook/masterCategories", None)
            .await?;
        let categories: GraphList<WireCategory> = serde_json::from_value(raw)?;
        let labels = categories
            .value
            .iter()
            .map(|c| RemoteLabel {
                id: c.id.clone(),
                spec: LabelSpec {
                    path: crate::spec::LabelPath::new(&c.display_name),
                    list_visibility: None,
                    message_visibility: None,
                    color: c.color.as_deref().and_then(color_from_preset),
                },
                protected: false,
            })
            .collect::<Vec<_>>();

        let raw = self
            .request(reqwest::Method::GET, "me/mailFolders?$top=100", None)
            .await?;
        let folders: GraphList<WireFolder> = serde_json::from_value(raw)?;
        let mut folder_names = HashMap::new();
        for f in &folders.value {
            self.folder_ids.insert(f.display_name.clone(), f.id.clone());
            folder_names.insert(f.id.clone(), f.display_name.clone());
        }

        let raw = self
            .request(
                reqwest::Method::GET,
                "me/mailFolders/inbox/messageRules",
                None,
            )
            .await?;
        let rules: GraphList<WireRule> = serde_json::from_value(raw)?;
        let filters = rules
            .value
            .iter()
            .map(|r| RemoteFilter {
                id: r.id.clone(),
                spec: self.rule_from_wire(r, &folder_names),
            })
            .collect();

        debug!(categories = labels.len(), "listed outlook configuration");
        Ok(RemoteSnapshot { labels, filters })
    }

    async fn create_label(&mut self, spec: &LabelSpec) -> Result<String> {
        let body = json!({
            "displayName": spec.path.to_string(),
            "color": category_color(spec.color.as_ref()),
        });
        let raw = self
            .request(reqwest::Method::POST, "me/outlook/masterCategories", Some(body))
            .await?;
        let created: WireCategory = serde_json::from_value(raw)?;
        Ok(created.id)
    }

    async fn update_label(&mut self, id: &str, spec: &LabelSpec) -> Result<()> {
        // displayName is immutable on Graph categories; only color changes
        // reach this path because identity is the name itself.
        let body = json!({ "color": category_color(spec.color.as_ref()) });
        self.request(
            reqwest::Method::PATCH,
            &format!("me/outlook/masterCategories/{id}"),
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn delete_label(&mut self, id: &str) -> Result<()> {
        self.request(
            reqwest::Method::DELETE,
            &format!("me/outlook/masterCategories/{id}"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn create_filter(&mut self, spec: &FilterSpec) -> Result<String> {
        let mut body = self.rule_to_wire(spec);
        self.attach_folder_and_forward(&mut body, spec).await?;
        let raw = self
            .request(
                reqwest::Method::POST,
                "me/mailFolders/inbox/messageRules",
                Some(body),
            )
            .await?;
        let created: WireRule = serde_json::from_value(raw)?;
        Ok(created.id)
    }

    async fn update_filter(&mut self, id: &str, spec: &FilterSpec) -> Result<()> {
        let mut body = self.rule_to_wire(spec);
        self.attach_folder_and_forward(&mut body, spec).await?;
        self.request(
            reqwest::Method::PATCH,
            &format!("me/mailFolders/inbox/messageRules/{id}"),
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn delete_filter(&mut self, id: &str) -> Result<()> {
        self.request(
            reqwest::Method::DELETE,
            &format!("me/mailFolders/inbox/messageRules/{id}"),
            None,
        )
        .await?;
        Ok(())
    }
}

impl OutlookAdapter {
    /// Folder resolution needs network calls, so it happens here rather
    /// than in the synchronous wire builder.
    async fn attach_folder_and_forward(
        &mut self,
        body: &mut serde_json::Value,
        spec: &FilterSpec,
    ) -> Result<()> {
        if let Some(path) = &spec.action.move_to_folder {
            let id = self.ensure_folder(path).await?;
            body["actions"]["moveToFolder"] = json!(id);
        }
        if let Some(address) = &spec.action.forward {
            body["actions"]["forwardTo"] =
                json!([{ "emailAddress": { "address": address } }]);
        }
        Ok(())
    }
}
