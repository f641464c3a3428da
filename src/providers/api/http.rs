//! HTTP implementation of [`MailApi`] against the case-management backend.
//!
//! The backend authenticates with a session cookie and requires a CSRF
//! token header on every mutating request. Logging in is not handled here:
//! hand in a client whose cookie jar already holds the session, or let the
//! cookie store pick it up from an earlier response.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use super::traits::{ApiError, ApiResult, MailApi};
use crate::config::ApiSettings;
use crate::domain::{
    BridgeAgent, CaseId, InformationSource, ItemId, ItemKey, ItemKind, MailTemplate, MailableItem,
    MessageId, NewOutgoingMessage, OutgoingMessage, RenderContext, RenderRequest, RenderedMail,
    SendingAccount, SourceId,
};

/// Default header carrying the CSRF token.
pub const DEFAULT_CSRF_HEADER: &str = "X-CSRFToken";

// `HeaderName::from_static` only accepts lowercase names.
const DEFAULT_CSRF_HEADER_LOWER: &str = "x-csrftoken";

/// Longest plain-text error body used as a user-facing detail.
const MAX_PLAIN_DETAIL_LEN: usize = 200;

/// Activity record as served by the backend.
#[derive(Debug, Deserialize)]
struct ActivityRecord {
    id: ItemId,
    title: String,
    #[serde(default)]
    note: Option<String>,
    information_source: Option<SourceId>,
    #[serde(default)]
    mail_title: Option<String>,
    #[serde(default)]
    template_mail_title: Option<String>,
}

impl From<ActivityRecord> for MailableItem {
    fn from(record: ActivityRecord) -> Self {
        MailableItem {
            id: record.id,
            kind: ItemKind::Activity,
            label: record.title,
            note_text: record.note.unwrap_or_default(),
            source_id: record.information_source,
            title_override: record.mail_title,
            template_title: record.template_mail_title,
        }
    }
}

/// Document record as served by the backend.
#[derive(Debug, Deserialize)]
struct DocumentRecord {
    id: ItemId,
    name: String,
    #[serde(default)]
    note: Option<String>,
    information_source: Option<SourceId>,
    #[serde(default)]
    mail_title: Option<String>,
    #[serde(default)]
    template_mail_title: Option<String>,
}

impl From<DocumentRecord> for MailableItem {
    fn from(record: DocumentRecord) -> Self {
        MailableItem {
            id: record.id,
            kind: ItemKind::Document,
            label: record.name,
            note_text: record.note.unwrap_or_default(),
            source_id: record.information_source,
            title_override: record.mail_title,
            template_title: record.template_mail_title,
        }
    }
}

/// List endpoints answer either with a bare array or a paginated envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Page { results: Vec<T> },
    Plain(Vec<T>),
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Page { results } => results,
            Listing::Plain(items) => items,
        }
    }
}

#[derive(Debug, Serialize)]
struct RenderBody<'a> {
    case_id: CaseId,
    context: &'a RenderContext,
}

/// Client for the case-management REST API.
#[derive(Debug, Clone)]
pub struct HttpMailApi {
    client: reqwest::Client,
    base_url: Url,
    csrf_header: HeaderName,
    csrf_token: Option<String>,
}

impl HttpMailApi {
    /// Creates a client with a cookie store and the default CSRF header.
    pub fn new(base_url: &str) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: parse_base_url(base_url)?,
            csrf_header: HeaderName::from_static(DEFAULT_CSRF_HEADER_LOWER),
            csrf_token: None,
        })
    }

    /// Creates a client from settings.
    pub fn from_settings(settings: &ApiSettings) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let csrf_header = HeaderName::from_bytes(settings.csrf_header.as_bytes()).map_err(|e| {
            ApiError::Transport(format!("invalid CSRF header name {}: {}", settings.csrf_header, e))
        })?;

        Ok(Self {
            client,
            base_url: parse_base_url(&settings.base_url)?,
            csrf_header,
            csrf_token: settings.csrf_token.clone(),
        })
    }

    /// Overrides the HTTP client (for a pre-authenticated cookie jar or proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Sets the CSRF token sent with mutating requests.
    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> ApiResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Transport(format!("invalid request path {}: {}", path, e)))
    }

    fn request(&self, method: Method, path: &str) -> ApiResult<reqwest::RequestBuilder> {
        let url = self.url(path)?;
        let mutating = method != Method::GET && method != Method::HEAD;
        tracing::debug!(method = %method, url = %url, "api request");

        let mut builder = self.client.request(method, url);
        if mutating {
            if let Some(token) = &self.csrf_token {
                match HeaderValue::from_str(token) {
                    Ok(value) => builder = builder.header(self.csrf_header.clone(), value),
                    Err(_) => tracing::warn!(
                        "CSRF token is not a valid header value, sending without it"
                    ),
                }
            }
        }
        Ok(builder)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> ApiResult<T> {
        let builder = self.request(Method::GET, path)?.query(query);
        let body = execute(builder).await?;
        parse_body(path, &body)
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ApiResult<Vec<T>> {
        let listing: Listing<T> = self.get(path, query).await?;
        Ok(listing.into_vec())
    }

    /// Sends a mutating request and decodes the body it answers with.
    async fn send_expecting<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let text = self.send(method, path, body).await?;
        parse_body(path, &text)
    }

    /// Sends a mutating request; any 2xx body is ignored.
    async fn send<B>(&self, method: Method, path: &str, body: Option<&B>) -> ApiResult<String>
    where
        B: Serialize + ?Sized,
    {
        let mut builder = self.request(method, path)?;
        if let Some(body) = body {
            builder = builder.json(body);
        }
        execute(builder).await
    }

    async fn patch_item(&self, item: ItemKey, body: serde_json::Value) -> ApiResult<()> {
        self.send(Method::PATCH, &item_path(item), Some(&body)).await?;
        Ok(())
    }
}

#[async_trait]
impl MailApi for HttpMailApi {
    async fn list_flagged_activities(&self, case_id: CaseId) -> ApiResult<Vec<MailableItem>> {
        let path = format!("cases/{}/activities/", case_id);
        let records: Vec<ActivityRecord> =
            self.get_list(&path, &[("include_in_mail", "true")]).await?;
        Ok(records.into_iter().map(MailableItem::from).collect())
    }

    async fn list_flagged_documents(&self, case_id: CaseId) -> ApiResult<Vec<MailableItem>> {
        let path = format!("cases/{}/documents/", case_id);
        let records: Vec<DocumentRecord> =
            self.get_list(&path, &[("include_in_mail", "true")]).await?;
        Ok(records.into_iter().map(MailableItem::from).collect())
    }

    async fn list_information_sources(&self) -> ApiResult<Vec<InformationSource>> {
        self.get_list("information-sources/", &[]).await
    }

    async fn set_item_source(&self, item: ItemKey, source_id: Option<SourceId>) -> ApiResult<()> {
        self.patch_item(item, json!({ "information_source": source_id })).await
    }

    async fn clear_item_flag(&self, item: ItemKey) -> ApiResult<()> {
        self.patch_item(item, json!({ "include_in_mail": false })).await
    }

    async fn update_item_note(&self, item: ItemKey, note: &str) -> ApiResult<()> {
        self.patch_item(item, json!({ "note": note })).await
    }

    async fn reset_basket(&self, case_id: CaseId) -> ApiResult<()> {
        let path = format!("cases/{}/mail-basket/reset/", case_id);
        self.send::<serde_json::Value>(Method::POST, &path, None).await?;
        Ok(())
    }

    async fn create_message(&self, message: &NewOutgoingMessage) -> ApiResult<OutgoingMessage> {
        self.send_expecting(Method::POST, "outgoing-messages/", Some(message))
            .await
    }

    async fn list_messages(&self, case_id: CaseId) -> ApiResult<Vec<OutgoingMessage>> {
        let case = case_id.to_string();
        self.get_list("outgoing-messages/", &[("case", case.as_str())])
            .await
    }

    async fn retry_message(&self, id: MessageId) -> ApiResult<OutgoingMessage> {
        let path = format!("outgoing-messages/{}/retry/", id);
        self.send_expecting::<serde_json::Value, _>(Method::POST, &path, None)
            .await
    }

    async fn mark_message_completed(&self, id: MessageId) -> ApiResult<OutgoingMessage> {
        let path = format!("outgoing-messages/{}/mark_completed/", id);
        self.send_expecting::<serde_json::Value, _>(Method::POST, &path, None)
            .await
    }

    async fn delete_message(&self, id: MessageId) -> ApiResult<()> {
        let path = format!("outgoing-messages/{}/", id);
        self.send::<serde_json::Value>(Method::DELETE, &path, None).await?;
        Ok(())
    }

    async fn list_sending_accounts(&self, force_resync: bool) -> ApiResult<Vec<SendingAccount>> {
        let query: &[(&str, &str)] = if force_resync { &[("sync", "true")] } else { &[] };
        self.get_list("sending-accounts/", query).await
    }

    async fn list_bridge_agents(&self) -> ApiResult<Vec<BridgeAgent>> {
        self.get_list("bridge-agents/", &[]).await
    }

    async fn list_templates(&self) -> ApiResult<Vec<MailTemplate>> {
        self.get_list("mail-templates/", &[]).await
    }

    async fn render_template(&self, request: &RenderRequest) -> ApiResult<RenderedMail> {
        let path = format!("mail-templates/{}/render/", request.template_id);
        let body = RenderBody {
            case_id: request.case_id,
            context: &request.context,
        };
        self.send_expecting(Method::POST, &path, Some(&body)).await
    }
}

fn parse_base_url(base_url: &str) -> ApiResult<Url> {
    let mut normalized = base_url.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    let url = Url::parse(&normalized)
        .map_err(|e| ApiError::Transport(format!("invalid base URL {}: {}", base_url, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ApiError::Transport(format!("unsupported URL scheme: {}", other))),
    }
}

fn item_path(item: ItemKey) -> String {
    match item.kind {
        ItemKind::Activity => format!("activities/{}/", item.id),
        ItemKind::Document => format!("documents/{}/", item.id),
    }
}

/// Sends a request and returns the body text of a 2xx answer.
///
/// Non-2xx becomes [`ApiError::Status`]. A 204 yields an empty string.
async fn execute(builder: reqwest::RequestBuilder) -> ApiResult<String> {
    let response = builder.send().await?;
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(String::new());
    }

    let text = response.text().await?;
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            detail: extract_detail(&text),
        });
    }
    Ok(text)
}

fn parse_body<T: DeserializeOwned>(path: &str, body: &str) -> ApiResult<T> {
    if body.trim().is_empty() {
        return Err(ApiError::InvalidResponse(format!("empty response from {}", path)));
    }
    serde_json::from_str(body).map_err(|e| {
        ApiError::InvalidResponse(format!("failed to parse response from {}: {}", path, e))
    })
}

/// Pulls a human-readable message out of an error body.
///
/// Understands `{"detail": ..}`, `{"error": ..}`, `{"message": ..}`, field
/// error maps (`{"field": ["msg"]}`) and short plain-text bodies.
fn extract_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return detail_from_json(&value);
    }

    if trimmed.starts_with('<') || trimmed.len() > MAX_PLAIN_DETAIL_LEN {
        return None;
    }
    Some(trimmed.to_string())
}

fn detail_from_json(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Array(values) => values.iter().find_map(detail_from_json),
        serde_json::Value::Object(map) => ["detail", "error", "message", "non_field_errors"]
            .iter()
            .find_map(|key| map.get(*key).and_then(detail_from_json))
            .or_else(|| map.values().find_map(detail_from_json)),
        _ => None,
    }
}
