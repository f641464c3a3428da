//! In-memory backend for unit tests.
//!
//! Mutations are applied when a call is first polled, so the server sees
//! requests in issue order. Responses can be held back with [`FakeMailApi::hold`]
//! to make them arrive in any order.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::traits::{ApiError, ApiResult, MailApi};
use crate::domain::{
    BridgeAgent, CaseId, InformationSource, ItemKey, ItemKind, MailTemplate, MailableItem,
    MessageId, MessageStatus, NewOutgoingMessage, OutgoingMessage, RenderRequest, RenderedMail,
    SendingAccount, SourceId,
};

#[derive(Debug, Default)]
pub(crate) struct FakeServer {
    pub items: HashMap<CaseId, Vec<MailableItem>>,
    pub sources: Vec<InformationSource>,
    pub messages: Vec<OutgoingMessage>,
    pub next_message_id: i64,
    pub accounts: Vec<SendingAccount>,
    pub agents: Vec<BridgeAgent>,
    pub templates: Vec<MailTemplate>,
    pub rendered: Option<RenderedMail>,
    pub render_requests: Vec<RenderRequest>,
}

impl FakeServer {
    fn item_mut(&mut self, key: ItemKey) -> Option<&mut MailableItem> {
        self.items
            .values_mut()
            .flat_map(|items| items.iter_mut())
            .find(|item| item.key() == key)
    }

    fn message_mut(&mut self, id: MessageId) -> ApiResult<&mut OutgoingMessage> {
        self.messages
            .iter_mut()
            .find(|message| message.id == id)
            .ok_or_else(|| not_found("No OutgoingMessage matches the given query."))
    }
}

pub(crate) fn not_found(detail: &str) -> ApiError {
    ApiError::Status {
        status: 404,
        detail: Some(detail.to_string()),
    }
}

pub(crate) fn bad_request(detail: &str) -> ApiError {
    ApiError::Status {
        status: 400,
        detail: Some(detail.to_string()),
    }
}

struct Admission {
    gate: Option<oneshot::Receiver<()>>,
    failure: Option<ApiError>,
}

impl Admission {
    fn fails(&self) -> bool {
        self.failure.is_some()
    }

    async fn complete<T>(self, value: ApiResult<T>) -> ApiResult<T> {
        if let Some(gate) = self.gate {
            let _ = gate.await;
        }
        match self.failure {
            Some(err) => Err(err),
            None => value,
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeMailApi {
    pub server: Mutex<FakeServer>,
    gates: Mutex<HashMap<&'static str, VecDeque<oneshot::Receiver<()>>>>,
    failures: Mutex<HashMap<&'static str, VecDeque<ApiError>>>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeMailApi {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.server.lock().unwrap().next_message_id = 1;
        fake
    }

    pub fn with_items(self, case_id: CaseId, items: Vec<MailableItem>) -> Self {
        self.server.lock().unwrap().items.insert(case_id, items);
        self
    }

    pub fn with_sources(self, sources: Vec<InformationSource>) -> Self {
        self.server.lock().unwrap().sources = sources;
        self
    }

    /// Holds the response of the next `op` call until the sender fires or drops.
    pub fn hold(&self, op: &'static str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().entry(op).or_default().push_back(rx);
        tx
    }

    /// Makes the next `op` call fail without touching server state.
    pub fn fail_next(&self, op: &'static str, err: ApiError) {
        self.failures.lock().unwrap().entry(op).or_default().push_back(err);
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| **call == op).count()
    }

    pub fn items(&self, case_id: CaseId) -> Vec<MailableItem> {
        self.server
            .lock()
            .unwrap()
            .items
            .get(&case_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn item(&self, key: ItemKey) -> Option<MailableItem> {
        self.server.lock().unwrap().item_mut(key).map(|item| item.clone())
    }

    /// Simulates the bridge moving a message along.
    pub fn set_message_status(&self, id: MessageId, status: MessageStatus, error: Option<&str>) {
        let mut server = self.server.lock().unwrap();
        if let Ok(message) = server.message_mut(id) {
            message.status = status;
            message.error_message = error.map(str::to_string);
        }
    }

    fn enter(&self, op: &'static str) -> Admission {
        self.calls.lock().unwrap().push(op);
        let gate = self
            .gates
            .lock()
            .unwrap()
            .get_mut(op)
            .and_then(VecDeque::pop_front);
        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(op)
            .and_then(VecDeque::pop_front);
        Admission { gate, failure }
    }

    fn flagged(&self, case_id: CaseId, kind: ItemKind) -> Vec<MailableItem> {
        self.items(case_id)
            .into_iter()
            .filter(|item| item.kind == kind)
            .collect()
    }
}

#[async_trait]
impl MailApi for FakeMailApi {
    async fn list_flagged_activities(&self, case_id: CaseId) -> ApiResult<Vec<MailableItem>> {
        let admission = self.enter("list_flagged_activities");
        let items = self.flagged(case_id, ItemKind::Activity);
        admission.complete(Ok(items)).await
    }

    async fn list_flagged_documents(&self, case_id: CaseId) -> ApiResult<Vec<MailableItem>> {
        let admission = self.enter("list_flagged_documents");
        let items = self.flagged(case_id, ItemKind::Document);
        admission.complete(Ok(items)).await
    }

    async fn list_flagged_items(&self, case_id: CaseId) -> ApiResult<Vec<MailableItem>> {
        let admission = self.enter("list_flagged_items");
        let mut items = self.flagged(case_id, ItemKind::Activity);
        items.extend(self.flagged(case_id, ItemKind::Document));
        admission.complete(Ok(items)).await
    }

    async fn list_information_sources(&self) -> ApiResult<Vec<InformationSource>> {
        let admission = self.enter("list_information_sources");
        let sources = self.server.lock().unwrap().sources.clone();
        admission.complete(Ok(sources)).await
    }

    async fn set_item_source(&self, item: ItemKey, source_id: Option<SourceId>) -> ApiResult<()> {
        let admission = self.enter("set_item_source");
        let mut result = Ok(());
        if !admission.fails() {
            let mut server = self.server.lock().unwrap();
            match server.item_mut(item) {
                Some(found) => found.source_id = source_id,
                None => result = Err(not_found("Not found.")),
            }
        }
        admission.complete(result).await
    }

    async fn clear_item_flag(&self, item: ItemKey) -> ApiResult<()> {
        let admission = self.enter("clear_item_flag");
        if !admission.fails() {
            let mut server = self.server.lock().unwrap();
            for items in server.items.values_mut() {
                items.retain(|candidate| candidate.key() != item);
            }
        }
        admission.complete(Ok(())).await
    }

    async fn update_item_note(&self, item: ItemKey, note: &str) -> ApiResult<()> {
        let admission = self.enter("update_item_note");
        if !admission.fails() {
            if let Some(found) = self.server.lock().unwrap().item_mut(item) {
                found.note_text = note.to_string();
            }
        }
        admission.complete(Ok(())).await
    }

    async fn reset_basket(&self, case_id: CaseId) -> ApiResult<()> {
        let admission = self.enter("reset_basket");
        if !admission.fails() {
            self.server.lock().unwrap().items.remove(&case_id);
        }
        admission.complete(Ok(())).await
    }

    async fn create_message(&self, message: &NewOutgoingMessage) -> ApiResult<OutgoingMessage> {
        let admission = self.enter("create_message");
        let mut created = Err(bad_request("not created"));
        if !admission.fails() {
            let mut server = self.server.lock().unwrap();
            let id = MessageId(server.next_message_id);
            server.next_message_id += 1;
            let draft = message.clone().into_draft(id);
            server.messages.push(draft.clone());
            created = Ok(draft);
        }
        admission.complete(created).await
    }

    async fn list_messages(&self, case_id: CaseId) -> ApiResult<Vec<OutgoingMessage>> {
        let admission = self.enter("list_messages");
        let messages = self
            .server
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|message| message.case_id == case_id)
            .cloned()
            .collect();
        admission.complete(Ok(messages)).await
    }

    async fn retry_message(&self, id: MessageId) -> ApiResult<OutgoingMessage> {
        let admission = self.enter("retry_message");
        let mut result = Err(bad_request("not retried"));
        if !admission.fails() {
            let mut server = self.server.lock().unwrap();
            result = server.message_mut(id).and_then(|message| match message.status {
                MessageStatus::InOutlook | MessageStatus::Error => {
                    message.status = MessageStatus::Draft;
                    message.error_message = None;
                    Ok(message.clone())
                }
                _ => Err(bad_request("Message cannot be retried.")),
            });
        }
        admission.complete(result).await
    }

    async fn mark_message_completed(&self, id: MessageId) -> ApiResult<OutgoingMessage> {
        let admission = self.enter("mark_message_completed");
        let mut result = Err(bad_request("not completed"));
        if !admission.fails() {
            let mut server = self.server.lock().unwrap();
            result = server.message_mut(id).and_then(|message| match message.status {
                MessageStatus::InOutlook => {
                    message.status = MessageStatus::Completed;
                    Ok(message.clone())
                }
                _ => Err(bad_request("Message is not open in Outlook.")),
            });
        }
        admission.complete(result).await
    }

    async fn delete_message(&self, id: MessageId) -> ApiResult<()> {
        let admission = self.enter("delete_message");
        if !admission.fails() {
            self.server.lock().unwrap().messages.retain(|message| message.id != id);
        }
        admission.complete(Ok(())).await
    }

    async fn list_sending_accounts(&self, force_resync: bool) -> ApiResult<Vec<SendingAccount>> {
        let admission = self.enter(if force_resync {
            "list_sending_accounts_resync"
        } else {
            "list_sending_accounts"
        });
        let accounts = self.server.lock().unwrap().accounts.clone();
        admission.complete(Ok(accounts)).await
    }

    async fn list_bridge_agents(&self) -> ApiResult<Vec<BridgeAgent>> {
        let admission = self.enter("list_bridge_agents");
        let agents = self.server.lock().unwrap().agents.clone();
        admission.complete(Ok(agents)).await
    }

    async fn list_templates(&self) -> ApiResult<Vec<MailTemplate>> {
        let admission = self.enter("list_templates");
        let templates = self.server.lock().unwrap().templates.clone();
        admission.complete(Ok(templates)).await
    }

    async fn render_template(&self, request: &RenderRequest) -> ApiResult<RenderedMail> {
        let admission = self.enter("render_template");
        let rendered = {
            let mut server = self.server.lock().unwrap();
            server.render_requests.push(request.clone());
            server
                .rendered
                .clone()
                .ok_or_else(|| not_found("Template not found."))
        };
        admission.complete(rendered).await
    }
}
