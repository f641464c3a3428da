//! The mail desk coordinator.
//!
//! [`MailDesk`] owns all mail-dispatch state and is driven by commands.
//! A command applies its optimistic effect at once and queues the backend
//! call; nothing blocks. Results are applied one at a time, in whatever
//! order the server answers, when the owner drives the queue with
//! [`next_completion`](MailDesk::next_completion), [`pump`](MailDesk::pump)
//! or [`settle`](MailDesk::settle). Superseded requests still run to the
//! end; their results are dropped by the generation and timestamp checks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};

use crate::config::Settings;
use crate::domain::{
    Basket, CaseId, CaseMailConfig, Group, InformationSource, ItemKey, LifecycleEvent,
    MailTemplate, MailableItem, MessageId, MessageStatus, OutgoingMessage, RenderedMail,
    SendingAccount, SourceId,
};
use crate::error::{DeskError, DeskResult, GENERIC_FAILURE_MESSAGE};
use crate::providers::api::{ApiResult, MailApi};
use crate::services::{
    BasketCache, FetchTicket, ListTicket, MessageBook, MoveOutcome, MoveTicket, NoteDebouncer,
    NoteWrite, PreparationWorkflow, ReassignmentTracker, RenderTicket, StatusObservation,
    ValidationError,
};

use super::events::{AppEvent, EventBus, Notification};
use super::state::{ComposePhase, ComposeState, DeskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageAction {
    Retry,
    Complete,
}

impl MessageAction {
    fn event(self) -> LifecycleEvent {
        match self {
            MessageAction::Retry => LifecycleEvent::Retry,
            MessageAction::Complete => LifecycleEvent::Complete,
        }
    }

    fn failure_title(self) -> &'static str {
        match self {
            MessageAction::Retry => "Could not retry handoff",
            MessageAction::Complete => "Could not mark handoff as sent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollTarget {
    Basket,
    Messages,
}

enum Completion {
    Sources(ApiResult<Vec<InformationSource>>),
    Templates(ApiResult<Vec<MailTemplate>>),
    Basket {
        ticket: FetchTicket,
        result: ApiResult<Vec<MailableItem>>,
    },
    Move {
        ticket: MoveTicket,
        result: ApiResult<()>,
    },
    Removal {
        case_id: CaseId,
        item: ItemKey,
        generation: u64,
        result: ApiResult<()>,
    },
    Reset {
        case_id: CaseId,
        result: ApiResult<()>,
    },
    Note {
        write: NoteWrite,
    },
    Messages {
        ticket: ListTicket,
        result: ApiResult<Vec<OutgoingMessage>>,
    },
    MessageAction {
        action: MessageAction,
        message_id: MessageId,
        result: ApiResult<OutgoingMessage>,
    },
    Cancel {
        case_id: CaseId,
        message_id: MessageId,
        result: ApiResult<()>,
    },
    Render {
        session: u64,
        ticket: RenderTicket,
        result: ApiResult<RenderedMail>,
    },
    Handoff {
        session: u64,
        case_id: CaseId,
        result: ApiResult<OutgoingMessage>,
    },
    ConfirmationElapsed {
        session: u64,
        case_id: CaseId,
    },
    PollDue {
        case_id: CaseId,
        watch: u64,
        target: PollTarget,
    },
}

impl Completion {
    fn is_timer(&self) -> bool {
        matches!(
            self,
            Completion::ConfirmationElapsed { .. } | Completion::PollDue { .. }
        )
    }
}

struct PendingRemoval {
    case_id: CaseId,
    generation: u64,
    index: usize,
    item: MailableItem,
}

struct PendingNote {
    case_id: CaseId,
    text: String,
    outstanding: usize,
}

/// Coordinates baskets, reassignments, handoffs and their lifecycle.
///
/// # Example
///
/// ```ignore
/// let mut desk = MailDesk::new(api, settings);
/// desk.load_reference_data();
/// desk.request_basket(case_id, false);
/// desk.settle().await;
///
/// desk.move_item(case_id, ItemKey::activity(5), Some(bank))?;
/// desk.settle().await;
/// for group in desk.groups(case_id) {
///     println!("{}\n{}", group.name, group.export_text);
/// }
/// ```
pub struct MailDesk {
    api: Arc<dyn MailApi>,
    settings: Settings,
    state: DeskState,
    cache: BasketCache,
    moves: ReassignmentTracker,
    messages: MessageBook,
    notes: NoteDebouncer,
    bus: EventBus,
    removals: HashMap<ItemKey, PendingRemoval>,
    resets: HashMap<CaseId, Vec<MailableItem>>,
    pending_notes: HashMap<ItemKey, PendingNote>,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion>>,
    requests: usize,
    watched: Option<(CaseId, u64)>,
    watch_seq: u64,
}

impl MailDesk {
    pub fn new(api: Arc<dyn MailApi>, settings: Settings) -> Self {
        let notes = NoteDebouncer::new(Arc::clone(&api), settings.compose.note_debounce());
        let cache = BasketCache::new(settings.cache.max_cases);
        Self {
            api,
            settings,
            state: DeskState::new(),
            cache,
            moves: ReassignmentTracker::new(),
            messages: MessageBook::new(),
            notes,
            bus: EventBus::new(),
            removals: HashMap::new(),
            resets: HashMap::new(),
            pending_notes: HashMap::new(),
            in_flight: FuturesUnordered::new(),
            requests: 0,
            watched: None,
            watch_seq: 0,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> &DeskState {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Backend requests still in flight. Timers are not counted.
    pub fn in_flight(&self) -> usize {
        self.requests
    }

    /// The cached basket of a case.
    pub fn basket(&self, case_id: CaseId) -> Option<&Basket> {
        self.cache.get(case_id)
    }

    /// The cached basket grouped by source, ready for display.
    pub fn groups(&self, case_id: CaseId) -> Vec<Group> {
        self.basket(case_id)
            .map(|basket| basket.groups(&self.state.sources))
            .unwrap_or_default()
    }

    /// Handoffs of a case as last loaded.
    pub fn messages(&self, case_id: CaseId) -> &[OutgoingMessage] {
        self.messages.messages(case_id)
    }

    pub fn compose(&self) -> Option<&ComposeState> {
        self.state.compose.as_ref()
    }

    // ----- reference data -----

    /// Loads information sources and templates.
    pub fn load_reference_data(&mut self) {
        let api = Arc::clone(&self.api);
        self.push(async move { Completion::Sources(api.list_information_sources().await) });
        let api = Arc::clone(&self.api);
        self.push(async move { Completion::Templates(api.list_templates().await) });
    }

    // ----- basket commands -----

    /// Fetches a basket unless a fresh one is cached and `force` is false.
    /// Returns whether a request was issued.
    pub fn request_basket(&mut self, case_id: CaseId, force: bool) -> bool {
        if !self.cache.needs_fetch(case_id, force) {
            return false;
        }
        self.fetch_basket(case_id);
        true
    }

    /// Moves an item to another source (or to no source).
    ///
    /// The move shows at once. If the server rejects it, the item returns to
    /// the source it had when the move was issued and an error notice is raised.
    pub fn move_item(
        &mut self,
        case_id: CaseId,
        item: ItemKey,
        to: Option<SourceId>,
    ) -> DeskResult<MoveTicket> {
        let from = self.item_in_basket(case_id, item)?.source_id;
        let ticket = self.moves.begin(case_id, item, from, to);
        self.cache.apply_local(case_id, |basket| basket.set_source(&item, to));
        self.bus.publish(AppEvent::ItemMoved { case_id, item, to });

        let api = Arc::clone(&self.api);
        self.push(async move {
            let result = api.set_item_source(item, to).await;
            Completion::Move { ticket, result }
        });
        Ok(ticket)
    }

    /// Takes an item out of the mail basket.
    pub fn remove_item(&mut self, case_id: CaseId, item: ItemKey) -> DeskResult<()> {
        self.item_in_basket(case_id, item)?;
        let Some(Some((index, removed))) = self
            .cache
            .apply_local(case_id, |basket| basket.remove(&item))
        else {
            return Err(DeskError::UnknownItem { case_id, item });
        };

        let generation = self.moves.supersede(item);
        self.removals.insert(
            item,
            PendingRemoval {
                case_id,
                generation,
                index,
                item: removed,
            },
        );
        self.bus.publish(AppEvent::ItemRemoved { case_id, item });

        let api = Arc::clone(&self.api);
        self.push(async move {
            let result = api.clear_item_flag(item).await;
            Completion::Removal {
                case_id,
                item,
                generation,
                result,
            }
        });
        Ok(())
    }

    /// Clears every item from a case's mail basket.
    ///
    /// A reset already in flight for the case makes this a no-op.
    pub fn reset_basket(&mut self, case_id: CaseId) {
        if self.resets.contains_key(&case_id) {
            tracing::debug!(case_id = %case_id, "reset already in flight");
            return;
        }

        let previous = self
            .cache
            .apply_local(case_id, |basket| basket.clear())
            .unwrap_or_default();
        for item in &previous {
            self.moves.supersede(item.key());
        }
        self.resets.insert(case_id, previous);
        self.bus.publish(AppEvent::BasketReset(case_id));

        let api = Arc::clone(&self.api);
        self.push(async move {
            let result = api.reset_basket(case_id).await;
            Completion::Reset { case_id, result }
        });
    }

    /// Edits an item's note. The write goes out once typing pauses.
    pub fn edit_note(
        &mut self,
        case_id: CaseId,
        item: ItemKey,
        text: impl Into<String>,
    ) -> DeskResult<()> {
        let text = text.into();
        self.item_in_basket(case_id, item)?;
        self.cache.apply_local(case_id, |basket| basket.set_note(&item, &text));

        let pending = self.pending_notes.entry(item).or_insert_with(|| PendingNote {
            case_id,
            text: String::new(),
            outstanding: 0,
        });
        pending.text = text.clone();
        pending.outstanding += 1;

        let write = self.notes.schedule(item, text);
        self.push(write.map(|write| Completion::Note { write }));
        Ok(())
    }

    // ----- message commands -----

    /// Reloads the handoffs of a case.
    pub fn refresh_messages(&mut self, case_id: CaseId) {
        let ticket = self.messages.begin_refresh(case_id);
        let api = Arc::clone(&self.api);
        self.push(async move {
            let result = api.list_messages(case_id).await;
            Completion::Messages { ticket, result }
        });
    }

    /// Re-queues a handoff for bridge pickup.
    pub fn retry_message(&mut self, id: MessageId) -> DeskResult<()> {
        self.message_action(id, MessageAction::Retry)
    }

    /// Confirms a handoff was sent from the desktop mail client.
    pub fn complete_message(&mut self, id: MessageId) -> DeskResult<()> {
        self.message_action(id, MessageAction::Complete)
    }

    /// Deletes a handoff. A compose window the bridge already opened stays open.
    pub fn cancel_message(&mut self, id: MessageId) -> DeskResult<()> {
        let case_id = self
            .messages
            .find(id)
            .map(|message| message.case_id)
            .ok_or(DeskError::UnknownMessage(id))?;

        let api = Arc::clone(&self.api);
        self.push(async move {
            let result = api.delete_message(id).await;
            Completion::Cancel {
                case_id,
                message_id: id,
                result,
            }
        });
        Ok(())
    }

    // ----- compose commands -----

    /// Opens a compose dialog for a case, replacing any open one.
    pub fn open_compose(
        &mut self,
        case_id: CaseId,
        target_source: Option<SourceId>,
        accounts: Vec<SendingAccount>,
        config: &CaseMailConfig,
    ) -> u64 {
        let workflow = PreparationWorkflow::new(
            case_id,
            target_source,
            self.state.templates.clone(),
            accounts,
            config,
        );
        let session = self.state.open_compose(workflow);
        self.bus.publish(AppEvent::ComposeOpened(case_id));
        session
    }

    /// The open dialog's selections.
    pub fn workflow_mut(&mut self) -> DeskResult<&mut PreparationWorkflow> {
        self.state
            .compose
            .as_mut()
            .map(|compose| &mut compose.workflow)
            .ok_or(DeskError::NoCompose)
    }

    /// Asks the server to render the current selection.
    pub fn request_preview(&mut self) -> DeskResult<()> {
        let compose = self.state.compose.as_mut().ok_or(DeskError::NoCompose)?;
        let ticket = compose.workflow.render_request()?;
        compose.phase = ComposePhase::Rendering;
        let session = compose.session;

        let api = Arc::clone(&self.api);
        self.push(async move {
            let result = api.render_template(&ticket.request).await;
            Completion::Render {
                session,
                ticket,
                result,
            }
        });
        Ok(())
    }

    /// Creates the handoff from the confirmed preview.
    pub fn submit_handoff(&mut self) -> DeskResult<()> {
        let compose = self.state.compose.as_mut().ok_or(DeskError::NoCompose)?;
        if matches!(
            compose.phase,
            ComposePhase::Submitting | ComposePhase::Confirmed { .. }
        ) {
            return Err(ValidationError::AlreadySubmitting.into());
        }
        let message = compose.workflow.confirm()?;
        compose.phase = ComposePhase::Submitting;
        let session = compose.session;
        let case_id = message.case_id;

        let api = Arc::clone(&self.api);
        self.push(async move {
            let result = api.create_message(&message).await;
            Completion::Handoff {
                session,
                case_id,
                result,
            }
        });
        Ok(())
    }

    pub fn close_compose(&mut self) {
        if let Some(compose) = self.state.close_compose() {
            self.bus
                .publish(AppEvent::ComposeClosed(compose.workflow.case_id()));
        }
    }

    pub fn dismiss_notification(&mut self, id: &str) {
        if self.state.dismiss_notification(id) {
            self.bus.publish(AppEvent::DismissNotification(id.to_string()));
        }
    }

    // ----- polling -----

    /// Keeps a case's basket and handoffs refreshed at the configured
    /// intervals until another case is watched or [`unwatch`](Self::unwatch).
    pub fn watch_case(&mut self, case_id: CaseId) {
        self.watch_seq += 1;
        let watch = self.watch_seq;
        self.watched = Some((case_id, watch));

        self.request_basket(case_id, false);
        self.refresh_messages(case_id);
        self.schedule_poll(case_id, watch, PollTarget::Basket);
        self.schedule_poll(case_id, watch, PollTarget::Messages);
    }

    pub fn unwatch(&mut self) {
        self.watched = None;
    }

    // ----- driving the queue -----

    /// Waits for the next result and applies it. Returns false if nothing
    /// is queued.
    pub async fn next_completion(&mut self) -> bool {
        let next = self.in_flight.next().await;
        match next {
            Some(completion) => {
                self.handle(completion);
                true
            }
            None => false,
        }
    }

    /// Applies every result that is ready without waiting, and starts any
    /// queued request that has not been polled yet. Returns how many results
    /// were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let next = self.in_flight.next().now_or_never();
            match next {
                Some(Some(completion)) => {
                    self.handle(completion);
                    applied += 1;
                }
                _ => return applied,
            }
        }
    }

    /// Applies results until no backend request is in flight.
    pub async fn settle(&mut self) {
        while self.requests > 0 && self.next_completion().await {}
    }

    fn push(&mut self, future: impl Future<Output = Completion> + Send + 'static) {
        self.requests += 1;
        self.in_flight.push(future.boxed());
    }

    fn push_timer(&mut self, future: impl Future<Output = Completion> + Send + 'static) {
        self.in_flight.push(future.boxed());
    }

    fn handle(&mut self, completion: Completion) {
        if !completion.is_timer() {
            self.requests = self.requests.saturating_sub(1);
        }

        match completion {
            Completion::Sources(result) => match result {
                Ok(sources) => self.state.sources = sources,
                Err(e) => self.read_failed("Could not load information sources", e.into()),
            },
            Completion::Templates(result) => match result {
                Ok(templates) => self.state.templates = templates,
                Err(e) => self.read_failed("Could not load mail templates", e.into()),
            },
            Completion::Basket { ticket, result } => self.on_basket(ticket, result),
            Completion::Move { ticket, result } => self.on_move(ticket, result),
            Completion::Removal {
                case_id,
                item,
                generation,
                result,
            } => self.on_removal(case_id, item, generation, result),
            Completion::Reset { case_id, result } => self.on_reset(case_id, result),
            Completion::Note { write } => self.on_note(write),
            Completion::Messages { ticket, result } => self.on_messages(ticket, result),
            Completion::MessageAction {
                action,
                message_id,
                result,
            } => self.on_message_action(action, message_id, result),
            Completion::Cancel {
                case_id,
                message_id,
                result,
            } => self.on_cancel(case_id, message_id, result),
            Completion::Render {
                session,
                ticket,
                result,
            } => self.on_render(session, ticket, result),
            Completion::Handoff {
                session,
                case_id,
                result,
            } => self.on_handoff(session, case_id, result),
            Completion::ConfirmationElapsed { session, case_id } => {
                self.on_confirmation_elapsed(session, case_id)
            }
            Completion::PollDue {
                case_id,
                watch,
                target,
            } => self.on_poll(case_id, watch, target),
        }
    }

    // ----- result handlers -----

    fn on_basket(&mut self, ticket: FetchTicket, result: ApiResult<Vec<MailableItem>>) {
        let case_id = ticket.case_id;
        match result {
            Ok(items) => {
                if self.cache.complete_fetch(ticket, items) {
                    self.reapply_pending(case_id);
                    self.bus.publish(AppEvent::BasketLoaded(case_id));
                }
            }
            Err(e) => {
                tracing::warn!(case_id = %case_id, error = %e, "basket fetch failed");
                if self.cache.get(case_id).is_none() {
                    self.fail("Could not load the mail basket", e.into());
                }
            }
        }
    }

    fn on_move(&mut self, ticket: MoveTicket, result: ApiResult<()>) {
        let case_id = ticket.case_id;
        let item = ticket.item;
        match self.moves.resolve(&ticket, result.is_ok()) {
            MoveOutcome::Committed => {
                tracing::debug!(
                    case_id = %case_id,
                    item = %item,
                    generation = ticket.generation,
                    "move saved"
                );
                self.refetch_basket(case_id);
            }
            MoveOutcome::RolledBack { to } => {
                tracing::warn!(case_id = %case_id, item = %item, "move failed; rolling back");
                self.cache.apply_local(case_id, |basket| basket.set_source(&item, to));
                self.bus.publish(AppEvent::MoveRolledBack { case_id, item, to });
                if let Err(e) = result {
                    self.fail("Could not move item", e.into());
                }
            }
            MoveOutcome::Superseded => {}
        }
    }

    fn on_removal(
        &mut self,
        case_id: CaseId,
        item: ItemKey,
        generation: u64,
        result: ApiResult<()>,
    ) {
        let current = self
            .removals
            .get(&item)
            .map_or(false, |pending| pending.generation == generation);
        if !current {
            tracing::debug!(item = %item, generation, "discarding superseded removal result");
            return;
        }
        let Some(pending) = self.removals.remove(&item) else {
            return;
        };

        match result {
            Ok(()) => {
                tracing::debug!(case_id = %case_id, item = %item, "item removed from basket");
                self.moves.forget(&item);
                self.refetch_basket(case_id);
            }
            Err(e) => {
                tracing::warn!(
                    case_id = %case_id,
                    item = %item,
                    error = %e,
                    "removal failed; restoring item"
                );
                self.cache.apply_local(pending.case_id, |basket| {
                    basket.restore(pending.index, pending.item)
                });
                self.bus.publish(AppEvent::ItemRestored { case_id, item });
                self.reinstate_move(case_id, item);
                self.fail("Could not remove item", e.into());
                self.refetch_basket(case_id);
            }
        }
    }

    fn on_reset(&mut self, case_id: CaseId, result: ApiResult<()>) {
        let Some(previous) = self.resets.remove(&case_id) else {
            return;
        };

        let keys: Vec<ItemKey> = previous.iter().map(MailableItem::key).collect();
        match result {
            Ok(()) => {
                tracing::info!(case_id = %case_id, items = previous.len(), "mail basket reset");
                for key in &keys {
                    self.moves.forget(key);
                }
                self.notify(Notification::info("Mail basket cleared"));
                self.refetch_basket(case_id);
            }
            Err(e) => {
                tracing::warn!(
                    case_id = %case_id,
                    error = %e,
                    "basket reset failed; restoring items"
                );
                self.cache.apply_local(case_id, |basket| {
                    for (index, item) in previous.into_iter().enumerate() {
                        basket.restore(index, item);
                    }
                });
                self.bus.publish(AppEvent::ResetRolledBack(case_id));
                for key in keys {
                    self.reinstate_move(case_id, key);
                }
                self.fail("Could not clear the mail basket", e.into());
                self.refetch_basket(case_id);
            }
        }
    }

    fn on_note(&mut self, write: NoteWrite) {
        let item = match &write {
            NoteWrite::Saved(item)
            | NoteWrite::Superseded(item)
            | NoteWrite::Failed(item, _) => *item,
        };
        let Some(pending) = self.pending_notes.get_mut(&item) else {
            return;
        };
        let case_id = pending.case_id;
        pending.outstanding = pending.outstanding.saturating_sub(1);
        let settled = pending.outstanding == 0;
        if settled {
            self.pending_notes.remove(&item);
        }

        match write {
            NoteWrite::Saved(_) if settled => self.refetch_basket(case_id),
            NoteWrite::Saved(_) | NoteWrite::Superseded(_) => {}
            // the refetch brings back the server's text unless a newer edit is pending
            NoteWrite::Failed(_, e) => {
                self.fail("Could not save note", e.into());
                self.refetch_basket(case_id);
            }
        }
    }

    fn on_messages(&mut self, ticket: ListTicket, result: ApiResult<Vec<OutgoingMessage>>) {
        let case_id = ticket.case_id;
        match result {
            Ok(list) => {
                let Some(observations) = self.messages.complete_refresh(ticket, list) else {
                    return;
                };
                self.bus.publish(AppEvent::MessagesLoaded(case_id));
                for observation in observations {
                    self.announce(observation);
                }
            }
            Err(e) => {
                tracing::warn!(case_id = %case_id, error = %e, "message list refresh failed");
                if !self.messages.is_loaded(case_id) {
                    self.fail("Could not load handoffs", e.into());
                }
            }
        }
    }

    fn on_message_action(
        &mut self,
        action: MessageAction,
        message_id: MessageId,
        result: ApiResult<OutgoingMessage>,
    ) {
        match result {
            Ok(updated) => {
                tracing::info!(
                    message_id = %message_id,
                    status = %updated.status,
                    action = ?action,
                    "handoff updated"
                );
                if let Some(observation) = self.messages.upsert(updated) {
                    self.announce(observation);
                }
            }
            Err(e) => {
                tracing::warn!(
                    message_id = %message_id,
                    action = ?action,
                    error = %e,
                    "handoff update failed"
                );
                self.fail(action.failure_title(), e.into());
            }
        }
    }

    fn on_cancel(&mut self, case_id: CaseId, message_id: MessageId, result: ApiResult<()>) {
        match result {
            Ok(()) => {
                tracing::info!(case_id = %case_id, message_id = %message_id, "handoff cancelled");
                self.messages.remove(case_id, message_id);
                self.bus.publish(AppEvent::MessageCancelled { case_id, message_id });
            }
            Err(e) => {
                tracing::warn!(message_id = %message_id, error = %e, "handoff cancel failed");
                self.fail("Could not cancel handoff", e.into());
            }
        }
    }

    fn on_render(&mut self, session: u64, ticket: RenderTicket, result: ApiResult<RenderedMail>) {
        let Some(compose) = self.state.compose_session(session) else {
            tracing::debug!(session, "discarding preview for closed dialog");
            return;
        };
        if compose.phase == ComposePhase::Rendering {
            compose.phase = ComposePhase::Editing;
        }
        let case_id = compose.workflow.case_id();

        match result {
            Ok(rendered) => {
                if compose.workflow.apply_render(&ticket, rendered) {
                    self.bus.publish(AppEvent::PreviewReady(case_id));
                }
            }
            Err(e) => self.fail("Could not generate preview", e.into()),
        }
    }

    fn on_handoff(&mut self, session: u64, case_id: CaseId, result: ApiResult<OutgoingMessage>) {
        match result {
            Ok(message) => {
                let message_id = message.id;
                tracing::info!(case_id = %case_id, message_id = %message_id, "handoff created");
                self.messages.upsert(message);
                self.refetch_basket(case_id);
                self.bus.publish(AppEvent::HandoffCreated { case_id, message_id });
                self.notify(
                    Notification::success("Handed off to the bridge")
                        .with_auto_dismiss(self.settings.compose.confirmation_ms),
                );

                let delay = self.settings.compose.confirmation_delay();
                if let Some(compose) = self.state.compose_session(session) {
                    compose.phase = ComposePhase::Confirmed { message_id };
                    self.push_timer(async move {
                        tokio::time::sleep(delay).await;
                        Completion::ConfirmationElapsed { session, case_id }
                    });
                }
            }
            Err(e) => {
                tracing::warn!(case_id = %case_id, error = %e, "handoff creation failed");
                if let Some(compose) = self.state.compose_session(session) {
                    compose.phase = ComposePhase::Editing;
                }
                self.fail("Could not hand off message", e.into());
            }
        }
    }

    fn on_confirmation_elapsed(&mut self, session: u64, case_id: CaseId) {
        let confirmed = self
            .state
            .compose_session(session)
            .map_or(false, |compose| matches!(compose.phase, ComposePhase::Confirmed { .. }));
        if confirmed {
            self.state.close_compose();
            self.bus.publish(AppEvent::ComposeClosed(case_id));
        }
    }

    fn on_poll(&mut self, case_id: CaseId, watch: u64, target: PollTarget) {
        if self.watched != Some((case_id, watch)) {
            return;
        }
        tracing::debug!(case_id = %case_id, target = ?target, "poll tick");
        match target {
            PollTarget::Basket => self.fetch_basket(case_id),
            PollTarget::Messages => self.refresh_messages(case_id),
        }
        self.schedule_poll(case_id, watch, target);
    }

    // ----- helpers -----

    fn item_in_basket(&self, case_id: CaseId, item: ItemKey) -> DeskResult<&MailableItem> {
        self.cache
            .get(case_id)
            .ok_or(DeskError::BasketNotLoaded(case_id))?
            .item(&item)
            .ok_or(DeskError::UnknownItem { case_id, item })
    }

    fn fetch_basket(&mut self, case_id: CaseId) {
        let ticket = self.cache.begin_fetch(case_id);
        let api = Arc::clone(&self.api);
        self.push(async move {
            let result = api.list_flagged_items(case_id).await;
            Completion::Basket { ticket, result }
        });
    }

    fn refetch_basket(&mut self, case_id: CaseId) {
        self.cache.invalidate(case_id);
        self.fetch_basket(case_id);
    }

    /// Puts unresolved local edits back on top of a freshly stored basket.
    fn reapply_pending(&mut self, case_id: CaseId) {
        let moves = &self.moves;
        let removals = &self.removals;
        let notes = &self.pending_notes;
        let resetting = self.resets.contains_key(&case_id);

        self.cache.apply_local(case_id, |basket| {
            if resetting {
                basket.clear();
                return;
            }
            moves.reapply(basket);
            for (key, removal) in removals {
                if removal.case_id == case_id {
                    basket.remove(key);
                }
            }
            for (key, note) in notes {
                if note.case_id == case_id {
                    basket.set_note(key, &note.text);
                }
            }
        });
    }

    /// Hands a move back after the removal or reset that displaced it failed.
    fn reinstate_move(&mut self, case_id: CaseId, item: ItemKey) {
        match self.moves.reinstate(item) {
            Some(MoveOutcome::RolledBack { to }) => {
                tracing::warn!(
                    case_id = %case_id,
                    item = %item,
                    "displaced move had failed; rolling back"
                );
                self.cache.apply_local(case_id, |basket| basket.set_source(&item, to));
                self.bus.publish(AppEvent::MoveRolledBack { case_id, item, to });
            }
            Some(MoveOutcome::Committed | MoveOutcome::Superseded) | None => {}
        }
    }

    fn message_action(&mut self, id: MessageId, action: MessageAction) -> DeskResult<()> {
        match self.messages.check(id, &action.event()) {
            None => return Err(DeskError::UnknownMessage(id)),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(_)) => {}
        }

        let api = Arc::clone(&self.api);
        self.push(async move {
            let result = match action {
                MessageAction::Retry => api.retry_message(id).await,
                MessageAction::Complete => api.mark_message_completed(id).await,
            };
            Completion::MessageAction {
                action,
                message_id: id,
                result,
            }
        });
        Ok(())
    }

    fn schedule_poll(&mut self, case_id: CaseId, watch: u64, target: PollTarget) {
        let interval = match target {
            PollTarget::Basket => self.settings.polling.basket_interval(),
            PollTarget::Messages => self.settings.polling.messages_interval(),
        };
        self.push_timer(async move {
            tokio::time::sleep(interval).await;
            Completion::PollDue {
                case_id,
                watch,
                target,
            }
        });
    }

    fn announce(&mut self, observation: StatusObservation) {
        self.bus.publish(AppEvent::MessageStatusChanged {
            case_id: observation.case_id,
            message_id: observation.message_id,
            from: observation.from,
            to: observation.to,
        });

        let title = format!("Handoff {} {}", observation.message_id, observation.describe());
        let notice = match observation.to {
            MessageStatus::Error => Notification::error(title).with_body(
                observation
                    .error_message
                    .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string()),
            ),
            MessageStatus::Completed => Notification::success(title),
            MessageStatus::Draft | MessageStatus::InOutlook => Notification::info(title),
        };
        self.notify(notice);
    }

    fn notify(&mut self, notification: Notification) {
        self.state.push_notification(notification.clone());
        self.bus.publish(AppEvent::ShowNotification(notification));
    }

    fn fail(&mut self, title: &str, err: DeskError) {
        self.notify(Notification::error(title).with_body(err.user_message()));
    }

    fn read_failed(&mut self, title: &str, err: DeskError) {
        tracing::warn!(error = %err, "{}", title);
        self.notify(Notification::warning(title).with_body(err.user_message()));
    }
}

impl std::fmt::Debug for MailDesk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailDesk")
            .field("cached_baskets", &self.cache.len())
            .field("in_flight", &self.requests)
            .field("watched", &self.watched)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::events::NotificationLevel;
    use crate::domain::{AccountId, MailTemplate, TemplateId};
    use crate::providers::api::fake::FakeMailApi;
    use crate::providers::api::ApiError;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::Duration;

    const CASE: CaseId = CaseId(42);

    fn fake() -> Arc<FakeMailApi> {
        Arc::new(
            FakeMailApi::new()
                .with_sources(vec![
                    InformationSource::new(1, "Mægler"),
                    InformationSource::new(2, "Bank"),
                ])
                .with_items(
                    CASE,
                    vec![
                        MailableItem::activity(1, "Send loan offer").with_source(SourceId(2)),
                        MailableItem::activity(2, "Book valuation").with_source(SourceId(1)),
                        MailableItem::document(10, "skøde.pdf").with_source(SourceId(1)),
                    ],
                ),
        )
    }

    async fn loaded_desk(api: &Arc<FakeMailApi>) -> MailDesk {
        let mut desk = MailDesk::new(api.clone(), Settings::default());
        desk.load_reference_data();
        desk.request_basket(CASE, false);
        desk.settle().await;
        desk
    }

    fn record_events(desk: &MailDesk) -> Arc<Mutex<Vec<AppEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        desk.events().subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        events
    }

    fn source_of(desk: &MailDesk, item: ItemKey) -> Option<SourceId> {
        desk.basket(CASE).unwrap().item(&item).unwrap().source_id
    }

    fn labels(desk: &MailDesk) -> Vec<String> {
        desk.basket(CASE)
            .unwrap()
            .items
            .iter()
            .map(|item| item.label.clone())
            .collect()
    }

    #[tokio::test]
    async fn refetch_during_pending_move_keeps_optimistic_target() {
        let api = fake();
        let mut desk = loaded_desk(&api).await;
        let item = ItemKey::activity(1);

        let fetch_gate = api.hold("list_flagged_items");
        desk.request_basket(CASE, true);
        desk.pump();

        let move_gate = api.hold("set_item_source");
        desk.move_item(CASE, item, Some(SourceId(1))).unwrap();
        desk.pump();

        fetch_gate.send(()).unwrap();
        assert!(desk.next_completion().await);
        assert_eq!(source_of(&desk, item), Some(SourceId(1)));

        move_gate.send(()).unwrap();
        desk.settle().await;
        assert_eq!(source_of(&desk, item), Some(SourceId(1)));
        assert!(!desk.moves.has_pending(CASE));
    }

    #[tokio::test]
    async fn move_of_missing_item_is_rejected() {
        let api = fake();
        let mut desk = MailDesk::new(api.clone(), Settings::default());
        assert_eq!(
            desk.move_item(CASE, ItemKey::activity(1), None).unwrap_err(),
            DeskError::BasketNotLoaded(CASE)
        );

        let mut desk = loaded_desk(&api).await;
        assert_eq!(
            desk.move_item(CASE, ItemKey::activity(99), None).unwrap_err(),
            DeskError::UnknownItem {
                case_id: CASE,
                item: ItemKey::activity(99)
            }
        );
    }

    #[tokio::test]
    async fn removal_success_refetches() {
        let api = fake();
        let mut desk = loaded_desk(&api).await;

        desk.remove_item(CASE, ItemKey::document(10)).unwrap();
        assert!(desk.basket(CASE).unwrap().item(&ItemKey::document(10)).is_none());
        desk.settle().await;

        assert_eq!(labels(&desk), vec!["Send loan offer", "Book valuation"]);
        assert_eq!(api.call_count("list_flagged_items"), 2);
    }

    #[tokio::test]
    async fn failed_removal_restores_item_in_place() {
        let api = fake();
        let mut desk = loaded_desk(&api).await;
        let events = record_events(&desk);
        api.fail_next("clear_item_flag", ApiError::Transport("offline".to_string()));

        desk.remove_item(CASE, ItemKey::activity(2)).unwrap();
        assert_eq!(labels(&desk), vec!["Send loan offer", "skøde.pdf"]);
        desk.settle().await;

        assert_eq!(labels(&desk), vec!["Send loan offer", "Book valuation", "skøde.pdf"]);
        assert!(events.lock().unwrap().contains(&AppEvent::ItemRestored {
            case_id: CASE,
            item: ItemKey::activity(2)
        }));
        let notice = desk.state().notifications.last().unwrap();
        assert_eq!(notice.level, NotificationLevel::Error);
        assert_eq!(notice.body.as_deref(), Some(GENERIC_FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn reset_clears_basket() {
        let api = fake();
        let mut desk = loaded_desk(&api).await;

        desk.reset_basket(CASE);
        assert!(desk.basket(CASE).unwrap().is_empty());
        desk.settle().await;

        assert!(desk.basket(CASE).unwrap().is_empty());
        assert!(api.items(CASE).is_empty());
        assert!(desk.groups(CASE).is_empty());
    }

    #[tokio::test]
    async fn failed_reset_restores_previous_items() {
        let api = fake();
        let mut desk = loaded_desk(&api).await;
        let events = record_events(&desk);
        api.fail_next(
            "reset_basket",
            ApiError::Status {
                status: 403,
                detail: Some("You do not have permission to perform this action.".to_string()),
            },
        );

        desk.reset_basket(CASE);
        desk.settle().await;

        assert_eq!(labels(&desk), vec!["Send loan offer", "Book valuation", "skøde.pdf"]);
        assert!(events.lock().unwrap().contains(&AppEvent::ResetRolledBack(CASE)));
        assert_eq!(
            desk.state().notifications.last().unwrap().body.as_deref(),
            Some("You do not have permission to perform this action.")
        );
    }

    fn offline() -> ApiError {
        ApiError::Transport("offline".to_string())
    }

    #[tokio::test]
    async fn failed_reset_rolls_back_failed_move_it_displaced() {
        let api = fake();
        let mut desk = loaded_desk(&api).await;
        let item = ItemKey::activity(1);
        api.fail_next("set_item_source", offline());
        api.fail_next("reset_basket", offline());

        desk.move_item(CASE, item, Some(SourceId(1))).unwrap();
        desk.reset_basket(CASE);
        desk.settle().await;

        assert_eq!(api.item(item).unwrap().source_id, Some(SourceId(2)));
        assert_eq!(source_of(&desk, item), Some(SourceId(2)));
        assert_eq!(labels(&desk), vec!["Send loan offer", "Book valuation", "skøde.pdf"]);
        assert_eq!(desk.in_flight(), 0);
        assert_eq!(desk.moves.tracked(), 0);
    }

    #[tokio::test]
    async fn failed_reset_hands_back_move_still_in_flight() {
        let api = fake();
        let mut desk = loaded_desk(&api).await;
        let item = ItemKey::activity(1);

        let move_gate = api.hold("set_item_source");
        desk.move_item(CASE, item, Some(SourceId(1))).unwrap();
        desk.pump();

        api.fail_next("reset_basket", offline());
        desk.reset_basket(CASE);
        assert!(desk.next_completion().await);
        assert_eq!(source_of(&desk, item), Some(SourceId(1)));
        assert!(desk.moves.has_pending(CASE));

        move_gate.send(()).unwrap();
        desk.settle().await;
        assert_eq!(api.item(item).unwrap().source_id, Some(SourceId(1)));
        assert_eq!(source_of(&desk, item), Some(SourceId(1)));
        assert_eq!(desk.moves.tracked(), 0);
    }

    #[tokio::test]
    async fn failed_removal_rolls_back_failed_move_it_displaced() {
        let api = fake();
        let mut desk = loaded_desk(&api).await;
        let events = record_events(&desk);
        let item = ItemKey::activity(1);
        api.fail_next("set_item_source", offline());
        api.fail_next("clear_item_flag", offline());

        desk.move_item(CASE, item, Some(SourceId(1))).unwrap();
        desk.remove_item(CASE, item).unwrap();
        desk.settle().await;

        assert_eq!(source_of(&desk, item), Some(SourceId(2)));
        assert_eq!(labels(&desk), vec!["Send loan offer", "Book valuation", "skøde.pdf"]);
        assert!(events.lock().unwrap().contains(&AppEvent::MoveRolledBack {
            case_id: CASE,
            item,
            to: Some(SourceId(2)),
        }));
        assert_eq!(desk.moves.tracked(), 0);
    }

    #[tokio::test]
    async fn successful_removal_forgets_displaced_move() {
        let api = fake();
        let mut desk = loaded_desk(&api).await;
        let item = ItemKey::activity(1);

        desk.move_item(CASE, item, Some(SourceId(1))).unwrap();
        desk.remove_item(CASE, item).unwrap();
        desk.settle().await;

        assert!(desk.basket(CASE).unwrap().item(&item).is_none());
        assert_eq!(desk.moves.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_note_write_shows_server_text_again() {
        let api = fake();
        let mut desk = loaded_desk(&api).await;
        let item = ItemKey::activity(1);
        api.fail_next("update_item_note", offline());

        desk.edit_note(CASE, item, "unsaved").unwrap();
        assert_eq!(desk.basket(CASE).unwrap().item(&item).unwrap().note_text, "unsaved");
        desk.settle().await;

        let server_note = api.item(item).unwrap().note_text;
        assert_eq!(desk.basket(CASE).unwrap().item(&item).unwrap().note_text, server_note);
        assert_ne!(server_note, "unsaved");
        assert_eq!(api.call_count("list_flagged_items"), 2);
        assert_eq!(
            desk.state().notifications.last().unwrap().title,
            "Could not save note"
        );
        assert!(desk.pending_notes.is_empty());
        assert_eq!(desk.notes.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn note_edits_are_debounced_and_survive_refetch() {
        let api = fake();
        let mut desk = loaded_desk(&api).await;
        let item = ItemKey::activity(1);

        desk.edit_note(CASE, item, "Call").unwrap();
        desk.edit_note(CASE, item, "Call Monday").unwrap();
        desk.request_basket(CASE, true);
        desk.pump();
        assert_eq!(desk.basket(CASE).unwrap().item(&item).unwrap().note_text, "Call Monday");

        desk.settle().await;
        assert_eq!(api.call_count("update_item_note"), 1);
        assert_eq!(api.item(item).unwrap().note_text, "Call Monday");
        assert_eq!(api.call_count("list_flagged_items"), 3);
        assert_eq!(desk.basket(CASE).unwrap().item(&item).unwrap().note_text, "Call Monday");
        assert!(desk.pending_notes.is_empty());
    }

    fn seed_message(api: &FakeMailApi) -> MessageId {
        let mut server = api.server.lock().unwrap();
        let id = MessageId(server.next_message_id);
        server.next_message_id += 1;
        let draft = crate::domain::NewOutgoingMessage {
            case_id: CASE,
            source_id: Some(SourceId(2)),
            recipient_email: "loans@bank.example".to_string(),
            recipient_name: None,
            subject: "Loan documents".to_string(),
            body_html: "<p>Attached</p>".to_string(),
            account_id: AccountId(1),
        }
        .into_draft(id);
        server.messages.push(draft);
        id
    }

    #[tokio::test]
    async fn bridge_failure_is_observed_and_retried() {
        let api = fake();
        let id = seed_message(&api);
        let mut desk = loaded_desk(&api).await;
        let events = record_events(&desk);

        desk.refresh_messages(CASE);
        desk.settle().await;
        assert!(matches!(
            desk.complete_message(id),
            Err(DeskError::Lifecycle(_))
        ));

        api.set_message_status(id, MessageStatus::Error, Some("timeout"));
        desk.refresh_messages(CASE);
        desk.settle().await;

        assert!(events.lock().unwrap().contains(&AppEvent::MessageStatusChanged {
            case_id: CASE,
            message_id: id,
            from: MessageStatus::Draft,
            to: MessageStatus::Error,
        }));
        assert_eq!(desk.state().notifications.last().unwrap().body.as_deref(), Some("timeout"));

        desk.retry_message(id).unwrap();
        desk.settle().await;
        let message = &desk.messages(CASE)[0];
        assert_eq!(message.status, MessageStatus::Draft);
        assert!(message.error_message.is_none());
    }

    #[tokio::test]
    async fn cancel_removes_handoff() {
        let api = fake();
        let id = seed_message(&api);
        let mut desk = loaded_desk(&api).await;
        desk.refresh_messages(CASE);
        desk.settle().await;

        desk.cancel_message(id).unwrap();
        desk.settle().await;
        assert!(desk.messages(CASE).is_empty());
        assert_eq!(desk.cancel_message(id), Err(DeskError::UnknownMessage(id)));
    }

    fn compose_fixture(api: &FakeMailApi) -> Vec<SendingAccount> {
        let mut server = api.server.lock().unwrap();
        server.templates = vec![
            MailTemplate {
                id: TemplateId(1),
                name: "Loan request".to_string(),
                source_ids: vec![SourceId(2)],
            },
            MailTemplate {
                id: TemplateId(2),
                name: "Bank follow-up".to_string(),
                source_ids: vec![SourceId(2)],
            },
        ];
        server.rendered = Some(RenderedMail {
            subject: "Loan documents".to_string(),
            body: "<p>Attached</p>".to_string(),
            source_id: Some(SourceId(2)),
            inferred_recipient: Some("loans@bank.example".to_string()),
        });
        vec![SendingAccount {
            id: AccountId(1),
            name: "Shared".to_string(),
            email: "desk@firm.example".to_string(),
            active: true,
            last_synced_at: None,
        }]
    }

    #[tokio::test(start_paused = true)]
    async fn handoff_confirms_then_closes_after_delay() {
        let api = fake();
        let accounts = compose_fixture(&api);
        let mut desk = loaded_desk(&api).await;
        let events = record_events(&desk);

        desk.open_compose(CASE, Some(SourceId(2)), accounts, &CaseMailConfig::default());
        desk.workflow_mut().unwrap().select_template(TemplateId(1)).unwrap();
        desk.request_preview().unwrap();
        desk.settle().await;

        let workflow = &desk.compose().unwrap().workflow;
        assert_eq!(workflow.recipient_email(), "loans@bank.example");
        assert_eq!(workflow.preview().unwrap().subject, "Loan documents");

        let basket_fetches = api.call_count("list_flagged_items");
        desk.submit_handoff().unwrap();
        assert_eq!(
            desk.submit_handoff().unwrap_err(),
            DeskError::Validation(ValidationError::AlreadySubmitting)
        );
        desk.settle().await;

        assert!(matches!(
            desk.compose().unwrap().phase,
            ComposePhase::Confirmed { .. }
        ));
        assert_eq!(api.call_count("list_flagged_items"), basket_fetches + 1);
        assert_eq!(desk.messages(CASE)[0].status, MessageStatus::Draft);
        let notice = desk.state().notifications.last().unwrap();
        assert_eq!(notice.level, NotificationLevel::Success);
        assert_eq!(notice.auto_dismiss_ms, Some(2000));

        let start = tokio::time::Instant::now();
        assert!(desk.next_completion().await);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(desk.compose().is_none());
        assert!(events.lock().unwrap().contains(&AppEvent::ComposeClosed(CASE)));
    }

    #[tokio::test]
    async fn preview_for_replaced_template_is_dropped() {
        let api = fake();
        let accounts = compose_fixture(&api);
        let mut desk = loaded_desk(&api).await;

        desk.open_compose(CASE, Some(SourceId(2)), accounts, &CaseMailConfig::default());
        desk.workflow_mut().unwrap().select_template(TemplateId(1)).unwrap();
        let gate = api.hold("render_template");
        desk.request_preview().unwrap();
        desk.pump();

        desk.workflow_mut().unwrap().select_template(TemplateId(2)).unwrap();
        gate.send(()).unwrap();
        desk.settle().await;

        assert!(desk.compose().unwrap().workflow.preview().is_none());
        assert_eq!(
            desk.submit_handoff().unwrap_err(),
            DeskError::Validation(ValidationError::NoPreview)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn watched_case_is_polled() {
        let api = fake();
        let mut desk = MailDesk::new(api.clone(), Settings::default());
        desk.watch_case(CASE);
        desk.settle().await;
        assert_eq!(api.call_count("list_flagged_items"), 1);
        assert_eq!(api.call_count("list_messages"), 1);

        // messages poll at 30s, basket at 60s
        while api.call_count("list_flagged_items") < 2 {
            assert!(desk.next_completion().await);
        }
        assert!(api.call_count("list_messages") >= 2);

        desk.unwatch();
        desk.settle().await;
        let before = api.call_count("list_flagged_items");
        while desk.next_completion().await {}
        assert_eq!(api.call_count("list_flagged_items"), before);
    }
}
