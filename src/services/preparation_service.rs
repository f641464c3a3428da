//! Handoff preparation.
//!
//! A [`PreparationWorkflow`] holds the state of one compose dialog: chosen
//! template, sending account, recipient, free-text context and the rendered
//! preview. Rendering happens on the server. The workflow numbers its
//! revisions so a preview that comes back after the template or recipient
//! name changed is dropped instead of shown.

use thiserror::Error;

use crate::domain::{
    candidate_templates, AccountId, CaseId, CaseMailConfig, MailTemplate, NewOutgoingMessage,
    RenderContext, RenderRequest, RenderedMail, SendingAccount, SourceId, TemplateId,
};
use crate::providers::api::MailApi;
use crate::error::DeskResult;

/// A local precondition that blocks a render or a handoff.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("choose a template first")]
    NoTemplate,

    #[error("template {0} is not available for this recipient")]
    UnknownTemplate(TemplateId),

    #[error("no sending account is available")]
    NoAccount,

    #[error("sending account {0} is not available")]
    UnknownAccount(AccountId),

    #[error("enter a recipient address")]
    MissingRecipient,

    #[error("{0} is not a valid email address")]
    InvalidRecipient(String),

    #[error("generate a preview before handing off")]
    NoPreview,

    #[error("the preview is out of date; generate it again")]
    StalePreview,

    #[error("this handoff is already being submitted")]
    AlreadySubmitting,
}

/// A rendered message ready for confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub template_id: TemplateId,
    pub subject: String,
    pub body_html: String,
    pub source_id: Option<SourceId>,
    revision: u64,
}

/// A render request tagged with the revision it was made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTicket {
    pub request: RenderRequest,
    revision: u64,
}

/// State of one compose dialog.
#[derive(Debug, Clone)]
pub struct PreparationWorkflow {
    case_id: CaseId,
    target_source: Option<SourceId>,
    templates: Vec<MailTemplate>,
    accounts: Vec<SendingAccount>,
    template_id: Option<TemplateId>,
    account_id: Option<AccountId>,
    recipient_email: String,
    recipient_name: String,
    tasks: String,
    preview: Option<Preview>,
    revision: u64,
}

impl PreparationWorkflow {
    /// Opens a dialog for a case and resolves the default sending account.
    pub fn new(
        case_id: CaseId,
        target_source: Option<SourceId>,
        templates: Vec<MailTemplate>,
        accounts: Vec<SendingAccount>,
        config: &CaseMailConfig,
    ) -> Self {
        let account_id = config.resolve_account(&accounts).map(|account| account.id);
        Self {
            case_id,
            target_source,
            templates,
            accounts,
            template_id: None,
            account_id,
            recipient_email: String::new(),
            recipient_name: String::new(),
            tasks: String::new(),
            preview: None,
            revision: 0,
        }
    }

    pub fn case_id(&self) -> CaseId {
        self.case_id
    }

    pub fn target_source(&self) -> Option<SourceId> {
        self.target_source
    }

    /// Templates offered for the target source.
    pub fn candidates(&self) -> Vec<&MailTemplate> {
        candidate_templates(&self.templates, self.target_source)
    }

    pub fn template_id(&self) -> Option<TemplateId> {
        self.template_id
    }

    pub fn account(&self) -> Option<&SendingAccount> {
        let id = self.account_id?;
        self.accounts.iter().find(|account| account.id == id)
    }

    pub fn recipient_email(&self) -> &str {
        &self.recipient_email
    }

    pub fn recipient_name(&self) -> &str {
        &self.recipient_name
    }

    pub fn preview(&self) -> Option<&Preview> {
        self.preview.as_ref()
    }

    /// Picks a template. Changing it discards the preview.
    pub fn select_template(&mut self, id: TemplateId) -> Result<(), ValidationError> {
        if !self.candidates().iter().any(|template| template.id == id) {
            return Err(ValidationError::UnknownTemplate(id));
        }
        if self.template_id != Some(id) {
            self.template_id = Some(id);
            self.discard_preview();
        }
        Ok(())
    }

    /// Overrides the resolved sending account.
    pub fn select_account(&mut self, id: AccountId) -> Result<(), ValidationError> {
        if !self.accounts.iter().any(|account| account.id == id) {
            return Err(ValidationError::UnknownAccount(id));
        }
        self.account_id = Some(id);
        Ok(())
    }

    pub fn set_recipient_email(&mut self, email: impl Into<String>) {
        self.recipient_email = email.into();
    }

    /// Sets the recipient name. Changing it discards the preview.
    pub fn set_recipient_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name != self.recipient_name {
            self.recipient_name = name;
            self.discard_preview();
        }
    }

    /// Sets the task list passed to the renderer.
    pub fn set_tasks(&mut self, tasks: impl Into<String>) {
        self.tasks = tasks.into();
    }

    /// Builds a render request for the current selection.
    pub fn render_request(&self) -> Result<RenderTicket, ValidationError> {
        let template_id = self.template_id.ok_or(ValidationError::NoTemplate)?;
        Ok(RenderTicket {
            request: RenderRequest {
                template_id,
                case_id: self.case_id,
                context: RenderContext {
                    tasks: self.tasks.clone(),
                    name: self.recipient_name.clone(),
                    email: self.recipient_email.clone(),
                },
            },
            revision: self.revision,
        })
    }

    /// Stores a render result unless the selection changed since the
    /// request. Returns whether the preview was stored.
    ///
    /// An address inferred by the renderer fills an empty recipient field
    /// but never replaces one the user typed.
    pub fn apply_render(&mut self, ticket: &RenderTicket, rendered: RenderedMail) -> bool {
        if ticket.revision != self.revision {
            tracing::debug!(
                case_id = %self.case_id,
                revision = ticket.revision,
                current = self.revision,
                "discarding stale preview"
            );
            return false;
        }

        if self.recipient_email.trim().is_empty() {
            if let Some(inferred) = rendered.inferred_recipient.filter(|s| !s.trim().is_empty()) {
                self.recipient_email = inferred;
            }
        }

        self.preview = Some(Preview {
            template_id: ticket.request.template_id,
            subject: rendered.subject,
            body_html: rendered.body,
            source_id: rendered.source_id.or(self.target_source),
            revision: ticket.revision,
        });
        true
    }

    /// Renders the current selection.
    pub async fn render(&mut self, api: &dyn MailApi) -> DeskResult<bool> {
        let ticket = self.render_request()?;
        let rendered = api.render_template(&ticket.request).await?;
        Ok(self.apply_render(&ticket, rendered))
    }

    /// The handoff to create from the confirmed preview.
    pub fn confirm(&self) -> Result<NewOutgoingMessage, ValidationError> {
        let preview = self.preview.as_ref().ok_or(ValidationError::NoPreview)?;
        if preview.revision != self.revision || Some(preview.template_id) != self.template_id {
            return Err(ValidationError::StalePreview);
        }

        let account = self.account().ok_or(ValidationError::NoAccount)?;

        let email = self.recipient_email.trim();
        if email.is_empty() {
            return Err(ValidationError::MissingRecipient);
        }
        if !looks_like_address(email) {
            return Err(ValidationError::InvalidRecipient(email.to_string()));
        }

        let name = self.recipient_name.trim();
        Ok(NewOutgoingMessage {
            case_id: self.case_id,
            source_id: preview.source_id,
            recipient_email: email.to_string(),
            recipient_name: (!name.is_empty()).then(|| name.to_string()),
            subject: preview.subject.clone(),
            body_html: preview.body_html.clone(),
            account_id: account.id,
        })
    }

    fn discard_preview(&mut self) {
        self.revision += 1;
        self.preview = None;
    }
}

fn looks_like_address(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}
