//! Mail templates and render results.
//!
//! Filling placeholders happens on the server; the client only picks a
//! template, sends context and shows what comes back.

use serde::{Deserialize, Serialize};

use super::{CaseId, SourceId, TemplateId};

/// A server-side mail template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailTemplate {
    pub id: TemplateId,
    pub name: String,
    /// Information sources this template is written for.
    #[serde(default)]
    pub source_ids: Vec<SourceId>,
}

impl MailTemplate {
    pub fn is_tagged_for(&self, source_id: SourceId) -> bool {
        self.source_ids.contains(&source_id)
    }
}

/// Templates offered for a target source.
///
/// With a target, only templates tagged for it; without one, all of them.
pub fn candidate_templates(
    templates: &[MailTemplate],
    target: Option<SourceId>,
) -> Vec<&MailTemplate> {
    match target {
        Some(source_id) => templates
            .iter()
            .filter(|template| template.is_tagged_for(source_id))
            .collect(),
        None => templates.iter().collect(),
    }
}

/// Free-text context passed to the renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderContext {
    /// Task list pasted from the basket export.
    pub tasks: String,
    pub name: String,
    pub email: String,
}

/// A render request for one template on one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderRequest {
    pub template_id: TemplateId,
    pub case_id: CaseId,
    pub context: RenderContext,
}

/// What the renderer returned.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RenderedMail {
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub source_id: Option<SourceId>,
    /// Recipient address the renderer found on the case, if any.
    #[serde(default)]
    pub inferred_recipient: Option<String>,
}
