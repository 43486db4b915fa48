use std::collections::HashMap;
use std::fs;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use log::{error, info};
use thiserror::Error;

use crate::cache::LeadCache;
use crate::config::Config;
use crate::crm::{CrmClient, CrmError, LeadSearch};
use crate::fields::{definition_names, lead_email, mapping_code};
use crate::mailer::{MailError, Mailer, OutgoingEmail};
use crate::records::{CustomFieldDefinition, Lead};
use crate::templates::{default_subject, sender_name, EmailContext, RejectionReason, TemplateError, TemplateSet};

/// Leads fetched per refresh; the API's maximum page size.
pub const DASHBOARD_PAGE_SIZE: u32 = 200;
pub const FIELD_MAPPING_FILE: &str = "field_mapping.rs";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("CRM error: {0}")]
    Crm(#[from] CrmError),

    #[error("Email error: {0}")]
    Mail(#[from] MailError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    LeadList,
    LeadDetail,
    Draft,
    FieldMapping,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftField {
    Reason,
    Subject,
    Cc,
    Body,
}

impl DraftField {
    fn next(self) -> Self {
        match self {
            DraftField::Reason => DraftField::Subject,
            DraftField::Subject => DraftField::Cc,
            DraftField::Cc => DraftField::Body,
            DraftField::Body => DraftField::Reason,
        }
    }

    fn prev(self) -> Self {
        match self {
            DraftField::Reason => DraftField::Body,
            DraftField::Subject => DraftField::Reason,
            DraftField::Cc => DraftField::Subject,
            DraftField::Body => DraftField::Cc,
        }
    }
}

/// A rejection email being prepared for one lead.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub reason: RejectionReason,
    pub subject: String,
    pub cc: String,
    pub body: String,
}

/// Leads whose name or company contains `query`, ignoring case.
pub fn filter_leads<'a>(leads: &'a [Lead], query: &str) -> Vec<&'a Lead> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return leads.iter().collect();
    }

    leads
        .iter()
        .filter(|lead| {
            let name = lead.name.as_deref().unwrap_or("").to_lowercase();
            let company = lead.company_name.as_deref().unwrap_or("").to_lowercase();
            name.contains(&query) || company.contains(&query)
        })
        .collect()
}

pub struct App {
    pub config: Config,
    crm: CrmClient,
    mailer: Mailer,
    pub templates: TemplateSet,
    pub cache: LeadCache,
    pub should_quit: bool,
    pub mode: AppMode,

    // Lead list
    pub leads: Vec<Lead>,
    pub search_query: String,
    pub search_active: bool,
    pub selected_idx: usize,
    pub last_refresh: Option<DateTime<Local>>,

    // Lead detail
    pub current_lead_id: Option<i64>,
    pub show_debug_fields: bool,
    pub detail_scroll: u16,

    // Drafting
    pub drafts: HashMap<i64, Draft>,
    pub draft_field: DraftField,

    // Field mapping tool
    pub definitions: Vec<CustomFieldDefinition>,
    pub mapping_scroll: u16,

    pub error_message: Option<String>,
    pub info_message: Option<String>,
    pub message_timeout: Option<Instant>,
}

impl App {
    pub fn new(config: Config, templates: TemplateSet) -> AppResult<Self> {
        let crm = CrmClient::new(&config.crm)?;
        let mailer = Mailer::new(config.mail.clone());

        Ok(Self {
            config,
            crm,
            mailer,
            templates,
            cache: LeadCache::new(),
            should_quit: false,
            mode: AppMode::LeadList,

            leads: Vec::new(),
            search_query: String::new(),
            search_active: false,
            selected_idx: 0,
            last_refresh: None,

            current_lead_id: None,
            show_debug_fields: false,
            detail_scroll: 0,

            drafts: HashMap::new(),
            draft_field: DraftField::Reason,

            definitions: Vec::new(),
            mapping_scroll: 0,

            error_message: None,
            info_message: None,
            message_timeout: None,
        })
    }

    /// Initial lead load. Failures are shown, not fatal, so the operator can retry.
    pub fn init(&mut self) {
        self.refresh_with_feedback();
    }

    pub fn refresh(&mut self) -> AppResult<usize> {
        self.cache.clear();
        self.leads = self.crm.search_leads(&LeadSearch::recent(DASHBOARD_PAGE_SIZE))?;
        self.last_refresh = Some(Local::now());
        self.clamp_selection();
        Ok(self.leads.len())
    }

    fn refresh_with_feedback(&mut self) {
        match self.refresh() {
            Ok(0) => self.show_info("No leads found in CRM."),
            Ok(count) => self.show_info(&format!("Loaded {} leads", count)),
            Err(e) => {
                error!("Error fetching leads: {}", e);
                self.show_error(&format!("Error fetching leads from CRM: {}", e));
            }
        }
    }

    pub fn visible_leads(&self) -> Vec<&Lead> {
        filter_leads(&self.leads, &self.search_query)
    }

    pub fn selected_lead(&self) -> Option<&Lead> {
        self.visible_leads().get(self.selected_idx).copied()
    }

    pub fn current_lead(&self) -> Option<&Lead> {
        self.current_lead_id.and_then(|id| self.cache.lead(id))
    }

    pub fn current_draft(&self) -> Option<&Draft> {
        self.current_lead_id.and_then(|id| self.drafts.get(&id))
    }

    fn clamp_selection(&mut self) {
        let count = self.visible_leads().len();
        if count == 0 {
            self.selected_idx = 0;
        } else if self.selected_idx >= count {
            self.selected_idx = count - 1;
        }
    }

    pub fn select_next_lead(&mut self) {
        let count = self.visible_leads().len();
        if count > 0 && self.selected_idx + 1 < count {
            self.selected_idx += 1;
        }
    }

    pub fn select_prev_lead(&mut self) {
        self.selected_idx = self.selected_idx.saturating_sub(1);
    }

    /// Opens the selected lead, fetching its details on first view.
    pub fn open_selected_lead(&mut self) {
        let Some(id) = self.selected_lead().map(|lead| lead.id) else {
            self.show_error("No lead selected");
            return;
        };

        let fetched = self.cache.lead_or_fetch(id, &self.crm).map(|_| ());
        match fetched {
            Ok(()) => {
                self.current_lead_id = Some(id);
                self.detail_scroll = 0;
                self.mode = AppMode::LeadDetail;
            }
            Err(e) => self.show_error(&format!("Error fetching lead details: {}", e)),
        }
    }

    fn email_context(&self, lead: &Lead) -> EmailContext {
        let sender = sender_name(&self.config.mail.address, &self.config.organization);
        EmailContext::for_lead(lead, &sender, &self.config.organization)
    }

    pub fn new_draft(&self, lead: &Lead, reason: RejectionReason) -> AppResult<Draft> {
        let body = self.templates.draft(reason, &self.email_context(lead))?;
        Ok(Draft {
            reason,
            subject: default_subject(&self.config.organization),
            cc: String::new(),
            body,
        })
    }

    /// Opens the draft for the current lead, creating one with the general reason.
    pub fn start_draft(&mut self) -> AppResult<()> {
        let Some(lead) = self.current_lead() else {
            self.show_error("No lead selected");
            return Ok(());
        };
        let id = lead.id;

        if !self.drafts.contains_key(&id) {
            let draft = self.new_draft(lead, RejectionReason::General)?;
            self.drafts.insert(id, draft);
        }

        self.draft_field = DraftField::Reason;
        self.mode = AppMode::Draft;
        Ok(())
    }

    /// Switches the draft's reason and regenerates its body.
    pub fn set_draft_reason(&mut self, reason: RejectionReason) -> AppResult<()> {
        let Some(lead) = self.current_lead() else {
            return Ok(());
        };
        let id = lead.id;
        let body = self.templates.draft(reason, &self.email_context(lead))?;

        if let Some(draft) = self.drafts.get_mut(&id) {
            draft.reason = reason;
            draft.body = body;
        }
        Ok(())
    }

    pub fn cancel_draft(&mut self) {
        if let Some(id) = self.current_lead_id {
            self.drafts.remove(&id);
        }
        self.mode = AppMode::LeadDetail;
        self.show_info("Draft discarded");
    }

    /// Verifies the SMTP connection, then sends the current draft.
    pub fn send_current_draft(&mut self) {
        let Some(id) = self.current_lead_id else {
            return;
        };
        let recipient = self.cache.lead(id).map(lead_email).unwrap_or_default();

        let email = match self.drafts.get(&id) {
            Some(draft) => OutgoingEmail {
                to: recipient.clone(),
                cc: OutgoingEmail::parse_cc(&draft.cc),
                subject: draft.subject.clone(),
                body: draft.body.clone(),
            },
            None => {
                self.show_error("No draft for this lead");
                return;
            }
        };

        if recipient.is_empty() {
            self.show_error("No recipient email address found for this lead.");
            return;
        }
        if !self.mailer.is_configured() {
            self.show_error(&MailError::NotConfigured.to_string());
            return;
        }

        if let Err(e) = self.mailer.test_connection() {
            error!("Email connection failed during send attempt: {}", e);
            self.show_error(&format!("Failed to connect to email server: {}", e));
            return;
        }

        match self.mailer.send(&email) {
            Ok(()) => {
                let mut message = format!("Email sent to {}!", recipient);
                if !email.cc.is_empty() {
                    message.push_str(&format!(" CC'd to {}.", email.cc.join(", ")));
                }
                info!("Email successfully sent to {} with subject: {}", recipient, email.subject);
                self.drafts.remove(&id);
                self.mode = AppMode::LeadDetail;
                self.show_info(&message);
            }
            Err(e) => self.show_error(&e.to_string()),
        }
    }

    pub fn test_email_connection(&mut self) {
        match self.mailer.test_connection() {
            Ok(message) => {
                info!("Email connection test successful");
                self.show_info(&message);
            }
            Err(e) => self.show_error(&format!("Connection failed: {}", e)),
        }
    }

    pub fn verify_crm(&mut self) {
        match self.crm.verify() {
            Ok(message) => self.show_info(&message),
            Err(e) => self.show_error(&e.to_string()),
        }
    }

    pub fn toggle_debug_fields(&mut self) {
        self.show_debug_fields = !self.show_debug_fields;
        if self.show_debug_fields {
            let fetched = self.cache.definitions_or_fetch(&self.crm).map(|_| ());
            if let Err(e) = fetched {
                self.show_error(&format!("Error fetching custom field definitions: {}", e));
            }
        }
    }

    pub fn open_field_mapping(&mut self) {
        match self.crm.custom_field_definitions() {
            Ok(definitions) => {
                self.cache.set_definitions(definition_names(&definitions));
                self.show_info(&format!(
                    "Found {} custom field definitions",
                    definitions.len()
                ));
                self.definitions = definitions;
                self.mapping_scroll = 0;
                self.mode = AppMode::FieldMapping;
            }
            Err(e) => self.show_error(&format!("Error fetching custom field definitions: {}", e)),
        }
    }

    pub fn save_field_mapping(&mut self) -> AppResult<()> {
        if self.definitions.is_empty() {
            self.show_error("No custom field definitions loaded");
            return Ok(());
        }

        fs::write(FIELD_MAPPING_FILE, mapping_code(&self.definitions))?;
        self.show_info(&format!("Saved mapping to {}", FIELD_MAPPING_FILE));
        Ok(())
    }

    pub fn handle_key_event(&mut self, key: KeyEvent) -> AppResult<()> {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return Ok(());
        }

        match self.mode {
            AppMode::LeadList => self.handle_list_mode(key),
            AppMode::LeadDetail => self.handle_detail_mode(key),
            AppMode::Draft => self.handle_draft_mode(key),
            AppMode::FieldMapping => self.handle_mapping_mode(key),
            AppMode::Help => {
                if matches!(key.code, KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('q')) {
                    self.mode = AppMode::LeadList;
                }
                Ok(())
            }
        }
    }

    fn handle_list_mode(&mut self, key: KeyEvent) -> AppResult<()> {
        if self.search_active {
            match key.code {
                KeyCode::Esc | KeyCode::Enter => self.search_active = false,
                KeyCode::Backspace => {
                    self.search_query.pop();
                    self.selected_idx = 0;
                }
                KeyCode::Char(c) => {
                    self.search_query.push(c);
                    self.selected_idx = 0;
                }
                _ => {}
            }
            return Ok(());
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('/') => self.search_active = true,
            KeyCode::Esc if !self.search_query.is_empty() => {
                self.search_query.clear();
                self.clamp_selection();
            }
            KeyCode::Up | KeyCode::Char('k') => self.select_prev_lead(),
            KeyCode::Down | KeyCode::Char('j') => self.select_next_lead(),
            KeyCode::Enter => self.open_selected_lead(),
            KeyCode::Char('r') => self.refresh_with_feedback(),
            KeyCode::Char('t') => self.test_email_connection(),
            KeyCode::Char('v') => self.verify_crm(),
            KeyCode::Char('m') => self.open_field_mapping(),
            KeyCode::Char('?') => self.mode = AppMode::Help,
            _ => {}
        }
        Ok(())
    }

    fn handle_detail_mode(&mut self, key: KeyEvent) -> AppResult<()> {
        match key.code {
            KeyCode::Esc | KeyCode::Backspace => self.mode = AppMode::LeadList,
            KeyCode::Char('d') => self.start_draft()?,
            KeyCode::Char('g') => self.toggle_debug_fields(),
            KeyCode::Up | KeyCode::Char('k') => self.detail_scroll = self.detail_scroll.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => self.detail_scroll = self.detail_scroll.saturating_add(1),
            KeyCode::Char('?') => self.mode = AppMode::Help,
            _ => {}
        }
        Ok(())
    }

    fn draft_text_mut(&mut self) -> Option<&mut String> {
        let id = self.current_lead_id?;
        let field = self.draft_field;
        let draft = self.drafts.get_mut(&id)?;
        match field {
            DraftField::Reason => None,
            DraftField::Subject => Some(&mut draft.subject),
            DraftField::Cc => Some(&mut draft.cc),
            DraftField::Body => Some(&mut draft.body),
        }
    }

    fn handle_draft_mode(&mut self, key: KeyEvent) -> AppResult<()> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        match key.code {
            KeyCode::Char('s') if ctrl => self.send_current_draft(),
            KeyCode::Char('x') if ctrl => self.cancel_draft(),
            KeyCode::Esc => self.mode = AppMode::LeadDetail,
            KeyCode::Tab => self.draft_field = self.draft_field.next(),
            KeyCode::BackTab => self.draft_field = self.draft_field.prev(),
            KeyCode::Left | KeyCode::Right if self.draft_field == DraftField::Reason => {
                if let Some(current) = self.current_draft().map(|d| d.reason) {
                    let reason = if key.code == KeyCode::Right {
                        current.next()
                    } else {
                        current.prev()
                    };
                    self.set_draft_reason(reason)?;
                }
            }
            KeyCode::Enter if self.draft_field == DraftField::Body => {
                if let Some(text) = self.draft_text_mut() {
                    text.push('\n');
                }
            }
            KeyCode::Backspace => {
                if let Some(text) = self.draft_text_mut() {
                    text.pop();
                }
            }
            KeyCode::Char(c) if !ctrl => {
                if let Some(text) = self.draft_text_mut() {
                    text.push(c);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_mapping_mode(&mut self, key: KeyEvent) -> AppResult<()> {
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => self.mode = AppMode::LeadList,
            KeyCode::Char('w') => self.save_field_mapping()?,
            KeyCode::Char('r') => self.open_field_mapping(),
            KeyCode::Up | KeyCode::Char('k') => self.mapping_scroll = self.mapping_scroll.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => self.mapping_scroll = self.mapping_scroll.saturating_add(1),
            _ => {}
        }
        Ok(())
    }

    pub fn show_error(&mut self, message: &str) {
        self.error_message = Some(message.to_string());
        self.info_message = None;
        self.message_timeout = Some(Instant::now() + Duration::from_secs(5));
    }

    pub fn show_info(&mut self, message: &str) {
        self.info_message = Some(message.to_string());
        self.error_message = None;
        self.message_timeout = Some(Instant::now() + Duration::from_secs(3));
    }

    pub fn tick(&mut self) {
        // Clear messages after timeout
        if let Some(timeout) = self.message_timeout {
            if Instant::now() > timeout {
                self.error_message = None;
                self.info_message = None;
                self.message_timeout = None;
            }
        }
    }
}
