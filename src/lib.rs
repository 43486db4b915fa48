pub mod app;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod crm;
pub mod fields;
pub mod mailer;
pub mod records;
pub mod templates;
pub mod ui;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use app::App;
pub use cache::LeadCache;
pub use config::Config;
pub use crm::{CrmClient, CrmError};
pub use mailer::{MailError, Mailer, OutgoingEmail};
pub use records::{Activity, CustomFieldDefinition, Lead, Opportunity};
pub use templates::{RejectionReason, TemplateSet};
