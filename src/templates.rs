use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

use crate::records::Lead;

pub const TEMPLATE_FILE_NAME: &str = "email_templates.json";

const BUILTIN_GENERAL: &str = "Hi {first_name},\n\nThanks so much for reaching out to {organization}!\n\nThank you for your interest in our fund, but we've decided to pass on this opportunity.";

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Failed to read template file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse template file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Template file contains no templates")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    Hardware,
    TooEarly,
    Geography,
    TooFarAlong,
    NotEnoughImpact,
    Competitive,
    General,
}

impl RejectionReason {
    pub const ALL: [RejectionReason; 7] = [
        RejectionReason::Hardware,
        RejectionReason::TooEarly,
        RejectionReason::Geography,
        RejectionReason::TooFarAlong,
        RejectionReason::NotEnoughImpact,
        RejectionReason::Competitive,
        RejectionReason::General,
    ];

    /// Key of the template in the templates file.
    pub fn key(&self) -> &'static str {
        match self {
            RejectionReason::Hardware => "hardware",
            RejectionReason::TooEarly => "too_early",
            RejectionReason::Geography => "geography",
            RejectionReason::TooFarAlong => "too_far_along",
            RejectionReason::NotEnoughImpact => "not_enough_impact",
            RejectionReason::Competitive => "competitive",
            RejectionReason::General => "general",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RejectionReason::Hardware => "Hardware (Pre-commercial or CapEx Intensive)",
            RejectionReason::TooEarly => "Too Early but Could Be a Future Fit",
            RejectionReason::Geography => "Geography",
            RejectionReason::TooFarAlong => "Too Far Along",
            RejectionReason::NotEnoughImpact => "Not Enough Impact",
            RejectionReason::Competitive => "Competitive with Portfolio Companies",
            RejectionReason::General => "General Pass",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.key() == key)
    }

    fn position(&self) -> usize {
        Self::ALL.iter().position(|r| r == self).unwrap_or(0)
    }

    pub fn next(&self) -> Self {
        Self::ALL[(self.position() + 1) % Self::ALL.len()]
    }

    pub fn prev(&self) -> Self {
        Self::ALL[(self.position() + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Values substituted into a rejection template for one lead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailContext {
    pub lead_name: String,
    pub first_name: String,
    pub company_name: String,
    pub sender_name: String,
    pub organization: String,
}

impl EmailContext {
    pub fn for_lead(lead: &Lead, sender_name: &str, organization: &str) -> Self {
        Self {
            lead_name: lead.name.clone().unwrap_or_default(),
            first_name: lead.first_name.clone().unwrap_or_default(),
            company_name: lead.company_name.clone().unwrap_or_default(),
            sender_name: sender_name.to_string(),
            organization: organization.to_string(),
        }
    }

    pub fn placeholders(&self) -> [(&str, &str); 5] {
        [
            ("lead_name", self.lead_name.as_str()),
            ("first_name", self.first_name.as_str()),
            ("company_name", self.company_name.as_str()),
            ("sender_name", self.sender_name.as_str()),
            ("organization", self.organization.as_str()),
        ]
    }
}

/// Replaces each `{name}` with its value in a single pass. Unknown
/// placeholders are left as written; substituted values are not rescanned.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        match after.find('}') {
            Some(end) => match values.iter().find(|(key, _)| *key == &after[..end]) {
                Some((_, value)) => {
                    out.push_str(value);
                    rest = &after[end + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            },
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// Filled template followed by the signature block.
pub fn render(template: &str, context: &EmailContext) -> String {
    let mut body = fill(template, &context.placeholders());
    body.push_str(&format!("\n\nWarmly,\n{}", context.sender_name));
    body
}

/// First name guessed from a `firstnameL@domain` mailbox: the local part
/// without its trailing initial, capitalised.
pub fn sender_name(address: &str, fallback: &str) -> String {
    let local = address.split('@').next().unwrap_or("").trim();
    if local.is_empty() {
        return fallback.to_string();
    }

    let chars: Vec<char> = local.chars().collect();
    let first_name = if chars.len() > 1 {
        &chars[..chars.len() - 1]
    } else {
        &chars[..]
    };

    let mut name = String::new();
    for (i, c) in first_name.iter().enumerate() {
        if i == 0 {
            name.extend(c.to_uppercase());
        } else {
            name.extend(c.to_lowercase());
        }
    }
    name
}

pub fn default_subject(organization: &str) -> String {
    format!("Re: {} Investments Form Submission", organization)
}

#[derive(Debug, Clone)]
pub struct TemplateSet {
    templates: HashMap<String, String>,
    source: Option<PathBuf>,
}

impl TemplateSet {
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();
        templates.insert("general".to_string(), BUILTIN_GENERAL.to_string());
        Self {
            templates,
            source: None,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, TemplateError> {
        let content = fs::read_to_string(path)?;
        let templates: HashMap<String, String> = serde_json::from_str(&content)?;
        if templates.is_empty() {
            return Err(TemplateError::Empty);
        }

        Ok(Self {
            templates,
            source: Some(path.to_path_buf()),
        })
    }

    /// Locations tried in order by [`TemplateSet::load`].
    pub fn candidate_paths(configured: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(path) = configured {
            paths.push(path.to_path_buf());
        }
        paths.push(PathBuf::from(TEMPLATE_FILE_NAME));
        if let Some(dir) = std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf)) {
            paths.push(dir.join(TEMPLATE_FILE_NAME));
        }
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("leadpass").join(TEMPLATE_FILE_NAME));
        }
        paths
    }

    /// First loadable templates file, or the built-in template.
    pub fn load(configured: Option<&Path>) -> Self {
        Self::load_from(&Self::candidate_paths(configured))
    }

    pub fn load_from(paths: &[PathBuf]) -> Self {
        for path in paths {
            match Self::from_file(path) {
                Ok(set) => {
                    info!("Loaded {} email templates from {}", set.len(), path.display());
                    return set;
                }
                Err(e) => warn!("Couldn't load email templates from {}: {}", path.display(), e),
            }
        }

        warn!("Using default email templates");
        Self::builtin()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// The reason's template, falling back to `standard`, then `general`.
    pub fn get(&self, reason: RejectionReason) -> Result<&str, TemplateError> {
        [reason.key(), "standard", "general"]
            .iter()
            .find_map(|key| self.templates.get(*key))
            .map(String::as_str)
            .ok_or_else(|| TemplateError::NotFound(reason.key().to_string()))
    }

    pub fn draft(&self, reason: RejectionReason, context: &EmailContext) -> Result<String, TemplateError> {
        Ok(render(self.get(reason)?, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn context() -> EmailContext {
        EmailContext {
            lead_name: "Grace Hopper".to_string(),
            first_name: "Grace".to_string(),
            company_name: "Hopper Energy".to_string(),
            sender_name: "Jane".to_string(),
            organization: "Active Impact".to_string(),
        }
    }

    #[test]
    fn test_fill_replaces_all_placeholders() {
        let filled = fill(
            "Hi {first_name} at {company_name}, {first_name}! From {sender_name}.",
            &context().placeholders(),
        );
        assert_eq!(filled, "Hi Grace at Hopper Energy, Grace! From Jane.");
    }

    #[test]
    fn test_fill_leaves_unknown_and_unbalanced_braces() {
        let values = [("name", "{name}")];
        assert_eq!(fill("{unknown} {name}", &values), "{unknown} {name}");
        assert_eq!(fill("{{name}}", &[("name", "x")]), "{x}");
        assert_eq!(fill("trailing {name", &values), "trailing {name");
    }

    #[test]
    fn test_render_appends_signature() {
        let body = render("Dear {lead_name},\n\nWe will pass.", &context());
        assert_eq!(body, "Dear Grace Hopper,\n\nWe will pass.\n\nWarmly,\nJane");
    }

    #[test]
    fn test_sender_name() {
        assert_eq!(sender_name("janed@example.com", "Active Impact"), "Jane");
        assert_eq!(sender_name("BOBS@example.com", "Active Impact"), "Bob");
        assert_eq!(sender_name("x@example.com", "Active Impact"), "X");
        assert_eq!(sender_name("", "Active Impact"), "Active Impact");
    }

    #[test]
    fn test_reason_cycle() {
        assert_eq!(RejectionReason::Hardware.next(), RejectionReason::TooEarly);
        assert_eq!(RejectionReason::General.next(), RejectionReason::Hardware);
        assert_eq!(RejectionReason::Hardware.prev(), RejectionReason::General);
        assert_eq!(RejectionReason::from_key("too_far_along"), Some(RejectionReason::TooFarAlong));
        assert_eq!(RejectionReason::from_key("nope"), None);
    }

    #[test]
    fn test_lookup_fallbacks() {
        let builtin = TemplateSet::builtin();
        assert!(builtin.get(RejectionReason::Geography).unwrap().starts_with("Hi {first_name}"));

        let body = builtin.draft(RejectionReason::General, &context()).unwrap();
        assert!(body.starts_with("Hi Grace,\n\nThanks so much for reaching out to Active Impact!"));
        assert!(body.ends_with("\n\nWarmly,\nJane"));
    }

    #[test]
    fn test_load_from_file_and_fallback() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"geography": "Hi {{first_name}}, we only invest locally.", "standard": "Hi {{first_name}}."}}"#
        )
        .unwrap();

        let missing = PathBuf::from("/nonexistent/email_templates.json");
        let set = TemplateSet::load_from(&[missing.clone(), file.path().to_path_buf()]);

        assert_eq!(set.len(), 2);
        assert_eq!(set.source(), Some(file.path()));
        assert_eq!(
            set.get(RejectionReason::Geography).unwrap(),
            "Hi {first_name}, we only invest locally."
        );
        assert_eq!(set.get(RejectionReason::Hardware).unwrap(), "Hi {first_name}.");

        let fallback = TemplateSet::load_from(&[missing]);
        assert!(fallback.source().is_none());
        assert_eq!(fallback.len(), 1);
    }

    #[test]
    fn test_missing_template_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"hardware": "Hardware is hard."}}"#).unwrap();
        let set = TemplateSet::from_file(file.path()).unwrap();

        assert!(set.get(RejectionReason::Hardware).is_ok());
        assert!(matches!(
            set.get(RejectionReason::General),
            Err(TemplateError::NotFound(key)) if key == "general"
        ));
    }
}
