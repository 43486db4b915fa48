//! Pure transformations from CRM records to display text.
//!
//! Nothing here touches the network; the dashboard and the lookup commands
//! both render through these functions.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};

use crate::records::{Activity, Address, CustomFieldDefinition, CustomFields, CustomFieldValue, Lead};

pub const NOT_PROVIDED: &str = "Not provided";

/// Epoch values above this are milliseconds.
pub const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Form field labels mapped to the CRM's custom field definition IDs.
pub const FIELD_ID_MAPPING: &[(&str, i64)] = &[
    ("Number of full time employees", 328938),
    ("How did you hear about us?", 328940),
    ("Year Founded", 328941),
    ("Revenue Model", 328943),
    ("Last year's revenue", 328937),
    ("Amount raised to date", 328950),
    ("Target size of current raise", 328951),
    ("Link to your investor deck", 328958),
    ("Last three months' revenue", 328944),
    ("Value of new sales signed last month", 328946),
    ("Specific environmental impact", 328942),
    ("Number of paid customers", 328945),
    ("Cash on hand", 328948),
    ("Brief Company Description", 328956),
    ("Monthly net burn", 328947),
    ("Most impressive points", 328954),
    ("Competitors", 328949),
    ("Most likely exit and timing", 328957),
    ("Biggest concerns", 328953),
];

/// Labels shown in the form details section, in display order.
pub const FORM_FIELD_ORDER: &[&str] = &[
    "First Name",
    "Last Name",
    "Company Name",
    "Website",
    "Email",
    "HQ Address",
    "Country",
    "Address Line 1",
    "Address Line 2",
    "City",
    "Province",
    "Postal Code",
    "Year Founded",
    "Brief Company Description",
    "How did you hear about us?",
    "Specific environmental impact",
    "Revenue Model",
    "Last year's revenue",
    "Last three months' revenue",
    "Value of new sales signed last month",
    "Number of full time employees",
    "Number of paid customers",
    "Cash on hand",
    "Monthly net burn",
    "Amount raised to date",
    "Target size of current raise",
    "Link to your investor deck",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadSource {
    FormSubmission,
    ManuallyAdded,
}

impl LeadSource {
    pub fn label(&self) -> &'static str {
        match self {
            LeadSource::FormSubmission => "Form Submission",
            LeadSource::ManuallyAdded => "Manually Added",
        }
    }
}

impl fmt::Display for LeadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Renders a loosely-typed JSON value the way a person would write it.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(display_value).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

impl CustomFieldValue {
    /// The computed value when the CRM supplied one, else the raw value.
    pub fn display(&self) -> String {
        match (&self.computed_value, &self.value) {
            (Some(computed), _) if !computed.is_null() => display_value(computed),
            (_, Some(raw)) => display_value(raw),
            _ => String::new(),
        }
    }

    fn is_filled(&self) -> bool {
        self.value.as_ref().map_or(false, |v| !v.is_null() && v.as_str() != Some(""))
    }
}

/// Looks a custom field up by name. Missing containers and fields yield "".
pub fn custom_field(lead: &Lead, name: &str) -> String {
    match &lead.custom_fields {
        Some(CustomFields::List(entries)) => entries
            .iter()
            .find(|entry| entry.name.as_deref() == Some(name))
            .map(CustomFieldValue::display)
            .unwrap_or_default(),
        Some(CustomFields::Map(map)) => map.get(name).map(display_value).unwrap_or_default(),
        None => String::new(),
    }
}

/// Display values keyed by custom field definition ID.
pub fn custom_fields_by_id(lead: &Lead) -> BTreeMap<i64, String> {
    match &lead.custom_fields {
        Some(CustomFields::List(entries)) => entries
            .iter()
            .filter_map(|entry| entry.custom_field_definition_id.map(|id| (id, entry.display())))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    if ts > MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(ts).single()
    } else {
        Utc.timestamp_opt(ts, 0).single()
    }
}

/// Local `%Y-%m-%d %H:%M:%S` rendering of a seconds or milliseconds epoch.
pub fn format_timestamp(ts: Option<i64>) -> String {
    match ts {
        None | Some(0) => "Unknown date".to_string(),
        Some(ts) => match to_datetime(ts) {
            Some(dt) => dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
            None => {
                log::error!("Error formatting date: {} is out of range", ts);
                "Date format error".to_string()
            }
        },
    }
}

/// Whole days (floored) between creation and `now`.
pub fn days_in_crm(created: Option<i64>, now: DateTime<Utc>) -> Option<i64> {
    let created = to_datetime(created.filter(|ts| *ts != 0)?)?;
    Some((now - created).num_milliseconds().div_euclid(MILLIS_PER_DAY))
}

pub fn format_days(days: Option<i64>) -> String {
    days.map_or_else(|| "Unknown".to_string(), |d| d.to_string())
}

pub fn classify_source(lead: &Lead) -> LeadSource {
    if lead.tags.iter().any(|tag| tag.to_lowercase().contains("form")) {
        return LeadSource::FormSubmission;
    }

    if let Some(name) = lead.source.as_ref().and_then(|s| s.name.as_deref()) {
        let name = name.to_lowercase();
        if ["form", "website", "submission"].iter().any(|k| name.contains(k)) {
            return LeadSource::FormSubmission;
        }
    }

    if let Some(CustomFields::List(entries)) = &lead.custom_fields {
        let populated = entries
            .iter()
            .filter(|e| e.value.as_ref().map_or(false, is_truthy))
            .count();
        if populated > 5 {
            return LeadSource::FormSubmission;
        }
    }

    LeadSource::ManuallyAdded
}

/// Whether any custom field carries a non-empty value.
pub fn has_form_data(lead: &Lead) -> bool {
    match &lead.custom_fields {
        Some(CustomFields::List(entries)) => entries.iter().any(CustomFieldValue::is_filled),
        Some(CustomFields::Map(map)) => map.values().any(|v| !v.is_null() && v.as_str() != Some("")),
        None => false,
    }
}

/// Primary email, then the first listed email, then the contact info email.
pub fn lead_email(lead: &Lead) -> String {
    let non_empty = |s: &Option<String>| s.as_deref().filter(|e| !e.is_empty()).map(str::to_string);

    lead.email
        .as_ref()
        .and_then(|e| non_empty(&e.email))
        .or_else(|| lead.emails.iter().find_map(|e| non_empty(&e.email)))
        .or_else(|| lead.contact_info.as_ref().and_then(|c| non_empty(&c.email)))
        .unwrap_or_default()
}

pub fn hq_address(address: &Address) -> String {
    [
        &address.street,
        &address.city,
        &address.state,
        &address.postal_code,
        &address.country,
    ]
    .iter()
    .filter_map(|part| part.as_deref())
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(", ")
}

fn or_not_provided(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => NOT_PROVIDED.to_string(),
    }
}

/// The form details section: every label in [`FORM_FIELD_ORDER`] with its value.
pub fn form_details(lead: &Lead, mapping: &[(&str, i64)]) -> Vec<(&'static str, String)> {
    let by_id = custom_fields_by_id(lead);
    let address = lead.address.clone().unwrap_or_default();

    FORM_FIELD_ORDER
        .iter()
        .map(|&label| {
            let value = match label {
                "First Name" => or_not_provided(lead.first_name.as_deref()),
                "Last Name" => or_not_provided(lead.last_name.as_deref()),
                "Company Name" => or_not_provided(lead.company_name.as_deref()),
                "Website" => or_not_provided(lead.websites.first().and_then(|w| w.url.as_deref())),
                "Email" => or_not_provided(Some(lead_email(lead).as_str())),
                "HQ Address" => or_not_provided(Some(hq_address(&address).as_str())),
                "Country" => or_not_provided(address.country.as_deref()),
                "Address Line 1" => or_not_provided(address.street.as_deref()),
                "Address Line 2" => NOT_PROVIDED.to_string(),
                "City" => or_not_provided(address.city.as_deref()),
                "Province" => or_not_provided(address.state.as_deref()),
                "Postal Code" => or_not_provided(address.postal_code.as_deref()),
                custom => match mapping.iter().find(|(name, _)| *name == custom) {
                    Some((_, id)) => match by_id.get(id) {
                        Some(v) => or_not_provided(Some(v.as_str())),
                        None => {
                            log::debug!("Field '{}' (ID: {}) not found in lead data", custom, id);
                            NOT_PROVIDED.to_string()
                        }
                    },
                    None => NOT_PROVIDED.to_string(),
                },
            };
            (label, value)
        })
        .collect()
}

/// One row per custom field on the lead, named through the definitions map.
pub fn debug_custom_fields(
    lead: &Lead,
    definitions: &HashMap<i64, String>,
) -> Vec<(Option<i64>, String, String)> {
    match &lead.custom_fields {
        Some(CustomFields::List(entries)) => entries
            .iter()
            .map(|entry| {
                let name = entry
                    .custom_field_definition_id
                    .and_then(|id| definitions.get(&id).cloned())
                    .unwrap_or_else(|| "Unknown Field".to_string());
                (entry.custom_field_definition_id, name, entry.display())
            })
            .collect(),
        Some(CustomFields::Map(map)) => map
            .iter()
            .map(|(name, value)| (None, name.clone(), display_value(value)))
            .collect(),
        None => Vec::new(),
    }
}

fn pretty_json(value: &Value) -> String {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    match value.serialize(&mut ser) {
        Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
        Err(_) => value.to_string(),
    }
}

/// Every field of an untyped record, one per line, nested values indented.
pub fn format_record(record: &Map<String, Value>) -> String {
    let mut out = String::new();
    for (field, value) in record {
        match value {
            Value::Number(n) if field.starts_with("date_") => {
                let ts = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64));
                out.push_str(&format!("{}: {}\n", field, format_timestamp(ts)));
            }
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!("{}:\n{}\n", field, pretty_json(value)));
            }
            Value::String(s) => out.push_str(&format!("{}: {}\n", field, s)),
            other => out.push_str(&format!("{}: {}\n", field, other)),
        }
    }
    out
}

fn or_na(value: Option<String>) -> String {
    value.unwrap_or_else(|| "N/A".to_string())
}

pub fn format_activity(activity: &Activity) -> String {
    let kind = activity
        .kind
        .as_ref()
        .map(display_value)
        .unwrap_or_else(|| "Unknown".to_string());
    let parent = activity.parent.as_ref();

    format!(
        "- Type: {} | Parent Type: {} | Parent ID: {} | Date: {}",
        kind,
        or_na(parent.map(|p| p.kind.clone())),
        or_na(parent.map(|p| p.id.to_string())),
        format_timestamp(activity.activity_date),
    )
}

pub fn format_activity_brief(activity: &Activity) -> String {
    format!(
        "- Type: {}, Name: {}, Date: {}",
        activity.kind.as_ref().map(display_value).unwrap_or_default(),
        activity.name.as_deref().unwrap_or(""),
        format_timestamp(activity.activity_date),
    )
}

pub fn definition_names(definitions: &[CustomFieldDefinition]) -> HashMap<i64, String> {
    definitions.iter().map(|d| (d.id, d.name.clone())).collect()
}

pub fn available_values(definition: &CustomFieldDefinition) -> String {
    definition
        .available_values
        .iter()
        .map(|v| v.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn definitions_table(definitions: &[CustomFieldDefinition]) -> String {
    let name_width = definitions
        .iter()
        .map(|d| d.name.chars().count())
        .max()
        .unwrap_or(0)
        .max("Field Name".len());

    let mut out = format!(
        "{:<10} | {:<width$} | {:<12} | {}\n",
        "Field ID",
        "Field Name",
        "Data Type",
        "Available Values",
        width = name_width
    );
    for definition in definitions {
        out.push_str(&format!(
            "{:<10} | {:<width$} | {:<12} | {}\n",
            definition.id,
            definition.name,
            definition.data_type.as_deref().unwrap_or(""),
            available_values(definition),
            width = name_width
        ));
    }
    out
}

/// Rust source for a replacement [`FIELD_ID_MAPPING`] table.
pub fn mapping_code(definitions: &[CustomFieldDefinition]) -> String {
    let mut code = String::from("pub const FIELD_ID_MAPPING: &[(&str, i64)] = &[\n");
    for definition in definitions {
        code.push_str(&format!("    ({:?}, {}),\n", definition.name, definition.id));
    }
    code.push_str("];\n");
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn lead(value: Value) -> Lead {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_custom_field_prefers_computed_value() {
        let lead = lead(json!({
            "id": 1,
            "custom_fields": [
                {"name": "Revenue Model", "value": 12, "computed_value": "SaaS"},
                {"name": "Sectors", "value": [1, 2], "computed_value": ["Energy", "Water"]},
                {"name": "Year Founded", "value": 2019},
                {"name": "Empty"}
            ]
        }));

        assert_eq!(custom_field(&lead, "Revenue Model"), "SaaS");
        assert_eq!(custom_field(&lead, "Sectors"), "Energy, Water");
        assert_eq!(custom_field(&lead, "Year Founded"), "2019");
        assert_eq!(custom_field(&lead, "Empty"), "");
        assert_eq!(custom_field(&lead, "Missing"), "");
    }

    #[test]
    fn test_custom_field_mapping_shape_and_absent_container() {
        let mapped = lead(json!({"id": 1, "custom_fields": {"Source": "Website form"}}));
        assert_eq!(custom_field(&mapped, "Source"), "Website form");
        assert_eq!(custom_field(&mapped, "Other"), "");

        let bare = lead(json!({"id": 2}));
        assert_eq!(custom_field(&bare, "Source"), "");
    }

    #[test]
    fn test_format_timestamp_handles_millis() {
        let seconds = format_timestamp(Some(1_700_000_000));
        let millis = format_timestamp(Some(1_700_000_000_000));
        assert_eq!(seconds, millis);
        assert_eq!(format_timestamp(None), "Unknown date");
        assert_eq!(format_timestamp(Some(0)), "Unknown date");
    }

    #[test]
    fn test_days_in_crm() {
        let created = Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap();
        let now = Utc::now();
        let expected = (now - created).num_milliseconds().div_euclid(MILLIS_PER_DAY);

        assert_eq!(days_in_crm(Some(1_700_000_000_000), now), Some(expected));
        assert_eq!(days_in_crm(Some(1_700_000_000), now), Some(expected));
        assert_eq!(days_in_crm(None, now), None);
        assert_eq!(format_days(None), "Unknown");
    }

    #[test]
    fn test_days_in_crm_floors() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let ts = Some(created.timestamp());

        assert_eq!(days_in_crm(ts, created + Duration::hours(47)), Some(1));
        assert_eq!(days_in_crm(ts, created + Duration::hours(48)), Some(2));
        // A creation time in the future floors to -1, not 0
        assert_eq!(days_in_crm(ts, created - Duration::hours(1)), Some(-1));
    }

    #[test]
    fn test_classify_source_by_tag_and_source_name() {
        let tagged = lead(json!({"id": 1, "tags": ["Website Form"]}));
        assert_eq!(classify_source(&tagged), LeadSource::FormSubmission);

        let sourced = lead(json!({"id": 2, "source": {"id": 3, "name": "Website"}}));
        assert_eq!(classify_source(&sourced), LeadSource::FormSubmission);

        let manual = lead(json!({"id": 3, "tags": ["referral"], "source": {"name": "Email"}}));
        assert_eq!(classify_source(&manual), LeadSource::ManuallyAdded);
    }

    #[test]
    fn test_classify_source_by_populated_custom_fields() {
        let fields: Vec<Value> = (0..6)
            .map(|i| json!({"custom_field_definition_id": i, "value": format!("v{}", i)}))
            .collect();
        let six = lead(json!({"id": 1, "custom_fields": fields}));
        assert_eq!(classify_source(&six), LeadSource::FormSubmission);

        let mut sparse: Vec<Value> = (0..5)
            .map(|i| json!({"custom_field_definition_id": i, "value": "x"}))
            .collect();
        sparse.push(json!({"custom_field_definition_id": 9, "value": ""}));
        sparse.push(json!({"custom_field_definition_id": 10, "value": null}));
        let five = lead(json!({"id": 2, "custom_fields": sparse}));
        assert_eq!(classify_source(&five), LeadSource::ManuallyAdded);
    }

    #[test]
    fn test_lead_email_fallbacks() {
        let primary = lead(json!({"id": 1, "email": {"email": "a@x.com", "category": "work"}}));
        assert_eq!(lead_email(&primary), "a@x.com");

        let listed = lead(json!({"id": 2, "emails": [{"category": "work"}, {"email": "b@x.com"}]}));
        assert_eq!(lead_email(&listed), "b@x.com");

        let contact = lead(json!({"id": 3, "contact_info": {"email": "c@x.com"}}));
        assert_eq!(lead_email(&contact), "c@x.com");

        assert_eq!(lead_email(&lead(json!({"id": 4}))), "");
    }

    #[test]
    fn test_form_details_order_and_fallbacks() {
        let lead = lead(json!({
            "id": 1,
            "first_name": "Grace",
            "company_name": "Hopper Energy",
            "address": {"street": "1 Main St", "city": "Vancouver", "country": "Canada"},
            "custom_fields": [
                {"custom_field_definition_id": 328941, "value": 2019},
                {"custom_field_definition_id": 328943, "value": 7, "computed_value": "Subscription"},
                {"custom_field_definition_id": 328937, "value": ""}
            ]
        }));

        let details = form_details(&lead, FIELD_ID_MAPPING);
        assert_eq!(details.len(), FORM_FIELD_ORDER.len());

        let get = |label: &str| {
            details
                .iter()
                .find(|(l, _)| *l == label)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };
        assert_eq!(details[0].0, "First Name");
        assert_eq!(get("First Name"), "Grace");
        assert_eq!(get("Last Name"), NOT_PROVIDED);
        assert_eq!(get("HQ Address"), "1 Main St, Vancouver, Canada");
        assert_eq!(get("Address Line 2"), NOT_PROVIDED);
        assert_eq!(get("Year Founded"), "2019");
        assert_eq!(get("Revenue Model"), "Subscription");
        assert_eq!(get("Last year's revenue"), NOT_PROVIDED);
        assert_eq!(get("Cash on hand"), NOT_PROVIDED);
    }

    #[test]
    fn test_has_form_data() {
        let filled = lead(json!({"id": 1, "custom_fields": [{"value": ""}, {"value": 0}]}));
        assert!(has_form_data(&filled));

        let empty = lead(json!({"id": 2, "custom_fields": [{"value": ""}, {"value": null}]}));
        assert!(!has_form_data(&empty));
        assert!(!has_form_data(&lead(json!({"id": 3}))));

        let map_filled = lead(json!({"id": 4, "custom_fields": {"Year Founded": "2019", "Stage": null}}));
        assert!(has_form_data(&map_filled));

        let map_empty = lead(json!({"id": 5, "custom_fields": {"Year Founded": "", "Stage": null}}));
        assert!(!has_form_data(&map_empty));
    }

    #[test]
    fn test_format_record() {
        let record = json!({
            "name": "Ada",
            "tags": ["a"],
            "id": 5,
            "date_created": 1_700_000_000
        });
        let text = format_record(record.as_object().unwrap());

        assert!(text.contains("name: Ada\n"));
        assert!(text.contains("id: 5\n"));
        assert!(text.contains("tags:\n[\n    \"a\"\n]\n"));
        assert!(text.contains(&format!("date_created: {}\n", format_timestamp(Some(1_700_000_000)))));
    }

    #[test]
    fn test_format_record_keeps_api_order() {
        let record: Map<String, Value> =
            serde_json::from_str(r#"{"name": "Ada", "tags": [], "id": 5, "assignee_id": null}"#).unwrap();
        let text = format_record(&record);

        let position = |field: &str| text.find(&format!("{}:", field)).unwrap();
        assert!(position("name") < position("tags"));
        assert!(position("tags") < position("id"));
        assert!(position("id") < position("assignee_id"));
    }

    #[test]
    fn test_mapping_code_escapes_names() {
        let definitions = vec![CustomFieldDefinition {
            id: 328937,
            name: "Last year's \"revenue\"".to_string(),
            data_type: Some("String".to_string()),
            available_values: vec![],
        }];

        let code = mapping_code(&definitions);
        assert!(code.starts_with("pub const FIELD_ID_MAPPING"));
        assert!(code.contains("(\"Last year's \\\"revenue\\\"\", 328937),"));
    }
}
