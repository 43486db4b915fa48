use chrono::{TimeZone, Utc};

use leadpass::fields::{
    classify_source, days_in_crm, definitions_table, form_details, has_form_data, lead_email,
    mapping_code, LeadSource, FIELD_ID_MAPPING, NOT_PROVIDED,
};
use leadpass::records::{CustomFieldDefinition, Lead};
use leadpass::templates::{EmailContext, RejectionReason, TemplateSet};

const FORM_LEAD: &str = include_str!("fixtures/form_lead.json");
const MANUAL_LEAD: &str = include_str!("fixtures/manual_lead.json");
const FIELD_DEFINITIONS: &str = include_str!("fixtures/field_definitions.json");

fn detail(details: &[(&'static str, String)], label: &str) -> String {
    details
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, value)| value.clone())
        .unwrap_or_else(|| panic!("missing form detail {}", label))
}

#[test]
fn form_lead_renders_form_details() {
    let lead: Lead = serde_json::from_str(FORM_LEAD).unwrap();
    let details = form_details(&lead, FIELD_ID_MAPPING);

    assert_eq!(details.len(), 27);
    assert_eq!(details[0], ("First Name", "Grace".to_string()));
    assert_eq!(detail(&details, "Email"), "grace@hopper.example");
    assert_eq!(detail(&details, "Website"), "https://hopper.example");
    assert_eq!(
        detail(&details, "HQ Address"),
        "1 Harbour St, Halifax, NS, B3H 1A1, Canada"
    );
    assert_eq!(detail(&details, "Province"), "NS");
    assert_eq!(detail(&details, "Address Line 2"), NOT_PROVIDED);
    assert_eq!(detail(&details, "Year Founded"), "2019");
    // Dropdowns show the computed value, not the option id
    assert_eq!(detail(&details, "How did you hear about us?"), "Newsletter");
    assert_eq!(detail(&details, "Number of full time employees"), "12");
    assert_eq!(detail(&details, "Cash on hand"), NOT_PROVIDED);
    assert_eq!(detail(&details, "Monthly net burn"), NOT_PROVIDED);

    assert!(has_form_data(&lead));
    assert_eq!(classify_source(&lead), LeadSource::FormSubmission);
    assert_eq!(lead.other.get("interaction_count"), Some(&serde_json::json!(3)));
}

#[test]
fn manual_lead_tolerates_odd_shapes() {
    let lead: Lead = serde_json::from_str(MANUAL_LEAD).unwrap();

    assert!(lead.websites.is_empty());
    assert!(lead.address.is_none());
    assert_eq!(lead_email(&lead), "ada@engine.example");
    assert!(!has_form_data(&lead));
    assert_eq!(classify_source(&lead), LeadSource::ManuallyAdded);

    let details = form_details(&lead, FIELD_ID_MAPPING);
    assert_eq!(detail(&details, "Last Name"), NOT_PROVIDED);
    assert_eq!(detail(&details, "HQ Address"), NOT_PROVIDED);
}

#[test]
fn seconds_and_millis_agree_on_days_in_crm() {
    let form: Lead = serde_json::from_str(FORM_LEAD).unwrap();
    let manual: Lead = serde_json::from_str(MANUAL_LEAD).unwrap();
    let now = Utc.with_ymd_and_hms(2023, 11, 24, 22, 13, 20).unwrap();

    assert_eq!(days_in_crm(form.date_created, now), Some(10));
    assert_eq!(days_in_crm(manual.date_created, now), Some(10));
}

#[test]
fn draft_from_fixture() {
    let lead: Lead = serde_json::from_str(FORM_LEAD).unwrap();
    let context = EmailContext::for_lead(&lead, "Jane", "Active Impact");
    let body = TemplateSet::builtin()
        .draft(RejectionReason::TooEarly, &context)
        .unwrap();

    assert!(body.starts_with("Hi Grace,\n\nThanks so much for reaching out to Active Impact!"));
    assert!(body.ends_with("\n\nWarmly,\nJane"));
    assert!(!body.contains('{'));
}

#[test]
fn field_definitions_table_and_mapping() {
    let definitions: Vec<CustomFieldDefinition> = serde_json::from_str(FIELD_DEFINITIONS).unwrap();

    // The value without a name is dropped
    assert_eq!(definitions[1].available_values.len(), 2);

    let table = definitions_table(&definitions);
    assert!(table.starts_with("Field ID"));
    assert!(table.contains("328940"));
    assert!(table.contains("Newsletter, Conference"));

    let code = mapping_code(&definitions);
    assert!(code.contains("(\"Year Founded\", 328941),"));
    assert!(code.contains("(\"How did you hear about us?\", 328940),"));
    assert!(code.trim_end().ends_with("];"));
}
