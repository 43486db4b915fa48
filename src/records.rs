use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// CRM records are unvalidated copies of whatever the API returns. Sub-objects
// whose shape does not match decode as absent instead of failing the record.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    let items = match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    };
    Ok(items)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailEntry {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Website {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhoneNumber {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

/// One entry of a list-shaped custom field container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldValue {
    #[serde(default)]
    pub custom_field_definition_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub computed_value: Option<Value>,
}

/// Leads carry custom fields either as a list of entries (the API's shape)
/// or as a plain name to value mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomFields {
    List(Vec<CustomFieldValue>),
    Map(Map<String, Value>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub date_created: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub email: Option<EmailEntry>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub emails: Vec<EmailEntry>,
    #[serde(default, deserialize_with = "lenient")]
    pub contact_info: Option<ContactInfo>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub websites: Vec<Website>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub phone_numbers: Vec<PhoneNumber>,
    #[serde(default, deserialize_with = "lenient")]
    pub address: Option<Address>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub source: Option<SourceRef>,
    #[serde(default, deserialize_with = "lenient")]
    pub custom_fields: Option<CustomFields>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Lead {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or("Unknown")
    }

    pub fn display_company(&self) -> &str {
        self.company_name
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or("Unknown Company")
    }

    pub fn first_phone(&self) -> Option<&str> {
        self.phone_numbers
            .iter()
            .filter_map(|p| p.number.as_deref())
            .find(|n| !n.is_empty())
    }

    pub fn first_website(&self) -> Option<&str> {
        self.websites
            .iter()
            .filter_map(|w| w.url.as_deref())
            .find(|u| !u.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub monetary_value: Option<f64>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Parent record reference used both in activity payloads and in search filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentRef {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ParentRef {
    pub fn opportunity(id: i64) -> Self {
        Self {
            id,
            kind: "opportunity".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Activity {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "type", default)]
    pub kind: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub parent: Option<ParentRef>,
    #[serde(default)]
    pub activity_date: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableValue {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub rank: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldDefinition {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub available_values: Vec<AvailableValue>,
}
