//! Blocking client for the CRM's developer REST API.
//!
//! Every call is a single request: build the payload, send it with the static
//! authentication headers, branch on the status code, decode the JSON body.

use std::time::Duration;

use log::{debug, error, info};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::CrmSettings;
use crate::records::{Activity, CustomFieldDefinition, Lead, Opportunity, ParentRef};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const APPLICATION: &str = "developer_api";

const ACCESS_TOKEN_HEADER: &str = "x-pw-accesstoken";
const USER_EMAIL_HEADER: &str = "x-pw-useremail";
const APPLICATION_HEADER: &str = "x-pw-application";

#[derive(Error, Debug)]
pub enum CrmError {
    #[error("CRM API credentials not configured. Set COPPER_API_TOKEN and COPPER_EMAIL.")]
    NotConfigured,

    #[error("Authentication failed with the CRM API. Check the API token and user email.")]
    Unauthorized,

    #[error("API error: {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Failed to decode CRM response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

impl From<reqwest::Error> for CrmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CrmError::Timeout(err.to_string())
        } else if err.is_connect() {
            CrmError::Connection(err.to_string())
        } else {
            CrmError::Request(err.to_string())
        }
    }
}

/// Maps a response status to the error the caller sees. Only 2xx passes.
pub fn check_status(status: u16, body: &str) -> Result<(), CrmError> {
    match status {
        200..=299 => Ok(()),
        401 => Err(CrmError::Unauthorized),
        _ => Err(CrmError::Api {
            status,
            body: body.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LeadSearch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_direction: Option<SortDirection>,
}

impl LeadSearch {
    /// The `count` most recently created leads, newest first.
    pub fn recent(count: u32) -> Self {
        Self {
            page_size: Some(count),
            page_number: None,
            sort_by: Some("date_created".to_string()),
            sort_direction: Some(SortDirection::Desc),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivitySearch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_result: Option<bool>,
}

impl ActivitySearch {
    pub fn recent(page_size: u32) -> Self {
        Self {
            parent: None,
            page_size: Some(page_size),
            full_result: Some(true),
        }
    }

    pub fn for_parent(parent: ParentRef, page_size: u32) -> Self {
        Self {
            parent: Some(parent),
            page_size: Some(page_size),
            full_result: None,
        }
    }
}

pub struct CrmClient {
    base_url: String,
    http: Client,
}

impl CrmClient {
    pub fn new(settings: &CrmSettings) -> Result<Self, CrmError> {
        if !settings.is_configured() {
            return Err(CrmError::NotConfigured);
        }

        let mut headers = HeaderMap::new();
        let mut token = HeaderValue::from_str(&settings.api_token)?;
        token.set_sensitive(true);
        headers.insert(HeaderName::from_static(ACCESS_TOKEN_HEADER), token);
        headers.insert(
            HeaderName::from_static(USER_EMAIL_HEADER),
            HeaderValue::from_str(&settings.user_email)?,
        );
        headers.insert(
            HeaderName::from_static(APPLICATION_HEADER),
            HeaderValue::from_static(APPLICATION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn read<T: DeserializeOwned>(response: Response) -> Result<T, CrmError> {
        let status = response.status().as_u16();
        info!("Response status code: {}", status);
        let body = response.text()?;

        if let Err(e) = check_status(status, &body) {
            error!("Error response from CRM: {}", e);
            return Err(e);
        }

        Ok(serde_json::from_str(&body)?)
    }

    fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, CrmError> {
        let url = self.url(path);
        debug!("GET {} {:?}", url, query);
        let response = self.http.get(&url).query(query).send()?;
        Self::read(response)
    }

    fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, CrmError> {
        let url = self.url(path);
        debug!("POST {}", url);
        let response = self.http.post(&url).json(body).send()?;
        Self::read(response)
    }

    /// Lead search returning records exactly as the API sent them.
    pub fn search_leads_raw(&self, search: &LeadSearch) -> Result<Vec<Map<String, Value>>, CrmError> {
        info!("Searching leads: {:?}", search);
        self.post("leads/search", search)
    }

    pub fn search_leads(&self, search: &LeadSearch) -> Result<Vec<Lead>, CrmError> {
        let leads: Vec<Lead> = self.post("leads/search", search)?;
        info!("Fetched {} leads", leads.len());
        Ok(leads)
    }

    /// Full lead record, with dropdown-style custom fields resolved to
    /// their display values.
    pub fn get_lead(&self, id: i64) -> Result<Lead, CrmError> {
        let lead = self.get(
            &format!("leads/{}", id),
            &[("custom_field_computed_values", "true")],
        )?;
        info!("Fetched details for lead ID: {}", id);
        Ok(lead)
    }

    /// Opportunity record exactly as the API sent it, field order and
    /// number formatting included.
    pub fn get_opportunity_raw(&self, id: i64) -> Result<Map<String, Value>, CrmError> {
        self.get(&format!("opportunities/{}", id), &[])
    }

    pub fn get_opportunity(&self, id: i64) -> Result<Opportunity, CrmError> {
        let record = self.get_opportunity_raw(id)?;
        Ok(serde_json::from_value(Value::Object(record))?)
    }

    pub fn search_activities(&self, search: &ActivitySearch) -> Result<Vec<Activity>, CrmError> {
        let activities: Vec<Activity> = self.post("activities/search", search)?;
        info!("Fetched {} activities", activities.len());
        Ok(activities)
    }

    pub fn custom_field_definitions(&self) -> Result<Vec<CustomFieldDefinition>, CrmError> {
        let definitions: Vec<CustomFieldDefinition> = self.get("custom_field_definitions", &[])?;
        info!("Fetched {} custom field definitions", definitions.len());
        Ok(definitions)
    }

    /// Credential check: a single-record lead search.
    pub fn verify(&self) -> Result<String, CrmError> {
        let single = LeadSearch {
            page_size: Some(1),
            ..LeadSearch::default()
        };
        self.search_leads_raw(&single)?;
        Ok("CRM API configuration verified successfully!".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::format_record;
    use crate::test_support::FakeCrm;
    use serde_json::json;

    fn settings() -> CrmSettings {
        CrmSettings {
            api_url: "https://crm.example.com/developer_api/v1/".to_string(),
            api_token: "token-1234567890".to_string(),
            user_email: "ops@example.com".to_string(),
        }
    }

    #[test]
    fn test_check_status_branches() {
        assert!(check_status(200, "[]").is_ok());
        assert!(matches!(check_status(401, "nope"), Err(CrmError::Unauthorized)));

        match check_status(422, "bad sort field") {
            Err(CrmError::Api { status, body }) => {
                assert_eq!(status, 422);
                assert_eq!(body, "bad sort field");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_recent_lead_search_payload() {
        let payload = serde_json::to_value(LeadSearch::recent(3)).unwrap();
        assert_eq!(
            payload,
            json!({"page_size": 3, "sort_by": "date_created", "sort_direction": "desc"})
        );

        let empty = serde_json::to_value(LeadSearch::default()).unwrap();
        assert_eq!(empty, json!({}));
    }

    #[test]
    fn test_activity_search_payloads() {
        let recent = serde_json::to_value(ActivitySearch::recent(25)).unwrap();
        assert_eq!(recent, json!({"page_size": 25, "full_result": true}));

        let scoped =
            serde_json::to_value(ActivitySearch::for_parent(ParentRef::opportunity(33762876), 10))
                .unwrap();
        assert_eq!(
            scoped,
            json!({"parent": {"id": 33762876, "type": "opportunity"}, "page_size": 10})
        );
    }

    #[test]
    fn test_client_requires_credentials() {
        let mut unconfigured = settings();
        unconfigured.api_token.clear();
        assert!(matches!(
            CrmClient::new(&unconfigured),
            Err(CrmError::NotConfigured)
        ));
    }

    #[test]
    fn test_opportunity_keeps_api_fields() {
        let crm = FakeCrm::start(vec![(
            "GET /v1/opportunities/33762876",
            json!({
                "name": "Hopper Energy Seed",
                "id": 33762876,
                "monetary_value": 1000,
                "status": "Open"
            }),
        )]);
        let client = CrmClient::new(&CrmSettings {
            api_url: crm.url.clone(),
            ..settings()
        })
        .unwrap();

        let record = client.get_opportunity_raw(33762876).unwrap();
        assert_eq!(record["monetary_value"], json!(1000));
        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["name", "id", "monetary_value", "status"]);

        let text = format_record(&record);
        assert!(text.starts_with("name: Hopper Energy Seed\n"));
        assert!(text.contains("monetary_value: 1000\n"));

        let typed = client.get_opportunity(33762876).unwrap();
        assert_eq!(typed.status.as_deref(), Some("Open"));
        assert_eq!(typed.monetary_value, Some(1000.0));
        assert_eq!(crm.count("GET /v1/opportunities/33762876"), 2);
    }

    #[test]
    fn test_unknown_record_is_api_error() {
        let crm = FakeCrm::start(Vec::new());
        let client = CrmClient::new(&CrmSettings {
            api_url: crm.url.clone(),
            ..settings()
        })
        .unwrap();

        match client.get_opportunity_raw(1) {
            Err(CrmError::Api { status, body }) => {
                assert_eq!(status, 404);
                assert!(body.contains("Resource not found"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_client_urls() {
        let client = CrmClient::new(&settings()).unwrap();
        assert_eq!(client.base_url(), "https://crm.example.com/developer_api/v1");
        assert_eq!(
            client.url("/leads/search"),
            "https://crm.example.com/developer_api/v1/leads/search"
        );
    }
}
