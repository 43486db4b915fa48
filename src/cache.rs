use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::crm::{CrmClient, CrmError};
use crate::fields::definition_names;
use crate::records::Lead;

/// Per-session memo of lead details and custom field definition names.
/// Nothing is evicted; `clear` drops everything on refresh.
#[derive(Debug, Default)]
pub struct LeadCache {
    details: HashMap<i64, Lead>,
    definitions: Option<HashMap<i64, String>>,
}

impl LeadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lead(&self, id: i64) -> Option<&Lead> {
        self.details.get(&id)
    }

    pub fn insert_lead(&mut self, lead: Lead) {
        self.details.insert(lead.id, lead);
    }

    pub fn lead_or_fetch(&mut self, id: i64, client: &CrmClient) -> Result<&Lead, CrmError> {
        match self.details.entry(id) {
            Entry::Occupied(entry) => Ok(&*entry.into_mut()),
            Entry::Vacant(entry) => {
                let lead = client.get_lead(id)?;
                Ok(&*entry.insert(lead))
            }
        }
    }

    pub fn definitions(&self) -> Option<&HashMap<i64, String>> {
        self.definitions.as_ref()
    }

    pub fn set_definitions(&mut self, definitions: HashMap<i64, String>) {
        self.definitions = Some(definitions);
    }

    pub fn definitions_or_fetch(&mut self, client: &CrmClient) -> Result<&HashMap<i64, String>, CrmError> {
        if self.definitions.is_none() {
            let fetched = client.custom_field_definitions()?;
            self.definitions = Some(definition_names(&fetched));
        }
        Ok(self.definitions.get_or_insert_with(HashMap::new))
    }

    pub fn len(&self) -> usize {
        self.details.len()
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    pub fn clear(&mut self) {
        self.details.clear();
        self.definitions = None;
    }
}
