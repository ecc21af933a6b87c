//! Field mappings between source columns and host display names

use serde::{Deserialize, Serialize};

use super::resource::Field;

/// Display alias for one source field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(rename = "mysqlField")]
    pub source_field: String,
    #[serde(rename = "aliasField")]
    pub display_alias: String,
}

/// Ordered mapping list, one entry per field, keyed by source field name
///
/// The list is only ever rebuilt from a field list, so it can neither hold
/// duplicates nor drift out of the fields' order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMappings {
    entries: Vec<FieldMapping>,
}

impl FieldMappings {
    /// One mapping per distinct field name, alias defaulting to the name
    pub fn from_fields(fields: &[Field]) -> Self {
        let mut entries: Vec<FieldMapping> = Vec::with_capacity(fields.len());
        for field in fields {
            if entries.iter().any(|m| m.source_field == field.name) {
                continue;
            }
            entries.push(FieldMapping {
                source_field: field.name.clone(),
                display_alias: field.name.clone(),
            });
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn as_slice(&self) -> &[FieldMapping] {
        &self.entries
    }

    pub fn get(&self, source_field: &str) -> Option<&FieldMapping> {
        self.entries.iter().find(|m| m.source_field == source_field)
    }

    /// Set the alias of one field. Returns false when the field is unknown.
    pub fn set_alias(&mut self, source_field: &str, alias: impl Into<String>) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|m| m.source_field == source_field)
        {
            Some(mapping) => {
                mapping.display_alias = alias.into();
                true
            }
            None => false,
        }
    }

    /// Copy one field's description into its alias, if it has one
    pub fn apply_description(&mut self, fields: &[Field], source_field: &str) -> bool {
        match description_of(fields, source_field) {
            Some(description) => self.set_alias(source_field, description),
            None => false,
        }
    }

    /// Copy every available description into the matching alias
    ///
    /// Returns how many aliases were replaced; entries without a described
    /// source field are left as they are.
    pub fn apply_all_descriptions(&mut self, fields: &[Field]) -> usize {
        let mut applied = 0;
        for mapping in &mut self.entries {
            if let Some(description) = description_of(fields, &mapping.source_field) {
                mapping.display_alias = description.to_string();
                applied += 1;
            }
        }
        applied
    }

    pub fn to_vec(&self) -> Vec<FieldMapping> {
        self.entries.clone()
    }
}

fn description_of<'a>(fields: &'a [Field], source_field: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|f| f.name == source_field)
        .and_then(|f| f.description.as_deref())
        .filter(|d| !d.is_empty())
}
