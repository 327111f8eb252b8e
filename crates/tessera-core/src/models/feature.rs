//! Feature catalog model

use serde::{Deserialize, Serialize};

/// Display names for a feature
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureDisplay {
    pub singular: Option<String>,
    pub plural: Option<String>,
}

/// A metered or boolean capability in an organization's catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    /// Internal primary key
    pub internal_id: String,

    /// Organization-facing identifier (e.g. "seats")
    pub id: String,

    pub name: String,

    pub org_id: String,

    #[serde(default)]
    pub display: Option<FeatureDisplay>,
}

impl Feature {
    /// Human readable name, singular or plural, optionally capitalized
    pub fn display_name(&self, plural: bool, capitalize: bool) -> String {
        let configured = self.display.as_ref().and_then(|d| {
            if plural {
                d.plural.clone()
            } else {
                d.singular.clone()
            }
        });

        let name = configured.unwrap_or_else(|| self.name.clone());
        if !capitalize {
            return name;
        }

        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => name,
        }
    }
}
