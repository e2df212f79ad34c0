//! Site profile: the fixed URL, form field names and labels the retrieval
//! protocol works against. Markup changes on the source site are handled by
//! editing these values, never at runtime.

use serde::Deserialize;

/// Target site and form layout for the carrier search.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    /// Search entry page; the form posts back to the same URL.
    pub url: String,
    /// Name of the "search by identifier type" control.
    pub search_mode_field: String,
    /// Value selecting MC-number search.
    pub search_mode_value: String,
    /// Name of the text input receiving the key.
    pub query_field: String,
    /// Name and value of the search button.
    pub submit_field: String,
    pub submit_value: String,
    /// Text shown by the source when no carrier matches the key.
    pub not_found_marker: String,
    pub labels: FieldLabels,
}

/// Row labels used to locate each record field on the result page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FieldLabels {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub status: String,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            url: "https://safer.fmcsa.dot.gov/CompanySnapshot.aspx".to_string(),
            search_mode_field: "ctl00$MainContent$searchType".to_string(),
            search_mode_value: "MC".to_string(),
            query_field: "ctl00$MainContent$txtMC".to_string(),
            submit_field: "ctl00$MainContent$btnSearch".to_string(),
            submit_value: "Search".to_string(),
            not_found_marker: "Record Not Found".to_string(),
            labels: FieldLabels::default(),
        }
    }
}

impl Default for FieldLabels {
    fn default() -> Self {
        Self {
            name: "Legal Name".to_string(),
            phone: "Phone".to_string(),
            address: "Physical Address".to_string(),
            status: "Operating Status".to_string(),
        }
    }
}
