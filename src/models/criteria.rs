//! Search criteria accepted by scraper plugins.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// What the caller is searching for across platforms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Free-text query, typically artist/team/event name.
    pub query: String,
    /// Restrict results to a city, if the platform supports it.
    pub city: Option<String>,
    /// Earliest acceptable event date.
    pub date_from: Option<NaiveDate>,
    /// Latest acceptable event date.
    pub date_to: Option<NaiveDate>,
    /// Cap on returned candidates per platform.
    pub max_results: Option<usize>,
    /// The caller knows this is a presale window.
    pub presale: bool,
}

impl SearchCriteria {
    pub fn for_query(query: &str) -> Self {
        Self {
            query: query.to_string(),
            ..Default::default()
        }
    }

    /// True when the criteria use a date filter.
    pub fn has_date_filter(&self) -> bool {
        self.date_from.is_some() || self.date_to.is_some()
    }
}
