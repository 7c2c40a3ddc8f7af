//! Execution listing filters and label selectors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::execution::{Execution, ExecutionStatus};

/// Default number of executions per page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Filter applied when listing executions
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFilter {
    pub test_name: Option<String>,
    pub text_search: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub selector: Option<String>,
    pub page: usize,
    pub page_size: usize,
}

impl Default for ExecutionFilter {
    fn default() -> Self {
        Self {
            test_name: None,
            text_search: None,
            status: None,
            start_date: None,
            end_date: None,
            selector: None,
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ExecutionFilter {
    pub fn with_test_name(mut self, name: impl Into<String>) -> Self {
        self.test_name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    /// Same filter without the status constraint, used for overall totals
    pub fn without_status(&self) -> Self {
        Self {
            status: None,
            ..self.clone()
        }
    }

    pub fn matches(&self, execution: &Execution) -> bool {
        if let Some(test_name) = &self.test_name {
            if &execution.test_name != test_name {
                return false;
            }
        }
        if let Some(search) = &self.text_search {
            if !execution.name.contains(search.as_str()) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if execution.status() != status {
                return false;
            }
        }
        if let Some(from) = self.start_date {
            if execution.start_time.map(|t| t < from).unwrap_or(true) {
                return false;
            }
        }
        if let Some(to) = self.end_date {
            if execution.start_time.map(|t| t > to).unwrap_or(true) {
                return false;
            }
        }
        if let Some(selector) = &self.selector {
            if !matches_selector(&execution.labels, selector) {
                return false;
            }
        }
        true
    }

    /// Sort newest first and cut out the requested page
    pub fn paginate(&self, mut executions: Vec<Execution>) -> Vec<Execution> {
        executions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        let page_size = if self.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        };
        executions
            .into_iter()
            .skip(self.page * page_size)
            .take(page_size)
            .collect()
    }
}

/// Match labels against a selector such as `app=web,tier!=db,team`.
/// An empty selector matches everything.
pub fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                labels.get(key.trim()).map(String::as_str) != Some(value.trim())
            } else if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
                labels.get(key.trim()).map(String::as_str) == Some(value.trim())
            } else if let Some(key) = term.strip_prefix('!') {
                !labels.contains_key(key.trim())
            } else {
                labels.contains_key(term)
            }
        })
}
