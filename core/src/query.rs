//! Build list filters and their rendering into a server build locator.
//!
//! The server filters `GET /app/rest/builds` through a single `locator`
//! query parameter made of comma-separated `dimension:value` pairs. Only the
//! dimensions the caller set are rendered. A value that contains locator
//! syntax (`,` `:` `(` `)`) is sent in the nested `(value)` form so it cannot
//! add dimensions of its own.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::error::{BuildServerError, Result};

/// Terminal build status accepted by the list filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Success,
    Failure,
    Unknown,
}

impl BuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Success => "SUCCESS",
            BuildStatus::Failure => "FAILURE",
            BuildStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = BuildServerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(BuildStatus::Success),
            "FAILURE" => Ok(BuildStatus::Failure),
            "UNKNOWN" => Ok(BuildStatus::Unknown),
            _ => Err(BuildServerError::invalid_argument(format!(
                "status {s:?} not supported, accepted values [SUCCESS FAILURE UNKNOWN]"
            ))),
        }
    }
}

/// Case-insensitive status normalization.
pub fn normalize_status(input: &str) -> Result<BuildStatus> {
    input.parse()
}

/// Offset of a 1-based page. Pages 0 and 1 both start at offset 0.
pub fn page_offset(page: u32, count: u32) -> u32 {
    page.saturating_sub(1).saturating_mul(count)
}

/// Filter criteria for listing builds. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildListQuery {
    pub pipeline_id: Option<String>,
    pub branch: Option<String>,
    pub user: Option<String>,
    pub status: Option<BuildStatus>,
    pub running: bool,
    pub cancelled: bool,
    pub start: Option<u32>,
    pub count: Option<u32>,
    pub lookup_limit: Option<u32>,
}

impl BuildListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pipeline(mut self, pipeline_id: impl Into<String>) -> Self {
        self.pipeline_id = Some(pipeline_id.into());
        self
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the status filter from free-form input, normalizing its case.
    pub fn status(mut self, status: &str) -> Result<Self> {
        self.status = Some(normalize_status(status)?);
        Ok(self)
    }

    pub fn running(mut self, running: bool) -> Self {
        self.running = running;
        self
    }

    pub fn cancelled(mut self, cancelled: bool) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Paginate by 1-based page number and page size.
    pub fn with_page(mut self, page: u32, count: u32) -> Self {
        self.start = Some(page_offset(page, count));
        self.count = Some(count);
        self
    }

    pub fn lookup_limit(mut self, limit: u32) -> Self {
        self.lookup_limit = Some(limit);
        self
    }

    /// Render the build locator, or `None` if no filter is set.
    ///
    /// Fails with `InvalidArgument` when a value has unbalanced parentheses,
    /// since no quoting form can carry it.
    pub fn locator(&self) -> Result<Option<String>> {
        let mut dims: Vec<String> = Vec::new();
        if let Some(pipeline) = non_blank(&self.pipeline_id) {
            dims.push(format!("buildType:{}", locator_value(pipeline)?));
        }
        if let Some(branch) = non_blank(&self.branch) {
            dims.push(format!("branch:{}", locator_value(branch)?));
        }
        if let Some(user) = non_blank(&self.user) {
            dims.push(format!("user:{}", locator_value(user)?));
        }
        if let Some(status) = self.status {
            dims.push(format!("status:{status}"));
        }
        if self.running {
            dims.push("running:true".to_string());
        }
        if self.cancelled {
            dims.push("canceled:true".to_string());
        }
        if let Some(start) = self.start {
            dims.push(format!("start:{start}"));
        }
        if let Some(count) = self.count.filter(|c| *c > 0) {
            dims.push(format!("count:{count}"));
        }
        if let Some(limit) = self.lookup_limit.filter(|l| *l > 0) {
            dims.push(format!("lookupLimit:{limit}"));
        }
        Ok((!dims.is_empty()).then(|| dims.join(",")))
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn locator_value(value: &str) -> Result<Cow<'_, str>> {
    if !value.contains(|c: char| matches!(c, ',' | ':' | '(' | ')')) {
        return Ok(Cow::Borrowed(value));
    }
    let mut depth: i32 = 0;
    for c in value.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(BuildServerError::invalid_argument(format!(
            "filter value {value:?} has unbalanced parentheses"
        )));
    }
    Ok(Cow::Owned(format!("({value})")))
}
