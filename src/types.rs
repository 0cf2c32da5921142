//! Core types for house-photo-dl

use serde::{Deserialize, Serialize};

/// One house listing as returned by the house service
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct House {
    /// Listing identifier
    #[serde(default)]
    pub id: i64,

    /// Street address
    #[serde(default)]
    pub address: String,

    /// Name of the homeowner
    #[serde(default, rename = "homeowner")]
    pub owner: String,

    /// Asking price
    #[serde(default)]
    pub price: i64,

    /// Location of the listing photo
    #[serde(default, rename = "photoURL")]
    pub photo_url: String,
}

/// Body of a page response: `{"houses": [...]}`
#[derive(Debug, Deserialize)]
pub(crate) struct HousePage {
    pub(crate) houses: Vec<House>,
}

/// Parameters of a single page fetch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    /// Listing endpoint
    pub base_url: String,
    /// 1-based page number
    pub page: u32,
    /// Houses per page
    pub per_page: u32,
}

impl PageRequest {
    /// Create a request for `page` of `base_url`
    pub fn new(base_url: impl Into<String>, page: u32, per_page: u32) -> Self {
        Self {
            base_url: base_url.into(),
            page,
            per_page,
        }
    }

    /// Query parameters sent with the request
    pub fn query(&self) -> [(&'static str, u32); 2] {
        [("page", self.page), ("per_page", self.per_page)]
    }
}

/// Lifecycle of one pipeline run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Pages are being fetched and photos downloaded
    Running,
    /// Every page fetch has finished; remaining downloads are in flight
    Draining,
    /// Every launched download finished and no failure was reported
    Completed,
    /// A failure was reported; the run stopped waiting
    Failed,
}

impl RunState {
    /// Whether the run has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Running => "running",
            RunState::Draining => "draining",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}
