//! Pagination parameters for record listings.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Largest page size a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// A validated page request (1-based page number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPageRequest")]
pub struct PageRequest {
    page: u32,
    limit: u32,
}

impl PageRequest {
    /// Validate page and limit.
    pub fn new(page: u32, limit: u32) -> Result<Self, ValidationError> {
        if page < 1 {
            return Err(ValidationError::new("page", "page must be at least 1"));
        }
        if limit < 1 {
            return Err(ValidationError::new("limit", "limit must be at least 1"));
        }
        if limit > MAX_PAGE_LIMIT {
            return Err(ValidationError::new("limit", "limit cannot exceed 100"));
        }
        Ok(Self { page, limit })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Rows to skip before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    /// Number of pages needed for `total` rows.
    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(u64::from(self.limit))
    }
}

/// Unchecked wire form of [`PageRequest`].
#[derive(Deserialize)]
struct RawPageRequest {
    page: u32,
    limit: u32,
}

impl TryFrom<RawPageRequest> for PageRequest {
    type Error = ValidationError;

    fn try_from(raw: RawPageRequest) -> Result<Self, Self::Error> {
        Self::new(raw.page, raw.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}
