//! Page/limit arithmetic shared by every list endpoint.

use serde::{Deserialize, Serialize};

use crate::config::PaginationConfig;

/// Raw `page`/`limit` values as supplied by a client.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageRequest {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Sanitized page window used to build `LIMIT ? OFFSET ?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Pagination metadata returned alongside a page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

/// A page of results in the `{ data, pagination }` envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl PageRequest {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self { page, limit }
    }

    /// Clamp `page` to >= 1 and `limit` to `[1, max_limit]`.
    ///
    /// Pages beyond the last one are not clamped; they simply yield no rows.
    /// `page` is capped where `(page - 1) * limit` would leave `i64`.
    pub fn window(&self, cfg: &PaginationConfig) -> PageWindow {
        let limit = self
            .limit
            .unwrap_or(cfg.default_limit)
            .clamp(1, cfg.max_limit);
        let page = self.page.unwrap_or(1).clamp(1, i64::MAX / limit);
        PageWindow {
            page,
            limit,
            offset: (page - 1) * limit,
        }
    }
}

impl PageWindow {
    pub fn paginate<T>(&self, data: Vec<T>, total: i64) -> Page<T> {
        Page {
            data,
            pagination: Pagination {
                page: self.page,
                limit: self.limit,
                total,
                total_pages: (total + self.limit - 1) / self.limit,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PaginationConfig {
        PaginationConfig {
            default_limit: 20,
            max_limit: 100,
        }
    }

    #[test]
    fn test_defaults() {
        let w = PageRequest::default().window(&cfg());
        assert_eq!(w, PageWindow { page: 1, limit: 20, offset: 0 });
    }

    #[test]
    fn test_offset_for_later_page() {
        let w = PageRequest::new(Some(3), Some(10)).window(&cfg());
        assert_eq!(w.offset, 20);
    }

    #[test]
    fn test_page_below_one_clamped() {
        let w = PageRequest::new(Some(-4), None).window(&cfg());
        assert_eq!(w.page, 1);
        assert_eq!(w.offset, 0);
    }

    #[test]
    fn test_limit_clamped_to_bounds() {
        assert_eq!(PageRequest::new(None, Some(5000)).window(&cfg()).limit, 100);
        assert_eq!(PageRequest::new(None, Some(0)).window(&cfg()).limit, 1);
    }

    #[test]
    fn test_total_pages_rounds_up() {
        let w = PageRequest::new(Some(1), Some(20)).window(&cfg());
        let page = w.paginate(vec![1, 2, 3], 41);
        assert_eq!(page.pagination.total_pages, 3);

        let empty: Page<i32> = w.paginate(vec![], 0);
        assert_eq!(empty.pagination.total_pages, 0);
    }

    #[test]
    fn test_huge_page_does_not_overflow() {
        let w = PageRequest::new(Some(i64::MAX), Some(10)).window(&cfg());
        assert_eq!(w.page, i64::MAX / 10);
        assert!(w.offset > 0);
        assert_eq!(w.offset, (w.page - 1) * 10);

        let w = PageRequest::new(Some(i64::MAX), Some(1)).window(&cfg());
        assert_eq!(w.offset, i64::MAX - 1);
    }

    #[test]
    fn test_page_past_end_not_clamped() {
        let w = PageRequest::new(Some(9), Some(10)).window(&cfg());
        assert_eq!(w.page, 9);
        assert_eq!(w.offset, 80);
    }
}
