//! Pagination helpers shared by the order list and category listing.

use serde::Serialize;

/// Number of page links shown at once.
pub const PAGE_WINDOW: u32 = 5;

/// Page numbers to link to around `current`.
///
/// Shows every page when there are fewer than five, the first five near the
/// start, the last five near the end, and `current - 2 ..= current + 2`
/// otherwise.
#[must_use]
pub fn page_window(current: u32, total: u32) -> Vec<u32> {
    if total < PAGE_WINDOW {
        (1..=total).collect()
    } else if current <= 3 {
        (1..=PAGE_WINDOW).collect()
    } else if total.saturating_sub(current) <= 2 {
        (total - PAGE_WINDOW + 1..=total).collect()
    } else {
        (current - 2..=current + 2).collect()
    }
}

/// Splits a result set of `total_items` into pages of `per_page`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Paginator {
    pub total_items: u64,
    pub per_page: u32,
}

impl Paginator {
    #[must_use]
    pub const fn new(total_items: u64, per_page: u32) -> Self {
        Self {
            total_items,
            per_page,
        }
    }

    /// Number of pages, never less than one so an empty listing still renders.
    #[must_use]
    pub fn num_pages(&self) -> u32 {
        if self.per_page == 0 || self.total_items == 0 {
            return 1;
        }
        let pages = self.total_items.div_ceil(u64::from(self.per_page));
        u32::try_from(pages).unwrap_or(u32::MAX)
    }

    /// Falls back to the first page when `page` is out of range.
    #[must_use]
    pub fn clamp_page(&self, page: u32) -> u32 {
        if page == 0 || page > self.num_pages() {
            1
        } else {
            page
        }
    }

    /// Row offset of the first item on `page` (1-based).
    #[must_use]
    pub fn offset(&self, page: u32) -> i64 {
        i64::from(page.saturating_sub(1)) * i64::from(self.per_page)
    }

    #[must_use]
    pub fn window(&self, page: u32) -> Vec<u32> {
        page_window(page, self.num_pages())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_few_pages() {
        assert_eq!(page_window(1, 1), vec![1]);
        assert_eq!(page_window(2, 4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_window_near_start() {
        assert_eq!(page_window(1, 10), vec![1, 2, 3, 4, 5]);
        assert_eq!(page_window(3, 10), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_window_near_end() {
        assert_eq!(page_window(8, 10), vec![6, 7, 8, 9, 10]);
        assert_eq!(page_window(10, 10), vec![6, 7, 8, 9, 10]);
        assert_eq!(page_window(5, 5), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_window_middle() {
        assert_eq!(page_window(5, 10), vec![3, 4, 5, 6, 7]);
        assert_eq!(page_window(7, 10), vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_paginator() {
        let p = Paginator::new(23, 10);
        assert_eq!(p.num_pages(), 3);
        assert_eq!(p.clamp_page(0), 1);
        assert_eq!(p.clamp_page(3), 3);
        assert_eq!(p.clamp_page(4), 1);
        assert_eq!(p.offset(3), 20);
        assert_eq!(Paginator::new(0, 10).num_pages(), 1);
    }
}
