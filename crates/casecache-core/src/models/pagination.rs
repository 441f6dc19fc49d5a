use serde::{Deserialize, Serialize};

/// Paging metadata, always recomputed from the authoritative collection
/// length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl PaginationMeta {
    /// Derive metadata for a 1-based `page` of `limit` items out of `total`.
    /// A zero page or limit is clamped to 1.
    pub fn derive(total: usize, page: usize, limit: usize) -> Self {
        let page = page.max(1);
        let limit = limit.max(1);
        let total_pages = if total == 0 {
            1
        } else {
            total.div_ceil(limit)
        };

        Self {
            total,
            page,
            limit,
            total_pages,
            has_next_page: page.saturating_mul(limit) < total,
            has_previous_page: page > 1,
        }
    }

    /// Index range of this page within the collection.
    pub fn range(&self) -> std::ops::Range<usize> {
        let start = (self.page - 1).saturating_mul(self.limit).min(self.total);
        let end = start.saturating_add(self.limit).min(self.total);
        start..end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub meta: PaginationMeta,
}

/// Slice one page out of a fully assembled collection.
pub fn paginate<T: Clone>(items: &[T], page: usize, limit: usize) -> Page<T> {
    let meta = PaginationMeta::derive(items.len(), page, limit);
    Page {
        items: items[meta.range()].to_vec(),
        meta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_middle_page() {
        let meta = PaginationMeta::derive(45, 2, 20);
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_next_page);
        assert!(meta.has_previous_page);
    }

    #[test]
    fn test_derive_last_page() {
        let meta = PaginationMeta::derive(45, 3, 20);
        assert_eq!(meta.total_pages, 3);
        assert!(!meta.has_next_page);
        assert!(meta.has_previous_page);
    }

    #[test]
    fn test_derive_empty_collection() {
        let meta = PaginationMeta::derive(0, 1, 20);
        assert_eq!(meta.total_pages, 1);
        assert!(!meta.has_next_page);
        assert!(!meta.has_previous_page);
    }

    #[test]
    fn test_derive_exact_multiple() {
        let meta = PaginationMeta::derive(40, 2, 20);
        assert_eq!(meta.total_pages, 2);
        assert!(!meta.has_next_page);
    }

    #[test]
    fn test_derive_clamps_zero_inputs() {
        let meta = PaginationMeta::derive(5, 0, 0);
        assert_eq!(meta.page, 1);
        assert_eq!(meta.limit, 1);
        assert_eq!(meta.total_pages, 5);
    }

    #[test]
    fn test_paginate_slices_items() {
        let items: Vec<u32> = (1..=45).collect();
        let page = paginate(&items, 3, 20);
        assert_eq!(page.items, (41..=45).collect::<Vec<_>>());

        let beyond = paginate(&items, 9, 20);
        assert!(beyond.items.is_empty());
        assert!(!beyond.meta.has_next_page);
    }

    #[test]
    fn test_meta_serializes_camel_case() {
        let value = serde_json::to_value(PaginationMeta::derive(1, 1, 10)).unwrap();
        assert_eq!(value["totalPages"], 1);
        assert_eq!(value["hasNextPage"], false);
    }
}
