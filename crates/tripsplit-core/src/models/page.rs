use serde::{Deserialize, Serialize};

use super::Identified;

/// One page of a paginated list response.
///
/// The backend names the item array after the entity (`trips`, `expenses`);
/// both are accepted as `items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct Page<T> {
    #[serde(alias = "trips", alias = "expenses")]
    pub items: Vec<T>,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    pub total: u64,
}

fn first_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    super::DEFAULT_PAGE_SIZE
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, page_size: u32, total: u64) -> Self {
        Self {
            items,
            page,
            page_size,
            total,
        }
    }

    /// True when the server holds items beyond this page.
    pub fn has_more(&self) -> bool {
        (self.page as u64) * (self.page_size as u64) < self.total
    }
}

impl<T: Identified> Page<T> {
    pub fn find(&self, id: i64) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// Rows written locally and not yet confirmed by the server.
    pub fn pending(&self) -> impl Iterator<Item = &T> {
        self.items.iter().filter(|item| item.is_optimistic())
    }
}

/// Pages of an infinite list, in fetch order.
///
/// Concatenating the pages' items yields the retrieved prefix of the server
/// ordering. The most recent page's `total` is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct PageCollection<T> {
    pub pages: Vec<Page<T>>,
}

impl<T> Default for PageCollection<T> {
    fn default() -> Self {
        Self { pages: Vec::new() }
    }
}

impl<T> PageCollection<T> {
    pub fn from_first(page: Page<T>) -> Self {
        Self { pages: vec![page] }
    }

    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.pages.iter().flat_map(|p| p.items.iter())
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(|p| p.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total(&self) -> Option<u64> {
        self.pages.last().map(|p| p.total)
    }

    pub fn has_next_page(&self) -> bool {
        self.pages.last().map(Page::has_more).unwrap_or(false)
    }

    /// Page number a `fetch_next_page` would request.
    pub fn next_page_number(&self) -> u32 {
        self.pages.last().map(|p| p.page + 1).unwrap_or(1)
    }

    pub fn find(&self, id: i64) -> Option<&T>
    where
        T: Identified,
    {
        self.items().find(|item| item.id() == id)
    }

    /// Append a page. Refused unless it is exactly the page after the last.
    pub fn append(&mut self, page: Page<T>) -> bool {
        if page.page != self.next_page_number() {
            return false;
        }
        self.pages.push(page);
        true
    }
}
