//! Page cursor and fetched page.

use crate::error::{Result, SyncError};

pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Position in a paginated remote listing. Pages are 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCursor {
    page_size: u32,
    page_number: u32,
}

impl SyncCursor {
    pub fn new(page_size: u32) -> Result<Self> {
        if page_size == 0 {
            return Err(SyncError::InvalidSettings(
                "page_size must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            page_size,
            page_number: 1,
        })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page_number - 1) * u64::from(self.page_size)
    }

    /// Moves to the next page. Cursors never rewind.
    pub fn advance(&mut self) {
        self.page_number += 1;
    }
}

/// One fetched page.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePage<T> {
    pub items: Vec<T>,
    /// `true` when the page is shorter than the requested size
    pub is_last: bool,
}

impl<T> RemotePage<T> {
    pub fn new(items: Vec<T>, page_size: u32) -> Self {
        let is_last = items.len() < page_size as usize;
        Self { items, is_last }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_follows_page_number() {
        let mut cursor = SyncCursor::new(250).unwrap();
        assert_eq!(cursor.page_number(), 1);
        assert_eq!(cursor.offset(), 0);

        cursor.advance();
        cursor.advance();
        assert_eq!(cursor.page_number(), 3);
        assert_eq!(cursor.offset(), 500);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        assert!(matches!(
            SyncCursor::new(0),
            Err(SyncError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_short_page_is_last() {
        assert!(RemotePage::new(vec![1, 2], 3).is_last);
        assert!(!RemotePage::new(vec![1, 2, 3], 3).is_last);
        assert!(RemotePage::<u8>::new(vec![], 3).is_last);
    }
}
