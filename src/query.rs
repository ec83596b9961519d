//! Range and pagination policy shared by every keyed time series.

use crate::model::Candlestick;

/// A record with a time ordering key.
pub trait Ordered {
    fn order_key(&self) -> i64;
}

impl Ordered for Candlestick {
    fn order_key(&self) -> i64 {
        self.open_time
    }
}

/// Which end of the filtered result to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    /// Last `n` rows (tail).
    Last(usize),
    /// First `n` rows (head).
    First(usize),
}

/// Strict `(start, end)` bounds plus optional head/tail pagination.
///
/// No limit is applied unless one is set here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeQuery {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub page: Option<Page>,
}

impl RangeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep keys strictly greater than `start`.
    pub fn after(mut self, start: i64) -> Self {
        self.start = Some(start);
        self
    }

    /// Keep keys strictly less than `end`.
    pub fn before(mut self, end: i64) -> Self {
        self.end = Some(end);
        self
    }

    pub fn last(mut self, n: usize) -> Self {
        self.page = Some(Page::Last(n));
        self
    }

    pub fn first(mut self, n: usize) -> Self {
        self.page = Some(Page::First(n));
        self
    }

    pub fn contains(&self, key: i64) -> bool {
        self.start.is_none_or(|start| key > start) && self.end.is_none_or(|end| key < end)
    }

    /// Sorts by key, filters, then paginates. Output is ascending whatever
    /// order `items` arrived in.
    pub fn evaluate<T: Ordered>(&self, mut items: Vec<T>) -> Vec<T> {
        items.sort_by_key(T::order_key);
        items.retain(|item| self.contains(item.order_key()));

        match self.page {
            Some(Page::Last(n)) => {
                let skip = items.len().saturating_sub(n);
                items.drain(..skip);
            }
            Some(Page::First(n)) => items.truncate(n),
            None => {}
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Ordered for i64 {
        fn order_key(&self) -> i64 {
            *self
        }
    }

    fn keys() -> Vec<i64> {
        vec![50, 10, 40, 20, 30]
    }

    #[test]
    fn test_sorts_without_filters() {
        assert_eq!(RangeQuery::new().evaluate(keys()), vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_bounds_are_strict() {
        let q = RangeQuery::new().after(20).before(50);
        assert_eq!(q.evaluate(keys()), vec![30, 40]);

        let q = RangeQuery::new().after(30).before(30);
        assert!(q.evaluate(keys()).is_empty());
    }

    #[test]
    fn test_tail_and_head_after_filter() {
        let q = RangeQuery::new().after(10).last(2);
        assert_eq!(q.evaluate(keys()), vec![40, 50]);

        let q = RangeQuery::new().after(10).first(2);
        assert_eq!(q.evaluate(keys()), vec![20, 30]);

        assert_eq!(RangeQuery::new().last(99).evaluate(keys()).len(), 5);
        assert_eq!(RangeQuery::new().first(99).evaluate(keys()).len(), 5);
    }

    #[test]
    fn test_zero_limit_is_empty() {
        assert!(RangeQuery::new().last(0).evaluate(keys()).is_empty());
        assert!(RangeQuery::new().first(0).evaluate(keys()).is_empty());
    }
}
