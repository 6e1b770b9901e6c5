//! Query - composable read path over one record type.
//!
//! Filters run against the stored row, before identity resolution. Ordering,
//! skip and take apply to the filtered rows in that order.

use std::cmp::Ordering;
use std::fmt;

type Filter<R> = Box<dyn Fn(&R) -> bool + Send + Sync>;
type Comparator<R> = Box<dyn Fn(&R, &R) -> Ordering + Send + Sync>;

pub struct Query<R> {
    filters: Vec<Filter<R>>,
    order: Option<Comparator<R>>,
    skip: usize,
    take: Option<usize>,
    tracking: Option<bool>,
}

impl<R> Query<R> {
    /// Selects every row of the collection.
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            order: None,
            skip: 0,
            take: None,
            tracking: None,
        }
    }

    /// Keeps rows matching the predicate. Repeated filters are and-ed.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Box::new(predicate));
        self
    }

    /// Orders by a key, ascending. Replaces any previous ordering.
    pub fn order_by<K, F>(mut self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.order = Some(Box::new(move |a, b| key(a).cmp(&key(b))));
        self
    }

    pub fn order_by_desc<K, F>(mut self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.order = Some(Box::new(move |a, b| key(b).cmp(&key(a))));
        self
    }

    pub fn skip(mut self, count: usize) -> Self {
        self.skip = count;
        self
    }

    pub fn take(mut self, count: usize) -> Self {
        self.take = Some(count);
        self
    }

    /// Returns fresh copies of the stored rows and leaves the working set alone.
    pub fn no_tracking(self) -> Self {
        self.tracking(false)
    }

    /// Overrides the repository's tracking option for this query.
    pub fn tracking(mut self, enabled: bool) -> Self {
        self.tracking = Some(enabled);
        self
    }

    pub fn tracking_override(&self) -> Option<bool> {
        self.tracking
    }

    pub fn matches(&self, record: &R) -> bool {
        self.filters.iter().all(|filter| filter(record))
    }

    /// Caps the result to its first row.
    pub(crate) fn first(mut self) -> Self {
        self.take = Some(self.take.map_or(1, |take| take.min(1)));
        self
    }

    /// Applies ordering, skip and take to already filtered rows.
    pub(crate) fn arrange(&self, mut rows: Vec<R>) -> Vec<R> {
        if let Some(order) = &self.order {
            rows.sort_by(|a, b| order(a, b));
        }
        let take = self.take.unwrap_or(usize::MAX);
        rows.into_iter().skip(self.skip).take(take).collect()
    }
}

impl<R> Default for Query<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for Query<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("filters", &self.filters.len())
            .field("ordered", &self.order.is_some())
            .field("skip", &self.skip)
            .field("take", &self.take)
            .field("tracking", &self.tracking)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_are_and_ed() {
        let query = Query::<u32>::new().filter(|n| *n > 2).filter(|n| n % 2 == 0);

        assert!(query.matches(&4));
        assert!(!query.matches(&3));
        assert!(!query.matches(&2));
    }

    #[test]
    fn arrange_orders_then_pages() {
        let query = Query::<u32>::new().order_by_desc(|n| *n).skip(1).take(2);

        assert_eq!(query.arrange(vec![3, 9, 1, 5, 7]), vec![7, 5]);
    }

    #[test]
    fn unordered_rows_keep_store_order() {
        let query = Query::<&str>::new().take(2);

        assert_eq!(query.arrange(vec!["b", "a", "c"]), vec!["b", "a"]);
        assert_eq!(query.tracking_override(), None);
        assert_eq!(query.no_tracking().tracking_override(), Some(false));
    }
}
