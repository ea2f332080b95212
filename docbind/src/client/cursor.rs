use crate::document::RawDocument;
use crate::query::{compare_values, lookup};
use crate::schema::SortOrder;

/// Result set of a `find`. Sorting, skipping and limiting are applied when
/// the cursor is iterated; `count` reports every match regardless.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    documents: Vec<RawDocument>,
    sort: Vec<(String, SortOrder)>,
    skip: usize,
    limit: Option<usize>,
}

impl Cursor {
    pub fn new(documents: Vec<RawDocument>) -> Self {
        Cursor {
            documents,
            ..Default::default()
        }
    }

    /// Number of matching documents, ignoring skip and limit.
    pub fn count(&self) -> u64 {
        self.documents.len() as u64
    }

    /// Number of documents iteration will yield.
    pub fn count_with_limit(&self) -> u64 {
        let remaining = self.documents.len().saturating_sub(self.skip);
        self.limit.map_or(remaining, |l| remaining.min(l)) as u64
    }

    /// Add a sort key; earlier keys take precedence.
    pub fn sort(mut self, field: &str, order: SortOrder) -> Self {
        self.sort.push((field.to_string(), order));
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }
}

impl IntoIterator for Cursor {
    type Item = RawDocument;
    type IntoIter = std::vec::IntoIter<RawDocument>;

    fn into_iter(self) -> Self::IntoIter {
        let Cursor {
            mut documents,
            sort,
            skip,
            limit,
        } = self;

        if !sort.is_empty() {
            documents.sort_by(|a, b| {
                for (field, order) in &sort {
                    let ordering = compare_values(lookup(a, field), lookup(b, field));
                    let ordering = match order {
                        SortOrder::Ascending => ordering,
                        SortOrder::Descending => ordering.reverse(),
                    };
                    if ordering.is_ne() {
                        return ordering;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        let take = limit.unwrap_or(usize::MAX);
        documents
            .into_iter()
            .skip(skip)
            .take(take)
            .collect::<Vec<_>>()
            .into_iter()
    }
}
