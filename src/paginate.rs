use serde::Deserialize;

/// Page count reported for an empty collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyPages {
    /// "Page 1 of 1"
    #[default]
    One,
    /// "Page 1 of 0"
    Zero,
}

/// Fixed-size windows over a sorted collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    per_section: usize,
    sections: usize,
    empty_pages: EmptyPages,
}

impl Paginator {
    pub fn new(per_section: usize, sections: usize, empty_pages: EmptyPages) -> Self {
        Self {
            per_section: per_section.max(1),
            sections: sections.max(1),
            empty_pages,
        }
    }

    pub fn page_size(&self) -> usize {
        self.per_section * self.sections
    }

    pub fn sections(&self) -> usize {
        self.sections
    }

    pub fn total_pages(&self, len: usize) -> usize {
        self.count_pages(len, self.page_size())
    }

    fn count_pages(&self, len: usize, size: usize) -> usize {
        if len == 0 {
            return match self.empty_pages {
                EmptyPages::One => 1,
                EmptyPages::Zero => 0,
            };
        }
        len.div_ceil(size)
    }

    /// Items on the 1-indexed `page`; empty when out of range.
    pub fn page<'a, T>(&self, items: &'a [T], page: usize) -> &'a [T] {
        window(items, page, self.page_size())
    }

    /// Pages for a layout whose columns were distributed ahead of time:
    /// each column is paged by the per-section size.
    pub fn total_column_pages<T>(&self, columns: &[Vec<T>]) -> usize {
        let longest = columns.iter().map(Vec::len).max().unwrap_or(0);
        self.count_pages(longest, self.per_section)
    }

    pub fn column_page<'a, T>(&self, columns: &'a [Vec<T>], page: usize) -> Vec<&'a [T]> {
        columns
            .iter()
            .map(|column| window(column, page, self.per_section))
            .collect()
    }
}

fn window<T>(items: &[T], page: usize, size: usize) -> &[T] {
    if page == 0 {
        return &[];
    }
    let start = (page - 1).saturating_mul(size);
    if start >= items.len() {
        return &[];
    }
    let end = start.saturating_add(size).min(items.len());
    &items[start..end]
}

/// Current position in the page sequence. Navigation returns a new value
/// and stops at either end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationState {
    current: usize,
    total: usize,
}

impl PaginationState {
    pub fn new(requested: usize, total: usize) -> Self {
        Self {
            current: requested.clamp(1, total.max(1)),
            total,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn has_next(&self) -> bool {
        self.current < self.total
    }

    pub fn has_prev(&self) -> bool {
        self.current > 1
    }

    pub fn next(self) -> Self {
        if self.has_next() {
            Self {
                current: self.current + 1,
                ..self
            }
        } else {
            self
        }
    }

    pub fn prev(self) -> Self {
        if self.has_prev() {
            Self {
                current: self.current - 1,
                ..self
            }
        } else {
            self
        }
    }
}
