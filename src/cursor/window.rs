use crate::backend::OrdinalRange;

/// Position of the currently loaded page. Ordinals are 0-based;
/// `first_ordinal` is inclusive and `last_ordinal` exclusive, so
/// `first_ordinal <= last_ordinal <= total_records` holds for empty pages too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page_no: u64,
    pub page_size: u64,
    pub first_ordinal: u64,
    pub last_ordinal: u64,
    pub total_records: u64,
}

impl PageWindow {
    pub fn new(page_no: u64, page_size: u64, total_records: u64, rows_on_page: u64) -> Self {
        let first_ordinal = page_no.saturating_mul(page_size).min(total_records);
        let last_ordinal = first_ordinal.saturating_add(rows_on_page).min(total_records);
        Self {
            page_no,
            page_size,
            first_ordinal,
            last_ordinal,
            total_records,
        }
    }

    pub fn number_of_pages(&self) -> u64 {
        number_of_pages(self.total_records, self.page_size)
    }

    pub fn rows(&self) -> u64 {
        self.last_ordinal - self.first_ordinal
    }
}

pub fn number_of_pages(total: u64, page_size: u64) -> u64 {
    if page_size > 0 && total > 0 {
        total.div_ceil(page_size)
    } else {
        0
    }
}

/// Inclusive range `[n*size, n*size+size-1]` requested from the backend.
pub fn ordinal_range(page_no: u64, page_size: u64) -> OrdinalRange {
    let first = page_no.saturating_mul(page_size);
    OrdinalRange {
        first,
        last: first.saturating_add(page_size.saturating_sub(1)),
    }
}

/// Page 0 always exists so an empty result can still be opened.
pub fn page_exists(page_no: u64, page_size: u64, total: u64) -> bool {
    page_no == 0 || page_no < number_of_pages(total, page_size)
}

pub fn last_page(total: u64, page_size: u64) -> u64 {
    number_of_pages(total, page_size).saturating_sub(1)
}

/// Rows the backend should return for `page_no`.
pub fn expected_rows(page_no: u64, page_size: u64, total: u64) -> u64 {
    let first = page_no.saturating_mul(page_size);
    total.saturating_sub(first).min(page_size)
}

#[cfg(test)]
mod tests {
    use super::{PageWindow, expected_rows, last_page, number_of_pages, ordinal_range, page_exists};
    use proptest::prelude::*;

    #[test]
    fn twenty_three_rows_in_pages_of_five() {
        assert_eq!(number_of_pages(23, 5), 5);
        let sizes = (0..5).map(|p| expected_rows(p, 5, 23)).collect::<Vec<_>>();
        assert_eq!(sizes, vec![5, 5, 5, 5, 3]);
        assert_eq!(last_page(23, 5), 4);
        assert!(!page_exists(5, 5, 23));
    }

    #[test]
    fn empty_results_have_no_pages_but_page_zero_opens() {
        assert_eq!(number_of_pages(0, 10), 0);
        assert_eq!(number_of_pages(10, 0), 0);
        assert!(page_exists(0, 10, 0));
        assert!(!page_exists(1, 10, 0));
        let w = PageWindow::new(0, 10, 0, 0);
        assert_eq!((w.first_ordinal, w.last_ordinal), (0, 0));
    }

    #[test]
    fn ordinal_range_is_inclusive() {
        let r = ordinal_range(2, 10);
        assert_eq!((r.first, r.last), (20, 29));
    }

    proptest! {
        #[test]
        fn page_count_is_ceiling(total in 0u64..100_000, size in 0u64..500) {
            let expected = if total > 0 && size > 0 {
                (total + size - 1) / size
            } else {
                0
            };
            prop_assert_eq!(number_of_pages(total, size), expected);
        }

        #[test]
        fn pages_cover_every_record_once(total in 0u64..5_000, size in 1u64..200) {
            let mut covered = 0u64;
            for page in 0..number_of_pages(total, size) {
                let rows = expected_rows(page, size, total);
                let w = PageWindow::new(page, size, total, rows);
                prop_assert_eq!(w.first_ordinal, covered);
                prop_assert!(w.first_ordinal <= w.last_ordinal);
                prop_assert!(w.last_ordinal <= w.total_records);
                covered = w.last_ordinal;
            }
            prop_assert_eq!(covered, total);
        }
    }
}
