//! SQL text helpers.

/// Wrap `sql` so it returns rows `[start_row, end_row)` using `LIMIT`/`OFFSET`.
pub(crate) fn limit_offset_page(sql: &str, start_row: u64, end_row: u64) -> String {
    format!(
        "{sql} LIMIT {} OFFSET {start_row}",
        end_row.saturating_sub(start_row)
    )
}

pub(crate) fn limit_rows(sql: &str, row_limit: u64) -> String {
    format!("{sql} LIMIT {row_limit}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_window() {
        assert_eq!(
            limit_offset_page("SELECT * FROM t", 20, 30),
            "SELECT * FROM t LIMIT 10 OFFSET 20"
        );
        assert_eq!(
            limit_offset_page("SELECT * FROM t", 30, 20),
            "SELECT * FROM t LIMIT 0 OFFSET 30"
        );
        assert_eq!(limit_rows("SELECT 1", 5), "SELECT 1 LIMIT 5");
    }
}
