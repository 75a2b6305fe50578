//! A1-style cell addresses.
//!
//! Cells inside `<sheetData>` may omit their `r` attribute, in which case the
//! position is implied by the previous cell. These helpers let the worksheet
//! scanner recover a stable address for every shared-string cell.

/// Parse a cell reference like "B3" into 0-indexed (col, row).
///
/// `$` anchors are ignored. Returns `None` unless both a column and a row
/// part are present.
pub fn parse_cell_ref(cell_ref: &str) -> Option<(u32, u32)> {
    let mut col: u32 = 0;
    let mut row: u32 = 0;
    let mut saw_col = false;
    let mut saw_row = false;

    for b in cell_ref.trim().bytes() {
        if b == b'$' {
            continue;
        }
        if b.is_ascii_alphabetic() {
            if saw_row {
                return None;
            }
            let upper = b.to_ascii_uppercase();
            col = col.checked_mul(26)?.checked_add(u32::from(upper - b'A') + 1)?;
            saw_col = true;
        } else if b.is_ascii_digit() {
            row = row.checked_mul(10)?.checked_add(u32::from(b - b'0'))?;
            saw_row = true;
        } else {
            return None;
        }
    }

    if !saw_col || !saw_row || row == 0 {
        return None;
    }

    Some((col - 1, row - 1))
}

/// Parse a row number attribute (1-based) into a 0-indexed row.
pub fn parse_row_number(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()?.checked_sub(1)
}

/// Convert a 0-indexed column to letters ("A", "B", ..., "AA").
pub fn col_to_letter(col: u32) -> String {
    let mut result = Vec::new();
    let mut n = u64::from(col) + 1;
    while n > 0 {
        n -= 1;
        // n % 26 < 26, so the narrowing is lossless
        #[allow(clippy::cast_possible_truncation)]
        result.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    result.reverse();
    String::from_utf8(result).unwrap_or_default()
}

/// Format 0-indexed (col, row) as an A1 address.
pub fn cell_address(col: u32, row: u32) -> String {
    format!("{}{}", col_to_letter(col), u64::from(row) + 1)
}
