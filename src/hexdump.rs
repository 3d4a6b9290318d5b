//! Canonical hex + ASCII dump of a byte buffer, for trace logs.

const BYTES_PER_LINE: usize = 16;

/// Render `data` as lines of 16 bytes with an offset column and an ASCII
/// column. Non printable bytes show up as `.` in the ASCII column.
pub fn dump(caption: &str, data: &[u8]) -> String {
    let mut out = format!("---------> {} <--------- ({} bytes)\n", caption, data.len());
    out.push_str("        +0          +4          +8          +c            0   4   8   c   \n");

    for (n_line, chunk) in data.chunks(BYTES_PER_LINE).enumerate() {
        let mut hex = String::with_capacity(BYTES_PER_LINE * 3);
        let mut ascii = String::with_capacity(BYTES_PER_LINE);
        for byte in chunk {
            hex.push_str(&format!("{byte:02x} "));
            ascii.push(if (32..127).contains(byte) {
                *byte as char
            } else {
                '.'
            });
        }
        out.push_str(&format!(
            "+{:04x}   {:<width$}  {}\n",
            n_line * BYTES_PER_LINE,
            hex,
            ascii,
            width = BYTES_PER_LINE * 3
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line() {
        let out = dump("frame", b"AB\x87");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "---------> frame <--------- (3 bytes)");
        assert!(lines[2].starts_with("+0000   41 42 87 "));
        assert!(lines[2].ends_with("  AB."));
    }

    #[test]
    fn offsets_advance_by_sixteen() {
        let data: Vec<u8> = (0u8..40).collect();
        let out = dump("ramp", &data);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2 + 3);
        assert!(lines[3].starts_with("+0010   10 11"));
        assert!(lines[4].starts_with("+0020   20 21"));
    }

    #[test]
    fn empty_buffer_has_header_only() {
        assert_eq!(dump("none", &[]).lines().count(), 2);
    }
}
