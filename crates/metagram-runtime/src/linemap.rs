/// Human readable position, both fields are one-based.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Location {
    pub line: u32,
    /// counted in unicode code points
    pub column: u32,
}

pub struct LineMap {
    /// byte offset of the start of each line and whether it contains non-ascii characters
    lines: Vec<(usize, bool)>,
}

impl LineMap {
    /// Lines end at `\n`, a preceding `\r` belongs to the line it terminates.
    pub fn new(src: &str) -> Self {
        let mut lines = Vec::new();

        let mut prev_end = 0;
        let mut saw_unicode = false;

        // utf8 bytes are either encoding an ascii character or are >=128
        // so we can search for ascii characters by interpreting the string as bytes
        for (i, b) in src.bytes().enumerate() {
            if b == b'\n' {
                lines.push((prev_end, saw_unicode));
                saw_unicode = false;
                prev_end = i + 1;
            } else if b >= 128 {
                saw_unicode = true;
            }
        }

        lines.push((prev_end, saw_unicode));

        Self { lines }
    }

    /// Offset is clamped to the end of `src`.
    pub fn location(&self, src: &str, offset: usize) -> Location {
        let offset = offset.min(src.len());

        let index = match self.lines.binary_search_by_key(&offset, |a| a.0) {
            Ok(a) => a,
            Err(a) => a - 1,
        };
        let (line_start, is_unicode) = self.lines[index];
        debug_assert!(line_start <= offset);

        let mut offset = offset;
        while !src.is_char_boundary(offset) {
            offset -= 1;
        }

        let character = if is_unicode {
            src[line_start..offset].chars().count()
        } else {
            offset - line_start
        };

        Location {
            line: saturate(index + 1),
            column: saturate(character + 1),
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}

fn saturate(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[test]
fn test_line_lookup() {
    let str = "abcd\nÃ¬\r\n\náº¿";
    let map = LineMap::new(str);

    assert_eq!(map.line_count(), 4);
    assert_eq!(map.location(str, 0), Location { line: 1, column: 1 });
    assert_eq!(map.location(str, 4), Location { line: 1, column: 5 });
    assert_eq!(map.location(str, 5), Location { line: 2, column: 1 });
    // "Ã" is two bytes
    assert_eq!(map.location(str, 7), Location { line: 2, column: 2 });
    assert_eq!(map.location(str, str.len()), Location { line: 4, column: 4 });
    assert_eq!(map.location(str, 1000), Location { line: 4, column: 4 });
}

#[test]
fn test_lone_carriage_return() {
    let str = "ab\rcd\r\nef";
    let map = LineMap::new(str);

    assert_eq!(map.line_count(), 2);
    assert_eq!(map.location(str, 3), Location { line: 1, column: 4 });
    // the `\r` of a `\r\n` pair stays on its line
    assert_eq!(map.location(str, 5), Location { line: 1, column: 6 });
    assert_eq!(map.location(str, 7), Location { line: 2, column: 1 });
}
