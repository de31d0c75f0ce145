//! The immutable static table: 61 predefined field lines, wire indices
//! 1 through 61.
//!
//! Lookup avoids hashing entirely: a candidate row is picked by dispatching
//! on the first character of the value (for the handful of rows that carry
//! one) and then of the name, and a single byte comparison confirms it.

/// A static table row.
pub struct StaticEntry {
    pub name: &'static [u8],
    pub value: &'static [u8],
}

pub const STATIC_TABLE_SIZE: u64 = 61;

macro_rules! entry {
    ($name:expr, $value:expr) => {
        StaticEntry { name: $name, value: $value }
    };
}

static STATIC_TABLE: [StaticEntry; STATIC_TABLE_SIZE as usize] = [
    entry!(b":authority", b""),
    entry!(b":method", b"GET"),
    entry!(b":method", b"POST"),
    entry!(b":path", b"/"),
    entry!(b":path", b"/index.html"),
    entry!(b":scheme", b"http"),
    entry!(b":scheme", b"https"),
    entry!(b":status", b"200"),
    entry!(b":status", b"204"),
    entry!(b":status", b"206"),
    entry!(b":status", b"304"),
    entry!(b":status", b"400"),
    entry!(b":status", b"404"),
    entry!(b":status", b"500"),
    entry!(b"accept-charset", b""),
    entry!(b"accept-encoding", b"gzip, deflate"),
    entry!(b"accept-language", b""),
    entry!(b"accept-ranges", b""),
    entry!(b"accept", b""),
    entry!(b"access-control-allow-origin", b""),
    entry!(b"age", b""),
    entry!(b"allow", b""),
    entry!(b"authorization", b""),
    entry!(b"cache-control", b""),
    entry!(b"content-disposition", b""),
    entry!(b"content-encoding", b""),
    entry!(b"content-language", b""),
    entry!(b"content-length", b""),
    entry!(b"content-location", b""),
    entry!(b"content-range", b""),
    entry!(b"content-type", b""),
    entry!(b"cookie", b""),
    entry!(b"date", b""),
    entry!(b"etag", b""),
    entry!(b"expect", b""),
    entry!(b"expires", b""),
    entry!(b"from", b""),
    entry!(b"host", b""),
    entry!(b"if-match", b""),
    entry!(b"if-modified-since", b""),
    entry!(b"if-none-match", b""),
    entry!(b"if-range", b""),
    entry!(b"if-unmodified-since", b""),
    entry!(b"last-modified", b""),
    entry!(b"link", b""),
    entry!(b"location", b""),
    entry!(b"max-forwards", b""),
    entry!(b"proxy-authenticate", b""),
    entry!(b"proxy-authorization", b""),
    entry!(b"range", b""),
    entry!(b"referer", b""),
    entry!(b"refresh", b""),
    entry!(b"retry-after", b""),
    entry!(b"server", b""),
    entry!(b"set-cookie", b""),
    entry!(b"strict-transport-security", b""),
    entry!(b"transfer-encoding", b""),
    entry!(b"user-agent", b""),
    entry!(b"vary", b""),
    entry!(b"via", b""),
    entry!(b"www-authenticate", b""),
];

/// Row for a 1-based wire index.
pub fn get(index: u64) -> Option<&'static StaticEntry> {
    if (1..=STATIC_TABLE_SIZE).contains(&index) {
        Some(&STATIC_TABLE[(index - 1) as usize])
    } else {
        None
    }
}

/// Result of [`find`]: a 1-based wire index, full or name-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticMatch {
    pub index: u64,
    pub value_matched: bool,
}

/// Candidate row (0-based) for a value's first byte and length.
fn value_candidate(value: &[u8]) -> Option<usize> {
    match *value.first()? {
        b'G' => Some(1),
        b'P' => Some(2),
        b'/' => match value.len() {
            1 => Some(3),
            11 => Some(4),
            _ => None,
        },
        b'h' => match value.len() {
            4 => Some(5),
            5 => Some(6),
            _ => None,
        },
        b'2' if value.len() == 3 => match value[2] {
            b'0' => Some(7),
            b'4' => Some(8),
            b'6' => Some(9),
            _ => None,
        },
        b'3' => Some(10),
        b'4' if value.len() == 3 => match value[2] {
            b'0' => Some(11),
            b'4' => Some(12),
            _ => None,
        },
        b'5' => Some(13),
        b'g' => Some(15),
        _ => None,
    }
}

/// Candidate row (0-based) for a name's first bytes and length.
fn name_candidate(name: &[u8]) -> Option<usize> {
    match name[0] {
        b':' => match name[1] {
            b'a' => Some(0),
            b'm' => Some(1),
            b'p' => Some(3),
            b's' => {
                if name[2] == b'c' {
                    Some(5)
                } else {
                    Some(7)
                }
            }
            _ => None,
        },
        b'a' => match name.len() {
            3 => Some(20),
            5 => Some(21),
            6 => Some(18),
            13 => {
                if name[1] == b'u' {
                    Some(22)
                } else {
                    Some(17)
                }
            }
            14 => Some(14),
            15 => {
                if name[7] == b'l' {
                    Some(16)
                } else {
                    Some(15)
                }
            }
            27 => Some(19),
            _ => None,
        },
        b'c' => match name.len() {
            6 => Some(31),
            12 => Some(30),
            13 => {
                if name[1] == b'a' {
                    Some(23)
                } else {
                    Some(29)
                }
            }
            14 => Some(27),
            16 => match name[9] {
                b'n' => Some(25),
                b'a' => Some(26),
                b'o' => Some(28),
                _ => None,
            },
            19 => Some(24),
            _ => None,
        },
        b'd' => Some(32),
        b'e' => match name.len() {
            4 => Some(33),
            6 => Some(34),
            7 => Some(35),
            _ => None,
        },
        b'f' => Some(36),
        b'h' => Some(37),
        b'i' => match name.len() {
            8 => {
                if name[3] == b'm' {
                    Some(38)
                } else {
                    Some(41)
                }
            }
            13 => Some(40),
            17 => Some(39),
            19 => Some(42),
            _ => None,
        },
        b'l' => match name.len() {
            4 => Some(44),
            8 => Some(45),
            13 => Some(43),
            _ => None,
        },
        b'm' => Some(46),
        b'p' => {
            if name.len() == 18 {
                Some(47)
            } else {
                Some(48)
            }
        }
        b'r' if name.len() >= 5 => match name[4] {
            b'e' => {
                if name.len() == 5 {
                    Some(49)
                } else {
                    Some(51)
                }
            }
            b'r' => Some(50),
            b'y' => Some(52),
            _ => None,
        },
        b's' => match name.len() {
            6 => Some(53),
            10 => Some(54),
            25 => Some(55),
            _ => None,
        },
        b't' => Some(56),
        b'u' => Some(57),
        b'v' => {
            if name.len() == 4 {
                Some(58)
            } else {
                Some(59)
            }
        }
        b'w' => Some(60),
        _ => None,
    }
}

/// Looks up `(name, value)`, preferring a full match over a name-only one.
pub fn find(name: &[u8], value: &[u8]) -> Option<StaticMatch> {
    if name.len() < 3 {
        return None;
    }

    if let Some(i) = value_candidate(value) {
        let e = &STATIC_TABLE[i];
        if e.value == value && e.name == name {
            return Some(StaticMatch { index: i as u64 + 1, value_matched: true });
        }
    }

    if let Some(i) = name_candidate(name) {
        let e = &STATIC_TABLE[i];
        if e.name == name {
            return Some(StaticMatch { index: i as u64 + 1, value_matched: false });
        }
    }

    None
}
