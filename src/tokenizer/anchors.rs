use std::borrow::Cow;
use std::fmt;

/// We use that as a way to convey which anchors should be active in regexes.
/// We don't want to enable \A or \G everywhere, it's context dependent.
#[derive(Copy, Clone, PartialEq, Hash, Eq)]
pub enum AnchorActive {
    /// Only \A is active
    A,
    /// Only \G is active
    G,
    /// Both \A and \G are active
    AG,
    /// Neither \A nor \G are active
    None,
}

impl AnchorActive {
    pub fn new(is_first_line: bool, anchor_position: Option<usize>, current_pos: usize) -> Self {
        let g_active = anchor_position == Some(current_pos);

        match (is_first_line, g_active) {
            (true, true) => AnchorActive::AG,
            (true, false) => AnchorActive::A,
            (false, true) => AnchorActive::G,
            (false, false) => AnchorActive::None,
        }
    }

    /// Slot of the regex variant compiled for that anchor combination
    #[inline]
    pub fn as_index(self) -> usize {
        match self {
            AnchorActive::AG => 0,
            AnchorActive::A => 1,
            AnchorActive::G => 2,
            AnchorActive::None => 3,
        }
    }

    fn allows(self, anchor: u8) -> bool {
        match anchor {
            b'A' => matches!(self, AnchorActive::A | AnchorActive::AG),
            b'G' => matches!(self, AnchorActive::G | AnchorActive::AG),
            _ => true,
        }
    }

    /// This follows vscode-textmate and replaces inactive anchors with something that is
    /// very unlikely to match.
    pub fn replace_anchors<'a>(&self, pat: &'a str) -> Cow<'a, str> {
        if *self == AnchorActive::AG || !has_anchors(pat) {
            return Cow::Borrowed(pat);
        }

        let bytes = pat.as_bytes();
        let mut out = String::with_capacity(pat.len());
        let mut last = 0;
        let mut i = 0;
        while i + 1 < bytes.len() {
            if bytes[i] == b'\\' {
                let next = bytes[i + 1];
                if (next == b'A' || next == b'G') && !self.allows(next) {
                    out.push_str(&pat[last..i]);
                    out.push('\u{FFFF}');
                    last = i + 2;
                }
                i += 2;
            } else {
                i += 1;
            }
        }
        out.push_str(&pat[last..]);
        Cow::Owned(out)
    }
}

/// Whether the pattern contains a `\A` or `\G` that isn't itself escaped
pub fn has_anchors(pat: &str) -> bool {
    let bytes = pat.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\\' {
            if matches!(bytes[i + 1], b'A' | b'G') {
                return true;
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    false
}

impl fmt::Debug for AnchorActive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnchorActive::A => "allow_A=true, allow_G=false",
            AnchorActive::G => "allow_A=false, allow_G=true",
            AnchorActive::AG => "allow_A=true, allow_G=true",
            AnchorActive::None => "allow_A=false, allow_G=false",
        };
        f.write_str(s)
    }
}
