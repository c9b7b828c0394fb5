//! Markdown markup stripping for plain-text answers
//!
//! One character-level state machine serves both whole answers and streamed
//! fragments, so a streamed answer loses exactly the characters the same
//! answer would lose in one piece.

/// Strip emphasis, heading markers and backticks from a complete answer
///
/// Underscores inside words (`snake_case`) are kept; `*` bullets at line
/// start become `-`; `#` is only a heading marker at line start.
pub fn strip_markup(text: &str) -> String {
    MarkupStripper::new().push(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    /// Only indentation seen on this line
    Start,
    /// Inside the leading `#` run
    Heading,
    /// Whitespace after the `#` run
    AfterHeading,
    /// A `*` that becomes a bullet if a space follows
    PendingStar,
    Body,
}

/// Incremental markup stripper for streamed answers
///
/// Fragments may be cut anywhere; state carries over between `push` calls.
#[derive(Debug, Clone)]
pub struct MarkupStripper {
    state: LineState,
    prev: Option<char>,
    pending_underscore: bool,
}

impl MarkupStripper {
    pub fn new() -> Self {
        Self {
            state: LineState::Start,
            prev: None,
            pending_underscore: false,
        }
    }

    /// Strip the next fragment
    ///
    /// An underscore at the end of a fragment is held back until the next
    /// character shows whether it sits inside a word.
    pub fn push(&mut self, fragment: &str) -> String {
        let mut out = String::with_capacity(fragment.len());
        for c in fragment.chars() {
            self.feed(c, &mut out);
        }
        out
    }

    fn feed(&mut self, c: char, out: &mut String) {
        use LineState::*;

        if c == '\n' {
            self.pending_underscore = false;
            self.state = Start;
            self.prev = None;
            out.push(c);
            return;
        }

        match self.state {
            Start if c.is_whitespace() => out.push(c),
            Start | Heading if c == '#' => self.state = Heading,
            Heading | AfterHeading if c.is_whitespace() => self.state = AfterHeading,
            Start | Heading | AfterHeading if c == '*' => self.state = PendingStar,
            PendingStar if c == ' ' => {
                out.push_str("- ");
                self.state = Body;
            }
            PendingStar => {
                self.state = Body;
                self.prev = Some('*');
                self.body(c, out);
            }
            _ => {
                self.state = Body;
                self.body(c, out);
            }
        }
    }

    fn body(&mut self, c: char, out: &mut String) {
        if self.pending_underscore {
            self.pending_underscore = false;
            if c.is_alphanumeric() {
                out.push('_');
            }
        }

        match c {
            '*' | '`' => {}
            '_' => self.pending_underscore = self.prev.is_some_and(char::is_alphanumeric),
            _ => out.push(c),
        }
        self.prev = Some(c);
    }
}

impl Default for MarkupStripper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn streamed(fragments: &[&str]) -> String {
        let mut stripper = MarkupStripper::new();
        fragments.iter().map(|f| stripper.push(f)).collect()
    }

    #[test]
    fn test_strip_emphasis() {
        assert_eq!(strip_markup("This is **important** and *so* is __this__."), "This is important and so is this.");
    }

    #[test]
    fn test_strip_headings() {
        assert_eq!(strip_markup("## Penalties\nSee Article 62."), "Penalties\nSee Article 62.");
        assert_eq!(strip_markup("  ### Deep"), "  Deep");
    }

    #[test]
    fn test_strip_backticks() {
        assert_eq!(strip_markup("Run `ragbuddy ingest`."), "Run ragbuddy ingest.");
    }

    #[test]
    fn test_keeps_intra_word_underscores_and_hash_inside_line() {
        assert_eq!(strip_markup("field tax_id, issue #12"), "field tax_id, issue #12");
    }

    #[test]
    fn test_bullets() {
        assert_eq!(strip_markup("* first\n  * nested"), "- first\n  - nested");
        assert_eq!(strip_markup("# * item"), "- item");
    }

    #[test]
    fn test_streamed_fragments_match_whole_answer() {
        assert_eq!(streamed(&["**Article", " 5**"]), "Article 5");
        assert_eq!(streamed(&["issue ", "#", "12"]), "issue #12");
        assert_eq!(streamed(&["#", "# Heading `x`"]), "Heading x");
        assert_eq!(streamed(&["snake_", "case"]), "snake_case");
        assert_eq!(streamed(&["trailing_", " word"]), "trailing word");
        assert_eq!(streamed(&["*", " bullet\n", "*", "*bold**"]), "- bullet\nbold");
    }

    #[test]
    fn test_cjk_untouched() {
        assert_eq!(strip_markup("**逾期申报**的罚款"), "逾期申报的罚款");
    }

    #[quickcheck]
    fn prop_split_point_does_not_matter(text: String, cut: usize) -> bool {
        let boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).chain([text.len()]).collect();
        let at = boundaries[cut % boundaries.len()];
        let (head, tail) = text.split_at(at);
        streamed(&[head, tail]) == strip_markup(&text)
    }
}
