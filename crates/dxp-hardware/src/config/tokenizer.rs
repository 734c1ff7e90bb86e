//! Line tokenizer shared by the system and modules file parsers.
//!
//! Tokens are separated by any of `" ,=\t\r\n"`. A line whose first
//! character is `*` is a comment; blank lines are skipped. The first token
//! of a line is its directive, matched case-insensitively. Filename
//! arguments are not tokenized: they run from the argument boundary to the
//! end of the line so that names containing spaces survive.

/// Characters separating tokens on a config line.
pub const DELIMITERS: &[char] = &[' ', ',', '=', '\t', '\r', '\n'];

fn is_delimiter(c: char) -> bool {
    DELIMITERS.contains(&c)
}

/// One non-comment line of a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLine<'a> {
    /// 1-based line number.
    pub number: usize,
    /// Trimmed line text.
    pub text: &'a str,
    /// First token, lower-cased.
    pub directive: String,
    rest_start: usize,
}

impl<'a> ConfigLine<'a> {
    /// Text after the directive token.
    pub fn rest(&self) -> &'a str {
        &self.text[self.rest_start..]
    }

    /// Remaining tokens after the directive.
    pub fn args(&self) -> impl Iterator<Item = &'a str> {
        self.rest().split(is_delimiter).filter(|t| !t.is_empty())
    }

    /// Filename argument directly after the directive.
    pub fn filename(&self) -> Option<&'a str> {
        pick_filename(self.rest())
    }

    /// First argument and the filename that follows it, for directives of
    /// the form `dsp <chan> <file>`.
    pub fn arg_and_filename(&self) -> Option<(&'a str, &'a str)> {
        let rest = self.rest();
        let start = rest.find(|c: char| !is_delimiter(c))?;
        let end = rest[start..]
            .find(is_delimiter)
            .map_or(rest.len(), |offset| start + offset);
        let filename = pick_filename(&rest[end..])?;
        Some((&rest[start..end], filename))
    }
}

/// Isolate a filename: skip leading separators, trim trailing whitespace and
/// control characters, keep embedded spaces.
pub fn pick_filename(text: &str) -> Option<&str> {
    let name = text
        .trim_start_matches(|c: char| c.is_whitespace() || c == '=' || c == ',')
        .trim_end_matches(|c: char| c.is_whitespace() || c.is_control());
    (!name.is_empty()).then_some(name)
}

/// Iterate the non-comment, non-blank lines of `text`.
pub fn config_lines(text: &str) -> impl Iterator<Item = ConfigLine<'_>> {
    text.lines().enumerate().filter_map(|(index, line)| {
        if line.starts_with('*') {
            return None;
        }
        let start = line.find(|c: char| !is_delimiter(c))?;
        let end = line[start..]
            .find(is_delimiter)
            .map_or(line.len(), |offset| start + offset);
        Some(ConfigLine {
            number: index + 1,
            text: line,
            directive: line[start..end].to_ascii_lowercase(),
            rest_start: end,
        })
    })
}
