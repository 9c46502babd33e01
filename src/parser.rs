// The MIT License (MIT)

// Copyright (c) 2014 Y. T. CHUNG

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Single-pass lexer turning INI text into a [`Table`]

use std::{
    fmt,
    iter::{Fuse, Peekable},
    mem,
};

use log::{debug, warn};
use thiserror::Error;

use crate::{MalformedLinePolicy, ParseOption, Table, COMMENT_MARKER};

/// Kind of problem found on a malformed line
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// A `[` was opened but the line ended before `]`
    MissingClosingBracket,
    /// A non-empty key reached the end of its line without `=`
    MissingAssignment,
    /// The line grew past [`ParseOption::max_line_len`]
    LineTooLong,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ParseErrorKind::MissingClosingBracket => f.write_str("section is missing `]`"),
            ParseErrorKind::MissingAssignment => f.write_str("key is missing `=`"),
            ParseErrorKind::LineTooLong => f.write_str("line is too long"),
        }
    }
}

/// A malformed line, with the text buffered when it was given up on
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {kind} near `{token}`")]
pub struct ParseError {
    /// 1-based line number
    pub line: usize,
    pub kind: ParseErrorKind,
    pub token: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    Section,
    Key,
    Value,
    Comment,
}

/// Growable buffer for the line being lexed.
///
/// A key line keeps both halves in `buf`; `split` is the byte offset where the
/// value starts. Views are sliced out on demand, so growth never leaves a
/// stale reference behind.
#[derive(Debug, Default)]
struct Token {
    buf: String,
    split: Option<usize>,
    spaces: usize,
    /// Bytes of this line already reported and dropped from `buf`
    consumed: usize,
    overflowed: bool,
}

impl Token {
    /// The part currently being accumulated: the value after a split, the whole buffer otherwise
    fn current(&self) -> &str {
        match self.split {
            Some(at) => &self.buf[at..],
            None => &self.buf,
        }
    }

    fn key(&self) -> &str {
        &self.buf[..self.split.unwrap_or(self.buf.len())]
    }

    fn is_blank(&self) -> bool {
        self.buf.is_empty() && !self.overflowed
    }

    // Leading spaces are never counted; trailing ones are counted but never flushed.
    fn space(&mut self) {
        if !self.current().is_empty() {
            self.spaces += 1;
        }
    }

    fn push(&mut self, c: char, limit: Option<usize>) {
        if self.exceeds(self.spaces + c.len_utf8(), limit) {
            self.spaces = 0;
            return;
        }
        self.buf.extend(std::iter::repeat(' ').take(self.spaces));
        self.spaces = 0;
        self.buf.push(c);
    }

    fn push_verbatim(&mut self, c: char, limit: Option<usize>) {
        if !self.exceeds(c.len_utf8(), limit) {
            self.buf.push(c);
        }
    }

    fn exceeds(&mut self, extra: usize, limit: Option<usize>) -> bool {
        if self.overflowed || limit.is_some_and(|max| self.consumed + self.buf.len() + extra > max) {
            self.overflowed = true;
        }
        self.overflowed
    }

    fn split(&mut self) {
        self.split = Some(self.buf.len());
        self.spaces = 0;
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.split = None;
        self.spaces = 0;
        self.consumed = 0;
        self.overflowed = false;
    }
}

/// INI lexer over any `char` source.
///
/// The parser owns the name of the section it is filling, so nothing leaks
/// between two parses.
pub struct Parser<I: Iterator<Item = char>> {
    rdr: Peekable<Fuse<I>>,
    opt: ParseOption,
    state: State,
    token: Token,
    line: usize,
    section: String,
    diagnostics: Vec<ParseError>,
}

impl<I: Iterator<Item = char>> Parser<I> {
    /// Create a parser
    pub fn new(rdr: I, opt: ParseOption) -> Parser<I> {
        Parser {
            rdr: rdr.fuse().peekable(),
            opt,
            state: State::Key,
            token: Token::default(),
            line: 0,
            section: String::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Lex the whole input, applying every section and entry to `table`.
    ///
    /// Under [`MalformedLinePolicy::Abort`] the first malformed line is
    /// returned and `table` keeps whatever was applied before it.
    pub fn parse_into(&mut self, table: &mut Table) -> Result<(), ParseError> {
        loop {
            let Some(c) = self.rdr.next() else {
                return self.end_line(table);
            };

            match (self.state, c) {
                (_, '\n') => self.end_line(table)?,
                (_, '\r') if matches!(self.rdr.peek(), Some('\n') | None) => {}
                (_, ' ') => self.token.space(),
                (State::Key | State::Section, ';') => {
                    self.read_comment()?;
                    self.end_line(table)?;
                }
                (State::Section, ']') if !self.token.overflowed => self.close_section(table),
                (State::Key, '[') if self.token.is_blank() => self.state = State::Section,
                (State::Key, '=') => {
                    self.token.split();
                    self.state = State::Value;
                }
                (_, c) => self.token.push(c, self.opt.max_line_len),
            }
        }
    }

    /// Malformed lines seen so far under [`MalformedLinePolicy::Skip`]
    pub fn diagnostics(&self) -> &[ParseError] {
        &self.diagnostics
    }

    /// Consume the parser, keeping only the recorded malformed lines
    pub fn into_diagnostics(self) -> Vec<ParseError> {
        self.diagnostics
    }

    /// Capture `;` and the rest of the line verbatim, consuming the line break
    fn read_comment(&mut self) -> Result<(), ParseError> {
        // An overflowed line is reported once, as too long, by `end_line`.
        if !self.token.overflowed && !self.token.buf.is_empty() {
            let kind = match self.state {
                State::Section => ParseErrorKind::MissingClosingBracket,
                _ => ParseErrorKind::MissingAssignment,
            };
            self.malformed(kind)?;
            let used = self.token.buf.len();
            self.token.reset();
            self.token.consumed = used;
        }

        self.state = State::Comment;
        self.token.push_verbatim(COMMENT_MARKER, self.opt.max_line_len);
        for c in self.rdr.by_ref() {
            if c == '\n' {
                break;
            }
            self.token.push_verbatim(c, self.opt.max_line_len);
        }
        if !self.token.overflowed && self.token.buf.ends_with('\r') {
            self.token.buf.pop();
        }
        Ok(())
    }

    fn close_section(&mut self, table: &mut Table) {
        let name = mem::take(&mut self.token.buf);
        table.find_or_create_section(&name);
        debug!("line {}: entering section [{}]", self.line + 1, name);

        self.section = name;
        self.token.reset();
        self.state = State::Key;
    }

    fn end_line(&mut self, table: &mut Table) -> Result<(), ParseError> {
        let state = mem::replace(&mut self.state, State::Key);

        let result = if self.token.overflowed {
            self.malformed(ParseErrorKind::LineTooLong)
        } else {
            match state {
                State::Value => {
                    table.upsert_entry(&self.section, self.token.key(), self.token.current());
                    Ok(())
                }
                State::Comment => {
                    table
                        .find_or_create_section(&self.section)
                        .append_comment(self.token.buf.as_str());
                    Ok(())
                }
                State::Section => self.malformed(ParseErrorKind::MissingClosingBracket),
                State::Key if !self.token.buf.is_empty() => self.malformed(ParseErrorKind::MissingAssignment),
                State::Key => Ok(()),
            }
        };

        self.token.reset();
        self.line += 1;
        result
    }

    #[cold]
    fn malformed(&mut self, kind: ParseErrorKind) -> Result<(), ParseError> {
        let err = ParseError {
            line: self.line + 1,
            kind,
            token: self.token.buf.clone(),
        };
        warn!("{}", err);

        match self.opt.malformed_line {
            MalformedLinePolicy::Skip => {
                self.diagnostics.push(err);
                Ok(())
            }
            MalformedLinePolicy::Abort => Err(err),
        }
    }
}

// ------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(input: &str) -> (Table, Vec<ParseError>) {
        let mut table = Table::new();
        let mut parser = Parser::new(input.chars(), ParseOption::default());
        parser.parse_into(&mut table).unwrap();
        (table, parser.into_diagnostics())
    }

    fn entries(table: &Table, section: &str) -> Vec<(String, String)> {
        table
            .section(section)
            .unwrap()
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect()
    }

    #[test]
    fn key_value_in_section() {
        let (table, diags) = parse("[Section]\none = two\n");
        assert!(diags.is_empty());
        assert_eq!(table.get_entry("Section", "one"), Some("two"));
    }

    #[test]
    fn trims_outer_spaces_keeps_inner() {
        let (table, _) = parse("[  my   section  ]\n  a   b  =  c   d  \n");
        assert_eq!(table.get_entry("my   section", "a   b"), Some("c   d"));
    }

    #[test]
    fn implicit_section_before_header() {
        let (table, _) = parse("x = 1\n[s]\ny = 2\n");
        assert_eq!(table.get_entry("", "x"), Some("1"));
        assert_eq!(table.get_entry("s", "y"), Some("2"));
        assert_eq!(table.sections().collect::<Vec<_>>(), vec!["", "s"]);
    }

    #[test]
    fn no_trailing_newline() {
        let (table, _) = parse("[s]\nk = v");
        assert_eq!(table.get_entry("s", "k"), Some("v"));
    }

    #[test]
    fn empty_value() {
        let (table, diags) = parse("[s]\nk =\n");
        assert!(diags.is_empty());
        assert_eq!(table.get_entry("s", "k"), Some(""));
    }

    #[test]
    fn only_first_equals_splits() {
        let (table, _) = parse("url = http://host/?a=b\n");
        assert_eq!(table.get_entry("", "url"), Some("http://host/?a=b"));
    }

    #[test]
    fn semicolon_inside_value_is_literal() {
        let (table, _) = parse("[s]\npath = a;b ; c\n");
        assert_eq!(table.get_entry("s", "path"), Some("a;b ; c"));
        assert_eq!(table.section("s").unwrap().len(), 1);
    }

    #[test]
    fn brackets_inside_value_are_literal() {
        let (table, diags) = parse("[s]\nlist = [1, 2]\n");
        assert!(diags.is_empty());
        assert_eq!(table.get_entry("s", "list"), Some("[1, 2]"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn comments_kept_verbatim_in_order() {
        let (table, _) = parse("[s]\na = 1\n  ;  note  with   spaces  \nb = 2\n");
        assert_eq!(
            entries(&table, "s"),
            vec![
                ("a".to_owned(), "1".to_owned()),
                (";  note  with   spaces  ".to_owned(), String::new()),
                ("b".to_owned(), "2".to_owned()),
            ]
        );
    }

    #[test]
    fn repeated_comments_all_survive() {
        let (table, _) = parse("[s]\n; ---\nk = v\n; ---\n");
        let keys: Vec<&str> = table.section("s").unwrap().iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["; ---", "k", "; ---"]);
    }

    #[test]
    fn comment_before_any_header_opens_implicit_section() {
        let (table, _) = parse("; top\n[s]\n");
        assert_eq!(entries(&table, ""), vec![("; top".to_owned(), String::new())]);
    }

    #[test]
    fn comment_after_header_lands_in_section() {
        let (table, diags) = parse("[s] ; trailing\n");
        assert!(diags.is_empty());
        assert_eq!(entries(&table, "s"), vec![("; trailing".to_owned(), String::new())]);
    }

    #[test]
    fn blank_lines_ignored() {
        let (table, diags) = parse("\n\n   \n[s]\n\n k = v \n\n");
        assert!(diags.is_empty());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get_entry("s", "k"), Some("v"));
    }

    #[test]
    fn missing_closing_bracket_recovers() {
        let (table, diags) = parse("[Sec\nk = v\n");
        assert_eq!(table.get_entry("", "k"), Some("v"));
        assert_eq!(table.get_entry("Sec", "k"), None);
        assert!(table.section("Sec").is_none());
        assert_eq!(
            diags,
            vec![ParseError {
                line: 1,
                kind: ParseErrorKind::MissingClosingBracket,
                token: "Sec".to_owned(),
            }]
        );
    }

    #[test]
    fn broken_header_keeps_previous_section() {
        let (table, diags) = parse("[a]\n[b\nk = v\n");
        assert_eq!(diags.len(), 1);
        assert_eq!(table.get_entry("a", "k"), Some("v"));
    }

    #[test]
    fn missing_assignment_recovers() {
        let (table, diags) = parse("[s]\njust a key\nk = v\n");
        assert_eq!(table.get_entry("s", "k"), Some("v"));
        assert_eq!(table.section("s").unwrap().len(), 1);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, 2);
        assert_eq!(diags[0].kind, ParseErrorKind::MissingAssignment);
        assert_eq!(diags[0].token, "just a key");
    }

    #[test]
    fn pending_key_before_comment_is_reported() {
        let (table, diags) = parse("[s]\nbroken ; why\n");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, ParseErrorKind::MissingAssignment);
        assert_eq!(diags[0].token, "broken");
        assert_eq!(entries(&table, "s"), vec![("; why".to_owned(), String::new())]);
    }

    #[test]
    fn partial_key_at_eof_is_reported() {
        let (_, diags) = parse("[s]\ndangling");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, 2);
    }

    #[test]
    fn abort_policy_stops_at_first_malformed_line() {
        let mut table = Table::new();
        let opt = ParseOption {
            malformed_line: MalformedLinePolicy::Abort,
            ..Default::default()
        };
        let mut parser = Parser::new("a = 1\n[oops\nb = 2\n".chars(), opt);
        let err = parser.parse_into(&mut table).unwrap_err();

        assert_eq!(err.line, 2);
        assert_eq!(err.kind, ParseErrorKind::MissingClosingBracket);
        assert_eq!(table.get_entry("", "a"), Some("1"));
        assert_eq!(table.get_entry("", "b"), None);
    }

    #[test]
    fn long_lines_grow_the_buffer() {
        let value = "x".repeat(10_000);
        let key = "k".repeat(300);
        let (table, _) = parse(&format!("[s]\n{key} = {value}\n"));
        assert_eq!(table.get_entry("s", &key), Some(value.as_str()));
    }

    #[test]
    fn line_limit_rejects_instead_of_truncating() {
        let mut table = Table::new();
        let opt = ParseOption {
            max_line_len: Some(8),
            ..Default::default()
        };
        let mut parser = Parser::new("a = 1\nlong = 123456789\nb = 2\n".chars(), opt);
        parser.parse_into(&mut table).unwrap();

        assert_eq!(table.get_entry("", "a"), Some("1"));
        assert_eq!(table.get_entry("", "long"), None);
        assert_eq!(table.get_entry("", "b"), Some("2"));
        assert_eq!(parser.diagnostics().len(), 1);
        assert_eq!(parser.diagnostics()[0].kind, ParseErrorKind::LineTooLong);
        assert_eq!(parser.diagnostics()[0].line, 2);
    }

    #[test]
    fn line_limit_applies_to_section_names() {
        let mut table = Table::new();
        let opt = ParseOption {
            max_line_len: Some(4),
            ..Default::default()
        };
        let mut parser = Parser::new("[toolong]\nk = v\n".chars(), opt);
        parser.parse_into(&mut table).unwrap();

        assert!(table.section("tool").is_none());
        assert_eq!(table.get_entry("", "k"), Some("v"));
        assert_eq!(parser.diagnostics()[0].kind, ParseErrorKind::LineTooLong);
    }

    #[test]
    fn line_limit_counts_key_before_comment() {
        let mut table = Table::new();
        let opt = ParseOption {
            max_line_len: Some(10),
            ..Default::default()
        };
        let mut parser = Parser::new("abc ; 1234567
k = v
".chars(), opt);
        parser.parse_into(&mut table).unwrap();

        let kinds: Vec<ParseErrorKind> = parser.diagnostics().iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![ParseErrorKind::MissingAssignment, ParseErrorKind::LineTooLong]);
        assert!(parser.diagnostics().iter().all(|d| d.line == 1));
        assert_eq!(entries(&table, ""), vec![("k".to_owned(), "v".to_owned())]);
    }

    #[test]
    fn overflowed_key_before_comment_is_too_long() {
        let mut table = Table::new();
        let opt = ParseOption {
            max_line_len: Some(4),
            ..Default::default()
        };
        let mut parser = Parser::new("toolongkey ; c
k = v
".chars(), opt);
        parser.parse_into(&mut table).unwrap();

        assert_eq!(parser.diagnostics().len(), 1);
        assert_eq!(parser.diagnostics()[0].kind, ParseErrorKind::LineTooLong);
        assert_eq!(entries(&table, ""), vec![("k".to_owned(), "v".to_owned())]);
    }

    #[test]
    fn capped_comment_keeps_its_last_char() {
        let mut table = Table::new();
        let opt = ParseOption {
            max_line_len: Some(6),
            ..Default::default()
        };
        let mut parser = Parser::new("; abcd\r\nk = v\n".chars(), opt);
        parser.parse_into(&mut table).unwrap();

        assert_eq!(
            parser.diagnostics(),
            &[ParseError {
                line: 1,
                kind: ParseErrorKind::LineTooLong,
                token: "; abcd".to_owned(),
            }]
        );
        assert_eq!(table.get_entry("", "k"), Some("v"));
    }

    #[test]
    fn crlf_line_endings() {
        let (table, diags) = parse("[s]\r\nk = v\r\n; note\r\n");
        assert!(diags.is_empty());
        assert_eq!(table.get_entry("s", "k"), Some("v"));
        assert_eq!(
            entries(&table, "s"),
            vec![("k".to_owned(), "v".to_owned()), ("; note".to_owned(), String::new())]
        );
    }

    #[test]
    fn duplicate_keys_keep_last_value_in_first_position() {
        let (table, _) = parse("[s]\na = 1\nb = 2\na = 3\n");
        assert_eq!(
            entries(&table, "s"),
            vec![("a".to_owned(), "3".to_owned()), ("b".to_owned(), "2".to_owned())]
        );
    }

    #[test]
    fn reopened_section_is_merged() {
        let (table, _) = parse("[s]\na = 1\n[t]\n[s]\nb = 2\n");
        assert_eq!(table.len(), 2);
        assert_eq!(table.get_entry("s", "b"), Some("2"));
    }

    #[test]
    fn empty_brackets_select_implicit_section() {
        let (table, _) = parse("[s]\na = 1\n[]\nb = 2\n");
        assert_eq!(table.get_entry("", "b"), Some("2"));
    }

    #[test]
    fn entry_on_header_line() {
        let (table, _) = parse("[s]k=v\n");
        assert_eq!(table.get_entry("s", "k"), Some("v"));
    }

    #[test]
    fn works_over_any_char_iterator() {
        let source = vec!['k', ' ', '=', ' ', 'v'];
        let mut table = Table::new();
        Parser::new(source.into_iter(), ParseOption::default())
            .parse_into(&mut table)
            .unwrap();
        assert_eq!(table.get_entry("", "k"), Some("v"));
    }

    #[test]
    fn error_display() {
        let err = ParseError {
            line: 3,
            kind: ParseErrorKind::MissingAssignment,
            token: "oops".to_owned(),
        };
        assert_eq!(err.to_string(), "line 3: key is missing `=` near `oops`");
    }
}
