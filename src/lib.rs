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

//! Ordered INI table that keeps comments across a read-modify-write cycle
//!
//! ```no_run
//! use ini_table::Table;
//!
//! let mut conf = Table::new();
//! conf.with_section("User")
//!     .comment("; who runs the service")
//!     .set("name", "Raspberry")
//!     .set("value", "Pi");
//! conf.upsert_entry("Library", "name", "Sun Yat-sen U");
//! conf.write_to_file("conf.ini").unwrap();
//!
//! let conf = Table::load_from_file("conf.ini").unwrap();
//! for (sec, entries) in conf.iter() {
//!     println!("Section: {:?}", sec);
//!     for (k, v) in entries.iter() {
//!         println!("{}:{}", k, v);
//!     }
//! }
//! ```

use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, BufReader, BufWriter, Read, Write},
    mem,
    ops::Index,
    path::{Path, PathBuf},
};

use cfg_if::cfg_if;
use log::trace;
use ordered_multimap::{
    list_ordered_multimap::{Entry, Iter},
    ListOrderedMultimap,
};
use thiserror::Error;
#[cfg(feature = "case-insensitive")]
use unicase::UniCase;

mod parser;

pub use crate::parser::{ParseError, ParseErrorKind, Parser};

/// First character of a comment line
pub const COMMENT_MARKER: char = ';';

const BOM: char = '\u{feff}';

/// Whether `key` names a comment pseudo-entry rather than a real key
pub fn is_comment(key: &str) -> bool {
    key.starts_with(COMMENT_MARKER)
}

/// What the parser does with a line it cannot understand
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MalformedLinePolicy {
    /// Log and record the line, drop it, keep parsing
    #[default]
    Skip,
    /// Fail the whole parse on the first malformed line
    Abort,
}

/// Parsing configuration
#[derive(Debug, Clone, Default)]
pub struct ParseOption {
    /// Reaction to a header without `]` or a key without `=`
    pub malformed_line: MalformedLinePolicy,

    /// Upper bound, in bytes, on the buffered text of one line.
    ///
    /// A longer line is reported as [`ParseErrorKind::LineTooLong`] and
    /// dropped as a whole. `None` means unbounded.
    pub max_line_len: Option<usize>,
}

/// Newline style
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LineSeparator {
    /// System-dependent line separator
    ///
    /// On UNIX system, uses "\n"
    /// On Windows system, uses "\r\n"
    SystemDefault,

    /// Uses "\n" as new line separator
    CR,

    /// Uses "\r\n" as new line separator
    CRLF,
}

#[cfg(not(windows))]
static DEFAULT_LINE_SEPARATOR: &str = "\n";

#[cfg(windows)]
static DEFAULT_LINE_SEPARATOR: &str = "\r\n";

static DEFAULT_KV_SEPARATOR: &str = " = ";

impl fmt::Display for LineSeparator {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.write_str(self.as_str())
    }
}

impl LineSeparator {
    /// String representation
    pub fn as_str(self) -> &'static str {
        match self {
            LineSeparator::SystemDefault => DEFAULT_LINE_SEPARATOR,
            LineSeparator::CR => "\n",
            LineSeparator::CRLF => "\r\n",
        }
    }
}

/// Writing configuration
#[derive(Debug, Clone)]
pub struct WriteOption {
    /// Newline style
    pub line_separator: LineSeparator,

    /// Key value separator
    pub kv_separator: &'static str,
}

impl Default for WriteOption {
    fn default() -> WriteOption {
        WriteOption {
            line_separator: LineSeparator::SystemDefault,
            kv_separator: DEFAULT_KV_SEPARATOR,
        }
    }
}

cfg_if! {
    if #[cfg(feature = "case-insensitive")] {
        /// Internal storage of a section's name
        pub type SectionKey = UniCase<String>;
        /// Internal storage of an entry's key
        pub type EntryKey = UniCase<String>;

        macro_rules! lookup_key {
            ($s:expr) => {
                &UniCase::new(String::from($s))
            };
        }

        macro_rules! insert_key {
            ($s:expr) => {
                UniCase::new($s)
            };
        }
    } else {
        /// Internal storage of a section's name
        pub type SectionKey = String;
        /// Internal storage of an entry's key
        pub type EntryKey = String;

        macro_rules! lookup_key {
            ($s:expr) => {
                $s
            };
        }

        macro_rules! insert_key {
            ($s:expr) => {
                $s
            };
        }
    }
}

/// Ordered entries of one section.
///
/// Comment pseudo-entries live here too: their key is the comment text and
/// their value is empty.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Section {
    data: ListOrderedMultimap<EntryKey, String>,
}

impl Section {
    /// Create an empty section
    pub fn new() -> Section {
        Default::default()
    }

    /// Number of entries, comments included
    pub fn len(&self) -> usize {
        self.data.values_len()
    }

    /// Check if the section has no entry
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> EntryIter<'_> {
        EntryIter {
            inner: self.data.iter(),
        }
    }

    pub fn contains_key<S: AsRef<str>>(&self, key: S) -> bool {
        self.data.contains_key(lookup_key!(key.as_ref()))
    }

    /// Value of the first entry with `key`
    pub fn get<S: AsRef<str>>(&self, key: S) -> Option<&str> {
        self.data.get(lookup_key!(key.as_ref())).map(|v| v.as_str())
    }

    /// Replace the value of the first entry with `key` in place, or append a new entry
    pub fn upsert<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = key.into();
        let value = value.into();
        match self.data.get_mut(lookup_key!(key.as_str())) {
            Some(slot) => *slot = value,
            None => {
                self.data.append(insert_key!(key), value);
            }
        }
    }

    /// Append a comment line, prefixing [`COMMENT_MARKER`] if `text` lacks it.
    ///
    /// Comments are never merged, identical lines are all kept.
    pub fn append_comment<S: Into<String>>(&mut self, text: S) {
        let mut text = text.into();
        if !is_comment(&text) {
            text.insert(0, COMMENT_MARKER);
        }
        self.data.append(insert_key!(text), String::new());
    }

    /// Remove the first entry with `key`, returning its value.
    ///
    /// Later entries sharing the key, such as repeated comment lines, stay.
    pub fn remove<S: AsRef<str>>(&mut self, key: S) -> Option<String> {
        let target = lookup_key!(key.as_ref());
        let mut removed = None;
        self.data.retain(|k, v| {
            if removed.is_none() && *k == *target {
                removed = Some(mem::take(v));
                false
            } else {
                true
            }
        });
        removed
    }
}

impl<S: AsRef<str>> Index<S> for Section {
    type Output = str;

    fn index(&self, index: S) -> &str {
        let s = index.as_ref();
        match self.get(s) {
            Some(p) => p,
            None => panic!("Key `{}` does not exist", s),
        }
    }
}

/// Iterator over a section's `(key, value)` pairs
pub struct EntryIter<'a> {
    inner: Iter<'a, EntryKey, String>,
}

impl<'a> Iterator for EntryIter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for EntryIter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<'a> IntoIterator for &'a Section {
    type IntoIter = EntryIter<'a>;
    type Item = (&'a str, &'a str);

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A setter which upserts entries into one named section
pub struct SectionSetter<'a> {
    table: &'a mut Table,
    section_name: String,
}

impl<'a> SectionSetter<'a> {
    fn new(table: &'a mut Table, section_name: String) -> SectionSetter<'a> {
        SectionSetter { table, section_name }
    }

    /// Create or update `key` in this section
    pub fn set<'b, K, V>(&'b mut self, key: K, value: V) -> &'b mut SectionSetter<'a>
    where
        K: Into<String>,
        V: Into<String>,
        'a: 'b,
    {
        self.table.upsert_entry(&self.section_name, key, value);
        self
    }

    /// Append a comment line to this section
    pub fn comment<'b, S>(&'b mut self, text: S) -> &'b mut SectionSetter<'a>
    where
        S: Into<String>,
        'a: 'b,
    {
        self.table.add_comment(&self.section_name, text);
        self
    }

    /// Get the entry in this section with `key`
    pub fn get<K: AsRef<str>>(&self, key: K) -> Option<&str> {
        self.table.get_entry(&self.section_name, key.as_ref())
    }
}

/// Error while loading or storing a table
#[derive(Debug, Error)]
pub enum Error {
    /// The input or output path could not be opened
    #[error("failed to open `{}`", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Sections of an INI document, in the order they first appeared.
///
/// The empty name is the implicit section holding entries found before any
/// `[header]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    sections: ListOrderedMultimap<SectionKey, Section>,
}

impl Table {
    /// Create an empty table
    pub fn new() -> Table {
        Default::default()
    }

    /// The first section called `name`, appended empty if there is none
    pub fn find_or_create_section(&mut self, name: &str) -> &mut Section {
        match self.sections.entry(insert_key!(name.to_owned())) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(Section::new()),
        }
    }

    /// Create `key` in `section` or replace its value in place
    pub fn upsert_entry<K, V>(&mut self, section: &str, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = key.into();
        let value = value.into();
        trace!("upsert [{}] {} = {}", section, key, value);
        self.find_or_create_section(section).upsert(key, value);
    }

    /// Append a comment line to `section`, creating the section if needed
    pub fn add_comment<S: Into<String>>(&mut self, section: &str, text: S) {
        self.find_or_create_section(section).append_comment(text);
    }

    /// Set with a specified section, `""` is the implicit section
    pub fn with_section<S: Into<String>>(&mut self, section: S) -> SectionSetter<'_> {
        SectionSetter::new(self, section.into())
    }

    /// The first section called `name`
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(lookup_key!(name))
    }

    /// The first section called `name`, mutable
    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.get_mut(lookup_key!(name))
    }

    /// Value of `key` in the first section called `section`
    ///
    /// ```
    /// use ini_table::Table;
    /// let table = Table::load_from_str("[sec]\nabc = def\n").unwrap();
    /// assert_eq!(table.get_entry("sec", "abc"), Some("def"));
    /// assert_eq!(table.get_entry("sec", "xyz"), None);
    /// ```
    pub fn get_entry(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section).and_then(|s| s.get(key))
    }

    pub fn contains_entry(&self, section: &str, key: &str) -> bool {
        self.get_entry(section, key).is_some()
    }

    /// Integer value of an entry, parsed from its leading digits.
    ///
    /// Leading ASCII whitespace and one sign are accepted, parsing stops at the
    /// first non-digit, no digits at all gives `0`. Out of range values saturate.
    ///
    /// ```
    /// use ini_table::Table;
    /// let table = Table::load_from_str("port = 8080/tcp\nname = web\n").unwrap();
    /// assert_eq!(table.get_entry_as_int("", "port"), Some(8080));
    /// assert_eq!(table.get_entry_as_int("", "name"), Some(0));
    /// assert_eq!(table.get_entry_as_int("", "missing"), None);
    /// ```
    pub fn get_entry_as_int(&self, section: &str, key: &str) -> Option<i64> {
        self.get_entry(section, key).map(parse_int_prefix)
    }

    /// `true` iff the value is `on` or `true`, ignoring ASCII case. `None` if absent.
    pub fn get_entry_as_bool(&self, section: &str, key: &str) -> Option<bool> {
        self.get_entry(section, key)
            .map(|v| v.eq_ignore_ascii_case("on") || v.eq_ignore_ascii_case("true"))
    }

    /// Value with one surrounding pair of double quotes removed
    pub fn get_entry_unquoted(&self, section: &str, key: &str) -> Option<&str> {
        self.get_entry(section, key).map(|v| {
            let v = v.strip_prefix('"').unwrap_or(v);
            v.strip_suffix('"').unwrap_or(v)
        })
    }

    /// Delete `key` from `section`, returning the value if it existed
    pub fn delete_entry(&mut self, section: &str, key: &str) -> Option<String> {
        self.section_mut(section).and_then(|s| s.remove(key))
    }

    /// Section names in order
    pub fn sections(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.sections.keys().map(|s| s.as_str())
    }

    /// Iterate over `(name, section)` in order
    pub fn iter(&self) -> SectionIter<'_> {
        SectionIter {
            inner: self.sections.iter(),
        }
    }

    /// Total sections count
    pub fn len(&self) -> usize {
        self.sections.keys_len()
    }

    /// Check if the table has no section
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

fn parse_int_prefix(s: &str) -> i64 {
    let s = s.trim_start_matches(|c: char| c.is_ascii_whitespace());
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .map(|b| i64::from(b - b'0'))
        .fold(0i64, |n, d| {
            if negative {
                n.saturating_mul(10).saturating_sub(d)
            } else {
                n.saturating_mul(10).saturating_add(d)
            }
        })
}

impl<'q> Index<&'q str> for Table {
    type Output = Section;

    fn index<'a>(&'a self, index: &'q str) -> &'a Section {
        match self.section(index) {
            Some(p) => p,
            None => panic!("Section `{}` does not exist", index),
        }
    }
}

/// Iterator for traversing sections
pub struct SectionIter<'a> {
    inner: Iter<'a, SectionKey, Section>,
}

impl<'a> Iterator for SectionIter<'a> {
    type Item = (&'a str, &'a Section);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, v)| (k.as_str(), v))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for SectionIter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(k, v)| (k.as_str(), v))
    }
}

impl<'a> IntoIterator for &'a Table {
    type IntoIter = SectionIter<'a>;
    type Item = (&'a str, &'a Section);

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Table {
    /// Write to a file, replacing whatever it held
    pub fn write_to_file<P: AsRef<Path>>(&self, filename: P) -> Result<(), Error> {
        self.write_to_file_opt(filename, Default::default())
    }

    /// Write to a file with options
    pub fn write_to_file_opt<P: AsRef<Path>>(&self, filename: P, opt: WriteOption) -> Result<(), Error> {
        let path = filename.as_ref();
        self.check_writable()?;
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(path)
            .map_err(|source| Error::Open {
                path: path.to_owned(),
                source,
            })?;

        let mut writer = BufWriter::new(file);
        self.write_to_opt(&mut writer, opt)?;
        writer.flush()?;
        Ok(())
    }

    /// Write to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.write_to_opt(writer, Default::default())
    }

    /// Write to a writer with options.
    ///
    /// Sections are separated by an empty line. The implicit section gets no
    /// header when it comes first, and `[]` otherwise. Nothing is written and
    /// `InvalidInput` is returned if a name, key or value would not read back
    /// the same: line breaks anywhere, `]` or `;` in a section name, a key
    /// starting with `[` or holding `=`.
    pub fn write_to_opt<W: Write>(&self, writer: &mut W, opt: WriteOption) -> io::Result<()> {
        self.check_writable()?;

        let mut firstline = true;

        for (index, (name, section)) in self.iter().enumerate() {
            let header = index > 0 || !name.is_empty();
            if !header && section.is_empty() {
                continue;
            }

            if firstline {
                firstline = false;
            } else {
                // Write an empty line between sections
                writer.write_all(opt.line_separator.as_str().as_bytes())?;
            }

            if header {
                write!(writer, "[{}]{}", name, opt.line_separator)?;
            }
            for (k, v) in section.iter() {
                if is_comment(k) {
                    write!(writer, "{}{}", k, opt.line_separator)?;
                } else {
                    write!(writer, "{}{}{}{}", k, opt.kv_separator, v, opt.line_separator)?;
                }
            }
        }
        Ok(())
    }
}

impl Table {
    /// Fail with `InvalidInput` on any name, key or value that would read back differently
    fn check_writable(&self) -> io::Result<()> {
        for (name, section) in self.iter() {
            if name.contains(&['\n', ']', COMMENT_MARKER][..]) {
                return Err(unwritable("section name", name));
            }
            for (k, v) in section.iter() {
                if is_comment(k) {
                    if k.contains('\n') {
                        return Err(unwritable("comment", k));
                    }
                    continue;
                }
                if k.starts_with('[') || k.contains(&['\n', '='][..]) {
                    return Err(unwritable("key", k));
                }
                if v.contains('\n') {
                    return Err(unwritable("value", v));
                }
            }
        }
        Ok(())
    }
}

fn unwritable(what: &str, text: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} `{}` cannot be written as INI", what, text.escape_debug()),
    )
}

impl Table {
    /// Load from a string
    pub fn load_from_str(buf: &str) -> Result<Table, ParseError> {
        Table::load_from_str_opt(buf, ParseOption::default())
    }

    /// Load from a string with options
    pub fn load_from_str_opt(buf: &str, opt: ParseOption) -> Result<Table, ParseError> {
        Table::parse_with_diagnostics(buf, opt).map(|(table, _)| table)
    }

    /// Load from a string, also returning every malformed line that was skipped
    pub fn parse_with_diagnostics(buf: &str, opt: ParseOption) -> Result<(Table, Vec<ParseError>), ParseError> {
        let buf = buf.strip_prefix(BOM).unwrap_or(buf);
        let mut table = Table::new();
        let mut parser = Parser::new(buf.chars(), opt);
        parser.parse_into(&mut table)?;
        Ok((table, parser.into_diagnostics()))
    }

    /// Load from a reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Table, Error> {
        Table::read_from_opt(reader, ParseOption::default())
    }

    /// Load from a reader with options
    pub fn read_from_opt<R: Read>(reader: &mut R, opt: ParseOption) -> Result<Table, Error> {
        let mut s = String::new();
        reader.read_to_string(&mut s)?;
        Ok(Table::load_from_str_opt(&s, opt)?)
    }

    /// Load from a file
    pub fn load_from_file<P: AsRef<Path>>(filename: P) -> Result<Table, Error> {
        Table::load_from_file_opt(filename, ParseOption::default())
    }

    /// Load from a file with options
    pub fn load_from_file_opt<P: AsRef<Path>>(filename: P, opt: ParseOption) -> Result<Table, Error> {
        let path = filename.as_ref();
        let file = File::open(path).map_err(|source| Error::Open {
            path: path.to_owned(),
            source,
        })?;

        Table::read_from_opt(&mut BufReader::new(file), opt)
    }
}

// ------------------------------------------------------------------------------
