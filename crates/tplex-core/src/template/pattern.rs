//! Pattern compilation and replacement templates.

use regex::{Captures, Regex, RegexBuilder, RegexSet, RegexSetBuilder, Replacer};

use crate::models::config::EngineConfig;

/// Compile limits applied to every pattern of a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileLimits {
    /// Compiled program size limit, in bytes.
    pub size_limit: usize,
    /// Lazy DFA cache size limit, in bytes.
    pub dfa_size_limit: usize,
}

impl CompileLimits {
    /// Compile a single pattern.
    pub fn compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        RegexBuilder::new(pattern)
            .size_limit(self.size_limit)
            .dfa_size_limit(self.dfa_size_limit)
            .build()
    }

    /// Compile a set of patterns matched in one pass.
    pub fn compile_set<I, S>(&self, patterns: I) -> Result<RegexSet, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        RegexSetBuilder::new(patterns)
            .size_limit(self.size_limit)
            .dfa_size_limit(self.dfa_size_limit)
            .build()
    }
}

impl From<&EngineConfig> for CompileLimits {
    fn from(config: &EngineConfig) -> Self {
        Self {
            size_limit: config.regex_size_limit,
            dfa_size_limit: config.dfa_size_limit,
        }
    }
}

impl Default for CompileLimits {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// Reference to a capture group inside a replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupRef {
    Index(usize),
    Name(String),
}

impl std::fmt::Display for GroupRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupRef::Index(i) => write!(f, "{}", i),
            GroupRef::Name(n) => f.write_str(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Group(GroupRef),
}

/// A parsed replacement template.
///
/// Accepts `\1` to `\99`, `\g<1>`, `\g<name>`, `$1`, `${1}`, `$name` and `${name}`
/// references, the escapes `\\`, `\n`, `\r`, `\t` and `$$`. A group that
/// did not take part in the match expands to the empty string. `\0` is
/// refused; the whole match is `\g<0>` or `$0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    parts: Vec<Part>,
}

impl Replacement {
    /// Parse a replacement template.
    pub fn parse(template: &str) -> Result<Self, String> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        let push_group = |literal: &mut String, parts: &mut Vec<Part>, group: GroupRef| {
            if !literal.is_empty() {
                parts.push(Part::Literal(std::mem::take(literal)));
            }
            parts.push(Part::Group(group));
        };

        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('0') => {
                        return Err("\\0 is not a group reference, use \\g<0>".to_string());
                    }
                    Some(d) if d.is_ascii_digit() => {
                        let mut digits = d.to_string();
                        if let Some(&e) = chars.peek() {
                            if e.is_ascii_digit() {
                                digits.push(e);
                                chars.next();
                            }
                        }
                        push_group(&mut literal, &mut parts, parse_ref(&digits)?);
                    }
                    Some('g') => {
                        if chars.next() != Some('<') {
                            return Err("expected '<' after \\g".to_string());
                        }
                        let name = read_until(&mut chars, '>')
                            .ok_or_else(|| "unterminated \\g<...> reference".to_string())?;
                        push_group(&mut literal, &mut parts, parse_ref(&name)?);
                    }
                    Some('n') => literal.push('\n'),
                    Some('r') => literal.push('\r'),
                    Some('t') => literal.push('\t'),
                    Some('\\') => literal.push('\\'),
                    Some(other) if other.is_ascii_alphabetic() => {
                        return Err(format!("unknown escape \\{}", other));
                    }
                    Some(other) => {
                        literal.push('\\');
                        literal.push(other);
                    }
                    None => return Err("dangling backslash at end of replacement".to_string()),
                },
                '$' => match chars.peek().copied() {
                    Some('$') => {
                        chars.next();
                        literal.push('$');
                    }
                    Some('{') => {
                        chars.next();
                        let name = read_until(&mut chars, '}')
                            .ok_or_else(|| "unterminated ${...} reference".to_string())?;
                        push_group(&mut literal, &mut parts, parse_ref(&name)?);
                    }
                    Some(d) if d.is_ascii_digit() => {
                        let mut digits = String::new();
                        while let Some(&d) = chars.peek() {
                            if !d.is_ascii_digit() {
                                break;
                            }
                            digits.push(d);
                            chars.next();
                        }
                        push_group(&mut literal, &mut parts, parse_ref(&digits)?);
                    }
                    Some(s) if s.is_ascii_alphabetic() || s == '_' => {
                        let mut name = String::new();
                        while let Some(&s) = chars.peek() {
                            if !(s.is_ascii_alphanumeric() || s == '_') {
                                break;
                            }
                            name.push(s);
                            chars.next();
                        }
                        push_group(&mut literal, &mut parts, GroupRef::Name(name));
                    }
                    _ => literal.push('$'),
                },
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Ok(Self { parts })
    }

    /// First group reference that `regex` does not define, if any.
    pub fn dangling_reference(&self, regex: &Regex) -> Option<&GroupRef> {
        self.groups().find(|group| match group {
            GroupRef::Index(i) => *i >= regex.captures_len(),
            GroupRef::Name(name) => !regex.capture_names().flatten().any(|n| n == name),
        })
    }

    /// Whether the replacement contains no group references.
    pub fn is_literal(&self) -> bool {
        self.groups().next().is_none()
    }

    fn groups(&self) -> impl Iterator<Item = &GroupRef> {
        self.parts.iter().filter_map(|p| match p {
            Part::Group(g) => Some(g),
            Part::Literal(_) => None,
        })
    }

    fn literal(&self) -> String {
        self.parts
            .iter()
            .map(|p| match p {
                Part::Literal(s) => s.as_str(),
                Part::Group(_) => "",
            })
            .collect()
    }
}

/// Consume characters up to `end`; `None` if `end` never appears.
fn read_until(chars: &mut impl Iterator<Item = char>, end: char) -> Option<String> {
    let mut out = String::new();
    for c in chars {
        if c == end {
            return Some(out);
        }
        out.push(c);
    }
    None
}

fn parse_ref(reference: &str) -> Result<GroupRef, String> {
    if reference.is_empty() {
        return Err("empty group reference".to_string());
    }
    if reference.chars().all(|c| c.is_ascii_digit()) {
        return reference
            .parse()
            .map(GroupRef::Index)
            .map_err(|_| format!("invalid group index '{}'", reference));
    }
    let valid_name = reference
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && reference.chars().all(|c| c.is_alphanumeric() || c == '_');
    if valid_name {
        Ok(GroupRef::Name(reference.to_string()))
    } else {
        Err(format!("invalid group name '{}'", reference))
    }
}

impl Replacer for &Replacement {
    fn replace_append(&mut self, caps: &Captures<'_>, dst: &mut String) {
        for part in &self.parts {
            match part {
                Part::Literal(s) => dst.push_str(s),
                Part::Group(GroupRef::Index(i)) => {
                    dst.push_str(caps.get(*i).map_or("", |m| m.as_str()));
                }
                Part::Group(GroupRef::Name(n)) => {
                    dst.push_str(caps.name(n).map_or("", |m| m.as_str()));
                }
            }
        }
    }

    fn no_expansion(&mut self) -> Option<std::borrow::Cow<'_, str>> {
        self.is_literal().then(|| std::borrow::Cow::Owned(self.literal()))
    }
}
