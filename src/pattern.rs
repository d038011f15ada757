//! Structural match predicates.
//!
//! Selector sets are declared as strings in a small CSS subset and compiled
//! into [`Pattern`] values, which are then evaluated against a [`Page`].

use crate::dom::{NodeId, Page};
use crate::error::SelectorError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrOp {
    Exists,
    Equals(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    /// Whitespace-separated word match, as used by `.class`
    Word(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrMatch {
    pub name: String,
    pub op: AttrOp,
}

impl AttrMatch {
    fn matches(&self, value: Option<&str>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match &self.op {
            AttrOp::Exists => true,
            AttrOp::Equals(expected) => value == expected,
            AttrOp::Contains(fragment) => value.contains(fragment.as_str()),
            AttrOp::StartsWith(prefix) => value.starts_with(prefix.as_str()),
            AttrOp::EndsWith(suffix) => value.ends_with(suffix.as_str()),
            AttrOp::Word(word) => value.split_whitespace().any(|w| w == word),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Any element
    Any,
    Tag(String),
    Attr(AttrMatch),
    /// Case-insensitive substring of the element's text
    Text(String),
    /// Some strict ancestor matches
    Within(Box<Pattern>),
    /// Some strict descendant matches
    Has(Box<Pattern>),
    All(Vec<Pattern>),
}

impl Pattern {
    pub fn parse(selector: &str) -> Result<Pattern, SelectorError> {
        let mut parser = Parser {
            source: selector,
            chars: selector.chars().collect(),
            pos: 0,
        };
        let pattern = parser.selector(false)?;
        Ok(pattern)
    }

    pub fn tag(name: &str) -> Pattern {
        Pattern::Tag(name.to_ascii_lowercase())
    }

    pub fn attr(name: &str, op: AttrOp) -> Pattern {
        Pattern::Attr(AttrMatch {
            name: name.to_ascii_lowercase(),
            op,
        })
    }

    pub fn matches<P: Page + ?Sized>(&self, page: &P, node: NodeId) -> bool {
        match self {
            Pattern::Any => page.tag_name(node).is_some(),
            Pattern::Tag(tag) => page.tag_name(node).as_deref() == Some(tag.as_str()),
            Pattern::Attr(attr) => attr.matches(page.attribute(node, &attr.name).as_deref()),
            Pattern::Text(fragment) => page
                .text_content(node)
                .to_lowercase()
                .contains(&fragment.to_lowercase()),
            Pattern::Within(ancestor) => page
                .ancestors(node)
                .into_iter()
                .any(|candidate| ancestor.matches(page, candidate)),
            Pattern::Has(inner) => page
                .descendants(node)
                .into_iter()
                .any(|candidate| inner.matches(page, candidate)),
            Pattern::All(parts) => parts.iter().all(|part| part.matches(page, node)),
        }
    }
}

/// Every element under the body matching `pattern`, in document order
pub fn select_all<P: Page + ?Sized>(page: &P, pattern: &Pattern) -> Vec<NodeId> {
    let Some(body) = page.body() else {
        return Vec::new();
    };
    page.descendants(body)
        .into_iter()
        .filter(|node| pattern.matches(page, *node))
        .collect()
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn selector(&mut self, nested: bool) -> Result<Pattern, SelectorError> {
        let mut chain: Option<Pattern> = None;
        loop {
            self.skip_whitespace();
            match self.peek() {
                None if nested => return Err(self.unterminated('(')),
                None => break,
                Some(')') if nested => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {}
            }
            let compound = self.compound()?;
            chain = Some(match chain {
                None => compound,
                Some(ancestor) => join(compound, Pattern::Within(Box::new(ancestor))),
            });
        }
        chain.ok_or(SelectorError::Empty)
    }

    fn compound(&mut self) -> Result<Pattern, SelectorError> {
        let mut parts = Vec::new();
        match self.peek() {
            Some('*') => {
                self.pos += 1;
                parts.push(Pattern::Any);
            }
            Some(c) if is_ident_char(c) => parts.push(Pattern::tag(&self.ident())),
            _ => {}
        }
        loop {
            match self.peek() {
                Some('[') => {
                    self.pos += 1;
                    parts.push(self.attribute()?);
                }
                Some('.') => {
                    self.pos += 1;
                    let class = self.ident();
                    if class.is_empty() {
                        return Err(self.unexpected());
                    }
                    parts.push(Pattern::attr("class", AttrOp::Word(class)));
                }
                Some(':') => {
                    self.pos += 1;
                    parts.push(self.pseudo()?);
                }
                None | Some(')') => break,
                Some(c) if c.is_whitespace() => break,
                Some(_) => return Err(self.unexpected()),
            }
        }
        match parts.len() {
            0 => Err(self.unexpected()),
            1 => Ok(parts.remove(0)),
            _ => Ok(Pattern::All(parts)),
        }
    }

    fn attribute(&mut self) -> Result<Pattern, SelectorError> {
        self.skip_whitespace();
        let name = self.ident();
        if name.is_empty() {
            return Err(self.unexpected());
        }
        self.skip_whitespace();
        let op_char = match self.peek() {
            Some(']') => {
                self.pos += 1;
                return Ok(Pattern::attr(&name, AttrOp::Exists));
            }
            Some(c @ ('*' | '^' | '$' | '~')) => {
                self.pos += 1;
                Some(c)
            }
            Some('=') => None,
            Some(_) => return Err(self.unexpected()),
            None => return Err(self.unterminated('[')),
        };
        if self.peek() != Some('=') {
            return Err(self.unexpected());
        }
        self.pos += 1;
        self.skip_whitespace();
        let value = self.value('[')?;
        self.skip_whitespace();
        match self.peek() {
            Some(']') => self.pos += 1,
            None => return Err(self.unterminated('[')),
            Some(_) => return Err(self.unexpected()),
        }
        let op = match op_char {
            None => AttrOp::Equals(value),
            Some('*') => AttrOp::Contains(value),
            Some('^') => AttrOp::StartsWith(value),
            Some('$') => AttrOp::EndsWith(value),
            Some(_) => AttrOp::Word(value),
        };
        Ok(Pattern::attr(&name, op))
    }

    fn pseudo(&mut self) -> Result<Pattern, SelectorError> {
        let name = self.ident();
        if self.peek() != Some('(') {
            return Err(SelectorError::UnsupportedPseudo {
                selector: self.source.to_string(),
                name,
            });
        }
        self.pos += 1;
        match name.as_str() {
            "has" => Ok(Pattern::Has(Box::new(self.selector(true)?))),
            "contains" => {
                self.skip_whitespace();
                let text = self.value('(')?;
                self.skip_whitespace();
                match self.peek() {
                    Some(')') => self.pos += 1,
                    None => return Err(self.unterminated('(')),
                    Some(_) => return Err(self.unexpected()),
                }
                Ok(Pattern::Text(text))
            }
            _ => Err(SelectorError::UnsupportedPseudo {
                selector: self.source.to_string(),
                name,
            }),
        }
    }

    /// A quoted string or a bare identifier
    fn value(&mut self, open: char) -> Result<String, SelectorError> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.pos += 1;
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c == quote {
                        let value = self.chars[start..self.pos].iter().collect();
                        self.pos += 1;
                        return Ok(value);
                    }
                    self.pos += 1;
                }
                Err(self.unterminated(quote))
            }
            Some(c) if is_ident_char(c) => Ok(self.ident()),
            Some(_) => Err(self.unexpected()),
            None => Err(self.unterminated(open)),
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn unexpected(&self) -> SelectorError {
        match self.peek() {
            Some(found) => SelectorError::Unexpected {
                selector: self.source.to_string(),
                offset: self.pos,
                found,
            },
            None => SelectorError::Unterminated {
                selector: self.source.to_string(),
                open: '(',
            },
        }
    }

    fn unterminated(&self, open: char) -> SelectorError {
        SelectorError::Unterminated {
            selector: self.source.to_string(),
            open,
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn join(subject: Pattern, ancestor: Pattern) -> Pattern {
    match subject {
        Pattern::All(mut parts) => {
            parts.push(ancestor);
            Pattern::All(parts)
        }
        other => Pattern::All(vec![other, ancestor]),
    }
}
