use std::fmt::{Display, Formatter};
use std::str::FromStr;

use super::error::PathError;

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Structured field name. Strings are parsed into segments once, at the
/// public boundary, and formatted back only for display.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, PathError> {
        let mut segments = Vec::new();
        let mut key = String::new();
        let mut chars = input.char_indices().peekable();
        // Set after `]` so that `a[0]b` is rejected while `a[0].b` and `a[0][1]` pass.
        let mut after_bracket = false;

        while let Some((offset, ch)) = chars.next() {
            match ch {
                '.' => {
                    if key.is_empty() && !after_bracket {
                        return Err(PathError::EmptySegment {
                            path: input.to_string(),
                            offset,
                        });
                    }
                    if !key.is_empty() {
                        segments.push(segment_from_key(std::mem::take(&mut key)));
                    }
                    after_bracket = false;
                    if chars.peek().is_none() {
                        return Err(PathError::EmptySegment {
                            path: input.to_string(),
                            offset: offset + 1,
                        });
                    }
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(segment_from_key(std::mem::take(&mut key)));
                    } else if segments.is_empty() {
                        return Err(PathError::EmptySegment {
                            path: input.to_string(),
                            offset,
                        });
                    }
                    let mut digits = String::new();
                    let mut closed = false;
                    for (_, inner) in chars.by_ref() {
                        if inner == ']' {
                            closed = true;
                            break;
                        }
                        digits.push(inner);
                    }
                    if !closed {
                        return Err(PathError::UnclosedBracket {
                            path: input.to_string(),
                            offset,
                        });
                    }
                    if digits.is_empty() {
                        // `items[]` names the list itself.
                        if chars.peek().is_some() {
                            return Err(PathError::InvalidIndex {
                                path: input.to_string(),
                                index: digits,
                            });
                        }
                    } else {
                        let index = digits.parse::<usize>().map_err(|_| PathError::InvalidIndex {
                            path: input.to_string(),
                            index: digits.clone(),
                        })?;
                        segments.push(PathSegment::Index(index));
                    }
                    after_bracket = true;
                }
                ']' => {
                    return Err(PathError::UnexpectedBracket {
                        path: input.to_string(),
                        offset,
                    });
                }
                other => {
                    if after_bracket {
                        return Err(PathError::UnexpectedBracket {
                            path: input.to_string(),
                            offset,
                        });
                    }
                    key.push(other);
                }
            }
        }

        if !key.is_empty() {
            segments.push(segment_from_key(key));
        }
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Key(key.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(PathSegment::Index(index));
        self
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Index of this path directly below `list`, e.g. `2` for `items[2].name`
    /// under `items`.
    pub fn index_under(&self, list: &FieldPath) -> Option<usize> {
        if !self.starts_with(list) {
            return None;
        }
        match self.segments.get(list.segments.len()) {
            Some(PathSegment::Index(index)) => Some(*index),
            _ => None,
        }
    }

    /// Rewrites the index directly below `list`. Returns `None` when this path
    /// has no index there.
    pub fn with_index_under(&self, list: &FieldPath, index: usize) -> Option<FieldPath> {
        self.index_under(list)?;
        let mut segments = self.segments.clone();
        segments[list.segments.len()] = PathSegment::Index(index);
        Some(FieldPath { segments })
    }
}

fn segment_from_key(key: String) -> PathSegment {
    if !key.is_empty() && key.bytes().all(|byte| byte.is_ascii_digit()) {
        if let Ok(index) = key.parse::<usize>() {
            return PathSegment::Index(index);
        }
    }
    PathSegment::Key(key)
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (position, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if position == 0 => f.write_str(key)?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl TryFrom<&str> for FieldPath {
    type Error = PathError;

    fn try_from(input: &str) -> Result<Self, Self::Error> {
        Self::parse(input)
    }
}

impl TryFrom<&String> for FieldPath {
    type Error = PathError;

    fn try_from(input: &String) -> Result<Self, Self::Error> {
        Self::parse(input)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = PathError;

    fn try_from(input: String) -> Result<Self, Self::Error> {
        Self::parse(&input)
    }
}

impl TryFrom<&FieldPath> for FieldPath {
    type Error = PathError;

    fn try_from(path: &FieldPath) -> Result<Self, Self::Error> {
        Ok(path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_and_bracketed_forms_to_the_same_path() {
        let bracketed = FieldPath::parse("items[2].name").expect("bracketed path");
        let dotted = FieldPath::parse("items.2.name").expect("dotted path");
        assert_eq!(bracketed, dotted);
        assert_eq!(
            bracketed.segments(),
            &[
                PathSegment::Key("items".into()),
                PathSegment::Index(2),
                PathSegment::Key("name".into()),
            ]
        );
        assert_eq!(bracketed.to_string(), "items[2].name");
    }

    #[test]
    fn empty_brackets_name_the_list() {
        assert_eq!(
            FieldPath::parse("items[]").expect("list path"),
            FieldPath::parse("items").expect("plain path")
        );
        assert!(FieldPath::parse("items[].name").is_err());
    }

    #[test]
    fn nested_indices_parse() {
        let path = FieldPath::parse("grid[1][3]").expect("nested indices");
        assert_eq!(path.to_string(), "grid[1][3]");
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn rejects_malformed_paths() {
        assert_eq!(FieldPath::parse(""), Err(PathError::Empty));
        assert!(matches!(
            FieldPath::parse("a..b"),
            Err(PathError::EmptySegment { .. })
        ));
        assert!(matches!(
            FieldPath::parse("a."),
            Err(PathError::EmptySegment { .. })
        ));
        assert!(matches!(
            FieldPath::parse("a[1"),
            Err(PathError::UnclosedBracket { .. })
        ));
        assert!(matches!(
            FieldPath::parse("a[x]"),
            Err(PathError::InvalidIndex { .. })
        ));
        assert!(matches!(
            FieldPath::parse("a]"),
            Err(PathError::UnexpectedBracket { .. })
        ));
        assert!(matches!(
            FieldPath::parse("a[0]b"),
            Err(PathError::UnexpectedBracket { .. })
        ));
    }

    #[test]
    fn index_helpers_rewrite_only_the_list_position() {
        let list = FieldPath::parse("items").expect("list");
        let item = FieldPath::parse("items[4].tags[1]").expect("item");
        assert_eq!(item.index_under(&list), Some(4));
        assert_eq!(
            item.with_index_under(&list, 3).map(|path| path.to_string()),
            Some("items[3].tags[1]".to_string())
        );
        let other = FieldPath::parse("itemsx[1]").expect("other");
        assert_eq!(other.index_under(&list), None);
    }
}
