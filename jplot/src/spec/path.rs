//! Extraction paths into decoded JSON documents.
//!
//! A path is a sequence of object keys and array indices written as
//! `cpu.percent`, `disks[0].read_bytes` or `[2].value`. Keys are separated by
//! `.`, indices are written in brackets and may follow a key directly or open
//! the path.

use std::{fmt, str::FromStr};

use serde_json::Value;

/// Errors produced when parsing a [`Path`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The path text was empty.
    #[error("path is empty")]
    Empty,
    /// A key segment was empty, as in `a..b`, `.a` or `a.`.
    #[error("empty key at offset {offset}")]
    EmptySegment {
        /// Byte offset of the empty segment.
        offset: usize,
    },
    /// A `[` was never closed.
    #[error("unterminated index starting at offset {offset}")]
    Unterminated {
        /// Byte offset of the opening bracket.
        offset: usize,
    },
    /// An index was not a non-negative integer.
    #[error("invalid array index '{index}'")]
    InvalidIndex {
        /// Text found between the brackets.
        index: String,
    },
    /// A character appeared where it is not allowed.
    #[error("unexpected '{found}' at offset {offset}")]
    Unexpected {
        /// The offending character.
        found: char,
        /// Byte offset of the offending character.
        offset: usize,
    },
}

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Look up a key in an object.
    Key(String),
    /// Look up an element of an array.
    Index(usize),
}

/// A compiled extraction path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    text: String,
    segments: Vec<Segment>,
}

impl Path {
    /// The segments of this path, outermost first.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The path as written by the user.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Walk `document` along this path and read a numeric value.
    ///
    /// Numbers are read as `f64`, booleans as 1 or 0, and strings are accepted
    /// when they parse as a float. A missing segment, any other value type or
    /// a non-finite result produces `None`.
    #[must_use]
    pub fn extract(&self, document: &Value) -> Option<f64> {
        let mut cursor = document;
        for segment in &self.segments {
            cursor = match segment {
                Segment::Key(key) => cursor.as_object()?.get(key)?,
                Segment::Index(index) => cursor.as_array()?.get(*index)?,
            };
        }

        let value = match cursor {
            Value::Number(n) => n.as_f64()?,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            Value::Null | Value::Array(_) | Value::Object(_) => return None,
        };
        value.is_finite().then_some(value)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.is_empty() {
            return Err(Error::Empty);
        }

        let bytes = input.as_bytes();
        let mut segments = Vec::new();
        let mut offset = 0;
        // True when the previous character was a '.', meaning a key must
        // follow.
        let mut need_key = false;

        while offset < bytes.len() {
            match bytes[offset] {
                b'[' => {
                    if need_key {
                        return Err(Error::EmptySegment { offset });
                    }
                    let close = input[offset..]
                        .find(']')
                        .map(|pos| offset + pos)
                        .ok_or(Error::Unterminated { offset })?;
                    let index = &input[offset + 1..close];
                    let parsed = if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())
                    {
                        index.parse::<usize>().ok()
                    } else {
                        None
                    };
                    let Some(parsed) = parsed else {
                        return Err(Error::InvalidIndex {
                            index: index.to_string(),
                        });
                    };
                    segments.push(Segment::Index(parsed));
                    offset = close + 1;

                    // An index is followed by the end, another index or a '.'.
                    match bytes.get(offset) {
                        None | Some(b'[') => {}
                        Some(b'.') => {
                            need_key = true;
                            offset += 1;
                        }
                        Some(_) => {
                            return Err(unexpected(input, offset));
                        }
                    }
                }
                b'.' => {
                    return Err(Error::EmptySegment { offset });
                }
                b']' => {
                    return Err(unexpected(input, offset));
                }
                _ => {
                    let end = input[offset..]
                        .find(['.', '[', ']'])
                        .map_or(input.len(), |pos| offset + pos);
                    segments.push(Segment::Key(input[offset..end].to_string()));
                    need_key = false;
                    offset = end;

                    if bytes.get(offset) == Some(&b'.') {
                        need_key = true;
                        offset += 1;
                    }
                }
            }
        }

        if need_key {
            // Trailing '.'
            return Err(Error::EmptySegment {
                offset: input.len(),
            });
        }

        Ok(Self {
            text: input.to_string(),
            segments,
        })
    }
}

fn unexpected(input: &str, offset: usize) -> Error {
    let found = input[offset..].chars().next().unwrap_or('?');
    Error::Unexpected { found, offset }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn path(s: &str) -> Path {
        s.parse().expect("path should parse")
    }

    #[test]
    fn parses_nested_keys_and_indices() {
        assert_eq!(
            path("disks[0].io[12].read").segments(),
            &[
                Segment::Key("disks".into()),
                Segment::Index(0),
                Segment::Key("io".into()),
                Segment::Index(12),
                Segment::Key("read".into()),
            ]
        );
        assert_eq!(
            path("[1][2]").segments(),
            &[Segment::Index(1), Segment::Index(2)]
        );
    }

    #[test]
    fn rejects_malformed_paths() {
        assert_eq!("".parse::<Path>(), Err(Error::Empty));
        assert_eq!(
            "a..b".parse::<Path>(),
            Err(Error::EmptySegment { offset: 2 })
        );
        assert_eq!(".a".parse::<Path>(), Err(Error::EmptySegment { offset: 0 }));
        assert_eq!("a.".parse::<Path>(), Err(Error::EmptySegment { offset: 2 }));
        assert_eq!(
            "a[1".parse::<Path>(),
            Err(Error::Unterminated { offset: 1 })
        );
        assert_eq!(
            "a[x]".parse::<Path>(),
            Err(Error::InvalidIndex { index: "x".into() })
        );
        assert_eq!(
            "a[]".parse::<Path>(),
            Err(Error::InvalidIndex { index: String::new() })
        );
        assert_eq!(
            "a[-1]".parse::<Path>(),
            Err(Error::InvalidIndex { index: "-1".into() })
        );
        assert_eq!(
            "a[0]b".parse::<Path>(),
            Err(Error::Unexpected {
                found: 'b',
                offset: 4
            })
        );
        assert_eq!(
            "a]".parse::<Path>(),
            Err(Error::Unexpected {
                found: ']',
                offset: 1
            })
        );
    }

    #[test]
    fn extracts_numbers_flags_and_numeric_strings() {
        let doc = json!({
            "cpu": {"percent": 12.5},
            "disks": [{"read": 7}, {"read": 9}],
            "up": true,
            "load": " 1.25 ",
            "name": "host",
            "nothing": null,
        });

        assert_eq!(path("cpu.percent").extract(&doc), Some(12.5));
        assert_eq!(path("disks[1].read").extract(&doc), Some(9.0));
        assert_eq!(path("up").extract(&doc), Some(1.0));
        assert_eq!(path("load").extract(&doc), Some(1.25));
        assert_eq!(path("name").extract(&doc), None);
        assert_eq!(path("nothing").extract(&doc), None);
        assert_eq!(path("cpu").extract(&doc), None);
        assert_eq!(path("disks[2].read").extract(&doc), None);
        assert_eq!(path("cpu[0]").extract(&doc), None);
        assert_eq!(path("missing.key").extract(&doc), None);
    }

    #[test]
    fn extracts_from_top_level_array() {
        let doc = json!([{"v": 1}, {"v": 2}]);
        assert_eq!(path("[1].v").extract(&doc), Some(2.0));
    }

    proptest! {
        #[test]
        fn dotted_keys_round_trip(keys in prop::collection::vec("[a-z_][a-z0-9_]{0,8}", 1..6)) {
            let text = keys.join(".");
            let parsed: Path = text.parse().expect("generated path must parse");
            let expected: Vec<Segment> = keys.into_iter().map(Segment::Key).collect();
            prop_assert_eq!(parsed.segments(), expected.as_slice());
            prop_assert_eq!(parsed.as_str(), text.as_str());
        }
    }
}
