//! Graph specification compiler.
//!
//! Each graph is described on the command line by a single string:
//!
//! ```text
//! Title name=path[:marker...],name=path,... [min=N] [max=N] [unit=WORD]
//! ```
//!
//! The first whitespace separated token is the title, the second the comma
//! separated field list and any remaining tokens are display hints. A field is
//! `name=path` or a bare `path`, in which case the path doubles as the name.
//! Markers follow the path: `rate` or `counter` select counter semantics,
//! `gauge` is the default, `bytes` and `percent` select how values are
//! formatted.
//!
//! Compilation is pure. Every error names the token that caused it so a
//! malformed specification is rejected before any sampling begins.

use std::str::FromStr;

use rustc_hash::FxHashSet;

pub mod path;

pub use path::Path;

/// Errors produced when compiling a graph specification.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The specification string was blank.
    #[error("empty graph specification")]
    Empty,
    /// A title was given without any fields.
    #[error("graph '{title}' has no fields")]
    MissingFields {
        /// Title of the offending graph.
        title: String,
    },
    /// The field list contained an empty entry, as in `a=x,,b=y`.
    #[error("empty field in '{token}'")]
    EmptyField {
        /// The field list containing the empty entry.
        token: String,
    },
    /// A field had an empty name, as in `=cpu.percent`.
    #[error("field '{token}' has an empty name")]
    EmptyName {
        /// The offending field.
        token: String,
    },
    /// Two fields of one graph share a display name.
    #[error("duplicate field name '{name}'")]
    DuplicateField {
        /// The repeated name.
        name: String,
    },
    /// A field's extraction path is malformed.
    #[error("invalid path '{token}': {source}")]
    Path {
        /// The offending path text.
        token: String,
        /// Why the path was rejected.
        source: path::Error,
    },
    /// A field marker is not recognized.
    #[error("unknown field marker '{token}'")]
    UnknownMarker {
        /// The offending marker.
        token: String,
    },
    /// Markers on one field disagree or repeat, as in `x:rate:gauge`.
    #[error("conflicting field marker '{token}'")]
    ConflictingMarker {
        /// The offending marker.
        token: String,
    },
    /// A display hint is not recognized.
    #[error("unknown display hint '{token}'")]
    UnknownHint {
        /// The offending hint.
        token: String,
    },
    /// A display hint was given more than once.
    #[error("duplicate display hint '{token}'")]
    DuplicateHint {
        /// The offending hint.
        token: String,
    },
    /// A numeric hint did not parse as a finite number.
    #[error("invalid number in '{token}'")]
    InvalidNumber {
        /// The offending hint.
        token: String,
    },
    /// The `min` hint is not below the `max` hint.
    #[error("min {min} must be below max {max}")]
    InvalidBounds {
        /// The `min` hint.
        min: f64,
        /// The `max` hint.
        max: f64,
    },
}

/// How raw samples of a field relate to what is plotted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Kind {
    /// The raw value is plotted as-is.
    #[default]
    Gauge,
    /// The raw value only increases. Its per-second rate of change is
    /// plotted.
    Counter,
}

/// How values of a field are formatted in labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Plain number with SI suffixes for large magnitudes.
    #[default]
    Plain,
    /// Byte quantity scaled to binary units.
    Bytes,
    /// Percentage.
    Percent,
}

/// One named series within a graph.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Name shown in the legend.
    pub name: String,
    /// Where to find the value in each document.
    pub path: Path,
    /// Gauge or counter semantics.
    pub kind: Kind,
    /// Label formatting.
    pub format: Format,
}

/// Optional display adjustments for a graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hints {
    /// Fixed bottom of the y-axis.
    pub min: Option<f64>,
    /// Fixed top of the y-axis.
    pub max: Option<f64>,
    /// Free-form unit label shown beside the title.
    pub unit: Option<String>,
}

/// One rendered panel.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphSpec {
    /// Panel title.
    pub title: String,
    /// Fields plotted in this panel, in legend order.
    pub fields: Vec<FieldSpec>,
    /// Display hints.
    pub hints: Hints,
}

/// Compile every graph specification, in order.
///
/// # Errors
///
/// Returns the first error encountered. See [`Error`].
pub fn compile<S: AsRef<str>>(specs: &[S]) -> Result<Vec<GraphSpec>, Error> {
    specs.iter().map(|s| s.as_ref().parse()).collect()
}

impl FromStr for GraphSpec {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut tokens = input.split_whitespace();
        let title = tokens.next().ok_or(Error::Empty)?.to_string();
        let field_list = tokens.next().ok_or_else(|| Error::MissingFields {
            title: title.clone(),
        })?;

        let mut fields = Vec::new();
        let mut names = FxHashSet::default();
        for token in field_list.split(',') {
            if token.is_empty() {
                return Err(Error::EmptyField {
                    token: field_list.to_string(),
                });
            }
            let field: FieldSpec = token.parse()?;
            if !names.insert(field.name.clone()) {
                return Err(Error::DuplicateField { name: field.name });
            }
            fields.push(field);
        }

        let mut hints = Hints::default();
        for token in tokens {
            parse_hint(&mut hints, token)?;
        }
        if let Some((min, max)) = hints.min.zip(hints.max).filter(|(min, max)| min >= max) {
            return Err(Error::InvalidBounds { min, max });
        }

        Ok(Self {
            title,
            fields,
            hints,
        })
    }
}

impl FromStr for FieldSpec {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let (name, rest) = match token.split_once('=') {
            Some(("", _)) => {
                return Err(Error::EmptyName {
                    token: token.to_string(),
                });
            }
            Some((name, rest)) => (Some(name), rest),
            None => (None, token),
        };

        let mut parts = rest.split(':');
        let path_text = parts.next().unwrap_or_default();
        let path: Path = path_text.parse().map_err(|source| Error::Path {
            token: path_text.to_string(),
            source,
        })?;

        let mut kind = None;
        let mut format = None;
        for marker in parts {
            match marker {
                "rate" | "counter" | "gauge" => {
                    if kind.is_some() {
                        return Err(Error::ConflictingMarker {
                            token: marker.to_string(),
                        });
                    }
                    kind = Some(if marker == "gauge" {
                        Kind::Gauge
                    } else {
                        Kind::Counter
                    });
                }
                "bytes" | "percent" => {
                    if format.is_some() {
                        return Err(Error::ConflictingMarker {
                            token: marker.to_string(),
                        });
                    }
                    format = Some(if marker == "bytes" {
                        Format::Bytes
                    } else {
                        Format::Percent
                    });
                }
                _ => {
                    return Err(Error::UnknownMarker {
                        token: marker.to_string(),
                    });
                }
            }
        }

        Ok(Self {
            name: name.map_or_else(|| path_text.to_string(), str::to_string),
            path,
            kind: kind.unwrap_or_default(),
            format: format.unwrap_or_default(),
        })
    }
}

fn parse_hint(hints: &mut Hints, token: &str) -> Result<(), Error> {
    let Some((key, value)) = token.split_once('=') else {
        return Err(Error::UnknownHint {
            token: token.to_string(),
        });
    };

    let duplicate = || Error::DuplicateHint {
        token: token.to_string(),
    };
    let number = || {
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| Error::InvalidNumber {
                token: token.to_string(),
            })
    };

    match key {
        "min" => {
            if hints.min.is_some() {
                return Err(duplicate());
            }
            hints.min = Some(number()?);
        }
        "max" => {
            if hints.max.is_some() {
                return Err(duplicate());
            }
            hints.max = Some(number()?);
        }
        "unit" => {
            if hints.unit.is_some() {
                return Err(duplicate());
            }
            if value.is_empty() {
                return Err(Error::UnknownHint {
                    token: token.to_string(),
                });
            }
            hints.unit = Some(value.to_string());
        }
        _ => {
            return Err(Error::UnknownHint {
                token: token.to_string(),
            });
        }
    }
    Ok(())
}
