// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// A metric sample value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// Rendered as `0` or `1`.
    Bool(bool),

    /// Rendered in hexadecimal with a `0x` prefix.
    Hex(u64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", u8::from(*b)),
            Value::Hex(n) => write!(f, "{:#x}", n),
        }
    }
}

/// One line of the exposition body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Line {
    Metric {
        name: String,
        labels: Vec<(&'static str, String)>,
        value: Value,
    },

    /// Free text after a `#`, ignored by scrapers.
    Comment(String),
}

impl Line {
    pub fn metric(name: impl Into<String>, value: Value) -> Self {
        Line::Metric {
            name: name.into(),
            labels: Vec::new(),
            value,
        }
    }

    pub fn labelled(
        name: impl Into<String>,
        key: &'static str,
        label: impl Into<String>,
        value: Value,
    ) -> Self {
        Line::Metric {
            name: name.into(),
            labels: vec![(key, label.into())],
            value,
        }
    }

    pub fn comment(text: impl Into<String>) -> Self {
        Line::Comment(text.into())
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Metric {
                name,
                labels,
                value,
            } => {
                write!(f, "{}", name)?;

                if !labels.is_empty() {
                    write!(f, "{{")?;
                    for (i, (key, label)) in labels.iter().enumerate() {
                        if i > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{}=\"{}\"", key, escape(label))?;
                    }
                    write!(f, "}}")?;
                }

                write!(f, " {}", value)
            }

            Line::Comment(text) => write!(f, "#{}", text),
        }
    }
}

// Label values come from the CPU (vendor string) and must not break the line.
fn escape(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}
