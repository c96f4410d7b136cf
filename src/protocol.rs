// src/protocol.rs

//! Line protocol spoken by the `catalogd` binary
//!
//! Every line is `<code>[|<field>...]`; the caller on the other side of the
//! pipe splits on `|`.

use crate::resolvable::Resolvable;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLine {
    /// Total number of progress steps to expect
    Total(usize),
    Error(String),
    /// A catalog could not be restored from its source
    RestoreError(String),
    /// One step done, or a detail of an incomplete operation
    Progress(Vec<String>),
    /// Informational message, or the end of output when empty
    Finish(Option<String>),
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLine::Total(n) => write!(f, "0|{}", n),
            StatusLine::Error(msg) => write!(f, "1|{}", joinlines(msg)),
            StatusLine::RestoreError(msg) => write!(f, "2|{}", joinlines(msg)),
            StatusLine::Progress(fields) => {
                write!(f, "3")?;
                for field in fields {
                    write!(f, "|{}", joinlines(field))?;
                }
                Ok(())
            }
            StatusLine::Finish(None) => write!(f, "4"),
            StatusLine::Finish(Some(msg)) => write!(f, "4|{}", joinlines(msg)),
        }
    }
}

/// Drop every newline so a message fits on one protocol line
pub fn joinlines(text: &str) -> String {
    text.split(['\n', '\r']).collect()
}

/// `i|kind|name|version[-release]|arch`, with a blank first field for
/// entries that are not installed
pub fn item_line(obj: &Resolvable) -> String {
    let mut line = format!(
        "{}|{}|{}|{}",
        if obj.installed { "i" } else { " " },
        obj.kind(),
        obj.name,
        obj.edition.version
    );
    if !obj.edition.release.is_empty() {
        line.push('-');
        line.push_str(&obj.edition.release);
    }
    line.push('|');
    line.push_str(obj.arch.as_str());
    line
}
