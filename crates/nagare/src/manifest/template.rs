// References:
// 1. https://github.com/clitic/vsd/blob/30ca1985e4a467ea3304b11c08d3176deaafd22a/vsd/src/dash/template.rs
// 2. https://github.com/emarsden/dash-mpd-rs/blob/6ebdfb4759adbda8233b5b3520804e23ff86e7de/src/fetch.rs#L435-L466

use regex::Regex;
use std::sync::LazyLock;

use crate::{NagareError, NagareResult};

// From https://dashif.org/docs/DASH-IF-IOP-v4.3.pdf:
// "For the avoidance of doubt, only %0[width]d is permitted and no other identifiers. The reason
// is that such a string replacement can be easily implemented without requiring a specific library."
//
// An empty identifier is the `$$` escape.
//
// Example template: "$RepresentationID$/$Number%06d$.m4s"
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:(RepresentationID|Number|Time|Bandwidth)(?:%0(\d+)d)?)?\$").unwrap()
});

/// Which attribute of a `SegmentTemplate` a format string came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateField {
    Media,
    Initialization,
    Index,
    BitstreamSwitching,
}

impl TemplateField {
    pub const REPRESENTATION_ID: &'static str = "RepresentationID";
    pub const NUMBER: &'static str = "Number";
    pub const TIME: &'static str = "Time";
    pub const BANDWIDTH: &'static str = "Bandwidth";

    /// `$Number$` and `$Time$` identify a single media segment, so they are
    /// meaningless in fields describing a whole representation.
    fn allows_segment_identifiers(&self) -> bool {
        matches!(self, Self::Media | Self::Index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Number { width: Option<usize> },
    Time { width: Option<usize> },
}

/// A pre-processed segment URL template.
///
/// Everything that does not change between segments of one representation
/// (`$$`, `$RepresentationID$`, `$Bandwidth$`) is substituted when the
/// template is compiled; only `$Number$` and `$Time$` are left for
/// [`FormatString::format`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatString {
    source: String,
    parts: Vec<Part>,
}

impl FormatString {
    pub fn compile(
        source: &str,
        field: TemplateField,
        representation_id: Option<&str>,
        bandwidth: Option<u64>,
    ) -> NagareResult<Self> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut last = 0;

        for caps in TEMPLATE_REGEX.captures_iter(source) {
            let whole = caps.get(0).unwrap();
            literal.push_str(&source[last..whole.start()]);
            last = whole.end();

            let width = caps.get(2).and_then(|w| w.as_str().parse::<usize>().ok());
            let Some(identifier) = caps.get(1).map(|m| m.as_str()) else {
                // $$
                literal.push('$');
                continue;
            };

            let value = match identifier {
                TemplateField::REPRESENTATION_ID => representation_id.map(str::to_string),
                TemplateField::BANDWIDTH => bandwidth.map(|b| b.to_string()),
                _ => {
                    if !field.allows_segment_identifiers() {
                        return Err(NagareError::InvalidTemplate(
                            source.to_string(),
                            "segment identifiers are not allowed in this field",
                        ));
                    }
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(if identifier == TemplateField::NUMBER {
                        Part::Number { width }
                    } else {
                        Part::Time { width }
                    });
                    continue;
                }
            };

            match (value, width) {
                (Some(value), Some(width)) => literal.push_str(&format!("{value:0>width$}")),
                (Some(value), None) => literal.push_str(&value),
                // nothing to substitute with, keep the identifier as is
                (None, _) => literal.push_str(whole.as_str()),
            }
        }
        literal.push_str(&source[last..]);
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    /// The template as it appeared in the manifest.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the template resolves to the same string for every segment.
    pub fn is_static(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Literal(_)))
    }

    pub fn format(&self, number: u64, time: u64) -> String {
        let mut result = String::with_capacity(self.source.len() + 16);
        for part in &self.parts {
            match part {
                Part::Literal(s) => result.push_str(s),
                Part::Number { width } => push_padded(&mut result, number, *width),
                Part::Time { width } => push_padded(&mut result, time, *width),
            }
        }
        result
    }
}

fn push_padded(dst: &mut String, value: u64, width: Option<usize>) {
    match width {
        Some(width) => dst.push_str(&format!("{value:0width$}")),
        None => dst.push_str(&value.to_string()),
    }
}
