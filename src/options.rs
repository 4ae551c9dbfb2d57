//! Enumerated compile options and their engine codes.
//!
//! Two ways in from strings:
//! - [`OutputStyle::parse`] / [`SourceSyntax::parse`] are lenient: case
//!   insensitive, unknown values fall back to the defaults.
//! - `str::parse` (`FromStr`) is strict and fails with
//!   [`SasswireError::InvalidOption`].

use std::fmt;
use std::str::FromStr;

use crate::error::SasswireError;

/// Formatting of the compiled CSS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputStyle {
    #[default]
    Nested,
    Expanded,
    Compact,
    Compressed,
}

impl OutputStyle {
    /// All styles, in declaration order.
    pub const ALL: [OutputStyle; 4] = [
        OutputStyle::Nested,
        OutputStyle::Expanded,
        OutputStyle::Compact,
        OutputStyle::Compressed,
    ];

    /// Case-insensitive parse; unknown values yield [`OutputStyle::Nested`].
    ///
    /// ```
    /// use sasswire::OutputStyle;
    ///
    /// assert_eq!(OutputStyle::parse("Compressed"), OutputStyle::Compressed);
    /// assert_eq!(OutputStyle::parse("fancy"), OutputStyle::Nested);
    /// ```
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStyle::Nested => "NESTED",
            OutputStyle::Expanded => "EXPANDED",
            OutputStyle::Compact => "COMPACT",
            OutputStyle::Compressed => "COMPRESSED",
        }
    }

    /// Numeric code the engine expects on the wire.
    pub fn engine_code(&self) -> i32 {
        match self {
            OutputStyle::Expanded => 0,
            OutputStyle::Compressed => 1,
            OutputStyle::Nested => 2,
            OutputStyle::Compact => 3,
        }
    }

    /// Inverse of [`engine_code`](Self::engine_code).
    pub fn from_engine_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.engine_code() == code)
    }
}

impl FromStr for OutputStyle {
    type Err = SasswireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NESTED" => Ok(OutputStyle::Nested),
            "EXPANDED" => Ok(OutputStyle::Expanded),
            "COMPACT" => Ok(OutputStyle::Compact),
            "COMPRESSED" => Ok(OutputStyle::Compressed),
            _ => Err(SasswireError::InvalidOption(format!(
                "invalid OutputStyle {:?}",
                s
            ))),
        }
    }
}

impl fmt::Display for OutputStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Syntax of the input stylesheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SourceSyntax {
    #[default]
    Scss,
    /// The indented syntax (`.sass` files).
    Indented,
    Css,
}

impl SourceSyntax {
    /// All syntaxes, in declaration order.
    pub const ALL: [SourceSyntax; 3] = [
        SourceSyntax::Scss,
        SourceSyntax::Indented,
        SourceSyntax::Css,
    ];

    /// Case-insensitive parse; `"SASS"` is accepted for the indented syntax,
    /// unknown values yield [`SourceSyntax::Scss`].
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }

    /// Guess the syntax from a URL or path extension, defaulting to SCSS.
    pub fn from_url(url: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        if lower.ends_with(".sass") {
            SourceSyntax::Indented
        } else if lower.ends_with(".css") {
            SourceSyntax::Css
        } else {
            SourceSyntax::Scss
        }
    }

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSyntax::Scss => "SCSS",
            SourceSyntax::Indented => "INDENTED",
            SourceSyntax::Css => "CSS",
        }
    }

    /// Numeric code the engine expects on the wire.
    pub fn engine_code(&self) -> i32 {
        match self {
            SourceSyntax::Scss => 0,
            SourceSyntax::Indented => 1,
            SourceSyntax::Css => 2,
        }
    }

    /// Inverse of [`engine_code`](Self::engine_code).
    pub fn from_engine_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.engine_code() == code)
    }
}

impl FromStr for SourceSyntax {
    type Err = SasswireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SCSS" => Ok(SourceSyntax::Scss),
            "INDENTED" | "SASS" => Ok(SourceSyntax::Indented),
            "CSS" => Ok(SourceSyntax::Css),
            _ => Err(SasswireError::InvalidOption(format!(
                "invalid SourceSyntax {:?}",
                s
            ))),
        }
    }
}

impl fmt::Display for SourceSyntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output_style_is_case_insensitive() {
        for s in ["compressed", "COMPRESSED", "Compressed"] {
            assert_eq!(OutputStyle::parse(s), OutputStyle::Compressed);
        }
        assert_eq!(OutputStyle::parse("compact"), OutputStyle::Compact);
        assert_eq!(OutputStyle::parse("Expanded"), OutputStyle::Expanded);
        assert_eq!(OutputStyle::parse("nested"), OutputStyle::Nested);
    }

    #[test]
    fn test_parse_output_style_unknown_falls_back_to_nested() {
        assert_eq!(OutputStyle::parse(""), OutputStyle::Nested);
        assert_eq!(OutputStyle::parse("pretty"), OutputStyle::Nested);
    }

    #[test]
    fn test_parse_source_syntax() {
        assert_eq!(SourceSyntax::parse("scss"), SourceSyntax::Scss);
        assert_eq!(SourceSyntax::parse("sass"), SourceSyntax::Indented);
        assert_eq!(SourceSyntax::parse("Indented"), SourceSyntax::Indented);
        assert_eq!(SourceSyntax::parse("css"), SourceSyntax::Css);
        assert_eq!(SourceSyntax::parse("less"), SourceSyntax::Scss);
    }

    #[test]
    fn test_strict_parse_rejects_unknown() {
        let err = "pretty".parse::<OutputStyle>().unwrap_err();
        assert!(matches!(err, SasswireError::InvalidOption(_)));
        assert!(err.to_string().contains("OutputStyle"));
        assert!("less".parse::<SourceSyntax>().is_err());
    }

    #[test]
    fn test_engine_codes_are_distinct_and_invertible() {
        for style in OutputStyle::ALL {
            assert_eq!(OutputStyle::from_engine_code(style.engine_code()), Some(style));
        }
        for syntax in SourceSyntax::ALL {
            assert_eq!(SourceSyntax::from_engine_code(syntax.engine_code()), Some(syntax));
        }
        assert_eq!(OutputStyle::from_engine_code(9), None);
    }

    #[test]
    fn test_syntax_from_url() {
        assert_eq!(SourceSyntax::from_url("file:///a/_b.sass"), SourceSyntax::Indented);
        assert_eq!(SourceSyntax::from_url("file:///a/b.CSS"), SourceSyntax::Css);
        assert_eq!(SourceSyntax::from_url("file:///a/b.scss"), SourceSyntax::Scss);
        assert_eq!(SourceSyntax::from_url("memory:colors"), SourceSyntax::Scss);
    }

    #[test]
    fn test_display_matches_as_str() {
        assert_eq!(OutputStyle::Compact.to_string(), "COMPACT");
        assert_eq!(SourceSyntax::Indented.to_string(), "INDENTED");
    }
}
