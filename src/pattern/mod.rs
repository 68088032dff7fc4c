//! Path template compiler: `{name}` placeholders to a regex with named captures.
//!
//! A template such as `/items/{id}/parts/{part}` is compiled into
//! `/items/(?P<id>[^/]+)/parts/(?P<part>[^/]+)` together with the ordered
//! list of [`Binding`]s that tell the host matcher which positional capture
//! group carries which variable:
//!
//! | Template                      | Asserts          | Compiled                                   | Bindings          |
//! |-------------------------------|------------------|--------------------------------------------|-------------------|
//! | `/items`                      |                  | `/items`                                   | *(none)*          |
//! | `/items/{id}`                 |                  | `/items/(?P<id>[^/]+)`                     | `1 → id`          |
//! | `/items/{id}`                 | `id → \d+`       | `/items/(?P<id>\d+)`                       | `1 → id`          |
//! | `/(v1\|v2)/{a}/{b}`           |                  | `/(v1\|v2)/(?P<a>[^/]+)/(?P<b>[^/]+)`      | `2 → a`, `3 → b`  |
//!
//! Placeholder names are `[A-Za-z0-9]+`; braces around anything else (an
//! underscore, a hyphen, a colon) are left in the pattern as literal regex
//! text. Every other character of the template is regex source as well, so
//! a template may carry its own groups and alternations.
//!
//! Capture indices count every capturing group that opens before the
//! placeholder in the *substituted* pattern, so groups inside an earlier
//! variable's assert shift later indices too.

use std::collections::HashMap;

use regex::{Captures, Regex};
use thiserror::Error;

/// Assert used for a placeholder that has none: one path segment.
pub const DEFAULT_ASSERT: &str = "[^/]+";

/// Errors raised while compiling a path template.
///
/// These are developer errors surfaced at registration time, never at
/// request time.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("path template `{template}` must begin with `/`")]
    MissingLeadingSlash { template: String },

    #[error("path template `{template}` uses placeholder `{{{name}}}` more than once")]
    DuplicatePlaceholder { template: String, name: String },

    #[error("path template `{template}` compiles to an invalid pattern: {source}")]
    InvalidRegex {
        template: String,
        #[source]
        source: regex::Error,
    },
}

/// One capture-position → variable-name pairing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    /// 1-based capture group index in the compiled pattern.
    pub index: usize,
    pub name: String,
}

/// A compiled template: regex source plus its capture bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPattern {
    template: String,
    pattern: String,
    bindings: Vec<Binding>,
}

impl CompiledPattern {
    /// The template this pattern was compiled from.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The regex source with every placeholder substituted.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Bound variable names in order of appearance.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|b| b.name.as_str())
    }

    pub fn binds(&self, name: &str) -> bool {
        self.bindings.iter().any(|b| b.name == name)
    }

    /// Build the anchored matcher `^{prefix}{pattern}$`.
    ///
    /// `prefix` is taken literally (escaped), so a namespace containing regex
    /// metacharacters such as `.` only ever matches itself.
    ///
    /// # Errors
    ///
    /// [`PatternError::InvalidRegex`] when an assert or the literal template
    /// text is not valid regex syntax.
    pub fn regex(&self, prefix: &str) -> Result<Regex, PatternError> {
        let source = format!("^{}{}$", regex::escape(prefix), self.pattern);
        Regex::new(&source).map_err(|source| PatternError::InvalidRegex {
            template: self.template.clone(),
            source,
        })
    }

    /// Pair each binding with the text its capture group matched.
    ///
    /// The regex must come from [`regex`](Self::regex) on this pattern; a
    /// literal prefix adds no groups, so the binding indices still line up.
    /// Groups that did not participate in the match are skipped.
    pub fn extract<'h>(&self, captures: &Captures<'h>) -> Vec<(&str, &'h str)> {
        self.bindings
            .iter()
            .filter_map(|b| {
                captures
                    .get(b.index)
                    .map(|m| (b.name.as_str(), m.as_str()))
            })
            .collect()
    }
}

/// Compile `template`, constraining each placeholder with its assert.
///
/// Compilation is a pure function of its inputs: the same template and
/// asserts always yield the same pattern and bindings.
///
/// # Errors
///
/// - [`PatternError::MissingLeadingSlash`]: the template does not start with `/`.
/// - [`PatternError::DuplicatePlaceholder`]: a placeholder name appears twice.
///
/// Regex validity is checked later by [`CompiledPattern::regex`].
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use routeweave::pattern::compile;
///
/// let asserts = HashMap::from([("id".to_owned(), r"\d+".to_owned())]);
/// let compiled = compile("/items/{id}", &asserts).unwrap();
///
/// assert_eq!(compiled.pattern(), r"/items/(?P<id>\d+)");
/// assert_eq!(compiled.bindings()[0].index, 1);
/// ```
pub fn compile(
    template: &str,
    asserts: &HashMap<String, String>,
) -> Result<CompiledPattern, PatternError> {
    if !template.starts_with('/') {
        return Err(PatternError::MissingLeadingSlash {
            template: template.to_owned(),
        });
    }

    let names = placeholders(template);
    for (i, name) in names.iter().enumerate() {
        if names[..i].contains(name) {
            return Err(PatternError::DuplicatePlaceholder {
                template: template.to_owned(),
                name: (*name).to_owned(),
            });
        }
    }

    let mut pattern = template.to_owned();
    let mut bindings = Vec::with_capacity(names.len());
    // Placeholders are substituted in order, so each search starts past the
    // previous substitution and never looks inside an assert body.
    let mut cursor = 0;

    for name in names {
        let token = format!("{{{name}}}");
        let Some(offset) = pattern[cursor..].find(&token) else {
            continue;
        };
        let start = cursor + offset;

        let index = capture_groups(&pattern[..start]) + 1;
        let body = asserts.get(name).map_or(DEFAULT_ASSERT, String::as_str);
        let group = format!("(?P<{name}>{body})");

        pattern.replace_range(start..start + token.len(), &group);
        cursor = start + group.len();
        bindings.push(Binding {
            index,
            name: name.to_owned(),
        });
    }

    Ok(CompiledPattern {
        template: template.to_owned(),
        pattern,
        bindings,
    })
}

/// Every `{identifier}` token in `template`, in order, duplicates included.
fn placeholders(template: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let len = after
            .bytes()
            .take_while(u8::is_ascii_alphanumeric)
            .count();
        if len > 0 && after.as_bytes().get(len) == Some(&b'}') {
            found.push(&after[..len]);
            rest = &after[len + 1..];
        } else {
            rest = after;
        }
    }

    found
}

/// Number of capturing groups opened in `source`.
///
/// Escaped parentheses and parentheses inside a character class are literal.
/// `(?:…)` and flag groups don't capture; `(?P<name>…)` and `(?<name>…)` do.
fn capture_groups(source: &str) -> usize {
    let bytes = source.as_bytes();
    let mut count = 0;
    let mut escaped = false;
    let mut in_class = false;

    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'[' if !in_class => in_class = true,
            b']' if in_class => in_class = false,
            b'(' if !in_class => {
                let opens_capture = match &bytes[i + 1..] {
                    [b'?', b'P', b'<', ..] | [b'?', b'<', ..] => true,
                    [b'?', ..] => false,
                    _ => true,
                };
                if opens_capture {
                    count += 1;
                }
            }
            _ => {}
        }
    }

    count
}
