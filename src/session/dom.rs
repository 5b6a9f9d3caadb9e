//! Structured element extraction from page markup.

use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};

use super::SessionError;

/// A CSS selector query, optionally collecting member texts from a nested selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementQuery {
    selector: String,
    members: Option<String>,
}

impl ElementQuery {
    #[must_use]
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            members: None,
        }
    }

    /// Collects the text of every descendant matching `selector` into
    /// [`ElementData::members`].
    #[must_use]
    pub fn with_members(mut self, selector: impl Into<String>) -> Self {
        self.members = Some(selector.into());
        self
    }

    #[must_use]
    pub fn selector(&self) -> &str {
        &self.selector
    }

    #[must_use]
    pub fn member_selector(&self) -> Option<&str> {
        self.members.as_deref()
    }
}

/// Data read from one matched element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementData {
    /// Element text, one trimmed line per non-empty text node.
    pub text: String,
    pub attributes: HashMap<String, String>,
    /// Texts of descendants matching the member selector, in document order.
    pub members: Vec<String>,
}

impl ElementData {
    /// Returns an attribute value.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Returns the first line of the element text.
    #[must_use]
    pub fn first_line(&self) -> Option<&str> {
        self.text.lines().next()
    }
}

/// Runs `query` against `html`.
///
/// # Errors
///
/// Returns [`SessionError::InvalidSelector`] if either selector fails to parse.
pub fn extract_elements(
    html: &str,
    query: &ElementQuery,
) -> Result<Vec<ElementData>, SessionError> {
    let selector = parse_selector(query.selector())?;
    let members = query.member_selector().map(parse_selector).transpose()?;

    let document = Html::parse_document(html);
    Ok(document
        .select(&selector)
        .map(|element| ElementData {
            text: normalized_text(element),
            attributes: element
                .value()
                .attrs()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            members: members
                .as_ref()
                .map(|member_selector| {
                    element
                        .select(member_selector)
                        .map(normalized_text)
                        .filter(|text| !text.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect())
}

fn parse_selector(selector: &str) -> Result<Selector, SessionError> {
    Selector::parse(selector).map_err(|e| SessionError::InvalidSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

fn normalized_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
