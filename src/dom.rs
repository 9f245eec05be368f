use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::SAMPLE_LIMIT;

const NO_TITLE: &str = "No title found";

/// Input types that accept free text and can be described to the model.
const TEXT_INPUT_TYPES: &[&str] = &["text", "search", "email", "password", "url", "tel", "textarea"];

const BUTTON_INPUT_TYPES: &[&str] = &["submit", "button", "reset"];

/// Compact page summary used as prompt context: the title plus the first
/// link and button texts in document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub page_title: String,
    pub links_sample: Vec<String>,
    pub buttons_sample: Vec<String>,
}

impl PageSummary {
    pub fn is_empty(&self) -> bool {
        self.page_title.is_empty() && self.links_sample.is_empty() && self.buttons_sample.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkInfo {
    pub text: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonInfo {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputInfo {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Interactive controls of a page, partitioned by how the model can use them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractiveElements {
    pub links: Vec<LinkInfo>,
    pub buttons: Vec<ButtonInfo>,
    pub inputs: Vec<InputInfo>,
}

impl InteractiveElements {
    pub fn is_empty(&self) -> bool {
        self.links.is_empty() && self.buttons.is_empty() && self.inputs.is_empty()
    }
}

/// Sample the page title and up to [`SAMPLE_LIMIT`] link and button texts.
///
/// Missing or blank markup yields an empty summary.
pub fn summarize(markup: Option<&str>) -> PageSummary {
    summarize_with_limit(markup, SAMPLE_LIMIT)
}

pub fn summarize_with_limit(markup: Option<&str>, limit: usize) -> PageSummary {
    let Some(markup) = markup.filter(|m| !m.trim().is_empty()) else {
        return PageSummary::default();
    };
    let (Ok(title_sel), Ok(link_sel), Ok(button_sel)) = (
        Selector::parse("title"),
        Selector::parse("a[href]"),
        Selector::parse("button"),
    ) else {
        debug!("page summary selectors failed to compile");
        return PageSummary::default();
    };

    let document = Html::parse_document(markup);

    let page_title = document
        .select(&title_sel)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| NO_TITLE.to_string());

    let links_sample = document
        .select(&link_sel)
        .map(text_of)
        .filter(|t| !t.is_empty())
        .take(limit)
        .collect();

    let buttons_sample = document
        .select(&button_sel)
        .map(text_of)
        .filter(|t| !t.is_empty())
        .take(limit)
        .collect();

    PageSummary {
        page_title,
        links_sample,
        buttons_sample,
    }
}

/// Partition the page's controls into links, buttons and text inputs.
///
/// Elements with no usable label (text, accessible label, placeholder, name)
/// are dropped because the model has nothing to match them against.
pub fn classify(markup: Option<&str>) -> InteractiveElements {
    let Some(markup) = markup.filter(|m| !m.trim().is_empty()) else {
        return InteractiveElements::default();
    };
    let (Ok(link_sel), Ok(button_sel), Ok(input_sel)) = (
        Selector::parse("a[href]"),
        Selector::parse("button, input"),
        Selector::parse("input, textarea"),
    ) else {
        debug!("interactive element selectors failed to compile");
        return InteractiveElements::default();
    };

    let document = Html::parse_document(markup);
    let mut elements = InteractiveElements::default();

    for a in document.select(&link_sel) {
        let href = a.value().attr("href").unwrap_or_default();
        let text = non_empty(Some(text_of(a))).or_else(|| attr(a, "aria-label"));
        if let Some(text) = text {
            elements.links.push(LinkInfo {
                text,
                href: href.to_string(),
            });
        }
    }

    for el in document.select(&button_sel) {
        let is_button = el.value().name() == "button"
            || input_type(el).is_some_and(|t| BUTTON_INPUT_TYPES.contains(&t.as_str()));
        if !is_button {
            continue;
        }
        let text = non_empty(Some(text_of(el)))
            .or_else(|| attr(el, "value"))
            .or_else(|| attr(el, "aria-label"));
        if let Some(text) = text {
            elements.buttons.push(ButtonInfo { text });
        }
    }

    for el in document.select(&input_sel) {
        let kind = if el.value().name() == "textarea" {
            "textarea".to_string()
        } else {
            // browsers render an untyped <input> as a text field
            input_type(el).unwrap_or_else(|| "text".to_string())
        };
        if !TEXT_INPUT_TYPES.contains(&kind.as_str()) {
            continue;
        }
        let label = attr(el, "placeholder")
            .or_else(|| attr(el, "aria-label"))
            .or_else(|| attr(el, "name"));
        if let Some(label) = label {
            elements.inputs.push(InputInfo { label, kind });
        }
    }

    elements
}

fn text_of(elem: ElementRef<'_>) -> String {
    elem.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn input_type(elem: ElementRef<'_>) -> Option<String> {
    elem.value()
        .attr("type")
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
}

fn attr(elem: ElementRef<'_>, name: &str) -> Option<String> {
    non_empty(elem.value().attr(name).map(String::from))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
