use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::model::test_case::TestStep;
use crate::util::rich_text::element_text;

pub const REPRO_STEPS_FIELD: &str = "Microsoft.VSTS.TCM.ReproSteps";
pub const STEPS_FIELD: &str = "Microsoft.VSTS.TCM.Steps";

const ACTION_PLACEHOLDER: &str = "(no action specified)";
const EXPECTED_PLACEHOLDER: &str = "(no expected result specified)";
const NO_STEPS: &str = "<p>No steps provided.</p>";

const TH_STYLE: &str = "background-color: #f2f2f2; padding: 8px; text-align: left;";
const TD_STYLE: &str = "padding: 8px; border: 1px solid #ddd;";

/// How a test case's steps are written into the tracker. Each variant belongs
/// to one tracker field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum StepsEncoder {
    /// Rich-text table for the repro-steps field.
    #[default]
    #[serde(rename = "html-table")]
    #[value(name = "html-table")]
    HtmlTable,
    /// The tracker's native step XML for the test-steps field.
    #[serde(rename = "step-xml")]
    #[value(name = "step-xml")]
    TrackerStepXml,
}

impl StepsEncoder {
    pub fn field(&self) -> &'static str {
        match self {
            StepsEncoder::HtmlTable => REPRO_STEPS_FIELD,
            StepsEncoder::TrackerStepXml => STEPS_FIELD,
        }
    }

    /// Name used in the config file and on the command line.
    pub fn label(&self) -> &'static str {
        match self {
            StepsEncoder::HtmlTable => "html-table",
            StepsEncoder::TrackerStepXml => "step-xml",
        }
    }

    pub fn encode(&self, steps: &[TestStep]) -> String {
        match self {
            StepsEncoder::HtmlTable => encode_html_table(steps),
            StepsEncoder::TrackerStepXml => encode_step_xml(steps),
        }
    }
}

/// Escape text for use as HTML or XML character data or attribute values.
pub fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escaped text with line breaks kept as `<br/>`.
pub fn rich_text(text: &str) -> String {
    escape_markup(&text.replace("\r\n", "\n")).replace('\n', "<br/>")
}

pub fn encode_description(text: &str) -> String {
    rich_text(text)
}

fn cell(text: &str, placeholder: &str) -> String {
    if text.trim().is_empty() {
        format!("<i>{placeholder}</i>")
    } else {
        rich_text(text)
    }
}

fn encode_html_table(steps: &[TestStep]) -> String {
    if steps.is_empty() {
        return NO_STEPS.to_string();
    }

    let mut html =
        String::from(r#"<div><table style="border-collapse: collapse; width: 100%;" border="1"><thead><tr>"#);
    for header in ["Step", "Action", "Expected result"] {
        html.push_str(&format!(r#"<th style="{TH_STYLE}">{header}</th>"#));
    }
    html.push_str("</tr></thead><tbody>");

    for (index, step) in steps.iter().enumerate() {
        html.push_str("<tr>");
        html.push_str(&format!(r#"<td style="{TD_STYLE}">{}</td>"#, index + 1));
        html.push_str(&format!(
            r#"<td style="{TD_STYLE}">{}</td>"#,
            cell(&step.action, ACTION_PLACEHOLDER)
        ));
        html.push_str(&format!(
            r#"<td style="{TD_STYLE}">{}</td>"#,
            cell(&step.expected_result, EXPECTED_PLACEHOLDER)
        ));
        html.push_str("</tr>");
    }

    html.push_str("</tbody></table></div>");
    html
}

fn encode_step_xml(steps: &[TestStep]) -> String {
    let mut xml = format!(r#"<steps id="0" last="{}">"#, steps.len());
    for (index, step) in steps.iter().enumerate() {
        let expected = step.expected_result.trim();
        let kind = if expected.is_empty() {
            "ActionStep"
        } else {
            "ValidateStep"
        };
        xml.push_str(&format!(r#"<step id="{}" type="{kind}">"#, index + 1));
        xml.push_str(&parameterized_string(&cell(&step.action, ACTION_PLACEHOLDER)));
        let expected_markup = if expected.is_empty() {
            String::new()
        } else {
            rich_text(&step.expected_result)
        };
        xml.push_str(&parameterized_string(&expected_markup));
        xml.push_str("<description/></step>");
    }
    xml.push_str("</steps>");
    xml
}

/// The step text is itself HTML, carried as escaped character data.
fn parameterized_string(inner_html: &str) -> String {
    let markup = format!("<DIV><P>{inner_html}</P></DIV>");
    format!(
        r#"<parameterizedString isformatted="true">{}</parameterizedString>"#,
        escape_markup(&markup)
    )
}

/// Read the steps back out of an [`StepsEncoder::HtmlTable`] encoding.
/// Placeholder cells come back as empty strings; text that merely reads like
/// a placeholder is kept.
pub fn decode_html_table(html: &str) -> Vec<TestStep> {
    let (Ok(row_selector), Ok(cell_selector)) = (Selector::parse("tbody tr"), Selector::parse("td"))
    else {
        return Vec::new();
    };

    let document = Html::parse_fragment(html);
    document
        .select(&row_selector)
        .filter_map(|row| {
            let cells: Vec<_> = row.select(&cell_selector).collect();
            if cells.len() < 3 {
                return None;
            }
            Some(TestStep::new(
                decoded_cell(cells[1], ACTION_PLACEHOLDER),
                decoded_cell(cells[2], EXPECTED_PLACEHOLDER),
            ))
        })
        .collect()
}

/// A placeholder is an `<i>` element that is the cell's only content.
fn decoded_cell(cell: ElementRef<'_>, placeholder: &str) -> String {
    let text = element_text(cell);
    let mut elements = cell.children().filter_map(ElementRef::wrap);
    let is_placeholder = match (elements.next(), elements.next()) {
        (Some(only), None) => {
            only.value().name() == "i"
                && element_text(only) == placeholder
                && text.trim() == placeholder
        }
        _ => false,
    };
    if is_placeholder {
        String::new()
    } else {
        text
    }
}
