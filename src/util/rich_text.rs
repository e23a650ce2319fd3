use scraper::{ElementRef, Html, Node};

const BLOCK_ELEMENTS: &[&str] = &[
    "div", "p", "li", "ul", "ol", "tr", "table", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
    "pre",
];

/// Convert a tracker rich-text field to plain text.
///
/// Block elements and `<br>` become line breaks, non-breaking spaces become
/// plain spaces, and anything without text content (images, for one) drops out.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::new();
    collect_text(fragment.root_element(), &mut out);
    normalize(&out.replace('\u{a0}', " "))
}

/// Text content of a single element with `<br>` preserved as `\n`. No other
/// whitespace normalization is applied.
pub fn element_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(element, &mut out);
    out
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                let Some(child_ref) = ElementRef::wrap(child) else {
                    continue;
                };
                let block = BLOCK_ELEMENTS.contains(&name);
                if block {
                    break_line(out);
                }
                collect_text(child_ref, out);
                if block {
                    break_line(out);
                }
            }
            _ => {}
        }
    }
}

fn break_line(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn normalize(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0;
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(html_to_text("Just text"), "Just text");
    }

    #[test]
    fn nbsp_becomes_space() {
        assert_eq!(html_to_text("a&nbsp;b"), "a b");
    }

    #[test]
    fn blocks_and_breaks_become_lines() {
        let html = "<div><p>Given a user</p><p>When they log in<br>Then it works</p></div>";
        assert_eq!(html_to_text(html), "Given a user\nWhen they log in\nThen it works");
    }

    #[test]
    fn list_items_are_separate_lines() {
        let html = "<ul><li>one</li><li>two</li></ul>";
        assert_eq!(html_to_text(html), "one\ntwo");
    }

    #[test]
    fn images_are_dropped() {
        let html = r#"<div>See <img src="https://dev.azure.com/x/_apis/wit/attachments/1"> here</div>"#;
        assert_eq!(html_to_text(html), "See  here");
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(html_to_text("a &lt; b &amp;&amp; c"), "a < b && c");
    }

    #[test]
    fn empty_markup_is_empty_text() {
        assert_eq!(html_to_text("<div><br></div>"), "");
        assert_eq!(html_to_text(""), "");
    }
}
