//! A deliberately tiny XPath subset: absolute `id` lookup followed by a chain
//! of `tag[index]` child steps. Covers exactly the handful of legacy,
//! structurally-stable selectors the catalog's older markup still needs;
//! nothing else is supported or will ever be needed here.

use scraper::{ElementRef, Html, Selector};

/// `//*[@id='hp_hotel_name']/span`
pub const XPATH_HOTEL_NAME: &str = "//*[@id='hp_hotel_name']/span";
/// `//*[@id='hp_address_subtitle']`
pub const XPATH_ADDRESS: &str = "//*[@id='hp_address_subtitle']";

/// Parses and evaluates one of the expressions above against `document`,
/// returning the collapsed text content of the matched element, if any.
#[must_use]
pub fn evaluate_text(document: &Html, expr: &str) -> Option<String> {
    let element = evaluate(document, expr)?;
    let text = element.text().collect::<String>();
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

fn evaluate<'a>(document: &'a Html, expr: &str) -> Option<ElementRef<'a>> {
    let rest = expr.strip_prefix("//*[@id='")?;
    let close = rest.find("']")?;
    let id = &rest[..close];
    let path = &rest[close + 2..];

    let id_selector = Selector::parse(&format!("#{id}")).ok()?;
    let mut current = document.select(&id_selector).next()?;

    for step in path.split('/').filter(|s| !s.is_empty()) {
        let (tag, index) = parse_step(step);
        current = nth_child_with_tag(current, tag, index)?;
    }

    Some(current)
}

fn parse_step(step: &str) -> (&str, usize) {
    if let Some(open) = step.find('[') {
        let tag = &step[..open];
        let index = step[open + 1..]
            .trim_end_matches(']')
            .parse::<usize>()
            .unwrap_or(1);
        (tag, index.max(1))
    } else {
        (step, 1)
    }
}

fn nth_child_with_tag<'a>(parent: ElementRef<'a>, tag: &str, index: usize) -> Option<ElementRef<'a>> {
    parent
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| tag.is_empty() || el.value().name().eq_ignore_ascii_case(tag))
        .nth(index - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_text_finds_id_then_child() {
        let html = r#"<html><body><div id="hp_hotel_name"><span>Example Hotel</span></div></body></html>"#;
        let document = Html::parse_document(html);
        assert_eq!(
            evaluate_text(&document, XPATH_HOTEL_NAME).as_deref(),
            Some("Example Hotel")
        );
    }

    #[test]
    fn test_evaluate_text_missing_id_returns_none() {
        let html = r#"<html><body><div id="other"></div></body></html>"#;
        let document = Html::parse_document(html);
        assert_eq!(evaluate_text(&document, XPATH_HOTEL_NAME), None);
    }

    #[test]
    fn test_evaluate_text_bare_id_with_no_path() {
        let html = r#"<html><body><div id="hp_address_subtitle">Calle Mayor 1</div></body></html>"#;
        let document = Html::parse_document(html);
        assert_eq!(
            evaluate_text(&document, XPATH_ADDRESS).as_deref(),
            Some("Calle Mayor 1")
        );
    }

    #[test]
    fn test_parse_step_reads_bracketed_index() {
        assert_eq!(parse_step("div[2]"), ("div", 2));
        assert_eq!(parse_step("span"), ("span", 1));
    }
}
