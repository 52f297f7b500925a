//! HTML and XML extraction
//!
//! The device has no API: its administration pages are the API. Everything
//! here works on a response body and a CSS selector and returns owned data,
//! so no parsed document ever outlives the call that built it.
//!
//! HTML goes through `scraper` (html5ever), which accepts whatever markup the
//! firmware emits. The AJAX endpoints answer with tiny flat XML documents
//! that are read with regular expressions.

use crate::error::ExtractionError;
use crate::models::{FormSnapshot, HeaderedTable, KeyValueTable, Record, StatusValue, TracerouteHop};
use crate::utils::{normalize_text, trim_text};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

type Result<T> = std::result::Result<T, ExtractionError>;

static HOPS_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<hops\b[^>]*>(.*?)</hops>").unwrap());
static HOP_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<hop\b[^>]*>(.*?)</hop>").unwrap());
static LEAF_ELEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<([A-Za-z_][\w.-]*)(?:\s[^>]*)?>([^<]*)</[A-Za-z_][\w.-]*>").unwrap());

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ExtractionError::InvalidSelector {
        selector: css.to_string(),
        message: format!("{e:?}"),
    })
}

fn first_match<'a>(doc: &'a Html, css: &str) -> Result<ElementRef<'a>> {
    let sel = selector(css)?;
    doc.select(&sel)
        .next()
        .ok_or_else(|| ExtractionError::NotFound(css.to_string()))
}

fn first_table<'a>(doc: &'a Html, css: &str) -> Result<ElementRef<'a>> {
    let node = first_match(doc, css)?;
    let name = node.value().name();
    if name != "table" {
        return Err(ExtractionError::WrongNodeType {
            selector: css.to_string(),
            expected: "table",
            found: name.to_string(),
        });
    }
    Ok(node)
}

fn child_elements<'a>(el: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    el.children().filter_map(ElementRef::wrap)
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<String>())
}

/// Rows belonging to `table` itself (not to nested tables). HTML5 parsing
/// wraps bare rows in an implicit `<tbody>`, so rows of the direct row-group
/// children count as direct rows too.
fn table_rows<'a>(table: ElementRef<'a>, groups: &'a [&'a str]) -> impl Iterator<Item = ElementRef<'a>> {
    child_elements(table).flat_map(move |child| {
        let name = child.value().name();
        let rows: Vec<ElementRef<'a>> = if name == "tr" && groups.contains(&"tbody") {
            vec![child]
        } else if groups.contains(&name) {
            child_elements(child)
                .filter(|r| r.value().name() == "tr")
                .collect()
        } else {
            Vec::new()
        };
        rows
    })
}

/// Status of the first node matching `css`, read from its `class`
pub fn status_at(html: &str, css: &str) -> Result<StatusValue> {
    let doc = Html::parse_document(html);
    let node = first_match(&doc, css)?;
    Ok(node
        .value()
        .attr("class")
        .map(StatusValue::from_css_class)
        .unwrap_or(StatusValue::Unknown))
}

/// Label/value pairs from the `<th>`/`<td>` cells of each row
pub fn key_value_table(html: &str, css: &str) -> Result<KeyValueTable> {
    let doc = Html::parse_document(html);
    let table = first_table(&doc, css)?;

    let mut data = KeyValueTable::new();
    for row in table_rows(table, &["thead", "tbody", "tfoot"]) {
        let mut label = None;
        let mut value = None;
        for cell in child_elements(row) {
            match cell.value().name() {
                "th" if label.is_none() => label = Some(element_text(cell)),
                "td" if value.is_none() => value = Some(element_text(cell)),
                _ => {}
            }
        }
        if let (Some(label), Some(value)) = (label, value) {
            if !label.is_empty() && !value.is_empty() {
                data.insert(label, value);
            }
        }
    }
    Ok(data)
}

/// Rows of a table whose column names come from its `<thead>`
pub fn headered_table(html: &str, css: &str) -> Result<HeaderedTable> {
    let doc = Html::parse_document(html);
    let table = first_table(&doc, css)?;

    let columns: Vec<String> = table_rows(table, &["thead"])
        .flat_map(child_elements)
        .filter(|cell| cell.value().name() == "th")
        .map(element_text)
        .collect();

    let img = selector("img")?;
    let mut data = HeaderedTable::default();
    for row in table_rows(table, &["tbody"]) {
        let mut record = Record::new();
        let cells = child_elements(row).filter(|cell| cell.value().name() == "td");
        for (j, cell) in cells.enumerate() {
            let column = columns
                .get(j)
                .cloned()
                .unwrap_or_else(|| format!("{{Column {j}}}"));

            let mut value = element_text(cell);
            if value.is_empty() {
                value = cell
                    .select(&img)
                    .filter_map(|i| i.value().attr("alt"))
                    .map(normalize_text)
                    .find(|alt| !alt.is_empty())
                    .unwrap_or_default();
            }
            record.insert(column, value);
        }
        data.rows.push(record);
    }
    Ok(data)
}

/// Values a browser would submit for the inputs and selects under `scope`
pub fn form_snapshot(html: &str, scope: &str) -> Result<FormSnapshot> {
    let doc = Html::parse_document(html);
    let fields = selector(&format!("{scope} input, {scope} select"))?;
    let options = selector("option")?;

    let mut form = FormSnapshot::default();
    for node in doc.select(&fields) {
        let el = node.value();
        let Some(name) = el.attr("name") else {
            continue;
        };

        if el.name() == "select" {
            let mut chosen = None;
            let mut first = None;
            for option in node.select(&options) {
                let value = option
                    .value()
                    .attr("value")
                    .map(str::to_string)
                    .unwrap_or_else(|| element_text(option));
                if first.is_none() {
                    first = Some(value.clone());
                }
                // a single select keeps the last option marked selected
                if option.value().attr("selected").is_some() {
                    chosen = Some(value);
                }
            }
            if let Some(value) = chosen.or(first) {
                form.set(name, value);
            }
            continue;
        }

        let kind = el.attr("type").unwrap_or("text").to_ascii_lowercase();
        match kind.as_str() {
            "radio" | "checkbox" => {
                if el.attr("checked").is_some() {
                    form.set(name, el.attr("value").unwrap_or("on"));
                }
            }
            _ => form.set(name, el.attr("value").unwrap_or_default()),
        }
    }
    Ok(form)
}

/// Text of the first `<tag>` element of a flat XML document
pub fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"(?s)<{}(?:\s[^>]*)?>(.*?)</{}>", regex::escape(tag), regex::escape(tag));
    Regex::new(&pattern)
        .ok()?
        .captures(xml)?
        .get(1)
        .map(|m| strip_cdata(m.as_str()).to_string())
}

/// Attribute `attr` of the first `<tag>` element of a flat XML document
pub fn xml_attr(xml: &str, tag: &str, attr: &str) -> Option<String> {
    let pattern = format!(
        r#"<{}\b[^>]*?\s{}\s*=\s*["']([^"']*)["']"#,
        regex::escape(tag),
        regex::escape(attr)
    );
    Regex::new(&pattern)
        .ok()?
        .captures(xml)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

/// Hop details of a traceroute status document:
/// `<hops><hop><ip>..</ip><rtt>..</rtt></hop>...</hops>`
pub fn xml_hops(xml: &str) -> Vec<TracerouteHop> {
    let mut hops = Vec::new();
    for block in HOPS_BLOCK.captures_iter(xml) {
        for hop in HOP_BLOCK.captures_iter(&block[1]) {
            let details: TracerouteHop = LEAF_ELEMENT
                .captures_iter(&hop[1])
                .map(|leaf| (leaf[1].to_string(), trim_text(&leaf[2]).to_string()))
                .collect();
            if !details.is_empty() {
                hops.push(details);
            }
        }
    }
    hops
}

fn strip_cdata(text: &str) -> &str {
    text.trim()
        .strip_prefix("<![CDATA[")
        .and_then(|t| t.strip_suffix("]]>"))
        .unwrap_or(text)
}
