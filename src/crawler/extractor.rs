//! Content Extractor: picks the main-content node out of a fetched page,
//! strips chrome, collects headings/anchors, and hands the cleaned subtree
//! to `htmd` for the actual HTML-to-Markdown syntax generation. Everything
//! around that call — selection, cleanup, code-block language tagging,
//! heading/anchor collection, post-conversion normalisation — is first
//! party; the Markdown syntax itself is not hand-rolled.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::models::Hierarchy;
use crate::normalize::content_hash;

const MAIN_CONTENT_SELECTORS: &[&str] = &[
    r#"article[role="main"]"#,
    r#"main[role="main"]"#,
    r#"div[role="main"]"#,
    "main",
    "article",
    ".content",
    ".article-content",
    ".markdown-body",
    "#content",
    "#main",
];

const STRIP_TAGS: &[&str] = &["script", "style", "iframe", "form"];
const STRIP_SELECTORS: &[&str] = &[".advertisement", "#disqus_thread", ".comments", ".social-share"];
const NAV_SELECTORS: &[&str] = &["nav", r#"[role="navigation"]"#, ".navigation", ".menu"];

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("markdown conversion failed: {0}")]
    Markdown(String),
}

#[derive(Debug, Clone)]
pub struct ExtractResult {
    pub title: String,
    pub markdown: String,
    pub hierarchy: Hierarchy,
    pub anchor: Option<String>,
    pub is_doc_page: bool,
    pub content_hash: String,
    pub word_count: u32,
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    pub include_code_blocks: bool,
    pub exclude_navigation: bool,
    pub include_anchors: bool,
}

pub fn extract(html: &str, base_url: &str, opts: ExtractOptions) -> Result<ExtractResult, ExtractError> {
    let document = Html::parse_document(html);
    let base = Url::parse(base_url).ok();

    let main = select_main_content(&document);
    let cleaned_html = main
        .map(|el| render_cleaned(el, opts.exclude_navigation, opts.include_code_blocks))
        .unwrap_or_default();

    let markdown = html_to_markdown(&cleaned_html)?;
    let markdown = post_process_markdown(&markdown);

    let title = extract_title(&document, main);
    let hierarchy = main
        .map(|el| extract_hierarchy(el))
        .unwrap_or_default();
    let anchor = if opts.include_anchors {
        main.and_then(|el| find_anchor(el))
    } else {
        None
    };

    let has_code = main.map(|el| has_code_block(el)).unwrap_or(false);
    let main_text_len = main
        .map(|el| el.text().collect::<String>().trim().len())
        .unwrap_or(0);
    let is_doc_page = hierarchy.lvl0.is_some()
        || hierarchy.lvl1.is_some()
        || hierarchy.lvl2.is_some()
        || has_code
        || main_text_len > 500;

    let word_count = markdown.split_whitespace().count() as u32;
    let content_hash = content_hash(&markdown);
    let links = extract_links(&document, base.as_ref());

    Ok(ExtractResult {
        title,
        markdown,
        hierarchy,
        anchor,
        is_doc_page,
        content_hash,
        word_count,
        links,
    })
}

fn select_main_content(document: &Html) -> Option<ElementRef<'_>> {
    for selector_str in MAIN_CONTENT_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(el) = document.select(&selector).find(|el| !el.text().collect::<String>().trim().is_empty()) {
                return Some(el);
            }
        }
    }
    longest_candidate(document)
}

/// Fallback: the longest `<div>`/`<section>` containing at least one
/// paragraph or heading and more than 200 characters of text.
fn longest_candidate(document: &Html) -> Option<ElementRef<'_>> {
    let selector = Selector::parse("div, section").ok()?;
    document
        .select(&selector)
        .filter(|el| has_paragraph_or_heading(*el))
        .map(|el| (el, el.text().collect::<String>().trim().len()))
        .filter(|(_, len)| *len > 200)
        .max_by_key(|(_, len)| *len)
        .map(|(el, _)| el)
}

fn has_paragraph_or_heading(el: ElementRef) -> bool {
    let selector = Selector::parse("p, h1, h2, h3, h4, h5, h6").unwrap();
    el.select(&selector).next().is_some()
}

fn has_code_block(el: ElementRef) -> bool {
    let selector = Selector::parse("pre code").unwrap();
    el.select(&selector).next().is_some()
}

fn extract_title(document: &Html, main: Option<ElementRef>) -> String {
    let h1_sel = Selector::parse("h1").unwrap();

    if let Some(main) = main {
        if let Some(h1) = main.select(&h1_sel).next() {
            let text = h1.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                return text;
            }
        }
    }

    if let Some(h1) = document.select(&h1_sel).next() {
        let text = h1.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return text;
        }
    }

    let title_sel = Selector::parse("title").unwrap();
    if let Some(title_el) = document.select(&title_sel).next() {
        let text = title_el.text().collect::<String>();
        if let Some(first) = text.split('|').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    "Untitled Page".to_string()
}

fn extract_hierarchy(main: ElementRef) -> Hierarchy {
    let mut h = Hierarchy::default();
    for (tag, slot) in [
        ("h1", &mut h.lvl0),
        ("h2", &mut h.lvl1),
        ("h3", &mut h.lvl2),
        ("h4", &mut h.lvl3),
        ("h5", &mut h.lvl4),
        ("h6", &mut h.lvl5),
    ] {
        let sel = Selector::parse(tag).unwrap();
        if let Some(el) = main.select(&sel).next() {
            let text = el.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                *slot = Some(text);
            }
        }
    }
    h
}

/// The four-step anchor walk: the element itself, its last child with
/// `id`/`name`, previous siblings bottom-up, then the parent (repeating).
fn find_anchor(start: ElementRef) -> Option<String> {
    let mut current = Some(start);
    while let Some(el) = current {
        if let Some(id) = el.value().attr("id").or_else(|| el.value().attr("name")) {
            return Some(id.to_string());
        }

        if let Some(last_child) = el
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|c| c.value().attr("id").or_else(|| c.value().attr("name")).is_some())
            .last()
        {
            return last_child
                .value()
                .attr("id")
                .or_else(|| last_child.value().attr("name"))
                .map(|s| s.to_string());
        }

        for prev in el.prev_siblings().filter_map(ElementRef::wrap) {
            if let Some(id) = prev.value().attr("id").or_else(|| prev.value().attr("name")) {
                return Some(id.to_string());
            }
        }

        current = el.parent().and_then(ElementRef::wrap);
    }
    None
}

fn extract_links(document: &Html, base: Option<&Url>) -> Vec<String> {
    let sel = Selector::parse("a[href]").unwrap();
    document
        .select(&sel)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| match base {
            Some(base) => base.join(href).ok(),
            None => Url::parse(href).ok(),
        })
        .filter(|u| u.scheme() == "http" || u.scheme() == "https")
        .map(|u| u.to_string())
        .collect()
}

/// Detect a code block's language from CSS classes (`language-`, `lang-`,
/// `highlight-` prefixes) or `data-language`/`data-lang` attributes.
fn detect_code_language(code_el: ElementRef) -> Option<String> {
    let class_attr = code_el.value().attr("class").unwrap_or("");
    for class in class_attr.split_whitespace() {
        for prefix in ["language-", "lang-", "highlight-"] {
            if let Some(lang) = class.strip_prefix(prefix) {
                if !lang.is_empty() {
                    return Some(lang.to_string());
                }
            }
        }
    }
    code_el
        .value()
        .attr("data-language")
        .or_else(|| code_el.value().attr("data-lang"))
        .map(|s| s.to_string())
}

fn is_nav_like(el: ElementRef) -> bool {
    let tag = el.value().name();
    if tag == "nav" {
        return true;
    }
    if el.value().attr("role") == Some("navigation") {
        return true;
    }
    let class_attr = el.value().attr("class").unwrap_or("");
    let classes: Vec<&str> = class_attr.split_whitespace().collect();
    classes.contains(&"navigation") || classes.contains(&"menu")
}

/// Walks the main-content subtree, stripping chrome, substituting a
/// placeholder for navigation blocks, and rewriting `<pre><code>` classes to
/// carry a detected language, then serialises what remains back to HTML for
/// `htmd` to convert.
fn render_cleaned(root: ElementRef, exclude_navigation: bool, include_code_blocks: bool) -> String {
    let mut out = String::new();
    render_node(root, exclude_navigation, include_code_blocks, &mut out);
    out
}

fn render_node(el: ElementRef, exclude_navigation: bool, include_code_blocks: bool, out: &mut String) {
    let tag = el.value().name();

    if STRIP_TAGS.contains(&tag) {
        return;
    }
    if matches_strip_selector(el) {
        return;
    }
    if exclude_navigation && is_nav_like(el) && !has_paragraph_or_heading(el) {
        out.push_str("{{ NAVIGATION }}");
        return;
    }
    if !include_code_blocks && tag == "pre" {
        return;
    }

    out.push('<');
    out.push_str(tag);
    if tag == "code" {
        if let Some(lang) = detect_code_language(el) {
            out.push_str(&format!(r#" class="language-{lang}""#));
            render_children_raw(el, out);
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
            return;
        }
    }
    for (name, value) in el.value().attrs() {
        if name == "class" || name == "id" {
            out.push_str(&format!(r#" {name}="{value}""#));
        }
    }
    out.push('>');

    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_el) = ElementRef::wrap(child) {
            render_node(child_el, exclude_navigation, include_code_blocks, out);
        }
    }

    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn render_children_raw(el: ElementRef, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_el) = ElementRef::wrap(child) {
            out.push_str(&child_el.html());
        }
    }
}

fn matches_strip_selector(el: ElementRef) -> bool {
    STRIP_SELECTORS.iter().any(|sel_str| {
        Selector::parse(sel_str)
            .map(|sel| {
                let class_attr = el.value().attr("class").unwrap_or("");
                let id_attr = el.value().attr("id").unwrap_or("");
                let needle = sel_str.trim_start_matches(['.', '#']);
                if sel_str.starts_with('.') {
                    class_attr.split_whitespace().any(|c| c == needle)
                } else if sel_str.starts_with('#') {
                    id_attr == needle
                } else {
                    false
                }
            })
            .unwrap_or(false)
    })
}

fn html_to_markdown(html: &str) -> Result<String, ExtractError> {
    if html.trim().is_empty() {
        return Ok(String::new());
    }
    htmd::convert(html).map_err(|e| ExtractError::Markdown(e.to_string()))
}

/// Collapse runs of 3+ blank lines to 2, strip empty list items, and trim.
fn post_process_markdown(markdown: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0;
    for line in markdown.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run <= 2 {
                lines.push("");
            }
        } else if is_empty_list_item(trimmed) {
            continue;
        } else {
            blank_run = 0;
            lines.push(trimmed);
        }
    }
    lines.join("\n").trim().to_string()
}

fn is_empty_list_item(line: &str) -> bool {
    let trimmed = line.trim_start();
    let after_marker = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "));
    matches!(after_marker, Some(rest) if rest.trim().is_empty())
}
