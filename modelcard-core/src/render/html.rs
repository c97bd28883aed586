//! Markdown to standalone HTML.

use pulldown_cmark::{Options, Parser, html};

/// Print stylesheet embedded in every HTML export.
pub const DEFAULT_PDF_CSS: &str = r#"
@page {
  size: A4;
  margin: 18mm 14mm 20mm 14mm;
  @bottom-center {
    content: "Page " counter(page) " of " counter(pages);
    font-size: 8.6px;
    color: #6b7280;
  }
}

:root {
  --brand: #0a2e5d;
  --accent: #c7d6ea;
  --text: #1f2937;
  --muted: #4b5563;
  --muted-2: #6b7280;
  --border: #e5e7eb;
}

html, body {
  font-family: Inter, -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto,
  Arial, "Noto Sans", sans-serif;
  font-size: 9.6pt;
  line-height: 1.5;
  color: var(--text);
}
p, li { hyphens: auto; margin: 0.35em 0 0.6em; }

h1 {
  font-size: 15.6pt;
  font-weight: 700;
  color: var(--brand);
  margin: 1em 0 0.6em;
}

h2 {
  font-size: 13.6pt;
  font-weight: 700;
  color: #fff;
  background: var(--brand);
  border-radius: 4px;
  padding: 6px 10px;
  margin: 0.9em 0 0.55em;
}

h3 { font-size: 12.1pt; font-weight: 600; color: var(--text); }
h4 { font-size: 10.9pt; font-weight: 600; color: var(--muted); }
h5 { font-size: 10.1pt; font-weight: 600; color: var(--muted-2); }

ul {
  margin: 0.3em 0 0.7em 1.2em;
  list-style: none;
  padding-left: 0;
}
ul li {
  margin: 0.2em 0;
  padding-left: 1em;
  position: relative;
}
ul li::before {
  content: "–";
  position: absolute;
  left: 0;
  color: var(--brand);
  font-weight: 600;
}

table {
  border-collapse: collapse;
  width: 100%;
  margin: 0.5em 0 1em;
  table-layout: fixed;
  font-size: 9.8pt;
  border: 1px solid var(--border);
}

thead th {
  background: var(--brand);
  color: #fff;
  font-weight: 600;
  text-align: left;
}

th, td {
  border: 1px solid var(--border);
  padding: 6px 8px;
  vertical-align: top;
  word-wrap: break-word;
}

tbody tr:nth-child(even) td { background: #f9fafb; }

img {
  display: block;
  max-width: 70%;
  height: auto;
  margin: 0.4em auto;
  border: 1px solid var(--border);
  border-radius: 6px;
}
"#;

/// Markdown options shared by the HTML and PDF renderers.
pub fn markdown_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options
}

/// Render Markdown to an HTML fragment.
pub fn markdown_to_html_body(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, markdown_options());
    let mut body = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut body, parser);
    body
}

/// Render Markdown to a complete HTML document carrying [`DEFAULT_PDF_CSS`]
/// and, when given, an extra stylesheet.
pub fn render_markdown_to_html(markdown: &str, extra_css: Option<&str>) -> String {
    let mut css = format!("<style>{DEFAULT_PDF_CSS}</style>");
    if let Some(extra) = extra_css.filter(|c| !c.trim().is_empty()) {
        css.push_str(&format!("<style>{extra}</style>"));
    }
    format!(
        "<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Model Card</title>\n{css}\n</head>\n<body>\n{}\n</body>\n</html>",
        markdown_to_html_body(markdown)
    )
}
