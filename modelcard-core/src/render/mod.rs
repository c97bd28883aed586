//! Document renderers: Markdown, HTML and PDF.

pub mod html;
pub mod markdown;
pub mod pdf;

pub use html::{DEFAULT_PDF_CSS, render_markdown_to_html};
pub use markdown::{MarkdownRenderer, SECTIONS, render_markdown};
pub use pdf::{fonts_available, pdf_bytes, save_pdf};
