//! PDF export: the rendered Markdown laid out with `genpdf`.
//!
//! Headings, paragraphs, bullet lists and tables are reproduced. Images are
//! not rasterised; each one is replaced by its caption.

use genpdf::elements::{Break, FrameCellDecorator, Paragraph, TableLayout, UnorderedList};
use genpdf::fonts::{FontData, FontFamily};
use genpdf::style::{Style, StyledString};
use genpdf::{Alignment, Document, Element, SimplePageDecorator};
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::PdfConfig;
use crate::error::{CardError, Result};
use crate::render::html::markdown_options;

/// System font locations tried after the configured one.
const FALLBACK_FONTS: [(&str, &str); 3] = [
    ("/usr/share/fonts/truetype/liberation", "LiberationSans"),
    ("/System/Library/Fonts", "Helvetica"),
    ("/Library/Fonts", "Arial"),
];

/// Load the configured font family, falling back to well-known system fonts.
pub fn load_font_family(config: &PdfConfig) -> Result<FontFamily<FontData>> {
    let mut candidates: Vec<(PathBuf, &str)> = Vec::new();
    if let Some(dir) = &config.font_dir {
        candidates.push((dir.clone(), config.font_family.as_str()));
    }
    candidates.push((PathBuf::new(), config.font_family.as_str()));
    candidates.extend(FALLBACK_FONTS.iter().map(|(dir, name)| (PathBuf::from(dir), *name)));

    for (dir, name) in &candidates {
        match genpdf::fonts::from_files(dir, name, None) {
            Ok(family) => {
                debug!(dir = %dir.display(), family = name, "Loaded PDF font");
                return Ok(family);
            }
            Err(e) => debug!(dir = %dir.display(), family = name, error = %e, "Font not usable"),
        }
    }
    Err(CardError::pdf(format!(
        "no usable font found for '{}'; set pdf.font_dir to a directory with {}-Regular.ttf",
        config.font_family, config.font_family
    )))
}

/// Whether a PDF can be produced with this configuration.
pub fn fonts_available(config: &PdfConfig) -> bool {
    load_font_family(config).is_ok()
}

fn heading_size(level: HeadingLevel, base: u8) -> u8 {
    let bump = match level {
        HeadingLevel::H1 => 8,
        HeadingLevel::H2 => 5,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 1,
        _ => 0,
    };
    base.saturating_add(bump)
}

#[derive(Default)]
struct TableBuffer {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: String,
}

/// Turns Markdown events into document elements.
struct Layout {
    doc: Document,
    base_size: u8,
    bold: bool,
    italic: bool,
    heading: Option<u8>,
    paragraph: Option<Paragraph>,
    list: Option<UnorderedList>,
    in_item: bool,
    table: Option<TableBuffer>,
    image_alt: Option<String>,
}

impl Layout {
    fn new(doc: Document, base_size: u8) -> Self {
        Self {
            doc,
            base_size,
            bold: false,
            italic: false,
            heading: None,
            paragraph: None,
            list: None,
            in_item: false,
            table: None,
            image_alt: None,
        }
    }

    fn style(&self) -> Style {
        let mut style = Style::new();
        if self.bold || self.heading.is_some() {
            style = style.bold();
        }
        if self.italic {
            style = style.italic();
        }
        style.with_font_size(self.heading.unwrap_or(self.base_size))
    }

    fn text(&mut self, text: &str) {
        if let Some(alt) = self.image_alt.as_mut() {
            alt.push_str(text);
        } else if let Some(table) = self.table.as_mut() {
            table.cell.push_str(text);
        } else {
            let style = self.style();
            self.paragraph
                .get_or_insert_with(Paragraph::default)
                .push(StyledString::new(text.to_string(), style));
        }
    }

    fn flush_paragraph(&mut self, spacing: f64) {
        if let Some(paragraph) = self.paragraph.take() {
            self.doc.push(paragraph);
            self.doc.push(Break::new(spacing));
        }
    }

    fn finish_table(&mut self) -> Result<()> {
        let Some(table) = self.table.take() else {
            return Ok(());
        };
        let columns = table
            .rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(table.header.len()))
            .max()
            .unwrap_or(0);
        if columns == 0 {
            return Ok(());
        }
        let mut layout = TableLayout::new(vec![1; columns]);
        layout.set_cell_decorator(FrameCellDecorator::new(true, true, false));

        let cell_size = self.base_size.saturating_sub(1).max(6);
        let header_style = Style::new().bold().with_font_size(cell_size);
        let body_style = Style::new().with_font_size(cell_size);
        let rows = std::iter::once((table.header, header_style))
            .chain(table.rows.into_iter().map(|r| (r, body_style)));
        for (cells, style) in rows {
            if cells.is_empty() {
                continue;
            }
            let mut row = layout.row();
            for i in 0..columns {
                let text = cells.get(i).cloned().unwrap_or_default();
                row.push_element(Paragraph::new(StyledString::new(text, style)).padded(1));
            }
            row.push()
                .map_err(|e| CardError::pdf(format!("table row: {e}")))?;
        }
        self.doc.push(layout);
        self.doc.push(Break::new(1));
        Ok(())
    }

    fn event(&mut self, event: Event<'_>) -> Result<()> {
        match event {
            Event::Start(tag) => match tag {
                Tag::Heading { level, .. } => {
                    self.flush_paragraph(0.5);
                    self.heading = Some(heading_size(level, self.base_size));
                }
                Tag::Paragraph if !self.in_item => self.flush_paragraph(0.5),
                Tag::Paragraph => {
                    if self.paragraph.is_some() {
                        self.text(" ");
                    }
                }
                Tag::List(_) => {
                    self.flush_paragraph(0.5);
                    self.list = Some(UnorderedList::new());
                }
                Tag::Item => {
                    self.in_item = true;
                    self.paragraph = Some(Paragraph::default());
                }
                Tag::Table(_) => {
                    self.flush_paragraph(0.5);
                    self.table = Some(TableBuffer::default());
                }
                Tag::TableRow => {
                    if let Some(t) = self.table.as_mut() {
                        t.row.clear();
                    }
                }
                Tag::TableCell => {
                    if let Some(t) = self.table.as_mut() {
                        t.cell.clear();
                    }
                }
                Tag::Strong => self.bold = true,
                Tag::Emphasis => self.italic = true,
                Tag::Image { .. } => self.image_alt = Some(String::new()),
                _ => {}
            },
            Event::End(tag) => match tag {
                TagEnd::Heading(_) => {
                    self.flush_paragraph(0.5);
                    self.heading = None;
                }
                TagEnd::Paragraph if !self.in_item => self.flush_paragraph(0.5),
                TagEnd::Item => {
                    self.in_item = false;
                    if let (Some(list), Some(item)) = (self.list.as_mut(), self.paragraph.take()) {
                        list.push(item);
                    }
                }
                TagEnd::List(_) => {
                    if let Some(list) = self.list.take() {
                        self.doc.push(list);
                        self.doc.push(Break::new(0.5));
                    }
                }
                TagEnd::TableCell => {
                    if let Some(t) = self.table.as_mut() {
                        let cell = std::mem::take(&mut t.cell);
                        t.row.push(cell.trim().to_string());
                    }
                }
                TagEnd::TableHead => {
                    if let Some(t) = self.table.as_mut() {
                        t.header = std::mem::take(&mut t.row);
                    }
                }
                TagEnd::TableRow => {
                    if let Some(t) = self.table.as_mut() {
                        let row = std::mem::take(&mut t.row);
                        t.rows.push(row);
                    }
                }
                TagEnd::Table => self.finish_table()?,
                TagEnd::Strong => self.bold = false,
                TagEnd::Emphasis => self.italic = false,
                TagEnd::Image => {
                    let alt = self.image_alt.take().unwrap_or_default();
                    let saved = self.italic;
                    self.italic = true;
                    self.text(&format!("[Figure: {}]", alt.trim()));
                    self.italic = saved;
                }
                _ => {}
            },
            Event::Text(text) | Event::Code(text) => self.text(&text),
            Event::SoftBreak => self.text(" "),
            Event::HardBreak => {
                if self.in_item || self.table.is_some() {
                    self.text(" ");
                } else {
                    self.flush_paragraph(0.0);
                }
            }
            Event::Rule => {
                self.flush_paragraph(0.5);
                self.doc.push(Break::new(1));
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(mut self) -> Document {
        self.flush_paragraph(0.0);
        self.doc
    }
}

/// Lay out `markdown` as a PDF document.
pub fn markdown_to_pdf(markdown: &str, title: &str, config: &PdfConfig) -> Result<Document> {
    let font_family = load_font_family(config)?;
    let mut doc = Document::new(font_family);
    doc.set_title(title);
    doc.set_font_size(config.font_size);
    doc.set_line_spacing(1.25);

    let mut decorator = SimplePageDecorator::new();
    decorator.set_margins(f64::from(config.margins_mm));
    decorator.set_header(|page| {
        Paragraph::new(StyledString::new(
            format!("Page {page}"),
            Style::new().with_font_size(8),
        ))
        .aligned(Alignment::Right)
    });
    doc.set_page_decorator(decorator);

    let mut layout = Layout::new(doc, config.font_size);
    for event in Parser::new_ext(markdown, markdown_options()) {
        layout.event(event)?;
    }
    Ok(layout.finish())
}

/// Render `markdown` to PDF bytes.
pub fn pdf_bytes(markdown: &str, title: &str, config: &PdfConfig) -> Result<Vec<u8>> {
    let doc = markdown_to_pdf(markdown, title, config)?;
    let mut out = Vec::new();
    doc.render(&mut out)
        .map_err(|e| CardError::pdf(format!("failed to render PDF: {e}")))?;
    Ok(out)
}

/// Render `markdown` to a PDF file at `path`.
pub fn save_pdf(markdown: &str, title: &str, config: &PdfConfig, path: &Path) -> Result<()> {
    let doc = markdown_to_pdf(markdown, title, config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    doc.render_to_file(path)
        .map_err(|e| CardError::pdf(format!("failed to render PDF: {e}")))?;
    info!(path = %path.display(), "Wrote PDF");
    Ok(())
}
