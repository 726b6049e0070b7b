//! Minimal PDF writer: text-only pages, one content stream each.
//!
//! Objects are appended as pages are added. The page tree, catalog and
//! cross-reference table are written on [`PdfWriter::finish`], so the page
//! count need not be known up front. Nothing time-dependent is emitted.
//!
//! Finished objects can be drained with [`PdfWriter::take_pending`] while the
//! document is still open; the writer keeps only object offsets.

use std::fmt::Write as _;

const CATALOG_ID: u32 = 1;
const PAGES_ID: u32 = 2;
const FONT_ID: u32 = 3;
const FIRST_FREE_ID: u32 = 4;

const PAGE_WIDTH: u32 = 612;
const PAGE_HEIGHT: u32 = 792;

pub(crate) struct PdfWriter {
    buf: Vec<u8>,
    /// Bytes already handed out by `take_pending`.
    drained: usize,
    offsets: Vec<(u32, usize)>,
    page_ids: Vec<u32>,
    next_id: u32,
}

impl PdfWriter {
    pub(crate) fn new() -> Self {
        let mut buf = Vec::with_capacity(4096);
        buf.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");
        Self {
            buf,
            drained: 0,
            offsets: Vec::new(),
            page_ids: Vec::new(),
            next_id: FIRST_FREE_ID,
        }
    }

    pub(crate) fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Appends a page showing `lines`, top to bottom.
    pub(crate) fn add_text_page(&mut self, lines: &[String]) {
        let mut content = String::from("BT\n/F1 12 Tf\n16 TL\n72 720 Td\n");
        for line in lines {
            let _ = writeln!(content, "({}) Tj T*", escape_text(line));
        }
        content.push_str("ET\n");

        let content_id = self.allocate();
        self.object(
            content_id,
            &format!(
                "<< /Length {} >>\nstream\n{content}endstream",
                content.len()
            ),
        );

        let page_id = self.allocate();
        self.object(
            page_id,
            &format!(
                "<< /Type /Page /Parent {PAGES_ID} 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
                 /Resources << /Font << /F1 {FONT_ID} 0 R >> >> /Contents {content_id} 0 R >>"
            ),
        );
        self.page_ids.push(page_id);
    }

    /// Returns the bytes written since the last call.
    pub(crate) fn take_pending(&mut self) -> Vec<u8> {
        let pending = std::mem::take(&mut self.buf);
        self.drained += pending.len();
        pending
    }

    /// Writes the closing objects and returns every byte not yet drained.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        self.object(
            FONT_ID,
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>",
        );

        let kids = self
            .page_ids
            .iter()
            .map(|id| format!("{id} 0 R"))
            .collect::<Vec<_>>()
            .join(" ");
        self.object(
            PAGES_ID,
            &format!(
                "<< /Type /Pages /Kids [{kids}] /Count {} >>",
                self.page_ids.len()
            ),
        );
        self.object(
            CATALOG_ID,
            &format!("<< /Type /Catalog /Pages {PAGES_ID} 0 R >>"),
        );

        self.offsets.sort_unstable_by_key(|(id, _)| *id);
        let size = self.next_id;
        let xref_offset = self.position();
        let mut xref = format!("xref\n0 {size}\n0000000000 65535 f \n");
        for (_, offset) in &self.offsets {
            let _ = writeln!(xref, "{offset:010} 00000 n ");
        }
        let _ = write!(
            xref,
            "trailer\n<< /Size {size} /Root {CATALOG_ID} 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n"
        );
        self.buf.extend_from_slice(xref.as_bytes());
        self.buf
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn position(&self) -> usize {
        self.drained + self.buf.len()
    }

    fn object(&mut self, id: u32, body: &str) {
        self.offsets.push((id, self.position()));
        self.buf
            .extend_from_slice(format!("{id} 0 obj\n{body}\nendobj\n").as_bytes());
    }
}

/// Escapes a PDF literal string; non-ASCII characters become `?`.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '(' | ')' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}
