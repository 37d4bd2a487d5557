//! Single-page PDF report: chart on the left, latest entries on the right.
//!
//! The page is written directly as PDF 1.4 with the built-in Helvetica font,
//! so text is limited to WinAnsi characters.

use super::{local_time, report_path, write_atomic, ExportError, Result};
use crate::types::{Record, Timestamp};
use chrono::TimeZone;
use image::RgbImage;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

// A4 landscape, points.
const PAGE_WIDTH: u32 = 842;
const PAGE_HEIGHT: u32 = 595;

const MARGIN: u32 = 40;
const TOP: u32 = 70;
const GAP: u32 = 20;
const LIST_WIDTH: u32 = 240;
const CHART_WIDTH: u32 = PAGE_WIDTH - 2 * MARGIN - GAP - LIST_WIDTH;
const CONTENT_HEIGHT: u32 = PAGE_HEIGHT - TOP - MARGIN;
const LIST_X: u32 = MARGIN + CHART_WIDTH + GAP + 40;

const HEADER_ADVANCE: u32 = 16;
const ROW_ADVANCE: u32 = 14;
const MAX_ROWS: usize = 26;

const MAX_CHART_SIDE: u32 = 8192;

const FOOTER: &str = "Generated by BPLog \u{2014} TruliVerse";

/// Inputs of a PDF report.
#[derive(Debug, Clone, Copy)]
pub struct PdfReport<'a> {
    /// Label of the active window, shown in the title.
    pub title_suffix: &'a str,
    /// Pre-rendered chart. An empty image leaves the chart area blank.
    pub chart: &'a RgbImage,
    /// Records shown in the entry list.
    pub records: &'a [Record],
}

/// Render the report to PDF bytes.
pub fn render_pdf<Tz: TimeZone>(report: &PdfReport<'_>, tz: &Tz) -> Result<Vec<u8>>
where
    Tz::Offset: std::fmt::Display,
{
    let (width, height) = report.chart.dimensions();
    if width > MAX_CHART_SIDE || height > MAX_CHART_SIDE {
        return Err(ExportError::ChartTooLarge { width, height });
    }
    let has_chart = width > 0 && height > 0;

    let mut content = String::new();
    text(
        &mut content,
        18,
        MARGIN,
        MARGIN,
        &format!("Blood Pressure Log ({})", report.title_suffix),
    );

    if has_chart {
        let scale = f64::min(
            f64::from(CHART_WIDTH) / f64::from(width),
            f64::from(CONTENT_HEIGHT) / f64::from(height),
        );
        let draw_w = (f64::from(width) * scale) as u32;
        let draw_h = (f64::from(height) * scale) as u32;
        let x = MARGIN + (CHART_WIDTH - draw_w) / 2;
        let y = TOP + (CONTENT_HEIGHT - draw_h) / 2;
        let _ = writeln!(
            content,
            "q {draw_w} 0 0 {draw_h} {x} {} cm /Im1 Do Q",
            PAGE_HEIGHT - y - draw_h
        );
    }

    let mut y = TOP;
    text(&mut content, 12, LIST_X, y, "Entries");
    y += HEADER_ADVANCE;

    let fitting = ((PAGE_HEIGHT - MARGIN).saturating_sub(y) / ROW_ADVANCE) as usize;
    let mut rows: Vec<&Record> = report.records.iter().collect();
    rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    for record in rows.into_iter().take(fitting.min(MAX_ROWS)) {
        let when = local_time(record.timestamp, tz)?.format("%Y.%m.%d %H:%M");
        let line = format!(
            "{when}  {}/{}  {}",
            record.systolic, record.diastolic, record.pulse
        );
        text(&mut content, 11, LIST_X, y, &line);
        y += ROW_ADVANCE;
    }

    text(&mut content, 10, MARGIN, PAGE_HEIGHT - 20, FOOTER);

    let mut doc = PdfWriter::new();
    doc.object(b"<< /Type /Catalog /Pages 2 0 R >>");
    doc.object(b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    let xobjects = if has_chart { " /XObject << /Im1 6 0 R >>" } else { "" };
    doc.object(
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
             /Resources << /Font << /F1 4 0 R >>{xobjects} >> /Contents 5 0 R >>"
        )
        .as_bytes(),
    );
    doc.object(b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>");
    doc.stream("", content.as_bytes());
    if has_chart {
        doc.stream(
            &format!(
                "/Type /XObject /Subtype /Image /Width {width} /Height {height} \
                 /ColorSpace /DeviceRGB /BitsPerComponent 8"
            ),
            report.chart.as_raw(),
        );
    }

    Ok(doc.finish(1))
}

/// Write the PDF report and return its path.
pub fn write_pdf<Tz: TimeZone>(
    export_dir: &Path,
    report: &PdfReport<'_>,
    now: Timestamp,
    tz: &Tz,
) -> Result<PathBuf>
where
    Tz::Offset: std::fmt::Display,
{
    let path = report_path(export_dir, now, tz, "pdf")?;
    let bytes = render_pdf(report, tz)?;
    write_atomic(&path, &bytes)?;
    Ok(path)
}

/// Append a text-showing operation. `y` is measured from the top of the
/// page to the baseline.
fn text(content: &mut String, size: u32, x: u32, y: u32, value: &str) {
    let _ = writeln!(
        content,
        "BT /F1 {size} Tf {x} {} Td {} Tj ET",
        PAGE_HEIGHT - y,
        pdf_string(value)
    );
}

/// Encode as a PDF literal string in WinAnsi. Octal escapes keep the
/// content stream ASCII.
fn pdf_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('(');
    for ch in value.chars() {
        match ch {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            '\u{2014}' => out.push_str("\\227"),
            '\u{2013}' => out.push_str("\\226"),
            ' '..='~' => out.push(ch),
            _ => out.push('?'),
        }
    }
    out.push(')');
    out
}

/// Sequential object writer that tracks offsets for the xref table.
struct PdfWriter {
    buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl PdfWriter {
    fn new() -> Self {
        Self {
            buf: b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec(),
            offsets: Vec::new(),
        }
    }

    fn object(&mut self, body: &[u8]) {
        self.offsets.push(self.buf.len());
        let number = self.offsets.len();
        self.buf.extend_from_slice(format!("{number} 0 obj\n").as_bytes());
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(b"\nendobj\n");
    }

    fn stream(&mut self, dict: &str, data: &[u8]) {
        let separator = if dict.is_empty() { "" } else { " " };
        let mut body = format!("<< {dict}{separator}/Length {} >>\nstream\n", data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.object(&body);
    }

    fn finish(mut self, root: usize) -> Vec<u8> {
        let xref = self.buf.len();
        let count = self.offsets.len() + 1;

        let mut table = format!("xref\n0 {count}\n0000000000 65535 f \n");
        for offset in &self.offsets {
            let _ = write!(table, "{offset:010} 00000 n \n");
        }
        let _ = write!(
            table,
            "trailer\n<< /Size {count} /Root {root} 0 R >>\nstartxref\n{xref}\n%%EOF\n"
        );

        self.buf.extend_from_slice(table.as_bytes());
        self.buf
    }
}
