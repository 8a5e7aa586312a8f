//! Export a narrator's musnad as JSON, Markdown, or a Word document.
//!
//! The `.docx` output is a minimal WordprocessingML package written with
//! `zip` and `quick-xml`: right-to-left paragraphs, one heading per hadith,
//! then the isnad, the text and (if present) the translation.

use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Serialize;
use std::io::{Cursor, Write};
use std::path::Path;
use std::str::FromStr;

use crate::config::Config;
use crate::db;
use crate::error::CatalogError;
use crate::hadiths;
use crate::models::{ChainLink, HadithDetail, NarratorDetail};
use crate::narrators;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
    Docx,
}

impl FromStr for ExportFormat {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "docx" | "word" => Ok(ExportFormat::Docx),
            other => Err(CatalogError::Invalid(format!(
                "unknown export format '{}' (expected json, markdown, or docx)",
                other
            ))),
        }
    }
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
            ExportFormat::Docx => "docx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
            ExportFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }
}

pub struct ExportFile {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Serialize)]
struct MusnadExport<'a> {
    narrator: &'a NarratorDetail,
    hadiths: &'a [HadithDetail],
}

/// Render an isnad the way it is read: compiler side first, verbs inline.
pub fn render_isnad(chain: &[ChainLink]) -> String {
    chain
        .iter()
        .rev()
        .map(|link| format!("{} {}", link.verb.as_deref().unwrap_or("عن"), link.narrator_name))
        .collect::<Vec<_>>()
        .join(" ")
}

async fn collect_musnad(
    pool: &sqlx::SqlitePool,
    narrator_id: i64,
) -> Result<(NarratorDetail, Vec<HadithDetail>)> {
    let narrator = narrators::get_narrator(pool, narrator_id).await?;

    let ids: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT h.id FROM hadiths h
        JOIN hadith_narrators hn ON hn.hadith_id = h.id AND hn.position = 1
        WHERE hn.narrator_id = ?
        ORDER BY h.source_id, h.book_id, h.number IS NULL, h.number, h.id
        "#,
    )
    .bind(narrator_id)
    .fetch_all(pool)
    .await?;

    let mut details = Vec::with_capacity(ids.len());
    for id in ids {
        details.push(hadiths::get_hadith(pool, id).await?);
    }
    Ok((narrator, details))
}

pub async fn export_musnad(
    pool: &sqlx::SqlitePool,
    narrator_id: i64,
    format: ExportFormat,
) -> Result<ExportFile> {
    let (narrator, hadiths) = collect_musnad(pool, narrator_id).await?;

    let bytes = match format {
        ExportFormat::Json => serde_json::to_vec_pretty(&MusnadExport {
            narrator: &narrator,
            hadiths: &hadiths,
        })?,
        ExportFormat::Markdown => render_markdown(&narrator, &hadiths).into_bytes(),
        ExportFormat::Docx => render_docx(&narrator, &hadiths)?,
    };

    Ok(ExportFile {
        filename: format!("musnad-{}.{}", narrator.id, format.extension()),
        content_type: format.content_type(),
        bytes,
    })
}

fn hadith_heading(index: usize, h: &HadithDetail) -> String {
    let mut heading = format!("{}. {} / {}", index + 1, h.source_name, h.book_title);
    if let Some(number) = h.hadith.number {
        heading.push_str(&format!(" #{}", number));
    }
    heading
}

pub fn render_markdown(narrator: &NarratorDetail, hadiths: &[HadithDetail]) -> String {
    let mut out = format!("# مسند {}\n\n", narrator.name);
    out.push_str(&format!("{} hadith(s)\n\n", hadiths.len()));

    for (i, h) in hadiths.iter().enumerate() {
        out.push_str(&format!("## {}\n\n", hadith_heading(i, h)));
        out.push_str(&format!("> {}\n\n", render_isnad(&h.chain)));
        out.push_str(h.hadith.text.trim());
        out.push_str("\n\n");
        if let Some(t) = &h.hadith.translation {
            out.push_str(&format!("*{}*\n\n", t.trim()));
        }
        out.push_str(&format!(
            "`{}`{}\n\n",
            h.hadith.hadith_type,
            h.hadith
                .grade
                .as_deref()
                .map(|g| format!(" · {}", g))
                .unwrap_or_default()
        ));
    }
    out
}

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

struct DocWriter {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl DocWriter {
    fn new() -> Result<Self> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        let mut doc = BytesStart::new("w:document");
        doc.push_attribute((
            "xmlns:w",
            "http://schemas.openxmlformats.org/wordprocessingml/2006/main",
        ));
        writer.write_event(Event::Start(doc))?;
        writer.write_event(Event::Start(BytesStart::new("w:body")))?;
        Ok(Self { writer })
    }

    fn empty(&mut self, name: &str, val: Option<&str>) -> Result<()> {
        let mut el = BytesStart::new(name);
        if let Some(v) = val {
            el.push_attribute(("w:val", v));
        }
        self.writer.write_event(Event::Empty(el))?;
        Ok(())
    }

    /// One right-to-left paragraph. `size` is in half-points.
    fn paragraph(&mut self, text: &str, bold: bool, size: Option<&str>) -> Result<()> {
        self.writer.write_event(Event::Start(BytesStart::new("w:p")))?;

        self.writer.write_event(Event::Start(BytesStart::new("w:pPr")))?;
        self.empty("w:bidi", None)?;
        self.empty("w:jc", Some("right"))?;
        self.writer.write_event(Event::End(BytesEnd::new("w:pPr")))?;

        self.writer.write_event(Event::Start(BytesStart::new("w:r")))?;
        self.writer.write_event(Event::Start(BytesStart::new("w:rPr")))?;
        self.empty("w:rtl", None)?;
        if bold {
            self.empty("w:b", None)?;
            self.empty("w:bCs", None)?;
        }
        if let Some(sz) = size {
            self.empty("w:sz", Some(sz))?;
            self.empty("w:szCs", Some(sz))?;
        }
        self.writer.write_event(Event::End(BytesEnd::new("w:rPr")))?;

        let mut t = BytesStart::new("w:t");
        t.push_attribute(("xml:space", "preserve"));
        self.writer.write_event(Event::Start(t))?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.writer.write_event(Event::End(BytesEnd::new("w:t")))?;

        self.writer.write_event(Event::End(BytesEnd::new("w:r")))?;
        self.writer.write_event(Event::End(BytesEnd::new("w:p")))?;
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>> {
        self.writer.write_event(Event::End(BytesEnd::new("w:body")))?;
        self.writer.write_event(Event::End(BytesEnd::new("w:document")))?;
        Ok(self.writer.into_inner().into_inner())
    }
}

pub fn render_docx(narrator: &NarratorDetail, hadiths: &[HadithDetail]) -> Result<Vec<u8>> {
    let mut doc = DocWriter::new()?;
    doc.paragraph(&format!("مسند {}", narrator.name), true, Some("36"))?;

    for (i, h) in hadiths.iter().enumerate() {
        doc.paragraph(&hadith_heading(i, h), true, Some("28"))?;
        doc.paragraph(&render_isnad(&h.chain), false, Some("22"))?;
        doc.paragraph(h.hadith.text.trim(), false, None)?;
        if let Some(t) = &h.hadith.translation {
            doc.paragraph(t.trim(), false, None)?;
        }
    }
    let document_xml = doc.finish()?;

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        for (name, data) in [
            ("[Content_Types].xml", CONTENT_TYPES_XML.as_bytes()),
            ("_rels/.rels", RELS_XML.as_bytes()),
            ("word/document.xml", document_xml.as_slice()),
        ] {
            zip.start_file(name, zip::write::SimpleFileOptions::default())?;
            zip.write_all(data)?;
        }
        zip.finish()?;
    }
    Ok(buf)
}

/// CLI entry point: export to `output`, or to stdout for text formats.
pub async fn run_export(
    config: &Config,
    narrator_id: i64,
    format: ExportFormat,
    output: Option<&Path>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let file = export_musnad(&pool, narrator_id, format).await?;
    pool.close().await;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &file.bytes)?;
            eprintln!("Exported {} to {}", file.filename, path.display());
        }
        None if format == ExportFormat::Docx => {
            anyhow::bail!("--output is required for docx export");
        }
        None => {
            std::io::stdout().write_all(&file.bytes)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HadithSummary, HadithType};
    use std::io::Read;

    fn sample() -> (NarratorDetail, Vec<HadithDetail>) {
        let narrator = NarratorDetail {
            id: 1,
            name: "عمر بن الخطاب".into(),
            kunya: Some("أبو حفص".into()),
            laqab: None,
            tabaqa: Some(1),
            grade: None,
            bio: None,
            created_at: "2024-01-01T00:00:00Z".into(),
            death_years: vec![],
            teachers: vec![],
            students: vec![],
        };
        let hadith = HadithDetail {
            hadith: HadithSummary {
                id: 9,
                source_id: 1,
                book_id: 1,
                chapter_id: None,
                number: Some(1),
                text: "إنما الأعمال بالنيات".into(),
                translation: Some("Actions are judged by intentions".into()),
                hadith_type: HadithType::Marfu,
                grade: Some("sahih".into()),
            },
            source_name: "Sahih al-Bukhari".into(),
            book_title: "Revelation".into(),
            chapter_title: None,
            created_at: "2024-01-01T00:00:00Z".into(),
            chain: vec![
                ChainLink {
                    position: 1,
                    narrator_id: 1,
                    narrator_name: "عمر بن الخطاب".into(),
                    verb: Some("سمعت".into()),
                },
                ChainLink {
                    position: 2,
                    narrator_id: 2,
                    narrator_name: "علقمة بن وقاص".into(),
                    verb: None,
                },
            ],
        };
        (narrator, vec![hadith])
    }

    #[test]
    fn test_render_isnad_reads_from_compiler_side() {
        let (_, hadiths) = sample();
        assert_eq!(
            render_isnad(&hadiths[0].chain),
            "عن علقمة بن وقاص سمعت عمر بن الخطاب"
        );
    }

    #[test]
    fn test_markdown_contains_sections() {
        let (n, h) = sample();
        let md = render_markdown(&n, &h);
        assert!(md.starts_with("# مسند عمر بن الخطاب"));
        assert!(md.contains("## 1. Sahih al-Bukhari / Revelation #1"));
        assert!(md.contains("*Actions are judged by intentions*"));
        assert!(md.contains("`marfu` · sahih"));
    }

    #[test]
    fn test_docx_package_has_document_text() {
        let (n, h) = sample();
        let bytes = render_docx(&n, &h).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert!(archive.by_name("[Content_Types].xml").is_ok());
        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        assert!(xml.contains("<w:bidi/>"));
        assert!(xml.contains("إنما الأعمال بالنيات"));
        assert!(xml.contains("مسند عمر بن الخطاب"));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("MD".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert_eq!("word".parse::<ExportFormat>().unwrap(), ExportFormat::Docx);
        assert!("pdf".parse::<ExportFormat>().is_err());
    }
}
