//! 目录列表 HTML 渲染。

use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::fmt::{self, Write};
use std::time::SystemTime;

use crate::storage::DirectoryEntry;

const HREF_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const LISTING_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>Index of {{title}}</title>
  </head>
  <body>
    <h1>Index of {{title}}</h1>
    <form method="post" enctype="multipart/form-data">
      <label>Select file <input type="file" name="file" multiple></label>
      <input type="submit" value="Upload">
    </form>
    <table>
      <tr><th>Name</th><th>Size</th><th>Modified</th></tr>
{{parent}}{{rows}}    </table>
  </body>
</html>
"#;

#[derive(Debug)]
pub enum ListingError {
    CreateTemplate(String),
    ExecuteTemplate(fmt::Error),
}

impl fmt::Display for ListingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingError::CreateTemplate(msg) => write!(f, "create template error: {msg}"),
            ListingError::ExecuteTemplate(err) => write!(f, "execute template error: {err}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Title,
    Parent,
    Rows,
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'t> {
    Literal(&'t str),
    Slot(Slot),
}

/// 预解析的列表模板，占位符形如 `{{rows}}`。
#[derive(Debug)]
pub struct ListingTemplate<'t> {
    segments: Vec<Segment<'t>>,
}

impl<'t> ListingTemplate<'t> {
    pub fn parse(source: &'t str) -> Result<Self, ListingError> {
        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(&rest[..start]));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| ListingError::CreateTemplate("unclosed placeholder".into()))?;
            let slot = match after[..end].trim() {
                "title" => Slot::Title,
                "parent" => Slot::Parent,
                "rows" => Slot::Rows,
                other => {
                    return Err(ListingError::CreateTemplate(format!(
                        "unknown placeholder {other:?}"
                    )));
                }
            };
            segments.push(Segment::Slot(slot));
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest));
        }
        Ok(Self { segments })
    }

    /// 渲染 `url_path` 目录的条目列表。
    pub fn render(&self, url_path: &str, entries: &[DirectoryEntry]) -> Result<String, ListingError> {
        let mut out = String::with_capacity(1024 + entries.len() * 128);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(Slot::Title) => {
                    out.push_str(&html_escape::encode_text(url_path));
                }
                Segment::Slot(Slot::Parent) => {
                    if url_path != "/" {
                        out.push_str(
                            "      <tr><td><a href=\"../\">../</a></td><td></td><td></td></tr>\n",
                        );
                    }
                }
                Segment::Slot(Slot::Rows) => {
                    for entry in entries {
                        write_row(&mut out, entry).map_err(ListingError::ExecuteTemplate)?;
                    }
                }
            }
        }
        Ok(out)
    }
}

/// 使用内置模板渲染目录列表。
pub fn render_listing(url_path: &str, entries: &[DirectoryEntry]) -> Result<String, ListingError> {
    ListingTemplate::parse(LISTING_TEMPLATE)?.render(url_path, entries)
}

fn write_row(out: &mut impl Write, entry: &DirectoryEntry) -> fmt::Result {
    let suffix = if entry.is_dir { "/" } else { "" };
    let href = format!("{}{suffix}", utf8_percent_encode(&entry.name, HREF_SEGMENT));
    writeln!(
        out,
        "      <tr><td><a href=\"{}\">{}{suffix}</a></td><td>{}</td><td>{}</td></tr>",
        html_escape::encode_double_quoted_attribute(&href),
        html_escape::encode_text(&entry.name),
        format_bytes(entry.size),
        entry.modified.map(format_timestamp).unwrap_or_default(),
    )
}

/// 以 1024 为进制的可读大小（B、KiB、MiB…）。
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let prefix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {prefix}iB", bytes as f64 / div as f64)
}

fn format_timestamp(timestamp: SystemTime) -> String {
    let datetime: DateTime<Utc> = timestamp.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}
