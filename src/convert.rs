//! Batch PDF → Markdown conversion (`lore convert`).
//!
//! Converted files land next to each other in one output directory as
//! `<stem>.md`, ready to be indexed like any other Markdown source.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

use crate::extract::{extract_elements, extract_pdf, render_markdown};

/// How extracted PDF text is turned into Markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertEngine {
    /// Raw extracted text.
    Plain,
    /// Heuristic element detection rendered as headings, lists and tables.
    Structured,
}

impl ConvertEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConvertEngine::Plain => "plain",
            ConvertEngine::Structured => "structured",
        }
    }
}

impl FromStr for ConvertEngine {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(ConvertEngine::Plain),
            "structured" => Ok(ConvertEngine::Structured),
            other => bail!("Unknown engine: {}. Use: plain | structured", other),
        }
    }
}

/// Progress reported while converting.
#[derive(Debug, Clone)]
pub enum ConvertEvent {
    Skip {
        pdf: PathBuf,
        md_path: PathBuf,
        index: usize,
        total: usize,
    },
    Converting {
        pdf: PathBuf,
        md_path: PathBuf,
        index: usize,
        total: usize,
    },
    Done {
        pdf: PathBuf,
        md_path: PathBuf,
        index: usize,
        total: usize,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConvertSummary {
    pub converted: usize,
    pub skipped: usize,
}

/// Collect PDF files from files and directories, sorted per directory.
pub fn collect_pdfs(inputs: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    let mut pdfs = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let max_depth = if recursive { usize::MAX } else { 1 };
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .max_depth(max_depth)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_pdf(e.path()))
                .map(|e| e.into_path())
                .collect();
            found.sort();
            pdfs.extend(found);
        } else if input.is_file() && is_pdf(input) {
            pdfs.push(input.clone());
        }
    }

    pdfs
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Convert one PDF's bytes to Markdown with the given engine.
pub fn pdf_to_markdown(bytes: &[u8], engine: ConvertEngine) -> Result<String> {
    let text = extract_pdf(bytes)?;
    Ok(match engine {
        ConvertEngine::Plain => text.trim().to_string(),
        ConvertEngine::Structured => render_markdown(&extract_elements(&text)),
    })
}

/// Convert `pdfs` into `<out_dir>/<stem>.md`.
///
/// Existing outputs are left alone unless `overwrite` is set.
pub fn convert_pdfs(
    pdfs: &[PathBuf],
    out_dir: &Path,
    engine: ConvertEngine,
    overwrite: bool,
    mut on_event: impl FnMut(&ConvertEvent),
) -> Result<ConvertSummary> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;

    let total = pdfs.len();
    let mut summary = ConvertSummary::default();

    for (i, pdf) in pdfs.iter().enumerate() {
        let index = i + 1;
        let stem = pdf
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("document-{}", index));
        let md_path = out_dir.join(format!("{}.md", stem));

        if md_path.exists() && !overwrite {
            on_event(&ConvertEvent::Skip {
                pdf: pdf.clone(),
                md_path,
                index,
                total,
            });
            summary.skipped += 1;
            continue;
        }

        on_event(&ConvertEvent::Converting {
            pdf: pdf.clone(),
            md_path: md_path.clone(),
            index,
            total,
        });

        let bytes =
            std::fs::read(pdf).with_context(|| format!("Failed to read {}", pdf.display()))?;
        let markdown = pdf_to_markdown(&bytes, engine)
            .with_context(|| format!("Failed to convert {}", pdf.display()))?;
        std::fs::write(&md_path, markdown)
            .with_context(|| format!("Failed to write {}", md_path.display()))?;

        on_event(&ConvertEvent::Done {
            pdf: pdf.clone(),
            md_path,
            index,
            total,
        });
        summary.converted += 1;
    }

    Ok(summary)
}

/// CLI entry point for `lore convert`.
pub fn run_convert(
    inputs: &[PathBuf],
    out_dir: &Path,
    engine: ConvertEngine,
    recursive: bool,
    overwrite: bool,
) -> Result<()> {
    let pdfs = collect_pdfs(inputs, recursive);
    if pdfs.is_empty() {
        bail!("No PDF files found in the given inputs.");
    }

    let summary = convert_pdfs(&pdfs, out_dir, engine, overwrite, |event| match event {
        ConvertEvent::Skip { md_path, .. } => {
            println!("[skip] {} exists (use --overwrite).", md_path.display());
        }
        ConvertEvent::Converting {
            pdf, index, total, ..
        } => {
            println!(
                "[{}/{}] Converting ({}): {}",
                index,
                total,
                engine.as_str(),
                pdf.display()
            );
        }
        ConvertEvent::Done { md_path, .. } => {
            println!("[ok] {}", md_path.display());
        }
    })?;

    tracing::info!(
        converted = summary.converted,
        skipped = summary.skipped,
        "conversion finished"
    );
    println!("[done] Wrote Markdown to {}", out_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_engine_from_str() {
        assert_eq!("plain".parse::<ConvertEngine>().unwrap(), ConvertEngine::Plain);
        assert_eq!(
            " Structured ".parse::<ConvertEngine>().unwrap(),
            ConvertEngine::Structured
        );
        assert!("docling".parse::<ConvertEngine>().is_err());
    }

    #[test]
    fn test_collect_pdfs_recursive_and_flat() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("b.pdf"), b"x").unwrap();
        std::fs::write(root.join("a.PDF"), b"x").unwrap();
        std::fs::write(root.join("notes.md"), b"x").unwrap();
        std::fs::write(root.join("sub").join("c.pdf"), b"x").unwrap();

        let flat = collect_pdfs(&[root.to_path_buf()], false);
        let names: Vec<String> = flat
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf"]);

        let deep = collect_pdfs(&[root.to_path_buf()], true);
        assert_eq!(deep.len(), 3);
    }

    #[test]
    fn test_collect_pdfs_explicit_files() {
        let tmp = TempDir::new().unwrap();
        let pdf = tmp.path().join("one.pdf");
        let md = tmp.path().join("one.md");
        std::fs::write(&pdf, b"x").unwrap();
        std::fs::write(&md, b"x").unwrap();
        let found = collect_pdfs(&[pdf.clone(), md, tmp.path().join("missing.pdf")], true);
        assert_eq!(found, vec![pdf]);
    }

    #[test]
    fn test_existing_output_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let pdf = tmp.path().join("guide.pdf");
        std::fs::write(&pdf, b"not really a pdf").unwrap();
        let out = tmp.path().join("md");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("guide.md"), "# Kept").unwrap();

        let mut events = Vec::new();
        let summary = convert_pdfs(&[pdf], &out, ConvertEngine::Plain, false, |e| {
            events.push(e.clone())
        })
        .unwrap();

        assert_eq!(summary, ConvertSummary { converted: 0, skipped: 1 });
        assert!(matches!(
            events.as_slice(),
            [ConvertEvent::Skip { index: 1, total: 1, .. }]
        ));
        assert_eq!(std::fs::read_to_string(out.join("guide.md")).unwrap(), "# Kept");
    }

    #[test]
    fn test_unreadable_pdf_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let pdf = tmp.path().join("bad.pdf");
        std::fs::write(&pdf, b"not really a pdf").unwrap();
        let out = tmp.path().join("md");

        let mut events = Vec::new();
        let err = convert_pdfs(&[pdf], &out, ConvertEngine::Structured, true, |e| {
            events.push(e.clone())
        })
        .unwrap_err();

        assert!(err.to_string().contains("Failed to convert"));
        assert!(matches!(events.as_slice(), [ConvertEvent::Converting { .. }]));
        assert!(!out.join("bad.md").exists());
    }
}
