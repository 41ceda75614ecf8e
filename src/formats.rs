//!
//! docbridge format registry
//! -------------------------
//! Static table of the file types the document server understands, keyed by
//! lowercase extension. Each entry says whether the type opens directly in the
//! editor, opens read-only, or has to be converted to an OOXML type first.
//!
//! The table is built once and never mutated; lookups are pure and safe to share
//! across any number of request tasks. An unknown extension is simply absent:
//! callers decide what "unsupported" means for them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Logical document family; also the `documentType` the editor expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentCategory {
    Word,
    Cell,
    Slide,
}

impl DocumentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentCategory::Word => "word",
            DocumentCategory::Cell => "cell",
            DocumentCategory::Slide => "slide",
        }
    }
}

/// How a format may be opened. Exactly one applies per extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    Editable,
    ViewOnly,
    Convertible { target: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub extension: &'static str,
    pub category: DocumentCategory,
    pub support: Support,
}

impl Capability {
    pub fn editable(&self) -> bool { matches!(self.support, Support::Editable) }
    pub fn view_only(&self) -> bool { matches!(self.support, Support::ViewOnly) }
    pub fn convertible(&self) -> bool { matches!(self.support, Support::Convertible { .. }) }

    pub fn convert_target(&self) -> Option<&'static str> {
        match self.support {
            Support::Convertible { target } => Some(target),
            _ => None,
        }
    }
}

/// Read-only extension -> capability lookup.
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    formats: HashMap<&'static str, Capability>,
}

impl Default for FormatRegistry {
    fn default() -> Self { Self::standard() }
}

impl FormatRegistry {
    /// The format set supported by the document server integration.
    pub fn standard() -> Self {
        use DocumentCategory::*;
        use Support::*;

        let table: [(&'static str, DocumentCategory, Support); 17] = [
            // OOXML, opened directly
            ("docx", Word, Editable),
            ("xlsx", Cell, Editable),
            ("pptx", Slide, Editable),
            // legacy / open formats that go through the converter
            ("doc", Word, Convertible { target: "docx" }),
            ("odt", Word, Convertible { target: "docx" }),
            ("rtf", Word, Convertible { target: "docx" }),
            ("txt", Word, Convertible { target: "docx" }),
            ("xls", Cell, Convertible { target: "xlsx" }),
            ("ods", Cell, Convertible { target: "xlsx" }),
            ("csv", Cell, Convertible { target: "xlsx" }),
            ("ppt", Slide, Convertible { target: "pptx" }),
            ("odp", Slide, Convertible { target: "pptx" }),
            // viewer only
            ("pdf", Word, ViewOnly),
            ("djvu", Word, ViewOnly),
            ("oxps", Word, ViewOnly),
            ("epub", Word, ViewOnly),
            ("fb2", Word, ViewOnly),
        ];

        let formats = table
            .into_iter()
            .map(|(extension, category, support)| (extension, Capability { extension, category, support }))
            .collect();
        Self { formats }
    }

    /// Look up an extension. Case-insensitive; a leading dot is ignored.
    pub fn lookup(&self, extension: &str) -> Option<&Capability> {
        let ext = normalize_extension(extension);
        self.formats.get(ext.as_str())
    }

    pub fn is_editable(&self, extension: &str) -> bool {
        self.lookup(extension).map(|c| c.editable()).unwrap_or(false)
    }

    pub fn is_view_only(&self, extension: &str) -> bool {
        self.lookup(extension).map(|c| c.view_only()).unwrap_or(false)
    }

    pub fn is_convertible(&self, extension: &str) -> bool {
        self.lookup(extension).map(|c| c.convertible()).unwrap_or(false)
    }

    /// Target extension for a convertible format; `None` for anything else.
    pub fn conversion_target(&self, extension: &str) -> Option<&'static str> {
        self.lookup(extension).and_then(|c| c.convert_target())
    }

    pub fn category(&self, extension: &str) -> Option<DocumentCategory> {
        self.lookup(extension).map(|c| c.category)
    }

    /// All convertible entries, sorted by extension.
    pub fn convertible_formats(&self) -> Vec<&Capability> {
        let mut out: Vec<&Capability> = self.formats.values().filter(|c| c.convertible()).collect();
        out.sort_by_key(|c| c.extension);
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.formats.values()
    }
}

fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Lowercase extension of a path's file name, without the dot. Empty when there is none.
pub fn extension_of(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() => name[idx + 1..].to_ascii_lowercase(),
        _ => String::new(),
    }
}
