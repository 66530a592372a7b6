pub mod folder;
pub mod rekordbox;
pub mod traktor;
pub mod xml;

use crate::{LibraryError, Result, Track};
use xml::XmlDocument;

/// Which export schema a document uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Rekordbox,
    Traktor,
}

impl Dialect {
    pub fn label(&self) -> &'static str {
        match self {
            Dialect::Rekordbox => "rekordbox",
            Dialect::Traktor => "traktor",
        }
    }
}

pub fn detect_dialect(doc: &XmlDocument) -> Option<Dialect> {
    match doc.root.name.as_str() {
        "DJ_PLAYLISTS" => Some(Dialect::Rekordbox),
        "NML" => Some(Dialect::Traktor),
        _ => None,
    }
}

/// A parsed library export: original tree plus the extracted track list.
pub struct LibraryExport {
    pub document: XmlDocument,
    pub dialect: Dialect,
    pub tracks: Vec<Track>,
}

pub fn load_export(text: &str) -> Result<LibraryExport> {
    let document = xml::parse(text)?;
    let dialect = detect_dialect(&document).ok_or_else(|| {
        LibraryError::UnsupportedDocument(format!(
            "unrecognized root element <{}>",
            document.root.name
        ))
    })?;
    let tracks = match dialect {
        Dialect::Rekordbox => rekordbox::parse_tracks(&document)?,
        Dialect::Traktor => traktor::parse_tracks(&document)?,
    };
    log::info!(
        "loaded {} export with {} tracks",
        dialect.label(),
        tracks.len()
    );
    Ok(LibraryExport {
        document,
        dialect,
        tracks,
    })
}
