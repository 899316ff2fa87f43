//! Normalizes uploaded file bundles and merges them into an existing
//! compilation session.

use crate::{
    artifacts::{CompilerInput, Source, Sources},
    error::{CompilationError, Result},
    session::CompilationSession,
};
use std::io::{Cursor, Read};
use tracing::debug;

/// An uploaded file as it arrives from the submission surface: a caller
/// supplied path and raw bytes that may be a source file or a zip archive
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedFile {
    pub path: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self { path: path.into(), bytes: bytes.into() }
    }
}

/// A flat path -> content entry after unpacking
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathContent {
    pub path: String,
    pub content: String,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Expands an uploaded bundle into flat path/content entries.
///
/// Pure with respect to the session state: zip members are flattened into
/// entries under their archive paths (directory entries and members whose
/// paths would escape the archive root are skipped), everything else is
/// decoded as UTF-8 with invalid sequences replaced.
pub fn unpack_files(files: Vec<UploadedFile>) -> Result<Vec<PathContent>> {
    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        if file.bytes.starts_with(ZIP_MAGIC) {
            unpack_archive(&file, &mut entries)?;
        } else {
            entries.push(PathContent {
                path: file.path,
                content: String::from_utf8_lossy(&file.bytes).into_owned(),
            });
        }
    }
    Ok(entries)
}

fn unpack_archive(file: &UploadedFile, entries: &mut Vec<PathContent>) -> Result<()> {
    let unpack_err = |source| CompilationError::Unpack { path: file.path.clone(), source };
    let mut archive = zip::ZipArchive::new(Cursor::new(&file.bytes)).map_err(unpack_err)?;
    debug!(path = %file.path, members = archive.len(), "unpacking uploaded archive");
    for index in 0..archive.len() {
        let mut member = archive.by_index(index).map_err(unpack_err)?;
        if member.is_dir() {
            continue
        }
        // enclosed_name refuses paths that traverse outside the archive root
        let path = match member.enclosed_name() {
            Some(path) => path.to_string_lossy().into_owned(),
            None => continue,
        };
        let mut bytes = Vec::with_capacity(member.size() as usize);
        member
            .read_to_end(&mut bytes)
            .map_err(|err| unpack_err(zip::result::ZipError::Io(err)))?;
        entries.push(PathContent { path, content: String::from_utf8_lossy(&bytes).into_owned() });
    }
    Ok(())
}

/// Builds a source set from unpacked entries. An entry without a path is
/// still kept, keyed by its position in the bundle.
pub fn sources_from_entries(entries: Vec<PathContent>) -> Sources {
    let mut sources = Sources::new();
    for (index, entry) in entries.into_iter().enumerate() {
        let path =
            if entry.path.is_empty() { format!("path-{index}") } else { entry.path };
        sources.insert(path, Source::new(entry.content));
    }
    sources
}

/// Merges an uploaded bundle into a session whose sources are already
/// hash-verified, returning a fresh session over the union.
///
/// The session's own sources win every path collision; uploads only ever
/// add paths. The result therefore contains every path of the original
/// session with its content unchanged, plus whatever the upload brought
/// along, so re-verification display has the complete file set. The
/// returned session has never compiled.
pub fn assemble_sources(
    session: &CompilationSession,
    files: Vec<UploadedFile>,
) -> Result<CompilationSession> {
    let unpacked = unpack_files(files)?;
    let mut sources = sources_from_entries(unpacked);
    for (path, source) in &session.input().sources {
        sources.insert(path.clone(), source.clone());
    }
    let input = CompilerInput {
        language: session.input().language.clone(),
        sources,
        settings: session.input().settings.clone(),
    };
    Ok(session.with_input(input))
}
