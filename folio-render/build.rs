//! Points the backend at a Pdfium shared library chosen at build time.
//!
//! `FOLIO_PDFIUM_DIR` names a directory that already holds the library;
//! `FOLIO_PDFIUM_ARCHIVE` names a `.tgz` or `.zip` release archive that is
//! unpacked into `OUT_DIR`. With neither set nothing is staged and the
//! backend binds `./` or the system library at runtime.

use std::env;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;
use walkdir::WalkDir;
use zip::read::ZipArchive;

const DIR_VAR: &str = "FOLIO_PDFIUM_DIR";
const ARCHIVE_VAR: &str = "FOLIO_PDFIUM_ARCHIVE";

enum LibrarySource {
    Directory(PathBuf),
    Archive(PathBuf),
}

impl LibrarySource {
    fn from_env() -> Option<Self> {
        if let Some(dir) = env::var_os(DIR_VAR) {
            return Some(Self::Directory(dir.into()));
        }
        env::var_os(ARCHIVE_VAR).map(|archive| Self::Archive(archive.into()))
    }

    fn path(&self) -> &Path {
        match self {
            Self::Directory(path) | Self::Archive(path) => path,
        }
    }
}

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed={DIR_VAR}");
    println!("cargo:rerun-if-env-changed={ARCHIVE_VAR}");

    let Some(source) = LibrarySource::from_env() else {
        return Ok(());
    };
    println!("cargo:rerun-if-changed={}", source.path().display());

    let target_os = env::var("CARGO_CFG_TARGET_OS").context("CARGO_CFG_TARGET_OS not set")?;
    let search_root = match &source {
        LibrarySource::Directory(dir) => dir.clone(),
        LibrarySource::Archive(archive) => {
            let out_dir = PathBuf::from(env::var("OUT_DIR").context("OUT_DIR not set")?);
            let unpacked = out_dir.join("pdfium");
            unpack(archive, &unpacked)?;
            unpacked
        }
    };

    let name = library_file_name(&target_os);
    let library = find_library(&search_root, name)
        .with_context(|| format!("{name} not found under {}", search_root.display()))?;
    println!(
        "cargo:rustc-env=FOLIO_PDFIUM_LIBRARY_PATH={}",
        library.display()
    );
    Ok(())
}

fn library_file_name(target_os: &str) -> &'static str {
    match target_os {
        "windows" => "pdfium.dll",
        "macos" => "libpdfium.dylib",
        _ => "libpdfium.so",
    }
}

/// Release archives keep the library under `lib/` or `bin/`; walk rather than guess.
fn find_library(root: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_type().is_file() && entry.file_name() == name)
        .map(|entry| entry.into_path())
}

fn unpack(archive: &Path, destination: &Path) -> Result<()> {
    if destination.exists() {
        fs::remove_dir_all(destination)
            .with_context(|| format!("clearing {}", destination.display()))?;
    }
    fs::create_dir_all(destination)
        .with_context(|| format!("creating {}", destination.display()))?;

    let file = File::open(archive).with_context(|| format!("opening {}", archive.display()))?;
    let name = archive
        .file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
        Archive::new(GzDecoder::new(file))
            .unpack(destination)
            .with_context(|| format!("unpacking {}", archive.display()))?;
    } else if name.ends_with(".zip") {
        ZipArchive::new(file)
            .and_then(|mut zip| zip.extract(destination))
            .with_context(|| format!("unpacking {}", archive.display()))?;
    } else {
        bail!("{} is neither a .tgz nor a .zip archive", archive.display());
    }
    Ok(())
}
