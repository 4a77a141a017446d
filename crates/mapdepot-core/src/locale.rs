//! Map names from the localized string tables inside a map archive.
//!
//! Every map carries a listfile naming its files; the locale string tables are
//! `<locale>.SC2Data\LocalizedData\GameStrings.txt`, and the map's display name
//! is their `DocInfo/Name=` line. The English table's name is the resolved name.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::Path;

use crate::fetcher::NameExtractor;

pub const LISTFILE: &str = "(listfile)";
/// Substring shared by every locale string table entry.
pub const GAME_STRINGS: &str = r"SC2Data\LocalizedData\GameStrings";
/// Prefix of the English locale string table entry.
pub const ENGLISH_GAME_STRINGS: &str = r"enUS.SC2Data\LocalizedData\GameStrings";
const NAME_FIELD: &str = "DocInfo/Name=";

/// Read access to the files inside one archive.
pub trait ArchiveReader {
    /// Contents of `name`, or `None` if the archive has no such file.
    fn read_file(&mut self, name: &str) -> io::Result<Option<Vec<u8>>>;
}

/// Opens archives for a `LocaleNameExtractor`. Shared by all fetch workers.
pub trait ArchiveOpener: Send + Sync {
    type Reader: ArchiveReader;

    fn open(&self, path: &Path) -> io::Result<Self::Reader>;
}

/// Locale entries found in a listfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleFiles {
    /// Every locale string table, English included, in listfile order.
    pub all: Vec<String>,
    pub english: String,
}

fn split_lines(data: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(data)
        .replace("\r\n", "\n")
        .split('\n')
        .map(|l| l.trim_start_matches('\u{feff}').to_string())
        .collect()
}

/// Locate the locale tables in a listfile. `None` without an English table.
pub fn find_locale_files(listfile: &[u8]) -> Option<LocaleFiles> {
    let mut all = Vec::new();
    let mut english = None;
    for entry in split_lines(listfile) {
        if !entry.contains(GAME_STRINGS) {
            continue;
        }
        if english.is_none() && entry.starts_with(ENGLISH_GAME_STRINGS) {
            english = Some(entry.clone());
        }
        all.push(entry);
    }
    if all.is_empty() {
        tracing::debug!("no locale files in listfile");
    }
    english.map(|english| LocaleFiles { all, english })
}

/// The `DocInfo/Name=` value of a locale table.
pub fn map_name_from_locale(table: &[u8]) -> Option<String> {
    split_lines(table)
        .into_iter()
        .find_map(|line| line.strip_prefix(NAME_FIELD).map(str::to_string))
}

/// Drop the `///`-separated suffix some locales append to the name.
pub fn clean_map_name(name: &str) -> &str {
    match name.split_once("///") {
        Some((head, _)) => head.trim_end_matches(' '),
        None => name,
    }
}

fn read_name<R: ArchiveReader>(archive: &mut R, entry: &str) -> io::Result<Option<String>> {
    match archive.read_file(entry)? {
        Some(table) => Ok(map_name_from_locale(&table)),
        None => {
            tracing::debug!(entry, "locale file listed but missing from archive");
            Ok(None)
        }
    }
}

fn locale_files<R: ArchiveReader>(archive: &mut R) -> io::Result<Option<LocaleFiles>> {
    let Some(listfile) = archive.read_file(LISTFILE)? else {
        tracing::debug!("archive has no listfile");
        return Ok(None);
    };
    Ok(find_locale_files(&listfile))
}

/// English map name of an archive.
pub fn english_name<R: ArchiveReader>(archive: &mut R) -> io::Result<Option<String>> {
    match locale_files(archive)? {
        Some(files) => read_name(archive, &files.english),
        None => Ok(None),
    }
}

/// Cleaned foreign name to English name, for every locale table in the
/// archive. `None` when the English name cannot be read.
pub fn foreign_name_mapping<R: ArchiveReader>(
    archive: &mut R,
) -> io::Result<Option<BTreeMap<String, String>>> {
    let Some(files) = locale_files(archive)? else {
        return Ok(None);
    };
    let Some(english) = read_name(archive, &files.english)? else {
        return Ok(None);
    };
    let mut mapping = BTreeMap::new();
    for entry in &files.all {
        match read_name(archive, entry)? {
            Some(name) => {
                mapping.insert(clean_map_name(&name).to_string(), english.clone());
            }
            None => tracing::warn!(entry = %entry, "no map name in locale file"),
        }
    }
    Ok(Some(mapping))
}

/// `NameExtractor` reading the English name through an `ArchiveOpener`.
pub struct LocaleNameExtractor<O> {
    opener: O,
}

impl<O: ArchiveOpener> LocaleNameExtractor<O> {
    pub fn new(opener: O) -> Self {
        Self { opener }
    }
}

impl<O: ArchiveOpener> NameExtractor for LocaleNameExtractor<O> {
    fn extract_name(&self, path: &Path) -> io::Result<Option<String>> {
        let mut archive = self.opener.open(path)?;
        let name = english_name(&mut archive)?;
        Ok(name.filter(|n| !n.trim().is_empty()))
    }
}

/// Reader for archives whose listfile and string tables are stored
/// uncompressed. Entries are found by scanning the raw bytes: locale table
/// paths by their `GameStrings.txt` suffix, table contents by their
/// `DocInfo/Name=` lines.
///
/// A name line is attributed to a table only when that is unambiguous: the
/// archive has one locale and one name, or every name is preceded by its own
/// table path with no other name in between and each locale gets exactly one.
/// Anything else leaves every table unreadable.
pub struct ScanArchive {
    locales: Vec<String>,
    tables: HashMap<String, Vec<u8>>,
}

impl ScanArchive {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let pattern = format!("{}.txt", GAME_STRINGS);
        let paths: Vec<(usize, String)> = find_all(bytes, pattern.as_bytes())
            .into_iter()
            .map(|at| {
                let start = locale_prefix_start(bytes, at);
                let entry = String::from_utf8_lossy(&bytes[start..at + pattern.len()]).into_owned();
                (at, entry)
            })
            .collect();

        let mut locales: Vec<String> = Vec::new();
        for (_, entry) in &paths {
            if !locales.contains(entry) {
                locales.push(entry.clone());
            }
        }

        let names: Vec<(usize, Vec<u8>)> = find_all(bytes, NAME_FIELD.as_bytes())
            .into_iter()
            .map(|at| {
                let len = bytes[at..]
                    .iter()
                    .position(|&b| matches!(b, b'\r' | b'\n' | 0))
                    .unwrap_or(bytes.len() - at);
                (at, bytes[at..at + len].to_vec())
            })
            .collect();

        if locales.is_empty() && names.len() == 1 {
            locales.push(format!("{}.txt", ENGLISH_GAME_STRINGS));
        }
        let tables = pair_tables(&locales, &paths, &names);
        Self { locales, tables }
    }
}

/// Attribute name lines to locale tables, or nothing if any attribution is in doubt.
fn pair_tables(
    locales: &[String],
    paths: &[(usize, String)],
    names: &[(usize, Vec<u8>)],
) -> HashMap<String, Vec<u8>> {
    let mut tables = HashMap::new();
    if locales.len() == 1 && names.len() == 1 {
        tables.insert(locales[0].clone(), names[0].1.clone());
        return tables;
    }
    if locales.len() != names.len() {
        tracing::debug!(
            locales = locales.len(),
            names = names.len(),
            "cannot attribute map names to locale tables"
        );
        return HashMap::new();
    }

    let mut prev_name_end = 0;
    for (at, line) in names {
        let owner = paths
            .iter()
            .rev()
            .find(|path| path.0 < *at)
            .filter(|path| path.0 >= prev_name_end);
        let Some((_, locale)) = owner else {
            tracing::debug!("map name not preceded by its own locale table path");
            return HashMap::new();
        };
        if tables.insert(locale.clone(), line.clone()).is_some() {
            tracing::debug!(locale = %locale, "locale table claimed by more than one map name");
            return HashMap::new();
        }
        prev_name_end = at + line.len();
    }
    tables
}

impl ArchiveReader for ScanArchive {
    fn read_file(&mut self, name: &str) -> io::Result<Option<Vec<u8>>> {
        if name == LISTFILE {
            if self.locales.is_empty() {
                return Ok(None);
            }
            return Ok(Some(self.locales.join("\n").into_bytes()));
        }
        Ok(self.tables.get(name).cloned())
    }
}

/// Opens files from disk as `ScanArchive`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOpener;

impl ArchiveOpener for ScanOpener {
    type Reader = ScanArchive;

    fn open(&self, path: &Path) -> io::Result<ScanArchive> {
        let bytes = fs::read(path)?;
        Ok(ScanArchive::from_bytes(&bytes))
    }
}

fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return Vec::new();
    }
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, w)| *w == needle)
        .map(|(i, _)| i)
        .collect()
}

/// Start of a `xxXX.` locale prefix ending at `at`, or `at` if there is none.
fn locale_prefix_start(bytes: &[u8], at: usize) -> usize {
    if at >= 5 && bytes[at - 1] == b'.' && bytes[at - 5..at - 1].iter().all(u8::is_ascii_alphabetic) {
        at - 5
    } else {
        at
    }
}
