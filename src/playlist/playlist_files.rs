//! Portable playlist text format: one track path per line, `#` comment lines.
//!
//! Lines may carry `file://` URIs with percent-encoding; those are decoded to
//! plain filesystem paths on read. Files are always written with an `#EXTM3U`
//! header, a `#PLAYLIST:` line carrying the stored playlist name, and absolute
//! paths.

use std::path::{Path, PathBuf};

use log::warn;

use crate::error::{LibraryError, LibraryResult};
use crate::fs_access::{FileAccess, LocalFiles};

const M3U_HEADER: &str = "#EXTM3U";
const NAME_DIRECTIVE: &str = "PLAYLIST:";

/// Parsed playlist file: the declared name, if any, and the ordered paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistDocument {
    pub name: Option<String>,
    pub paths: Vec<String>,
}

/// Decodes one non-comment playlist line into a filesystem path.
fn decode_playlist_line(line: &str) -> Option<String> {
    let Some(rest) = line
        .strip_prefix("file://")
        .or_else(|| line.strip_prefix("FILE://"))
    else {
        return Some(line.to_string());
    };

    // `file://host/path`; only an empty host or localhost names a local file.
    let rest = rest.strip_prefix("localhost").unwrap_or(rest);
    if !rest.starts_with('/') {
        warn!("Skipping playlist line with a remote file URI: {}", line);
        return None;
    }
    let decoded = match urlencoding::decode(rest) {
        Ok(decoded) => decoded.into_owned(),
        Err(err) => {
            warn!("Skipping playlist line with invalid encoding {}: {}", line, err);
            return None;
        }
    };

    // `file:///C:/Music/x.mp3` names the Windows path `C:/Music/x.mp3`.
    let bytes = decoded.as_bytes();
    if bytes.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':' {
        return Some(decoded[1..].to_string());
    }
    Some(decoded)
}

/// Parses playlist text into its declared name and ordered path list. The
/// first non-empty `#PLAYLIST:` line wins.
pub fn parse_playlist_document(text: &str) -> PlaylistDocument {
    let mut document = PlaylistDocument::default();
    for line in text.trim_start_matches('\u{feff}').lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            if document.name.is_none() {
                document.name = comment
                    .strip_prefix(NAME_DIRECTIVE)
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string);
            }
            continue;
        }
        if let Some(path) = decode_playlist_line(line).filter(|path| !path.is_empty()) {
            document.paths.push(path);
        }
    }
    document
}

/// Parses playlist text into its ordered path list.
pub fn parse_playlist_text(text: &str) -> Vec<String> {
    parse_playlist_document(text).paths
}

pub fn render_playlist_text<S: AsRef<str>>(name: Option<&str>, paths: &[S]) -> String {
    let mut text = String::with_capacity(M3U_HEADER.len() + 1 + paths.len() * 64);
    text.push_str(M3U_HEADER);
    text.push('\n');
    if let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) {
        // Line breaks would end the directive early.
        let name: String = name
            .chars()
            .map(|ch| if ch.is_control() { ' ' } else { ch })
            .collect();
        text.push('#');
        text.push_str(NAME_DIRECTIVE);
        text.push_str(&name);
        text.push('\n');
    }
    for path in paths {
        text.push_str(path.as_ref());
        text.push('\n');
    }
    text
}

pub fn read_playlist_document(path: &Path) -> LibraryResult<PlaylistDocument> {
    let bytes = std::fs::read(path).map_err(|err| LibraryError::io(path, err))?;
    Ok(parse_playlist_document(&String::from_utf8_lossy(&bytes)))
}

pub fn read_playlist_file(path: &Path) -> LibraryResult<Vec<String>> {
    Ok(read_playlist_document(path)?.paths)
}

/// Replaces the file at `path` with the rendered path list.
pub fn write_playlist_file<S: AsRef<str>>(path: &Path, paths: &[S]) -> LibraryResult<()> {
    write_playlist_file_with(&LocalFiles, path, None, paths)
}

pub(crate) fn write_playlist_file_with<F: FileAccess, S: AsRef<str>>(
    files: &F,
    path: &Path,
    name: Option<&str>,
    paths: &[S],
) -> LibraryResult<()> {
    let text = render_playlist_text(name, paths);
    files
        .write_file(path, text.as_bytes())
        .map_err(|err| LibraryError::io(path, err))?;
    Ok(())
}

/// Replaces characters that are unsafe in file names across platforms.
pub fn sanitize_playlist_file_stem(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect();
    let sanitized = sanitized.trim_matches('.').trim().to_string();
    if sanitized.is_empty() {
        "playlist".to_string()
    } else {
        sanitized
    }
}

pub fn playlist_file_path(dir: &Path, name: &str, extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", sanitize_playlist_file_stem(name), extension))
}

#[cfg(test)]
mod tests {
    use super::{
        parse_playlist_document, parse_playlist_text, playlist_file_path, read_playlist_file,
        render_playlist_text, sanitize_playlist_file_stem, write_playlist_file,
    };
    use crate::fs_access::test_support::unique_temp_dir;
    use std::path::PathBuf;

    #[test]
    fn test_parse_skips_comments_blank_lines_and_bom() {
        let text = "\u{feff}#EXTM3U\n#EXTINF:120,Artist - Song\n/music/a.mp3\n\n  /music/b.flac  \r\n";
        assert_eq!(
            parse_playlist_text(text),
            vec!["/music/a.mp3".to_string(), "/music/b.flac".to_string()]
        );
    }

    #[test]
    fn test_parse_decodes_file_uris() {
        let text = "file:///music/My%20Band/01%20-%20Intro.mp3\n\
                    file://localhost/music/x%23y.mp3\n\
                    file:///C:/Music/z.mp3\n\
                    file://server/share/remote.mp3\n";
        assert_eq!(
            parse_playlist_text(text),
            vec![
                "/music/My Band/01 - Intro.mp3".to_string(),
                "/music/x#y.mp3".to_string(),
                "C:/Music/z.mp3".to_string(),
            ]
        );
    }

    #[test]
    fn test_render_then_parse_keeps_order() {
        let paths = vec!["/m/c.mp3", "/m/a.mp3", "/m/b.mp3"];
        let text = render_playlist_text(None, paths.as_slice());
        assert!(text.starts_with("#EXTM3U\n"));
        assert_eq!(parse_playlist_text(&text), paths);
    }

    #[test]
    fn test_declared_name_survives_render_and_parse() {
        let text = render_playlist_text(Some("Rock/Pop: Best?"), &["/m/a.mp3"][..]);
        assert!(text.starts_with("#EXTM3U\n#PLAYLIST:Rock/Pop: Best?\n"));
        let document = parse_playlist_document(&text);
        assert_eq!(document.name.as_deref(), Some("Rock/Pop: Best?"));
        assert_eq!(document.paths, vec!["/m/a.mp3".to_string()]);

        let plain = parse_playlist_document("#EXTM3U\n#PLAYLIST:   \n/m/b.mp3\n");
        assert_eq!(plain.name, None);
        assert_eq!(plain.paths, vec!["/m/b.mp3".to_string()]);
    }

    #[test]
    fn test_sanitize_playlist_file_stem() {
        assert_eq!(sanitize_playlist_file_stem("Rock/Pop: Best?"), "Rock_Pop_ Best_");
        assert_eq!(sanitize_playlist_file_stem("  ..  "), "playlist");
        assert_eq!(
            playlist_file_path(&PathBuf::from("/p"), "Mix", "m3u"),
            PathBuf::from("/p/Mix.m3u")
        );
    }

    #[test]
    fn test_write_overwrites_existing_file() {
        let root = unique_temp_dir("playlist_file");
        let path = root.join("Playlists").join("Mix.m3u");

        write_playlist_file(&path, &["/m/old.mp3"]).expect("first write");
        write_playlist_file(&path, &["/m/new1.mp3", "/m/new2.mp3"]).expect("second write");
        assert_eq!(
            read_playlist_file(&path).expect("read"),
            vec!["/m/new1.mp3".to_string(), "/m/new2.mp3".to_string()]
        );

        std::fs::remove_dir_all(root).expect("fixture should be removable");
    }
}
