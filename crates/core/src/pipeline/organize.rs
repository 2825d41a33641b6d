//! Destination layout: folder template, rename template, collision-safe moves.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex_lite::Regex;
use tokio::fs;
use tracing::debug;

use crate::job::{JobConfig, RowData};

/// Longest file or folder name produced, extension included.
pub const MAX_NAME_LEN: usize = 200;

/// Highest collision counter tried before giving up.
const MAX_COLLISION_COUNTER: u32 = 10_000;

static INVALID_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^{}]+)\}").expect("valid regex"));

/// Make a string safe as a single path component.
///
/// Replaces reserved characters with `_`, collapses whitespace, trims, and
/// truncates to [`MAX_NAME_LEN`] characters keeping any extension.
pub fn sanitize_name(name: &str) -> String {
    let replaced = INVALID_CHARS.replace_all(name, "_");
    let collapsed = WHITESPACE.replace_all(&replaced, " ");
    let trimmed = collapsed.trim().trim_end_matches('.').trim_end();

    if trimmed.chars().count() <= MAX_NAME_LEN {
        return trimmed.to_string();
    }

    let (stem, ext) = split_extension(trimmed);
    let ext_len = ext.map(|e| e.chars().count() + 1).unwrap_or(0);
    let keep = MAX_NAME_LEN.saturating_sub(ext_len);
    let stem: String = stem.chars().take(keep).collect();
    match ext {
        Some(ext) => format!("{}.{}", stem.trim_end(), ext),
        None => stem.trim_end().to_string(),
    }
}

/// Split `name` into stem and extension (without dot).
///
/// Leading-dot names and names without a dot have no extension.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// Folder for a record: `output_directory` joined with one sanitised
/// component per configured column. Blank values become `[{column}_missing]`.
pub fn folder_for(output_directory: &Path, config: &JobConfig, row: &RowData) -> PathBuf {
    let mut folder = output_directory.to_path_buf();
    for column in &config.folder_structure {
        let value = row.get(column).map(str::trim).unwrap_or("");
        let component = if value.is_empty() {
            sanitize_name(&format!("[{}_missing]", column))
        } else {
            sanitize_name(value)
        };
        let component = if component.is_empty() || component == ".." {
            sanitize_name(&format!("[{}_missing]", column))
        } else {
            component
        };
        folder.push(component);
    }
    folder
}

/// Expand `{Column}` placeholders with sanitised row values.
///
/// Unknown columns expand to an empty string.
pub fn expand_template(template: &str, row: &RowData) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex_lite::Captures| {
            row.get(caps[1].trim())
                .map(sanitize_name)
                .unwrap_or_default()
        })
        .into_owned()
}

/// Final filename for artifact `index` of `count`.
///
/// `source_name` is the artifact's current file name; its extension is
/// kept and appended to the rendered template when missing.
pub fn file_name_for(
    config: &JobConfig,
    row: &RowData,
    source_name: &str,
    index: usize,
    count: usize,
) -> String {
    let (source_stem, source_ext) = split_extension(source_name);

    let rendered = config
        .transform_rules
        .rename_pattern
        .as_deref()
        .map(|pattern| sanitize_name(&expand_template(pattern, row)))
        .filter(|name| !name.is_empty());

    let mut stem = match rendered {
        Some(name) => match (split_extension(&name), source_ext) {
            ((stem, Some(ext)), Some(src)) if ext.eq_ignore_ascii_case(src) => stem.to_string(),
            _ => name,
        },
        None => source_stem.to_string(),
    };

    if count > 1 {
        stem = format!("{}_{}", stem, index + 1);
    }

    let mut name = match source_ext {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    };

    if config.transform_rules.lowercase_filenames {
        name = name.to_lowercase();
    }

    sanitize_name(&name)
}

/// Reserve a destination that does not exist yet.
///
/// Tries `name.ext`, then `name (1).ext`, `name (2).ext`, ... creating the
/// file with create-new semantics so concurrent reservations cannot collide.
pub async fn reserve_unique(folder: &Path, file_name: &str) -> std::io::Result<PathBuf> {
    let (stem, ext) = split_extension(file_name);

    for counter in 0..=MAX_COLLISION_COUNTER {
        let candidate_name = match (counter, ext) {
            (0, _) => file_name.to_string(),
            (n, Some(ext)) => format!("{} ({}).{}", stem, n, ext),
            (n, None) => format!("{} ({})", stem, n),
        };
        let candidate = folder.join(&candidate_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => {
                if counter > 0 {
                    debug!(name = %candidate_name, "Resolved name collision");
                }
                return Ok(candidate);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free name for {} in {}", file_name, folder.display()),
    ))
}

/// Move `source` onto `destination`, falling back to copy + delete when the
/// two are on different filesystems.
pub async fn move_file(source: &Path, destination: &Path) -> std::io::Result<()> {
    match fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) => {
            fs::copy(source, destination).await?;
            fs::remove_file(source).await
        }
        Err(e) => Err(e),
    }
}
