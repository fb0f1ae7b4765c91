//! Deterministic, collision-free output names derived from row fields.
//!
//! A name is `district_policeStation_firRef_year_sections.pdf` where `firRef`
//! is the first `/`-segment of the FIR number. Names never exceed the byte cap
//! (extension and collision counter included) and never contain characters
//! from [`FORBIDDEN_CHARS`].

use std::collections::HashSet;
use std::io;
use std::path::Path;

use tokio::fs;

pub const DEFAULT_MAX_FILENAME_BYTES: usize = 240;
/// Smallest cap accepted; leaves room for a counter, the extension and a few
/// bytes of the first segment.
pub const MIN_FILENAME_BYTES: usize = 24;
pub const FORBIDDEN_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

const PLACEHOLDER: &str = "NA";
const REFERENCE_PLACEHOLDER: &str = "unknown-ref";
const SEGMENT_SEPARATOR: &str = "_";
const DEFAULT_EXTENSION: &str = "pdf";

/// Raw row fields that feed the file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileNameParts {
    pub district: String,
    pub police_station: String,
    /// Slash-delimited FIR number, e.g. `0012/2024`.
    pub fir_reference: String,
    pub year: String,
    pub sections: String,
}

#[derive(Debug, Clone)]
pub struct FileNamer {
    max_bytes: usize,
    extension: String,
}

impl Default for FileNamer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILENAME_BYTES)
    }
}

impl FileNamer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes: max_bytes.max(MIN_FILENAME_BYTES),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    /// Sanitized segments in canonical order, placeholders applied.
    pub fn segments(&self, parts: &FileNameParts) -> Vec<String> {
        let reference = parts.fir_reference.split('/').next().unwrap_or_default();
        vec![
            segment_or(&parts.district, PLACEHOLDER),
            segment_or(&parts.police_station, PLACEHOLDER),
            segment_or(reference, REFERENCE_PLACEHOLDER),
            segment_or(&parts.year, PLACEHOLDER),
            segment_or(&parts.sections, PLACEHOLDER),
        ]
    }

    /// Name for collision counter `counter`; `0` means no counter.
    pub fn candidate(&self, parts: &FileNameParts, counter: u32) -> String {
        let suffix = if counter == 0 {
            format!(".{}", self.extension)
        } else {
            format!("({counter}).{}", self.extension)
        };
        fit_segments(&self.segments(parts), &suffix, self.max_bytes)
    }

    /// Smallest-counter candidate not present in `taken`.
    pub fn resolve_against(&self, parts: &FileNameParts, taken: &HashSet<String>) -> String {
        let mut counter = 0u32;
        loop {
            let name = self.candidate(parts, counter);
            if !taken.contains(&name) {
                return name;
            }
            counter += 1;
        }
    }

    /// Resolve against the current contents of `dir`. `ignore` excludes the
    /// freshly downloaded file that is about to be renamed.
    pub async fn resolve_in_dir(
        &self,
        dir: &Path,
        parts: &FileNameParts,
        ignore: Option<&str>,
    ) -> io::Result<String> {
        let mut taken = HashSet::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if Some(name) != ignore {
                    taken.insert(name.to_string());
                }
            }
        }
        Ok(self.resolve_against(parts, &taken))
    }
}

/// Replace forbidden and control characters, collapse whitespace runs.
pub fn sanitize_segment(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|ch| {
            if FORBIDDEN_CHARS.contains(&ch) || (ch.is_control() && !ch.is_whitespace()) {
                '_'
            } else {
                ch
            }
        })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn segment_or(raw: &str, placeholder: &str) -> String {
    let cleaned = sanitize_segment(raw);
    if cleaned.is_empty() {
        placeholder.to_string()
    } else {
        cleaned
    }
}

/// Drop trailing segments until `segments + suffix` fits in `max_bytes`. A lone
/// first segment that still overflows is cut at a char boundary.
fn fit_segments(segments: &[String], suffix: &str, max_bytes: usize) -> String {
    debug_assert!(!segments.is_empty());
    debug_assert!(suffix.len() < max_bytes);

    let mut kept = segments.len();
    loop {
        let stem = segments[..kept].join(SEGMENT_SEPARATOR);
        if stem.len() + suffix.len() <= max_bytes {
            return format!("{stem}{suffix}");
        }
        if kept == 1 {
            let budget = max_bytes - suffix.len();
            return format!("{}{suffix}", truncate_at_char_boundary(&stem, budget));
        }
        kept -= 1;
    }
}

fn truncate_at_char_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
