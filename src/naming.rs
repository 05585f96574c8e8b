//! Local filename derivation
//!
//! [`resolve_name`] turns item metadata into a filesystem-legal name;
//! [`NameResolver`] makes those names unique within an output directory.

use crate::types::{LocalTarget, RemoteItem};
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Characters that are illegal in a path component on at least one supported platform
const ILLEGAL_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Maximum number of suffixes tried when resolving collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Extension used when the item carries no content type
const FALLBACK_EXTENSION: &str = "bin";

/// Number of trailing characters dropped from timestamps we cannot parse
///
/// Matches the `+0900` / `.000Z` suffix of the formats the API is known to emit.
const UNPARSED_SUFFIX_LEN: usize = 5;

/// Timestamp layouts tried after RFC 3339
const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%.f%z"];

/// Remove characters that cannot appear in a filename
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .filter(|c| !ILLEGAL_CHARS.contains(c) && !c.is_control())
        .collect()
}

/// Drop the zone and fractional-second suffix of a creation timestamp
///
/// `2023-05-01T12:00:00.000Z` becomes `2023-05-01T12:00:00` and
/// `2014-05-21 14:23:10+0900` becomes `2014-05-21 14:23:10`: the wall-clock
/// time as written, up to whole seconds, keeping the input's date/time
/// separator. Timestamps in an unknown layout fall back to dropping the last
/// five characters.
pub fn truncate_timestamp(raw: &str) -> String {
    let raw = raw.trim();

    if let Some(local) = parse_timestamp(raw) {
        let separator = if raw.as_bytes().get(10) == Some(&b' ') {
            ' '
        } else {
            'T'
        };
        return format!(
            "{}{}{}",
            local.format("%Y-%m-%d"),
            separator,
            local.format("%H:%M:%S")
        );
    }

    let keep = raw.chars().count().saturating_sub(UNPARSED_SUFFIX_LEN);
    if keep == 0 {
        return raw.to_string();
    }
    raw.chars().take(keep).collect()
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| DateTime::<FixedOffset>::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.naive_local())
}

/// File extension derived from the item's content type
fn extension(content_type: &str) -> String {
    let subtype = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_start_matches('.');
    let ext = sanitize_component(subtype).to_ascii_lowercase();
    if ext.is_empty() {
        FALLBACK_EXTENSION.to_string()
    } else {
        ext
    }
}

/// Derive the preferred local filename for an item
///
/// `<label>_<timestamp>.<ext>` when the item has an app label (trimmed, spaces
/// replaced by underscores), `<timestamp>.<ext>` otherwise. Every component is
/// stripped of path-illegal characters. Pure: identical metadata always gives
/// the identical name.
pub fn resolve_name(item: &RemoteItem) -> String {
    let mut created = sanitize_component(&truncate_timestamp(&item.created_at));
    if created.trim().is_empty() {
        // Never produce a bare ".png" (a hidden, unnamed file)
        created = sanitize_component(item.id.as_str());
    }
    let ext = extension(&item.content_type);

    let label = item
        .app_label
        .as_deref()
        .map(|l| sanitize_component(l.trim()).replace(' ', "_"))
        .filter(|l| !l.is_empty());

    match label {
        Some(label) => format!("{}_{}.{}", label, created, ext),
        None => format!("{}.{}", created, ext),
    }
}

/// Insert ` (n)` before the extension of `name`
fn with_suffix(name: &str, n: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{} ({}).{}", stem, n, ext),
        _ => format!("{} ({})", name, n),
    }
}

/// Plans collision-free targets inside one output directory
///
/// A name is taken when it was already planned during this run (compared
/// case-insensitively, for case-insensitive filesystems) or when an entry with
/// that name exists on disk. Collisions get ` (1)`, ` (2)`, ... before the
/// extension, so the result only depends on the item and the history of
/// earlier plans.
#[derive(Debug)]
pub struct NameResolver {
    dir: PathBuf,
    planned: HashSet<String>,
}

impl NameResolver {
    /// Create a resolver for `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            planned: HashSet::new(),
        }
    }

    /// Directory targets are planned in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Plan a unique target for `item`
    pub fn resolve(&mut self, item: &RemoteItem) -> LocalTarget {
        let preferred = resolve_name(item);
        let name = self.first_free(&preferred, item);

        if name != preferred {
            tracing::debug!(
                item_id = %item.id,
                preferred = %preferred,
                resolved = %name,
                "Filename collision resolved"
            );
        }

        self.planned.insert(name.to_lowercase());
        LocalTarget {
            path: self.dir.join(name),
            expected_item_id: item.id.clone(),
        }
    }

    /// Forget a plan whose transfer did not produce a file
    pub fn release(&mut self, target: &LocalTarget) {
        if let Some(name) = target.path.file_name().and_then(|n| n.to_str()) {
            self.planned.remove(&name.to_lowercase());
        }
    }

    fn is_taken(&self, name: &str) -> bool {
        self.planned.contains(&name.to_lowercase())
            || std::fs::symlink_metadata(self.dir.join(name)).is_ok()
    }

    fn first_free(&self, preferred: &str, item: &RemoteItem) -> String {
        if !self.is_taken(preferred) {
            return preferred.to_string();
        }

        for i in 1..=MAX_RENAME_ATTEMPTS {
            let candidate = with_suffix(preferred, &i.to_string());
            if !self.is_taken(&candidate) {
                return candidate;
            }
        }

        // Ids are unique, so this cannot collide with another item's fallback
        with_suffix(preferred, &sanitize_component(item.id.as_str()))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn item(id: &str, created_at: &str, content_type: &str, app: Option<&str>) -> RemoteItem {
        RemoteItem {
            id: id.into(),
            source_url: format!("https://i.example.com/{id}.png"),
            created_at: created_at.into(),
            content_type: content_type.into(),
            app_label: app.map(String::from),
        }
    }

    #[test]
    fn label_and_timestamp_with_illegal_chars_stripped() {
        let it = item("1", "2023-05-01T12:00:00.000Z", "png", Some("Notes"));
        assert_eq!(resolve_name(&it), "Notes_2023-05-01T120000.png");
    }

    #[test]
    fn label_is_trimmed_and_spaces_become_underscores() {
        let it = item("1", "2023-05-01T12:00:00.000Z", "jpg", Some("  Google Chrome "));
        assert_eq!(resolve_name(&it), "Google_Chrome_2023-05-01T120000.jpg");
    }

    #[test]
    fn blank_or_fully_illegal_label_is_ignored() {
        let blank = item("1", "2023-05-01T12:00:00.000Z", "png", Some("   "));
        assert_eq!(resolve_name(&blank), "2023-05-01T120000.png");

        let illegal = item("1", "2023-05-01T12:00:00.000Z", "png", Some("<|>"));
        assert_eq!(resolve_name(&illegal), "2023-05-01T120000.png");
    }

    #[test]
    fn label_with_path_separators_cannot_escape_directory() {
        let it = item("1", "2023-05-01T12:00:00.000Z", "png", Some("../../etc/passwd"));
        let name = resolve_name(&it);
        assert!(!name.contains('/'));
        assert!(!name.contains('\\'));
        assert_eq!(name, "....etcpasswd_2023-05-01T120000.png");
    }

    #[test]
    fn timestamp_formats_truncate_to_seconds() {
        assert_eq!(
            truncate_timestamp("2023-05-01T12:00:00.000Z"),
            "2023-05-01T12:00:00"
        );
        // Gyazo's documented layout keeps its space separator and local wall time
        assert_eq!(
            truncate_timestamp("2014-05-21 14:23:10+0900"),
            "2014-05-21 14:23:10"
        );
        // Other fractional precisions are handled, unlike a fixed-width cut
        assert_eq!(
            truncate_timestamp("2023-05-01T12:00:00.123456+02:00"),
            "2023-05-01T12:00:00"
        );
        assert_eq!(
            truncate_timestamp("2023-05-01T12:00:00Z"),
            "2023-05-01T12:00:00"
        );
    }

    #[test]
    fn unparseable_timestamp_drops_last_five_chars() {
        assert_eq!(truncate_timestamp("yesterday-ish"), "yesterda");
        assert_eq!(truncate_timestamp("abc"), "abc");
        assert_eq!(truncate_timestamp("日本語の時刻です"), "日本語");
    }

    #[test]
    fn empty_timestamp_falls_back_to_id() {
        let it = item("abc123", "", "png", None);
        assert_eq!(resolve_name(&it), "abc123.png");
    }

    #[test]
    fn mime_content_types_use_subtype() {
        assert_eq!(extension("image/png"), "png");
        assert_eq!(extension("image/jpeg; charset=binary"), "jpeg");
        assert_eq!(extension("PNG"), "png");
        assert_eq!(extension(""), "bin");
    }

    #[test]
    fn resolve_name_is_deterministic() {
        let it = item("1", "2014-05-21 14:23:10+0900", "png", Some("Terminal"));
        let first = resolve_name(&it);
        for _ in 0..10 {
            assert_eq!(resolve_name(&it), first);
        }
    }

    #[test]
    fn second_plan_for_same_name_is_disambiguated() {
        let dir = tempdir().unwrap();
        let mut resolver = NameResolver::new(dir.path());

        let a = item("a", "2023-05-01T12:00:00.000Z", "png", Some("Notes"));
        let b = item("b", "2023-05-01T12:00:00.000Z", "png", Some("Notes"));
        let c = item("c", "2023-05-01T12:00:00.000Z", "png", Some("Notes"));

        let ta = resolver.resolve(&a);
        let tb = resolver.resolve(&b);
        let tc = resolver.resolve(&c);

        assert_eq!(ta.path, dir.path().join("Notes_2023-05-01T120000.png"));
        assert_eq!(tb.path, dir.path().join("Notes_2023-05-01T120000 (1).png"));
        assert_eq!(tc.path, dir.path().join("Notes_2023-05-01T120000 (2).png"));
        assert_eq!(tb.expected_item_id, "b".into());
    }

    #[test]
    fn same_history_gives_same_names() {
        let dir = tempdir().unwrap();
        let items: Vec<_> = ["x", "y", "z"]
            .iter()
            .map(|id| item(id, "2023-05-01T12:00:00.000Z", "png", None))
            .collect();

        let mut first = NameResolver::new(dir.path());
        let mut second = NameResolver::new(dir.path());
        let a: Vec<_> = items.iter().map(|i| first.resolve(i).path).collect();
        let b: Vec<_> = items.iter().map(|i| second.resolve(i).path).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn existing_files_count_as_collisions() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("2023-05-01T120000.png"), b"old").unwrap();

        let mut resolver = NameResolver::new(dir.path());
        let target = resolver.resolve(&item("a", "2023-05-01T12:00:00.000Z", "png", None));
        assert_eq!(target.path, dir.path().join("2023-05-01T120000 (1).png"));
    }

    #[test]
    fn collisions_are_case_insensitive() {
        let dir = tempdir().unwrap();
        let mut resolver = NameResolver::new(dir.path());

        let upper = resolver.resolve(&item("a", "2023-05-01T12:00:00.000Z", "PNG", Some("Notes")));
        let lower = resolver.resolve(&item("b", "2023-05-01T12:00:00.000Z", "png", Some("notes")));

        assert_eq!(upper.path, dir.path().join("Notes_2023-05-01T120000.png"));
        assert_eq!(lower.path, dir.path().join("notes_2023-05-01T120000 (1).png"));
    }

    #[test]
    fn released_plan_frees_the_name() {
        let dir = tempdir().unwrap();
        let mut resolver = NameResolver::new(dir.path());
        let it = item("a", "2023-05-01T12:00:00.000Z", "png", None);

        let target = resolver.resolve(&it);
        resolver.release(&target);
        assert_eq!(resolver.resolve(&it), target);
    }

    #[test]
    fn suffix_goes_before_extension() {
        assert_eq!(with_suffix("a.b.png", "1"), "a.b (1).png");
        assert_eq!(with_suffix("noext", "2"), "noext (2)");
    }
}
