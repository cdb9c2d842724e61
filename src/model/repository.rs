use std::{
    fmt::{Display, Write},
    path::PathBuf,
};

use super::{ParseError, VcsKind};
use crate::sync::archive::ARCHIVE_DIR;

/// Group name used for repositories the catalog lists without a group.
pub const UNGROUPED: &str = "Ungrouped";

/// Catalog identity of a repository: project, group and repository names,
/// trimmed of surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryPath {
    project: String,
    group: String,
    repository: String,
}

impl RepositoryPath {
    pub fn try_new(
        project: &str,
        group: Option<&str>,
        repository: &str,
    ) -> Result<RepositoryPath, ParseError> {
        let project = project.trim();
        let group = group.map(str::trim).filter(|g| !g.is_empty());
        let repository = repository.trim();

        if project.is_empty() {
            return Err(ParseError::MissingName {
                component: "project",
                context: format!("{}/{}", group.unwrap_or(UNGROUPED), repository),
            });
        }
        if repository.is_empty() {
            return Err(ParseError::MissingName {
                component: "repository",
                context: format!("{}/{}", project, group.unwrap_or(UNGROUPED)),
            });
        }

        Ok(RepositoryPath {
            project: project.to_owned(),
            group: group.unwrap_or(UNGROUPED).to_owned(),
            repository: repository.to_owned(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn segments(&self) -> [&str; 3] {
        [&self.project, &self.group, &self.repository]
    }

    /// Relative filesystem location of the repository, one directory per level.
    ///
    /// Characters that are not allowed in a file name on some platform are
    /// percent-escaped, as is `%` itself, which keeps the mapping injective.
    /// Names Windows would alias (device names, trailing dots) and a
    /// repository named like the archive directory next to it get their
    /// first or last character escaped.
    pub fn to_path(&self) -> PathBuf {
        let mut result = PathBuf::new();

        result.push(escape_segment(&self.project, false));
        result.push(escape_segment(&self.group, false));
        result.push(escape_segment(&self.repository, true));

        result
    }

    /// The `project/group` part, used by consumers to detect group boundaries.
    pub fn group_display(&self) -> String {
        format!("{}/{}", self.project, self.group)
    }
}

impl Display for RepositoryPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.group, self.repository)
    }
}

fn escape_segment(segment: &str, is_repository: bool) -> String {
    if segment == "." || segment == ".." {
        return "%2E".repeat(segment.len());
    }

    let escape_first =
        is_device_name(segment) || (is_repository && segment.eq_ignore_ascii_case(ARCHIVE_DIR));
    let last = segment.len().saturating_sub(1);

    let mut escaped = String::with_capacity(segment.len());
    for (index, c) in segment.char_indices() {
        let aliased = (index == 0 && escape_first) || (index == last && matches!(c, '.' | ' '));
        if aliased || needs_escape(c) {
            // Every character escaped here is ASCII, so the code point is the byte.
            let _ = write!(escaped, "%{:02X}", c as u32);
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// `CON`, `NUL`, `COM1` and friends, with or without an extension.
fn is_device_name(segment: &str) -> bool {
    const DEVICES: [&str; 4] = ["CON", "PRN", "AUX", "NUL"];

    let stem = segment.split('.').next().unwrap_or(segment).trim_end();
    if DEVICES.iter().any(|device| stem.eq_ignore_ascii_case(device)) {
        return true;
    }
    match stem.as_bytes() {
        [a, b, c, digit] => {
            let prefix = [*a, *b, *c];
            (prefix.eq_ignore_ascii_case(b"COM") || prefix.eq_ignore_ascii_case(b"LPT"))
                && (b'1'..=b'9').contains(digit)
        }
        _ => false,
    }
}

fn needs_escape(c: char) -> bool {
    c.is_ascii_control()
        || matches!(c, '%' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
}

/// One catalog entry, ready to be synchronized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDescriptor {
    pub vcs: VcsKind,
    pub remote_url: String,
    pub path: RepositoryPath,
}

impl RepositoryDescriptor {
    pub fn new(vcs: VcsKind, remote_url: impl Into<String>, path: RepositoryPath) -> Self {
        RepositoryDescriptor {
            vcs,
            remote_url: remote_url.into(),
            path,
        }
    }

    fn sort_key(&self) -> (VcsKind, [String; 3], [&str; 3]) {
        let segments = self.path.segments();
        (
            self.vcs,
            segments.map(str::to_lowercase),
            segments,
        )
    }
}

/// Orders descriptors by kind, then project, group and repository name.
pub fn sort_descriptors(descriptors: &mut [RepositoryDescriptor]) {
    descriptors.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}
