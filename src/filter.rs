use std::sync::OnceLock;

use regex_lite::Regex;

use crate::model::{RepositoryDescriptor, RepositoryPath};

/// Restricts a run to the repositories below a `project[/group[/repository]]` prefix.
///
/// Matching is case-insensitive, treats any run of whitespace and hyphens as
/// a single hyphen and only ever matches whole path segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFilter {
    prefix: String,
}

impl PathFilter {
    /// Returns `None` when the prefix is blank, i.e. nothing would be filtered.
    pub fn new(prefix: &str) -> Option<PathFilter> {
        let prefix = normalize(prefix);
        if prefix.is_empty() {
            None
        } else {
            Some(PathFilter { prefix })
        }
    }

    pub fn matches(&self, path: &RepositoryPath) -> bool {
        let candidate = normalize(&path.segments().join("/"));
        candidate == self.prefix
            || candidate
                .strip_prefix(&self.prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    pub fn apply(&self, descriptors: Vec<RepositoryDescriptor>) -> Vec<RepositoryDescriptor> {
        descriptors
            .into_iter()
            .filter(|descriptor| self.matches(&descriptor.path))
            .collect()
    }
}

fn normalize(path: &str) -> String {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    let separators = SEPARATORS.get_or_init(|| Regex::new(r"[\s-]+").expect("valid regex"));

    path.replace('\\', "/")
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| separators.replace_all(&segment.to_lowercase(), "-").into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
