use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::model::{
    repository::sort_descriptors, ParseError, RepositoryDescriptor, RepositoryPath, Transport,
    VcsKind,
};

const CATALOG_PATH: &str = "kiln/Api/1.0/Project";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DELETED_STATUS: &str = "deleted";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("HTTP error: {0}")]
    Http(#[from] ureq::Error),
    #[error("{0}")]
    Service(String),
    #[error("Catalog request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Malformed catalog response: {0}")]
    Malformed(String),
    #[error("Error while parsing catalog: {0}")]
    Parse(#[from] ParseError),
}

/// Something that can produce the raw catalog document.
pub trait CatalogSource: Send + Sync {
    fn fetch(&self) -> Result<String, CatalogError>;
}

/// Fetches the catalog over HTTPS from the hosting service.
pub struct HttpCatalog {
    agent: ureq::Agent,
    endpoint: String,
    token: String,
}

impl HttpCatalog {
    pub fn new(server: &str, token: &str) -> HttpCatalog {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();

        HttpCatalog {
            agent,
            endpoint: endpoint(server),
            token: token.to_owned(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl CatalogSource for HttpCatalog {
    fn fetch(&self) -> Result<String, CatalogError> {
        info!("Getting the list of repositories from {}", self.endpoint);

        let mut response = self
            .agent
            .get(self.endpoint.as_str())
            .query("token", &self.token)
            .call()?;
        let status = response.status();
        let body = response.body_mut().read_to_string()?;
        debug!("Catalog responded with {} ({} bytes)", status, body.len());

        // Error envelopes are reported with their own text even on non-2xx responses.
        if !status.is_success() && serde_json::from_str::<Value>(&body).is_err() {
            return Err(CatalogError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

fn endpoint(server: &str) -> String {
    let server = server.trim().trim_end_matches('/');
    if server.starts_with("http://") || server.starts_with("https://") {
        format!("{server}/{CATALOG_PATH}")
    } else {
        format!("https://{server}/{CATALOG_PATH}")
    }
}

#[derive(Debug, Deserialize)]
struct RawProject {
    #[serde(rename = "sName")]
    name: String,
    #[serde(rename = "repoGroups", default)]
    groups: Vec<RawGroup>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    #[serde(rename = "sName", default)]
    name: Option<String>,
    #[serde(default)]
    repos: Vec<RawRepository>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    #[serde(rename = "sName")]
    name: String,
    #[serde(rename = "sStatus", default)]
    status: String,
    vcs: i64,
    #[serde(rename = "sCloneUrl")]
    clone_url: String,
    #[serde(rename = "sSshUrl", default)]
    ssh_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawServiceError {
    #[serde(rename = "sError", default)]
    message: String,
    #[serde(rename = "codeError", default)]
    code: Option<String>,
}

/// Fetches the catalog and turns it into sorted descriptors.
pub fn load_descriptors(
    source: &dyn CatalogSource,
    transport: Transport,
) -> Result<Vec<RepositoryDescriptor>, CatalogError> {
    let body = source.fetch()?;
    let descriptors = parse_catalog(&body, transport)?;
    info!("Found {} repositories", descriptors.len());
    Ok(descriptors)
}

/// Parses a catalog document, dropping deleted repositories and picking the
/// clone URL for `transport`. The result is sorted by kind, project, group and
/// repository.
pub fn parse_catalog(
    body: &str,
    transport: Transport,
) -> Result<Vec<RepositoryDescriptor>, CatalogError> {
    let document: Value = serde_json::from_str(body).map_err(ParseError::from)?;

    let projects: Vec<RawProject> = match document {
        Value::Array(_) => serde_json::from_value(document).map_err(ParseError::from)?,
        Value::Object(ref envelope) => return Err(service_error(envelope)),
        other => {
            return Err(CatalogError::Malformed(format!(
                "expected a list of projects, got {other}"
            )))
        }
    };

    let mut descriptors = Vec::new();
    for project in projects {
        for group in project.groups {
            for repository in group.repos {
                if repository.status.eq_ignore_ascii_case(DELETED_STATUS) {
                    debug!(
                        "Skipping deleted repository {}/{}",
                        project.name, repository.name
                    );
                    continue;
                }

                let path = RepositoryPath::try_new(
                    &project.name,
                    group.name.as_deref(),
                    &repository.name,
                )?;
                let url = select_url(&repository, transport, &path);
                descriptors.push(RepositoryDescriptor::new(
                    VcsKind::from_tag(repository.vcs),
                    encode_url(url),
                    path,
                ));
            }
        }
    }

    sort_descriptors(&mut descriptors);
    Ok(descriptors)
}

fn select_url<'a>(
    repository: &'a RawRepository,
    transport: Transport,
    path: &RepositoryPath,
) -> &'a str {
    match (transport, repository.ssh_url.as_deref()) {
        (Transport::Ssh, Some(ssh_url)) if !ssh_url.trim().is_empty() => ssh_url,
        (Transport::Ssh, _) => {
            warn!("No SSH clone URL for {}, using HTTPS", path);
            &repository.clone_url
        }
        (Transport::Https, _) => &repository.clone_url,
    }
}

fn service_error(envelope: &serde_json::Map<String, Value>) -> CatalogError {
    if let Some(message) = envelope.get("error").and_then(Value::as_str) {
        return CatalogError::Service(message.to_owned());
    }

    let errors = envelope
        .get("errors")
        .cloned()
        .and_then(|errors| serde_json::from_value::<Vec<RawServiceError>>(errors).ok());

    match errors {
        Some(errors) if !errors.is_empty() => CatalogError::Service(
            errors
                .into_iter()
                .map(|error| match error.code {
                    Some(code) => format!("{} ({})", error.message, code),
                    None => error.message,
                })
                .collect::<Vec<_>>()
                .join("; "),
        ),
        _ => CatalogError::Malformed("expected a list of projects, got an object".to_owned()),
    }
}

/// Catalog URLs may carry raw non-ASCII characters; clone endpoints get them
/// percent-encoded. Strings that are not absolute URLs (scp-like SSH remotes,
/// local paths) are only trimmed.
pub fn encode_url(url: &str) -> String {
    let url = url.trim().trim_matches('"');
    match Url::parse(url) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => url.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    const CATALOG: &str = r#"[
        {
            "sName": "Project B",
            "repoGroups": [
                {
                    "sName": "",
                    "repos": [
                        {"sName": "Tools", "sStatus": "good", "vcs": 2,
                         "sCloneUrl": "https://example.com/kiln/Code/Project-B/Group/Tools.git",
                         "sSshUrl": "ssh://example@example.com/Project-B/Group/Tools.git"}
                    ]
                }
            ]
        },
        {
            "sName": " Project A ",
            "repoGroups": [
                {
                    "sName": "Core",
                    "repos": [
                        {"sName": "Old", "sStatus": "deleted", "vcs": 1,
                         "sCloneUrl": "https://example.com/kiln/Code/Project-A/Core/Old"},
                        {"sName": "Main", "sStatus": "good", "vcs": 1,
                         "sCloneUrl": "\"https://example.com/kiln/Code/Project-A/Core/Main\""},
                        {"sName": "Svn", "sStatus": "good", "vcs": 3,
                         "sCloneUrl": "https://example.com/kiln/Code/Project-A/Core/Svn"}
                    ]
                }
            ]
        }
    ]"#;

    struct StaticCatalog(&'static str);

    impl CatalogSource for StaticCatalog {
        fn fetch(&self) -> Result<String, CatalogError> {
            Ok(self.0.to_owned())
        }
    }

    #[test]
    fn parses_sorted_descriptors() {
        let descriptors = parse_catalog(CATALOG, Transport::Https).unwrap();
        let summary: Vec<(VcsKind, String, String)> = descriptors
            .iter()
            .map(|d| (d.vcs, d.path.to_string(), d.remote_url.clone()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (
                    VcsKind::Mercurial,
                    "Project A/Core/Main".to_owned(),
                    "https://example.com/kiln/Code/Project-A/Core/Main".to_owned()
                ),
                (
                    VcsKind::Git,
                    "Project B/Ungrouped/Tools".to_owned(),
                    "https://example.com/kiln/Code/Project-B/Group/Tools.git".to_owned()
                ),
                (
                    VcsKind::Unsupported(3),
                    "Project A/Core/Svn".to_owned(),
                    "https://example.com/kiln/Code/Project-A/Core/Svn".to_owned()
                ),
            ]
        );
    }

    #[test]
    fn ssh_transport_prefers_ssh_url() {
        let descriptors = parse_catalog(CATALOG, Transport::Ssh).unwrap();
        let urls: Vec<&str> = descriptors.iter().map(|d| d.remote_url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/kiln/Code/Project-A/Core/Main",
                "ssh://example@example.com/Project-B/Group/Tools.git",
                "https://example.com/kiln/Code/Project-A/Core/Svn",
            ]
        );
    }

    #[test]
    fn error_envelope_is_reported() {
        let error = parse_catalog(r#"{"error": "Invalid token"}"#, Transport::Https).unwrap_err();
        assert_eq!(error.to_string(), "Invalid token");

        let error = parse_catalog(
            r#"{"errors": [{"codeError": "InvalidToken", "sError": "Token is not valid"}]}"#,
            Transport::Https,
        )
        .unwrap_err();
        assert_eq!(error.to_string(), "Token is not valid (InvalidToken)");

        let error = parse_catalog(r#"{"something": 1}"#, Transport::Https).unwrap_err();
        assert!(matches!(error, CatalogError::Malformed(_)));
    }

    #[test]
    fn invalid_documents_are_parse_errors() {
        assert!(matches!(
            parse_catalog("not json", Transport::Https),
            Err(CatalogError::Parse(ParseError::Json(_)))
        ));
        assert!(matches!(
            parse_catalog(r#"[{"sName": "P", "repoGroups": [{"repos": [{"sName": " ", "vcs": 1, "sCloneUrl": "u"}]}]}]"#, Transport::Https),
            Err(CatalogError::Parse(ParseError::MissingName { .. }))
        ));
    }

    #[test]
    fn encodes_non_ascii_urls() {
        assert_eq!(
            encode_url("https://example.com/kiln/Code/Проект/Repo One"),
            "https://example.com/kiln/Code/%D0%9F%D1%80%D0%BE%D0%B5%D0%BA%D1%82/Repo%20One"
        );
        assert_eq!(
            encode_url(" git@example.com:group/repo.git "),
            "git@example.com:group/repo.git"
        );
    }

    #[test]
    fn builds_endpoint() {
        assert_eq!(
            endpoint("company.kilnhg.com"),
            "https://company.kilnhg.com/kiln/Api/1.0/Project"
        );
        assert_eq!(
            endpoint("http://localhost:8080/"),
            "http://localhost:8080/kiln/Api/1.0/Project"
        );
    }

    #[test]
    fn loads_from_source() {
        let descriptors =
            load_descriptors(&StaticCatalog(CATALOG), Transport::Https).unwrap();
        assert_eq!(descriptors.len(), 3);
    }
}
