use std::path::Path;

use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    cert::Cert,
    AutotagOption, Branch, CertificateCheckStatus, Config, Cred, CredentialType, ErrorCode,
    FetchOptions, RemoteCallbacks, Repository,
};
use log::{debug, trace};
use ssh_key::{known_hosts::HostPatterns, KnownHosts};

use super::{BackendError, VcsBackend};
use crate::model::VcsKind;

const ORIGIN: &str = "origin";
const GLOBAL_KNOWN_HOSTS: &str = "/etc/ssh/ssh_known_hosts";
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

/// Git, through libgit2.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitBackend;

impl VcsBackend for GitBackend {
    fn kind(&self) -> VcsKind {
        VcsKind::Git
    }

    fn query_remote(&self, local_dir: &Path) -> Option<String> {
        let repo = match Repository::open(local_dir) {
            Ok(repo) => repo,
            Err(error) => {
                trace!("{} is not a git repository: {}", local_dir.display(), error);
                return None;
            }
        };
        let remote = repo.find_remote(ORIGIN).ok()?;
        remote.url().map(str::to_owned)
    }

    fn clone_repository(
        &self,
        remote_url: &str,
        local_dir: &Path,
        with_working_copy: bool,
    ) -> Result<(), BackendError> {
        debug!("Cloning {} into {}", remote_url, local_dir.display());

        let git_config = Config::open_default()?;
        let mut checkout = CheckoutBuilder::new();
        if !with_working_copy {
            // Same as `git clone --no-checkout`: objects and refs only.
            checkout.dry_run();
        }

        RepoBuilder::new()
            .fetch_options(fetch_options(&git_config))
            .with_checkout(checkout)
            .clone(remote_url, local_dir)?;

        Ok(())
    }

    fn pull(&self, local_dir: &Path, update_working_copy: bool) -> Result<(), BackendError> {
        debug!("Fetching into {}", local_dir.display());

        let repo = Repository::open(local_dir)?;
        let git_config = Config::open_default()?;
        {
            let mut remote = repo.find_remote(ORIGIN)?;
            let refspecs: Vec<String> = remote
                .fetch_refspecs()?
                .iter()
                .flatten()
                .map(str::to_owned)
                .collect();
            remote.fetch(&refspecs, Some(&mut fetch_options(&git_config)), None)?;
        }

        if update_working_copy {
            update_working_tree(&repo)?;
        }

        Ok(())
    }
}

/// Fast-forwards the checked out branch to its upstream and checks out HEAD.
fn update_working_tree(repo: &Repository) -> Result<(), BackendError> {
    let head = match repo.head() {
        Ok(head) => head,
        Err(error) if error.code() == ErrorCode::UnbornBranch => {
            debug!("Repository has no commits yet, nothing to check out");
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };

    if head.is_branch() {
        let name = head.shorthand().unwrap_or("HEAD").to_owned();
        let branch = Branch::wrap(head);
        let upstream_target = match branch.upstream() {
            Ok(upstream) => upstream.get().target(),
            Err(error) if error.code() == ErrorCode::NotFound => None,
            Err(error) => return Err(error.into()),
        };
        let local_target = branch.get().target();

        if let (Some(upstream), Some(local)) = (upstream_target, local_target) {
            if upstream != local {
                if !repo.graph_descendant_of(upstream, local)? {
                    return Err(BackendError::Diverged { branch: name });
                }
                trace!("Fast-forwarding {} from {} to {}", name, local, upstream);
                branch
                    .into_reference()
                    .set_target(upstream, "repomirror: fast-forward")?;
            }
        }
    }

    repo.checkout_head(Some(CheckoutBuilder::new().force().recreate_missing(true)))?;
    Ok(())
}

fn fetch_options(git_config: &Config) -> FetchOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0;
    callbacks.credentials(move |url, username, allowed_types| {
        trace!(
            "Requested credentials for {}, username {:?}, allowed types {:?}",
            url,
            username,
            allowed_types
        );
        // libgit2 keeps asking while the server rejects what we offer.
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::from_str("authentication failed"));
        }
        if allowed_types.contains(CredentialType::USERNAME) {
            return Cred::username("git");
        }
        if allowed_types.contains(CredentialType::SSH_KEY) {
            return Cred::ssh_key_from_agent(username.unwrap_or("git"));
        }
        if allowed_types.contains(CredentialType::USER_PASS_PLAINTEXT) {
            return Cred::credential_helper(git_config, url, username);
        }
        Err(git2::Error::from_str("no valid authentication available"))
    });

    callbacks.certificate_check(check_certificate);

    let mut fetch_options = FetchOptions::new();
    fetch_options
        .remote_callbacks(callbacks)
        .download_tags(AutotagOption::All);

    fetch_options
}

fn check_certificate(
    certificate: &Cert<'_>,
    host: &str,
) -> Result<CertificateCheckStatus, git2::Error> {
    if let Some(hostkey) = certificate.as_hostkey().and_then(|h| h.hostkey()) {
        match KnownHosts::read_file(GLOBAL_KNOWN_HOSTS) {
            Ok(entries) => {
                let trusted = entries.iter().any(|entry| {
                    host_matches_patterns(host, entry.host_patterns())
                        && entry.public_key().to_bytes().as_deref() == Ok(hostkey)
                });
                if trusted {
                    trace!("{} matches an entry of {}", host, GLOBAL_KNOWN_HOSTS);
                    return Ok(CertificateCheckStatus::CertificateOk);
                }
            }
            Err(error) => trace!("Could not load {}: {}", GLOBAL_KNOWN_HOSTS, error),
        }
    }
    Ok(CertificateCheckStatus::CertificatePassthrough)
}

fn host_matches_patterns(host: &str, patterns: &HostPatterns) -> bool {
    match patterns {
        HostPatterns::Patterns(patterns) => {
            let host = host.to_lowercase();
            let mut found = false;
            for pattern in patterns {
                let pattern = pattern.to_lowercase();
                // Wildcards are not supported, negations win over matches.
                match pattern.strip_prefix('!') {
                    Some(negated) if negated == host => return false,
                    Some(_) => {}
                    None => found |= pattern == host,
                }
            }
            found
        }
        HostPatterns::HashedName { .. } => false,
    }
}
