//! Splitting user-supplied repository URLs into a clean clone URL and an
//! optional branch, across hosting-provider encodings:
//! `/tree/<branch>` (GitHub), `/-/tree/<branch>` (GitLab),
//! `/src/<branch>` (Bitbucket) and `?version=GB<branch>` (Azure DevOps).

use codemend_common::{CoreError, Result};
use url::Url;

/// Returns `(clean_url, branch)`. Inputs that are not http(s) URLs (ssh
/// remotes, local paths) pass through unchanged with no branch.
pub fn parse_remote_url(input: &str) -> Result<(String, Option<String>)> {
    let trimmed = input.trim().trim_end_matches('/');
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Ok((trimmed.to_string(), None));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|e| CoreError::WorkingCopy(format!("invalid repository URL {trimmed}: {e}")))?;

    // Azure DevOps encodes the branch in the query string
    if let Some(version) = parsed
        .query_pairs()
        .find(|(key, _)| key == "version")
        .map(|(_, value)| value.into_owned())
    {
        let branch = version.strip_prefix("GB").unwrap_or(&version).to_string();
        let mut clean = parsed.clone();
        clean.set_query(None);
        return Ok((clean.to_string().trim_end_matches('/').to_string(), Some(branch)));
    }

    let path = parsed.path().to_string();
    // GitLab's marker is longer and must win over the bare `/tree/`
    for marker in ["/-/tree/", "/tree/", "/src/"] {
        if let Some(pos) = path.find(marker) {
            let prefix = &path[..pos];
            let branch = path[pos + marker.len()..].trim_matches('/');
            if branch.is_empty() {
                break;
            }
            let mut clean = parsed.clone();
            clean.set_path(prefix);
            clean.set_query(None);
            return Ok((
                clean.to_string().trim_end_matches('/').to_string(),
                Some(branch.to_string()),
            ));
        }
    }

    Ok((trimmed.to_string(), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_url_passes_through() {
        let (url, branch) = parse_remote_url("https://github.com/acme/shop").unwrap();
        assert_eq!(url, "https://github.com/acme/shop");
        assert_eq!(branch, None);
    }

    #[test]
    fn github_tree_encoding() {
        let (url, branch) =
            parse_remote_url("https://github.com/acme/shop/tree/feature/refunds").unwrap();
        assert_eq!(url, "https://github.com/acme/shop");
        assert_eq!(branch.as_deref(), Some("feature/refunds"));
    }

    #[test]
    fn gitlab_dash_tree_encoding() {
        let (url, branch) =
            parse_remote_url("https://gitlab.com/acme/shop/-/tree/develop").unwrap();
        assert_eq!(url, "https://gitlab.com/acme/shop");
        assert_eq!(branch.as_deref(), Some("develop"));
    }

    #[test]
    fn bitbucket_src_encoding() {
        let (url, branch) = parse_remote_url("https://bitbucket.org/acme/shop/src/main").unwrap();
        assert_eq!(url, "https://bitbucket.org/acme/shop");
        assert_eq!(branch.as_deref(), Some("main"));
    }

    #[test]
    fn azure_version_encoding() {
        let (url, branch) =
            parse_remote_url("https://dev.azure.com/acme/_git/shop?version=GBrelease/1.2").unwrap();
        assert_eq!(url, "https://dev.azure.com/acme/_git/shop");
        assert_eq!(branch.as_deref(), Some("release/1.2"));
    }

    #[test]
    fn ssh_remote_untouched() {
        let (url, branch) = parse_remote_url("git@github.com:acme/shop.git").unwrap();
        assert_eq!(url, "git@github.com:acme/shop.git");
        assert_eq!(branch, None);
    }

    #[test]
    fn trailing_slash_trimmed() {
        let (url, branch) = parse_remote_url("https://github.com/acme/shop/tree/main/").unwrap();
        assert_eq!(url, "https://github.com/acme/shop");
        assert_eq!(branch.as_deref(), Some("main"));
    }
}
