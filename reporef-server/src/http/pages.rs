//! HTML pages for browsers and `go get`

use axum::response::Html;
use reporef_core::{RepoRef, ServerConfig};

/// Page carrying the go-import meta tag for `prefix`
///
/// `go get` reads the meta tag; browsers are forwarded to the human page.
pub fn go_get(config: &ServerConfig, prefix: &str) -> Html<String> {
    let base_url = config.base_url.trim_end_matches('/');
    let import_path = escape(&format!("{}/{}", config.public_host, prefix));
    let repo_url = escape(&format!("{}/{}/.git/", base_url, prefix));
    let page_url = escape(&format!("{}/{}", base_url, prefix));

    Html(format!(
        r#"<html>
	<head>
		<meta charset="utf-8">
		<meta name="go-import" content="{import_path} git {repo_url}">
		<meta http-equiv="refresh" content="0; url={page_url}">
		<title>reporef go-get: {prefix}</title>
	</head>
	<body>
		This is the go-get page for {import_path}.
		You are being redirected to the human-readable page.
	</body>
</html>
"#,
        prefix = escape(prefix),
    ))
}

/// Human-readable page describing a reference
pub fn reporef(record: &RepoRef) -> Html<String> {
    let spec = record.spec();
    let repo_path = escape(&spec.repo_path());
    let git_ref = escape(spec.git_ref());

    Html(format!(
        r#"<html>
	<head>
		<meta charset="utf-8">
		<title>reporef: {identity}</title>
	</head>
	<body>
		Thank you for using {repo_path} at {kind} '{git_ref}'.<br/>
	</body>
</html>
"#,
        identity = escape(record.identity().as_str()),
        kind = spec.kind(),
    ))
}

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use reporef_core::{Provider, RefSpec};
    use std::path::PathBuf;

    #[test]
    fn test_go_get_meta() {
        let config = ServerConfig {
            base_url: "http://reporef.org/".to_string(),
            public_host: "reporef.org".to_string(),
            ..ServerConfig::default()
        };
        let page = go_get(&config, "github.com/alice/bar@dev").0;
        assert!(page.contains(
            r#"<meta name="go-import" content="reporef.org/github.com/alice/bar@dev git http://reporef.org/github.com/alice/bar@dev/.git/">"#
        ));
        assert!(page.contains("url=http://reporef.org/github.com/alice/bar@dev\""));
    }

    #[test]
    fn test_reporef_page() {
        let spec = RefSpec::new(Provider::github(), "alice", "bar", "feature-x");
        let record = RepoRef::new(spec, PathBuf::from("/tmp/unused"));
        let page = reporef(&record).0;
        assert!(page.contains("Thank you for using github.com/alice/bar at branch &#39;feature-x&#39;."));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }
}
