//! Per-path response rewrite rules and the debug-target transforms

use devtun_rewrite::RewriteCallback;
use std::fmt;
use std::sync::Arc;

/// A rewrite callback bound to one request path
#[derive(Clone)]
pub struct ProxyRule {
    path: String,
    callback: RewriteCallback,
}

impl ProxyRule {
    /// Create a rule for `path`
    ///
    /// `path` is compared with the request's full path-and-query, so `/` does
    /// not match `/?foo`.
    pub fn new<F>(path: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            path: path.into(),
            callback: Arc::new(callback),
        }
    }

    /// Path this rule applies to
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the rule applies to a request
    pub fn matches(&self, path_and_query: &str) -> bool {
        self.path == path_and_query
    }

    /// Callback handed to the response rewriter
    pub fn callback(&self) -> RewriteCallback {
        Arc::clone(&self.callback)
    }
}

impl fmt::Debug for ProxyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRule")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Ordered set of rules; the first match wins
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ProxyRule>,
}

impl RuleSet {
    /// Create an empty rule set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule
    pub fn with_rule(mut self, rule: ProxyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Find the rule for a request
    pub fn find(&self, path_and_query: &str) -> Option<&ProxyRule> {
        self.rules.iter().find(|rule| rule.matches(path_and_query))
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

const FETCH_CALL: &str = "fetch(url).";
const FETCH_WITH_CREDENTIALS: &str = "fetch(url, {credentials: 'include'}).";
const BROKEN_FRONTEND_LINK: &str = "link.href = `https://chrome-devtools-frontend.appspot.com";
const REPORTED_FRONTEND_LINK: &str = "link.href = item.devtoolsFrontendUrl; // ";

/// Rewrite the target's index page so its script works behind basic auth
///
/// The page's `fetch(url)` gets `credentials: 'include'`, and the link builder
/// some headless index pages use (pointing at the hosted frontend) is replaced
/// by the target's own reported frontend URL. Both are first-occurrence
/// literal substitutions. Empty bodies are left alone.
pub fn include_fetch_credentials(body: &str) -> Option<String> {
    if body.is_empty() {
        return None;
    }

    let body = body.replacen(FETCH_CALL, FETCH_WITH_CREDENTIALS, 1);
    Some(body.replacen(BROKEN_FRONTEND_LINK, REPORTED_FRONTEND_LINK, 1))
}

/// Point `/json/*` metadata at the tunnel
///
/// Every literal occurrence of `original_host` becomes `tunnel_host`, every
/// `ws=` becomes `wss=` and every `ws://` becomes `wss://`. The replacement
/// is textual and ignores JSON structure, so unrelated strings containing
/// these tokens are rewritten too.
pub fn rewrite_json_hosts(body: &str, original_host: &str, tunnel_host: &str) -> Option<String> {
    if body.is_empty() {
        return None;
    }

    let body = if original_host.is_empty() {
        body.to_string()
    } else {
        body.replace(original_host, tunnel_host)
    };
    Some(body.replace("ws=", "wss=").replace("ws://", "wss://"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_matching_is_exact() {
        let rules = RuleSet::new()
            .with_rule(ProxyRule::new("/", |_| None))
            .with_rule(ProxyRule::new("/json/list", |_| None));

        assert_eq!(rules.len(), 2);
        assert_eq!(rules.find("/").unwrap().path(), "/");
        assert_eq!(rules.find("/json/list").unwrap().path(), "/json/list");
        assert!(rules.find("/json/list?t=1").is_none());
        assert!(rules.find("/json").is_none());
        assert!(RuleSet::new().is_empty());
    }

    #[test]
    fn test_include_fetch_credentials() {
        let page = "<script>fetch(url).then(r => r.json()); fetch(url).catch(e => e)</script>\
                    <script>link.href = `https://chrome-devtools-frontend.appspot.com/serve_file/${rev}`</script>";

        let rewritten = include_fetch_credentials(page).unwrap();
        assert!(rewritten.starts_with(
            "<script>fetch(url, {credentials: 'include'}).then(r => r.json()); fetch(url).catch"
        ));
        assert!(rewritten
            .contains("link.href = item.devtoolsFrontendUrl; // /serve_file/${rev}`"));
        assert!(!rewritten.contains("chrome-devtools-frontend.appspot.com"));
    }

    #[test]
    fn test_include_fetch_credentials_leaves_empty_body() {
        assert_eq!(include_fetch_credentials(""), None);
    }

    #[test]
    fn test_rewrite_json_hosts_is_global() {
        let list = r#"[{"devtoolsFrontendUrl":"/devtools/inspector.html?ws=127.0.0.1:9222/devtools/page/A",
"webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/page/A"},
{"devtoolsFrontendUrl":"/devtools/inspector.html?ws=127.0.0.1:9222/devtools/page/B",
"webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/page/B"}]"#;

        let rewritten = rewrite_json_hosts(list, "127.0.0.1", "faketunnel.com").unwrap();
        assert!(!rewritten.contains("127.0.0.1"));
        assert!(!rewritten.contains("ws=faketunnel"));
        assert!(!rewritten.contains("\"ws://"));
        assert_eq!(rewritten.matches("wss=faketunnel.com:9222").count(), 2);
        assert_eq!(rewritten.matches("wss://faketunnel.com:9222").count(), 2);
    }

    #[test]
    fn test_rewrite_json_hosts_touches_unrelated_text() {
        // Literal replacement does not respect JSON structure.
        let body = r#"{"title":"docs for localhost and news=1","url":"https://localhost/"}"#;
        let rewritten = rewrite_json_hosts(body, "localhost", "t.example").unwrap();
        assert_eq!(
            rewritten,
            r#"{"title":"docs for t.example and newss=1","url":"https://t.example/"}"#
        );
    }
}
