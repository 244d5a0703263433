use hydrix_model::{ScanTarget, TargetConfig};
use url::Url;

use crate::error::{Result, ScanError};

/// Expands a target configuration into the concrete scan target list.
///
/// Inline input and referenced files are split on commas and newlines,
/// entries are expanded in input order, and malformed entries are logged
/// and skipped. An expansion that produces nothing is a configuration
/// error: the orchestrator has no work to freeze into the task record.
pub async fn generate(config: &TargetConfig) -> Result<Vec<ScanTarget>> {
    let mut entries = split_entries(&config.input);
    for path in &config.input_files {
        let contents = tokio::fs::read_to_string(path).await.map_err(|err| {
            ScanError::Config(format!("unreadable target file {path}: {err}"))
        })?;
        entries.extend(split_entries(&contents));
    }

    let mut targets = Vec::with_capacity(entries.len());
    for entry in &entries {
        match expand_entry(entry, config) {
            Some(target) => targets.push(target),
            None => {
                tracing::warn!(target: "scan::dispatch", entry = %entry, "skipping unparseable target");
            }
        }
    }

    if targets.is_empty() {
        return Err(ScanError::Config("no scan target provided".into()));
    }
    Ok(targets)
}

fn split_entries(raw: &str) -> Vec<String> {
    raw.split([',', '\n', '\r'])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_owned)
        .collect()
}

fn expand_entry(entry: &str, config: &TargetConfig) -> Option<ScanTarget> {
    if entry.starts_with("http://") || entry.starts_with("https://") {
        return expand_url(entry);
    }

    // Bare host[:port] entry. Scheme comes from the config default and the
    // request body from the template when one is set.
    let url = if config.https_default {
        format!("https://{entry}/")
    } else {
        format!("http://{entry}/")
    };
    let request = match &config.request_template {
        Some(template) => apply_template(template, entry),
        None => build_get_request(entry, "/"),
    };
    Some(ScanTarget::new(url, config.https_default, request))
}

fn expand_url(entry: &str) -> Option<ScanTarget> {
    let url = Url::parse(entry).ok()?;
    let host = url.host_str()?;
    let host_header = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };
    let path = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_owned(),
    };
    let request = build_get_request(&host_header, &path);
    Some(ScanTarget::new(
        url.to_string(),
        url.scheme() == "https",
        request,
    ))
}

fn build_get_request(host_header: &str, path: &str) -> Vec<u8> {
    format!(
        "GET {path} HTTP/1.1\r\nHost: {host_header}\r\nUser-Agent: hydrix/0.1\r\nAccept: */*\r\n\r\n"
    )
    .into_bytes()
}

/// Rewrites the Host header of a raw request template for one entry,
/// normalizing line endings to CRLF. A template without a Host header gets
/// one inserted after the request line.
fn apply_template(template: &str, host_header: &str) -> Vec<u8> {
    let mut lines: Vec<String> = template
        .replace("\r\n", "\n")
        .split('\n')
        .map(str::to_owned)
        .collect();

    let mut replaced = false;
    for line in lines.iter_mut().skip(1) {
        if line.to_ascii_lowercase().starts_with("host:") {
            *line = format!("Host: {host_header}");
            replaced = true;
            break;
        }
    }
    if !replaced {
        let at = usize::min(1, lines.len());
        lines.insert(at, format!("Host: {host_header}"));
    }

    let mut out = lines.join("\r\n");
    if !out.ends_with("\r\n\r\n") {
        out.push_str("\r\n\r\n");
    }
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(input: &str) -> TargetConfig {
        TargetConfig {
            input: input.to_owned(),
            ..TargetConfig::default()
        }
    }

    #[tokio::test]
    async fn splits_on_commas_and_newlines_preserving_order() {
        let targets = generate(&config("http://a.test/,http://b.test/\nhttp://c.test/"))
            .await
            .unwrap();
        let urls: Vec<&str> = targets.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, vec!["http://a.test/", "http://b.test/", "http://c.test/"]);
    }

    #[tokio::test]
    async fn url_entries_carry_scheme_port_and_query() {
        let targets = generate(&config("https://example.test:8443/admin?probe=1"))
            .await
            .unwrap();
        let target = &targets[0];
        assert!(target.is_https);
        let request = String::from_utf8(target.request.clone()).unwrap();
        assert!(request.starts_with("GET /admin?probe=1 HTTP/1.1\r\n"));
        assert!(request.contains("Host: example.test:8443\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn bare_hosts_use_the_config_scheme_default() {
        let mut cfg = config("plain.test");
        cfg.https_default = true;
        let targets = generate(&cfg).await.unwrap();
        assert_eq!(targets[0].url, "https://plain.test/");
        assert!(targets[0].is_https);
    }

    #[tokio::test]
    async fn template_host_header_is_rewritten_per_entry() {
        let mut cfg = config("one.test,two.test");
        cfg.request_template =
            Some("POST /login HTTP/1.1\nHost: placeholder\nContent-Length: 0\n".into());
        let targets = generate(&cfg).await.unwrap();
        assert_eq!(targets.len(), 2);
        for (target, host) in targets.iter().zip(["one.test", "two.test"]) {
            let request = String::from_utf8(target.request.clone()).unwrap();
            assert!(request.starts_with("POST /login HTTP/1.1\r\n"));
            assert!(request.contains(&format!("Host: {host}\r\n")));
            assert!(!request.contains("placeholder"));
        }
    }

    #[tokio::test]
    async fn unparseable_entries_are_skipped_not_fatal() {
        let targets = generate(&config("http://,http://ok.test/")).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].url, "http://ok.test/");
    }

    #[tokio::test]
    async fn empty_expansion_is_a_config_error() {
        let err = generate(&config("  ,\n ")).await.unwrap_err();
        assert!(err.to_string().contains("no scan target provided"));
    }

    #[tokio::test]
    async fn file_entries_are_appended_after_inline_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.txt");
        std::fs::write(&path, "http://from-file.test/\n").unwrap();

        let mut cfg = config("http://inline.test/");
        cfg.input_files = vec![path.to_string_lossy().into_owned()];
        let targets = generate(&cfg).await.unwrap();
        let urls: Vec<&str> = targets.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, vec!["http://inline.test/", "http://from-file.test/"]);
    }

    #[tokio::test]
    async fn missing_target_file_is_a_config_error() {
        let mut cfg = config("");
        cfg.input_files = vec!["/nonexistent/hydrix-targets.txt".into()];
        let err = generate(&cfg).await.unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }
}
