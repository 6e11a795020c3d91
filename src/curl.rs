use reqwest::Request;

/// Renders `request` as an equivalent `curl` command line.
///
/// Values of headers for which `redact` returns `true` are replaced with
/// `<redacted>`. Streaming bodies are omitted.
pub(crate) fn to_curl(request: &Request, redact: impl Fn(&str) -> bool) -> String {
    let mut parts = vec!["curl".to_owned(), "-X".to_owned(), quote(request.method().as_str())];

    if let Some(body) = request.body().and_then(|body| body.as_bytes()) {
        if !body.is_empty() {
            parts.push("-d".to_owned());
            parts.push(quote(&String::from_utf8_lossy(body)));
        }
    }

    let mut headers: Vec<(String, String)> = request
        .headers()
        .iter()
        .map(|(name, value)| {
            let value = if redact(name.as_str()) || value.is_sensitive() {
                "<redacted>".to_owned()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.as_str().to_owned(), value)
        })
        .collect();
    headers.sort();
    for (name, value) in headers {
        parts.push("-H".to_owned());
        parts.push(quote(&format!("{name}: {value}")));
    }

    parts.push(quote(request.url().as_str()));
    parts.join(" ")
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use reqwest::{
        header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE},
        Method, Request, Url,
    };

    use super::to_curl;

    fn request() -> Request {
        let mut request = Request::new(
            Method::POST,
            Url::parse("http://svc/users").expect("valid url"),
        );
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        *request.body_mut() = Some(br#"{"name":"O'Neil"}"#.to_vec().into());
        request
    }

    #[test]
    fn renders_method_body_headers_and_url() {
        let command = to_curl(&request(), |_| false);
        assert_eq!(
            command,
            r#"curl -X 'POST' -d '{"name":"O'\''Neil"}' -H 'authorization: Bearer abc' -H 'content-type: application/json' 'http://svc/users'"#
        );
    }

    #[test]
    fn redacts_selected_headers() {
        let command = to_curl(&request(), |name| name == "authorization");
        assert!(command.contains("'authorization: <redacted>'"));
        assert!(!command.contains("Bearer abc"));
    }
}
