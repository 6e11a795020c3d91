use serde::de::DeserializeOwned;

use crate::{wire::FailureBody, ApiError, KitError};

/// Builds the structured failure for a non-2xx/3xx response.
///
/// Decoding is best effort: an undecodable body keeps the raw text as the
/// message and records the decode error.
pub(crate) fn decode_failure(url: &str, status: u16, body: String) -> ApiError {
    let mut failure = ApiError {
        url: url.to_owned(),
        status_code: status,
        code: status.to_string(),
        message: String::new(),
        info: String::new(),
        body,
        decode_error: None,
    };

    match serde_json::from_str::<FailureBody>(&failure.body) {
        Ok(parsed) => {
            if let Some(code) = parsed.code_string() {
                failure.code = code;
            }
            failure.message = parsed.message.unwrap_or_default();
            failure.info = parsed.info.unwrap_or_default();
        }
        Err(err) => {
            failure.message = failure.body.trim().to_owned();
            failure.decode_error = Some(err.to_string());
        }
    }

    if !failure.info.is_empty() {
        failure.message = failure.info.clone();
    }
    failure
}

/// Decodes a successful response body into `T`.
///
/// An empty body decodes as JSON `null`, so `()` and `Option<_>` targets
/// accept bodiless responses.
pub(crate) fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T, KitError> {
    let body = body.trim();
    let json = if body.is_empty() { "null" } else { body };
    serde_json::from_str(json).map_err(KitError::Serialization)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use crate::{decode, Envelope, KitError};

    #[test]
    fn info_overrides_message() {
        let failure = decode::decode_failure(
            "http://svc/users",
            400,
            r#"{"message":"validation failed","info":"bad request"}"#.to_owned(),
        );
        assert_eq!(failure.message, "bad request");
        assert_eq!(failure.info, "bad request");
        assert_eq!(failure.code, "400");
    }

    #[test]
    fn info_only_body_reports_info_as_message() {
        let failure =
            decode::decode_failure("http://svc", 400, r#"{"info":"bad request"}"#.to_owned());
        assert_eq!(failure.message, "bad request");
        assert!(failure.decode_error.is_none());
    }

    #[test]
    fn numeric_code_is_stringified() {
        let failure = decode::decode_failure(
            "http://svc",
            500,
            r#"{"code":503,"message":"Something Went Wrong"}"#.to_owned(),
        );
        assert_eq!(failure.code, "503");
        assert_eq!(failure.message, "Something Went Wrong");
    }

    #[test]
    fn undecodable_body_keeps_raw_text_and_decode_error() {
        let failure = decode::decode_failure("http://svc", 502, "<html>bad gateway</html>".to_owned());
        assert_eq!(failure.code, "502");
        assert_eq!(failure.message, "<html>bad gateway</html>");
        assert!(failure.decode_error.is_some());
    }

    #[test]
    fn empty_body_decodes_to_unit() {
        decode::decode_body::<()>("").expect("empty body must decode to unit");
        let missing: Option<u32> = decode::decode_body("  ").expect("must decode");
        assert_eq!(missing, None);
    }

    #[test]
    fn malformed_body_is_serialization_error() {
        let err = decode::decode_body::<u32>("{not json").expect_err("must fail");
        assert!(matches!(err, KitError::Serialization(_)));
    }

    #[test]
    fn envelope_metadata_is_optional() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct User {
            id: u32,
        }

        let envelope: Envelope<User> =
            decode::decode_body(r#"{"data":{"id":7}}"#).expect("must decode");
        assert_eq!(envelope.data, User { id: 7 });
        assert!(envelope.metadata.is_empty());
    }
}
