use axum::http::Method;
use serde_json::Value;

use crate::pipeline::PipelineRequest;

pub const METHOD_NOT_ALLOWED: &str = "Method Not Allowed. Please use POST.";

/// Why an inbound request never reached the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MethodNotAllowed,
    BadRequest(String),
}

impl Rejection {
    pub fn reason(&self) -> &str {
        match self {
            Self::MethodNotAllowed => METHOD_NOT_ALLOWED,
            Self::BadRequest(reason) => reason,
        }
    }
}

/// Check method and body shape, yielding a request with both fields set.
pub fn validate(method: &Method, body: &[u8]) -> Result<PipelineRequest, Rejection> {
    if *method != Method::POST {
        return Err(Rejection::MethodNotAllowed);
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Rejection::BadRequest(format!("Request body is not valid JSON: {e}")))?;
    let Value::Object(fields) = value else {
        return Err(Rejection::BadRequest(
            "Request body must be a JSON object.".to_string(),
        ));
    };

    let field = |name: &str| -> Result<String, Rejection> {
        match fields.get(name) {
            None | Some(Value::Null) => Err(Rejection::BadRequest(format!("{name} is required."))),
            Some(Value::String(s)) if s.trim().is_empty() => {
                Err(Rejection::BadRequest(format!("{name} must not be empty.")))
            }
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(Rejection::BadRequest(format!("{name} must be a string."))),
        }
    };

    Ok(PipelineRequest::new(field("email")?, field("problemDescription")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn post(body: &str) -> Result<PipelineRequest, Rejection> {
        validate(&Method::POST, body.as_bytes())
    }

    #[test]
    fn accepts_well_formed_post() {
        let req = post(r#"{"email":"jane@example.com","problemDescription":"cart is empty"}"#).unwrap();
        assert_eq!(req.email, "jane@example.com");
        assert_eq!(req.problem_description, "cart is empty");
    }

    #[test]
    fn rejects_other_methods() {
        for method in [Method::GET, Method::PUT, Method::DELETE] {
            assert_eq!(
                validate(&method, b"{}"),
                Err(Rejection::MethodNotAllowed)
            );
        }
    }

    #[test]
    fn reports_the_offending_field() {
        let cases = [
            (r#"{"problemDescription":"x"}"#, "email is required."),
            (r#"{"email":"a@b.c"}"#, "problemDescription is required."),
            (r#"{"email":42,"problemDescription":"x"}"#, "email must be a string."),
            (r#"{"email":"a@b.c","problemDescription":"  "}"#, "problemDescription must not be empty."),
            (r#"{"email":null,"problemDescription":"x"}"#, "email is required."),
        ];
        for (body, reason) in cases {
            assert_eq!(post(body), Err(Rejection::BadRequest(reason.to_string())), "{body}");
        }
    }

    #[test]
    fn rejects_malformed_and_non_object_bodies() {
        assert!(matches!(post("{not json"), Err(Rejection::BadRequest(_))));
        assert!(matches!(post("[1,2]"), Err(Rejection::BadRequest(_))));
        assert!(matches!(post(""), Err(Rejection::BadRequest(_))));
    }

    proptest! {
        #[test]
        fn any_body_missing_a_field_is_rejected(
            value in "[a-zA-Z0-9@. ]{0,40}",
            keep_email in any::<bool>(),
        ) {
            let body = if keep_email {
                serde_json::json!({ "email": value })
            } else {
                serde_json::json!({ "problemDescription": value })
            };
            let bytes = serde_json::to_vec(&body).unwrap();
            prop_assert!(matches!(
                validate(&Method::POST, &bytes),
                Err(Rejection::BadRequest(_))
            ));
        }
    }
}
