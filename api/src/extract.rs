//! `AppJson<T>`: `axum::Json<T>` with rejections rendered as `ApiError` bodies.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};

use crate::error::AppError;

pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();
    let field = serde_field(&body_text).unwrap_or_else(|| "body".to_string());

    AppError::Validation {
        message: format!("Invalid request body: {body_text}"),
        field: Some(field),
        received: None,
        docs_hint: Some("See the request schema at /swagger-ui.".to_string()),
    }
}

/// Field named in serde's "missing field `x`" / "unknown field `x`" messages.
fn serde_field(message: &str) -> Option<String> {
    ["missing field `", "unknown field `"]
        .iter()
        .find_map(|marker| {
            let start = message.find(marker)? + marker.len();
            let rest = &message[start..];
            rest.find('`').map(|end| rest[..end].to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_the_missing_field() {
        let msg = "Failed to deserialize the JSON body: missing field `secret` at line 1 column 17";
        assert_eq!(serde_field(msg), Some("secret".to_string()));
    }

    #[test]
    fn names_the_unknown_field() {
        assert_eq!(
            serde_field("unknown field `orderId`, expected `order_id`"),
            Some("orderId".to_string())
        );
    }

    #[test]
    fn type_errors_have_no_field() {
        assert_eq!(serde_field("invalid type: string \"x\", expected i64"), None);
    }
}
