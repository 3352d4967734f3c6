use crate::lsp::types::{Message, Notification, Request, RequestId, Response};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid request: {reason}")]
    InvalidRequest {
        id: Option<RequestId>,
        reason: String,
    },
}

impl ProtocolError {
    fn invalid(json: &serde_json::Value, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidRequest {
            id: recover_id(json),
            reason: reason.into(),
        }
    }
}

fn recover_id(json: &serde_json::Value) -> Option<RequestId> {
    json.get("id")
        .and_then(|id| serde_json::from_value(id.clone()).ok())
}

fn has_id(json: &serde_json::Value) -> bool {
    json.get("id").is_some_and(|id| !id.is_null())
}

pub fn parse_request(json: &serde_json::Value) -> Result<Option<Message>, ProtocolError> {
    if json.get("method").is_none() {
        return Ok(None);
    }
    if has_id(json) {
        let request: Request = serde_json::from_value(json.clone())
            .map_err(|e| ProtocolError::invalid(json, e.to_string()))?;
        return Ok(Some(Message::Request(request)));
    }
    let notification: Notification = serde_json::from_value(json.clone())
        .map_err(|e| ProtocolError::invalid(json, e.to_string()))?;
    Ok(Some(Message::Notification(notification)))
}

pub fn parse_response(json: &serde_json::Value) -> Result<Option<Message>, ProtocolError> {
    if json.get("id").is_some() && (json.get("result").is_some() || json.get("error").is_some()) {
        let response: Response = serde_json::from_value(json.clone())
            .map_err(|e| ProtocolError::invalid(json, e.to_string()))?;
        return Ok(Some(Message::Response(response)));
    }
    Ok(None)
}

/// Parse a full JSON payload into a `Message` (Request/Notification/Response).
/// A body that is not valid UTF-8 is a parse error like any other bad JSON.
pub fn parse_message(body: impl AsRef<[u8]>) -> Result<Message, ProtocolError> {
    let json: serde_json::Value = serde_json::from_slice(body.as_ref())?;
    if !json.is_object() {
        return Err(ProtocolError::invalid(&json, "message must be a JSON object"));
    }
    if let Some(message) = parse_request(&json)? {
        return Ok(message);
    }
    if let Some(response) = parse_response(&json)? {
        return Ok(response);
    }
    Err(ProtocolError::invalid(
        &json,
        "message is neither a request, a notification nor a response",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_with_numeric_id() {
        let message =
            parse_message(r#"{"jsonrpc":"2.0","id":1,"method":"textDocument/hover","params":{}}"#)
                .unwrap();
        match message {
            Message::Request(request) => {
                assert_eq!(request.id, RequestId::Num(1));
                assert_eq!(request.method, "textDocument/hover");
                assert!(request.params.is_some());
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_request_with_string_id_and_no_params() {
        let message = parse_message(r#"{"jsonrpc":"2.0","id":"a-1","method":"shutdown"}"#).unwrap();
        match message {
            Message::Request(request) => {
                assert_eq!(request.id, RequestId::Str("a-1".to_string()));
                assert!(request.params.is_none());
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_notification() {
        let message = parse_message(r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#).unwrap();
        assert!(matches!(message, Message::Notification(n) if n.method == "initialized"));

        let message = parse_message(r#"{"jsonrpc":"2.0","id":null,"method":"exit"}"#).unwrap();
        assert!(matches!(message, Message::Notification(n) if n.method == "exit"));
    }

    #[test]
    fn test_parse_response() {
        let message = parse_message(r#"{"jsonrpc":"2.0","id":4,"result":null}"#).unwrap();
        assert!(matches!(message, Message::Response(r) if r.id == Some(RequestId::Num(4))));
    }

    #[test]
    fn test_parse_error_for_malformed_json() {
        let err = parse_message("{\"jsonrpc\":").unwrap_err();
        assert!(matches!(err, ProtocolError::Parse(_)));
    }

    #[test]
    fn test_invalid_request_recovers_id() {
        let err = parse_message(r#"{"jsonrpc":"2.0","id":9,"method":42}"#).unwrap_err();
        match err {
            ProtocolError::InvalidRequest { id, .. } => assert_eq!(id, Some(RequestId::Num(9))),
            other => panic!("expected invalid request, got {:?}", other),
        }

        let err = parse_message("[1,2,3]").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest { id: None, .. }));

        let err = parse_message(r#"{"jsonrpc":"2.0","id":2}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest { id: Some(_), .. }));
    }

    #[test]
    fn test_invalid_utf8_is_parse_error() {
        let err = parse_message(b"{\"jsonrpc\":\"2.0\",\"method\":\"\xff\"}").unwrap_err();
        assert!(matches!(err, ProtocolError::Parse(_)));
    }

    #[test]
    fn test_numeric_id_beyond_i64_is_invalid_with_null_id() {
        let err = parse_message(r#"{"jsonrpc":"2.0","id":9223372036854775808,"method":"shutdown"}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest { id: None, .. }));
    }
}
