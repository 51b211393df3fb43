//! Classification of call outcomes into typed failures or degraded replies.
//!
//! # Design
//! Every exchange with the transport becomes exactly one `CallOutcome`, which
//! the verb-specific methods of `Classifier` consume by value. For each
//! anomaly the classifier picks a `Category`; the active `Suppression` then
//! decides whether it is raised as `ApiError::Call` or returned as
//! `Reply::Degraded` carrying whatever raw response was obtained.
//!
//! Precedence within one response: verb-specific statuses (303 on PUT, an
//! "already removed" 400 on DELETE) are checked before the generic status
//! categories, and the body is only inspected for 2xx responses.

use serde_json::Value;
use tracing::warn;

use crate::error::{ApiError, CallFailure, ProtocolViolation};
use crate::http::{HttpMethod, HttpResponse};
use crate::suppress::{Category, Suppression};
use crate::transport::TransportError;
use crate::types::{entity_id, is_removed, Entity};

/// The raw result of one outbound call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// 2xx. For GET the body has been decoded; a body not declared as JSON is
    /// kept as a JSON string so it fails the shape check.
    Success { response: HttpResponse, body: Option<Value> },
    TransportFailure(TransportError),
    /// Any status outside 2xx.
    HttpError(HttpResponse),
    /// GET 2xx whose JSON body could not be parsed.
    MalformedBody { response: HttpResponse, reason: String },
}

impl CallOutcome {
    pub fn from_exchange(method: HttpMethod, result: Result<HttpResponse, TransportError>) -> Self {
        let response = match result {
            Ok(response) => response,
            Err(err) => return CallOutcome::TransportFailure(err),
        };
        if !response.is_success() {
            return CallOutcome::HttpError(response);
        }
        if method != HttpMethod::Get {
            return CallOutcome::Success { response, body: None };
        }
        if !response.declares_json() {
            let body = Value::String(response.body.clone());
            return CallOutcome::Success {
                response,
                body: Some(body),
            };
        }
        match serde_json::from_str(&response.body) {
            Ok(body) => CallOutcome::Success {
                response,
                body: Some(body),
            },
            Err(err) => CallOutcome::MalformedBody {
                response,
                reason: err.to_string(),
            },
        }
    }
}

/// What a call produced when it did not raise.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Value(T),
    /// A suppressed failure. `response` is `None` when nothing usable was
    /// obtained (transport failure, rejected request).
    Degraded(Degraded),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Degraded {
    pub category: Category,
    pub response: Option<HttpResponse>,
}

impl<T> Reply<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Reply::Value(value) => Some(value),
            Reply::Degraded(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&T> {
        match self {
            Reply::Value(value) => Some(value),
            Reply::Degraded(_) => None,
        }
    }

    pub fn degraded(&self) -> Option<&Degraded> {
        match self {
            Reply::Value(_) => None,
            Reply::Degraded(degraded) => Some(degraded),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Reply::Degraded(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        match self {
            Reply::Value(value) => Reply::Value(f(value)),
            Reply::Degraded(degraded) => Reply::Degraded(degraded),
        }
    }
}

enum Decoded {
    Body(Value, HttpResponse),
    Degraded(Degraded),
}

/// Decision function for one call.
#[derive(Debug, Clone, Copy)]
pub struct Classifier<'a> {
    method: HttpMethod,
    resource: &'a str,
    suppression: Suppression,
}

impl<'a> Classifier<'a> {
    pub fn new(method: HttpMethod, resource: &'a str, suppression: Suppression) -> Self {
        Self {
            method,
            resource,
            suppression,
        }
    }

    /// Refuse a call before it reaches the transport.
    pub fn reject<T>(&self, message: impl Into<String>) -> Result<Reply<T>, ApiError> {
        self.decide(Category::BadRequest, None, None, message.into(), None)
    }

    /// The same refusal as an error, for calls that never degrade.
    pub fn rejection(&self, message: impl Into<String>) -> ApiError {
        self.failure(Category::BadRequest, None, None, message.into(), None)
    }

    /// Treat a degraded reply as the failure it stands for.
    pub fn require<T>(&self, reply: Reply<T>) -> Result<T, ApiError> {
        match reply {
            Reply::Value(value) => Ok(value),
            Reply::Degraded(Degraded { category, response }) => Err(self.failure(
                category,
                response.as_ref().map(|r| r.status),
                None,
                format!("{category} where a value was required"),
                response,
            )),
        }
    }

    pub fn get(&self, outcome: CallOutcome) -> Result<Reply<Value>, ApiError> {
        Ok(match self.decode(outcome)? {
            Decoded::Body(body, _) => Reply::Value(body),
            Decoded::Degraded(degraded) => Reply::Degraded(degraded),
        })
    }

    /// Like `get`, then require a single entity object with an identifier.
    pub fn entity(&self, outcome: CallOutcome) -> Result<Reply<Entity>, ApiError> {
        let (body, response) = match self.decode(outcome)? {
            Decoded::Body(body, response) => (body, response),
            Decoded::Degraded(degraded) => return Ok(Reply::Degraded(degraded)),
        };
        let Value::Object(entity) = body else {
            return self.decide(
                Category::UnexpectedShape,
                Some(response.status),
                None,
                "expected a single entity object".to_string(),
                Some(response),
            );
        };
        if entity_id(&entity).is_none() {
            return Err(ApiError::Protocol {
                resource: self.resource.to_string(),
                violation: ProtocolViolation::EntityWithoutIdentifier,
            });
        }
        if is_removed(&entity) {
            return self.decide(
                Category::EntityRemoved,
                Some(response.status),
                None,
                "entity has been removed".to_string(),
                Some(response),
            );
        }
        Ok(Reply::Value(entity))
    }

    /// Yields the created identifier from the `X-Created` header.
    pub fn post(&self, outcome: CallOutcome) -> Result<Reply<String>, ApiError> {
        match outcome {
            CallOutcome::Success { response, .. } => {
                let created = response
                    .header("x-created")
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string);
                match created {
                    Some(id) => Ok(Reply::Value(id)),
                    None => self.decide(
                        Category::MissingCreatedId,
                        Some(response.status),
                        None,
                        "no created identifier in response".to_string(),
                        Some(response),
                    ),
                }
            }
            other => self.generic(other),
        }
    }

    /// Yields the location of the affected entity when the server names one.
    pub fn put(&self, outcome: CallOutcome) -> Result<Reply<Option<String>>, ApiError> {
        match outcome {
            CallOutcome::Success { response, .. } => Ok(Reply::Value(response.header("location").map(str::to_string))),
            CallOutcome::HttpError(response) if response.status == 303 => {
                let location = response.header("location").map(str::to_string);
                if let (Some(location), true) = (&location, self.suppression.suppresses(Category::SeeOther)) {
                    return Ok(Reply::Value(Some(location.clone())));
                }
                let message = match &location {
                    Some(location) => format!("see other: {location}"),
                    None => "see other without a location".to_string(),
                };
                self.decide(Category::SeeOther, Some(303), None, message, Some(response))
            }
            other => self.generic(other),
        }
    }

    pub fn delete(&self, outcome: CallOutcome) -> Result<Reply<()>, ApiError> {
        match outcome {
            CallOutcome::Success { .. } => Ok(Reply::Value(())),
            CallOutcome::HttpError(response) if response.status == 400 && reports_already_removed(&response) => {
                let message = error_message(&response).unwrap_or_default();
                self.decide(Category::AlreadyRemoved, Some(400), None, message, Some(response))
            }
            other => self.generic(other),
        }
    }

    fn decode(&self, outcome: CallOutcome) -> Result<Decoded, ApiError> {
        let (body, response) = match outcome {
            CallOutcome::Success {
                response,
                body: Some(body),
            } => (body, response),
            CallOutcome::Success { response, body: None } => {
                return self.degrade(
                    Category::UnexpectedShape,
                    Some(response.status),
                    None,
                    "no body decoded".to_string(),
                    Some(response),
                );
            }
            other => {
                return Ok(match self.generic::<std::convert::Infallible>(other)? {
                    Reply::Degraded(degraded) => Decoded::Degraded(degraded),
                    Reply::Value(never) => match never {},
                })
            }
        };

        if !(body.is_object() || body.is_array()) {
            return self.degrade(
                Category::UnexpectedShape,
                Some(response.status),
                None,
                format!("expected an object or array, got {}", json_kind(&body)),
                Some(response),
            );
        }
        if let Some(message) = embedded_error(&body) {
            return self.degrade(Category::EmbeddedError, Some(response.status), None, message, Some(response));
        }
        Ok(Decoded::Body(body, response))
    }

    /// Transport failures, status errors and malformed bodies, shared by all verbs.
    fn generic<T>(&self, outcome: CallOutcome) -> Result<Reply<T>, ApiError> {
        match outcome {
            CallOutcome::TransportFailure(err) => {
                self.decide(Category::Transport, None, Some(err.code), err.message, None)
            }
            CallOutcome::HttpError(response) => {
                let category = if response.status == 400 {
                    Category::BadRequest
                } else {
                    Category::HttpStatus
                };
                let message =
                    error_message(&response).unwrap_or_else(|| format!("unexpected status {}", response.status));
                self.decide(category, Some(response.status), None, message, Some(response))
            }
            CallOutcome::MalformedBody { response, reason } => {
                self.decide(Category::InvalidJson, Some(response.status), None, reason, Some(response))
            }
            CallOutcome::Success { response, .. } => self.decide(
                Category::UnexpectedShape,
                Some(response.status),
                None,
                "unexpected success".to_string(),
                Some(response),
            ),
        }
    }

    fn degrade(
        &self,
        category: Category,
        status: Option<u16>,
        transport_code: Option<String>,
        message: String,
        response: Option<HttpResponse>,
    ) -> Result<Decoded, ApiError> {
        Ok(
            match self.decide::<std::convert::Infallible>(category, status, transport_code, message, response)? {
                Reply::Degraded(degraded) => Decoded::Degraded(degraded),
                Reply::Value(never) => match never {},
            },
        )
    }

    fn decide<T>(
        &self,
        category: Category,
        status: Option<u16>,
        transport_code: Option<String>,
        message: String,
        response: Option<HttpResponse>,
    ) -> Result<Reply<T>, ApiError> {
        if self.suppression.suppresses(category) {
            warn!(
                method = %self.method,
                resource = self.resource,
                %category,
                status,
                %message,
                "suppressed call failure"
            );
            return Ok(Reply::Degraded(Degraded { category, response }));
        }
        Err(self.failure(category, status, transport_code, message, response))
    }

    fn failure(
        &self,
        category: Category,
        status: Option<u16>,
        transport_code: Option<String>,
        message: String,
        response: Option<HttpResponse>,
    ) -> ApiError {
        ApiError::Call(Box::new(CallFailure {
            category,
            method: self.method,
            resource: self.resource.to_string(),
            status,
            transport_code,
            message,
            response,
        }))
    }
}

/// The message of a `{"error": {"message": ...}}` body.
fn embedded_error(body: &Value) -> Option<String> {
    match body.get("error")? {
        Value::Object(error) => Some(
            error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unspecified error")
                .to_string(),
        ),
        Value::String(message) => Some(message.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn error_message(response: &HttpResponse) -> Option<String> {
    let body: Value = serde_json::from_str(&response.body).ok()?;
    embedded_error(&body)
}

fn reports_already_removed(response: &HttpResponse) -> bool {
    let Some(message) = error_message(response) else {
        return false;
    };
    let message = message.to_ascii_lowercase();
    message.contains("already") && (message.contains("removed") || message.contains("deleted"))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
