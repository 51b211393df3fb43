//! List fetching and classification against a scripted transport.
//!
//! The transport replays canned responses in order and records every request,
//! so these tests pin down exactly what the client sends for each page and how
//! it reacts to malformed or failing exchanges.

use std::collections::VecDeque;

use crm_core::{
    entity_id, ApiError, Category, CrmClient, HttpRequest, HttpResponse, Parameters, ProtocolViolation, Suppression,
    Transport, TransportError,
};
use serde_json::{json, Value};

#[derive(Default)]
struct Scripted {
    replies: VecDeque<Result<HttpResponse, TransportError>>,
    requests: Vec<HttpRequest>,
}

impl Scripted {
    fn new() -> Self {
        Self::default()
    }

    fn reply(mut self, response: HttpResponse) -> Self {
        self.replies.push_back(Ok(response));
        self
    }

    fn json(self, status: u16, body: Value) -> Self {
        self.reply(HttpResponse::new(status, body.to_string()).with_header("content-type", "application/json"))
    }

    fn fail(mut self, code: &str) -> Self {
        self.replies.push_back(Err(TransportError::new(code, "scripted failure")));
        self
    }
}

impl Transport for Scripted {
    fn execute(&mut self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.push(request);
        self.replies
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new("script_exhausted", "no reply left")))
    }
}

fn envelope(start: u64, limit: u64, total: Option<u64>, count: u64) -> Value {
    let data: Vec<Value> = (start..start + count)
        .map(|i| json!({"ID": i + 1, "fields": {"email": format!("user{i}@example.com")}}))
        .collect();
    let mut body = json!({"start": start, "limit": limit, "count": count, "data": data});
    if let Some(total) = total {
        body["total"] = json!(total);
    }
    body
}

fn client(transport: Scripted) -> CrmClient<Scripted> {
    CrmClient::new("https://api.example/v3", transport)
}

fn start_of(request: &HttpRequest) -> Option<String> {
    let (_, query) = request.url.split_once('?')?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "start")
        .map(|(_, value)| value.into_owned())
}

#[test]
fn pages_sum_to_total() {
    let transport = Scripted::new()
        .json(200, envelope(0, 25, Some(57), 25))
        .json(200, envelope(25, 25, Some(57), 25))
        .json(200, envelope(50, 25, Some(57), 7));
    let mut client = client(transport);
    let parameters = Parameters::new().with("limit", "25");

    let mut all = client.get_entities("database/1/profiles", &parameters).unwrap();
    let mut sizes = vec![all.len()];
    while !client.is_complete() {
        let batch = client.get_entities_next_batch().unwrap();
        sizes.push(batch.len());
        all.extend(batch);
    }

    assert_eq!(sizes, vec![25, 25, 7]);
    assert_eq!(all.len(), 57);
    let starts: Vec<Option<String>> = client.transport().requests.iter().map(start_of).collect();
    assert_eq!(
        starts,
        vec![Some("0".to_string()), Some("25".to_string()), Some("50".to_string())]
    );

    // Exhausted: no further request is made.
    assert!(client.get_entities_next_batch().unwrap().is_empty());
    assert_eq!(client.transport().requests.len(), 3);
}

#[test]
fn total_is_inferred_from_short_page() {
    let transport = Scripted::new()
        .json(200, envelope(0, 10, None, 10))
        .json(200, envelope(10, 10, None, 3));
    let mut client = client(transport);

    client.get_entities("database/1/profiles", &Parameters::new().with("limit", "10")).unwrap();
    assert!(!client.is_complete());
    assert_eq!(client.get_entities_next_batch().unwrap().len(), 3);
    assert!(client.is_complete());
    assert_eq!(client.export_cursor().unwrap().total, Some(13));
}

#[test]
fn start_parameter_sets_first_offset() {
    let transport = Scripted::new().json(200, envelope(40, 20, Some(45), 5));
    let mut client = client(transport);

    let records = client
        .get_entities("database/1/profiles", &Parameters::new().with("start", "40").with("limit", "20"))
        .unwrap();
    assert_eq!(entity_id(&records[0]).as_deref(), Some("41"));
    assert!(client.is_complete());
    assert_eq!(start_of(&client.transport().requests[0]).as_deref(), Some("40"));
}

#[test]
fn count_mismatch_is_a_protocol_violation_even_when_everything_is_suppressed() {
    let mut body = envelope(0, 25, Some(57), 25);
    body["count"] = json!(24);
    let mut client = client(Scripted::new().json(200, body));
    client.set_suppression(Suppression::ALL);

    let err = client.get_entities("database/1/profiles", &Parameters::new()).unwrap_err();
    assert!(err.is_protocol_violation());
    assert!(matches!(
        err,
        ApiError::Protocol {
            violation: ProtocolViolation::CountMismatch { count: 24, len: 25 },
            ..
        }
    ));
    assert!(client.is_complete());
}

#[test]
fn stalled_page_is_a_protocol_violation() {
    let transport = Scripted::new()
        .json(200, envelope(0, 10, Some(30), 10))
        .json(200, envelope(10, 10, Some(30), 0));
    let mut client = client(transport);

    client.get_entities("database/1/profiles", &Parameters::new()).unwrap();
    let err = client.get_entities_next_batch().unwrap_err();
    assert!(matches!(
        err,
        ApiError::Protocol {
            violation: ProtocolViolation::StalledPage { start: 10, total: 30 },
            ..
        }
    ));
}

#[test]
fn page_without_total_cannot_pass_the_known_total() {
    let transport = Scripted::new()
        .json(200, envelope(0, 25, Some(30), 25))
        .json(200, envelope(25, 25, None, 25));
    let mut client = client(transport);
    client.set_suppression(Suppression::ALL);

    client.get_entities("database/1/profiles", &Parameters::new()).unwrap();
    assert!(!client.is_complete());
    let err = client.get_entities_next_batch().unwrap_err();
    assert!(matches!(
        err,
        ApiError::Protocol {
            violation: ProtocolViolation::PastKnownTotal { next_start: 50, total: 30 },
            ..
        }
    ));

    // The cursor stays where it was.
    let cursor = client.export_cursor().unwrap();
    assert_eq!((cursor.next_start, cursor.total), (25, Some(30)));
}

#[test]
fn known_total_survives_pages_that_omit_it() {
    let transport = Scripted::new()
        .json(200, envelope(0, 10, Some(25), 10))
        .json(200, envelope(10, 10, None, 10))
        .json(200, envelope(20, 10, None, 5));
    let mut client = client(transport);

    let mut seen = client.get_entities("database/1/profiles", &Parameters::new()).unwrap().len();
    seen += client.get_entities_next_batch().unwrap().len();
    assert!(!client.is_complete());
    assert_eq!(client.export_cursor().unwrap().total, Some(25));
    seen += client.get_entities_next_batch().unwrap().len();
    assert!(client.is_complete());
    assert_eq!(seen, 25);
}

#[test]
fn list_failures_are_raised_regardless_of_policy() {
    let mut client = client(Scripted::new().fail("timeout"));
    client.set_suppression(Suppression::ALL);

    let err = client.get_entities("database/1/profiles", &Parameters::new()).unwrap_err();
    assert_eq!(err.category(), Some(Category::Transport));
}

#[test]
fn next_batch_without_a_fetch_is_an_error() {
    let mut client = client(Scripted::new());
    assert!(matches!(client.get_entities_next_batch(), Err(ApiError::NoCursor)));
    assert!(client.transport().requests.is_empty());
}

#[test]
fn suppression_categories_are_independent() {
    let malformed = HttpResponse::new(200, "{not json").with_header("content-type", "application/json");
    let transport = Scripted::new()
        .fail("connection_failed")
        .reply(malformed.clone())
        .fail("connection_failed")
        .reply(malformed);
    let mut client = client(transport);

    let transport_only = Suppression::NONE.with(Category::Transport);
    let reply = client.get("profile/1", &Parameters::new(), Some(transport_only)).unwrap();
    assert_eq!(reply.degraded().map(|d| d.category), Some(Category::Transport));
    assert!(reply.degraded().unwrap().response.is_none());
    let err = client.get("profile/1", &Parameters::new(), Some(transport_only)).unwrap_err();
    assert_eq!(err.category(), Some(Category::InvalidJson));

    let json_only = Suppression::NONE.with(Category::InvalidJson);
    let err = client.get("profile/1", &Parameters::new(), Some(json_only)).unwrap_err();
    assert_eq!(err.category(), Some(Category::Transport));
    let reply = client.get("profile/1", &Parameters::new(), Some(json_only)).unwrap();
    let degraded = reply.degraded().unwrap();
    assert_eq!(degraded.category, Category::InvalidJson);
    assert_eq!(degraded.response.as_ref().map(|r| r.body.as_str()), Some("{not json"));
}

#[test]
fn exported_cursor_yields_the_same_next_page() {
    let first_page = envelope(0, 10, Some(25), 10);
    let second_page = envelope(10, 10, Some(25), 10);

    let mut first = client(Scripted::new().json(200, first_page).json(200, second_page.clone()));
    let parameters = Parameters::new().with("limit", "10").with("fields[]", "city==Amsterdam");
    first.get_entities("database/1/profiles", &parameters).unwrap();
    let state = first.export_cursor_state().unwrap();
    let expected = first.get_entities_next_batch().unwrap();

    let mut resumed = client(Scripted::new().json(200, second_page));
    resumed.import_cursor_state(&state).unwrap();
    let batch = resumed.get_entities_next_batch().unwrap();

    assert_eq!(batch, expected);
    assert_eq!(resumed.transport().requests[0].url, first.transport().requests[1].url);
    assert_eq!(resumed.export_cursor(), first.export_cursor());
}

#[test]
fn inconsistent_cursor_state_is_rejected() {
    let mut client = client(Scripted::new());
    let state = json!({
        "resource": "database/1/profiles",
        "parameters": [],
        "total": 10,
        "next_start": 20
    })
    .to_string();
    assert!(matches!(client.import_cursor_state(&state), Err(ApiError::InvalidCursor(_))));
    assert!(matches!(client.import_cursor_state("garbage"), Err(ApiError::InvalidCursor(_))));
    assert!(matches!(client.export_cursor_state(), Err(ApiError::NoCursor)));
}

#[test]
fn embedded_list_must_be_complete_unless_partial_is_accepted() {
    let entity = json!({
        "ID": 1,
        "collections": {"start": 0, "limit": 2, "count": 2, "total": 5, "data": [{"ID": 10}, {"ID": 11}]}
    });
    let transport = Scripted::new().json(200, entity.clone()).json(200, entity);
    let mut client = client(transport);

    let err = client
        .get_embedded_entities("database/1", "collections", &Parameters::new(), false)
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::Protocol {
            violation: ProtocolViolation::IncompleteEmbeddedList { count: 2, total: 5 },
            ..
        }
    ));

    let partial = client
        .get_embedded_entities("database/1", "collections", &Parameters::new(), true)
        .unwrap();
    assert_eq!(partial.len(), 2);
}
