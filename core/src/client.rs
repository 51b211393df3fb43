//! Blocking client for the CRM REST API.
//!
//! # Design
//! `CrmClient` owns its transport, its default suppression policy and the
//! cursor of the list fetch in progress. Every call goes through the same
//! path: validate the resource, build an `HttpRequest`, execute it once,
//! turn the result into a `CallOutcome` and let a `Classifier` decide between
//! a value, a degraded reply and an error.
//!
//! List fetching always runs with `Suppression::NONE`: a page is either fully
//! validated or the call fails.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::classify::{CallOutcome, Classifier, Reply};
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest};
use crate::pager::{extract_embedded, PageCursor};
use crate::suppress::Suppression;
use crate::transport::Transport;
use crate::types::{Entity, Parameters};

/// Synchronous client for one API account.
#[derive(Debug)]
pub struct CrmClient<T> {
    base_url: String,
    access_token: Option<String>,
    suppression: Suppression,
    transport: T,
    cursor: Option<PageCursor>,
}

impl<T: Transport> CrmClient<T> {
    pub fn new(base_url: &str, transport: T) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: None,
            suppression: Suppression::default(),
            transport,
            cursor: None,
        }
    }

    pub fn from_config(config: &ClientConfig, transport: T) -> Self {
        let mut client = Self::new(&config.base_url, transport);
        client.access_token = config.access_token.clone();
        client.suppression = config.suppression;
        client
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Default policy for calls that pass no override.
    pub fn suppression(&self) -> Suppression {
        self.suppression
    }

    pub fn set_suppression(&mut self, suppression: Suppression) {
        self.suppression = suppression;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The request for `resource`, with the access token appended to the query.
    pub fn build_request(
        &self,
        method: HttpMethod,
        resource: &str,
        parameters: &Parameters,
        body: Option<String>,
    ) -> HttpRequest {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.extend_pairs(parameters.iter());
        if let Some(token) = &self.access_token {
            query.append_pair("access_token", token);
        }
        let query = query.finish();

        let mut url = format!("{}/{}", self.base_url, resource.trim_start_matches('/'));
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }

        let mut headers = vec![("accept".to_string(), "application/json".to_string())];
        if body.is_some() {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        HttpRequest {
            method,
            url,
            headers,
            body,
        }
    }

    /// Decoded JSON body of `resource`.
    pub fn get(
        &mut self,
        resource: &str,
        parameters: &Parameters,
        suppression: Option<Suppression>,
    ) -> Result<Reply<Value>, ApiError> {
        let classifier = Classifier::new(HttpMethod::Get, resource, suppression.unwrap_or(self.suppression));
        match self.call(HttpMethod::Get, resource, parameters, None) {
            Some(outcome) => classifier.get(outcome),
            None => classifier.reject("empty resource path"),
        }
    }

    /// A single entity; the body must be an object with an identifier.
    pub fn get_entity(
        &mut self,
        resource: &str,
        parameters: &Parameters,
        suppression: Option<Suppression>,
    ) -> Result<Reply<Entity>, ApiError> {
        let classifier = Classifier::new(HttpMethod::Get, resource, suppression.unwrap_or(self.suppression));
        match self.call(HttpMethod::Get, resource, parameters, None) {
            Some(outcome) => classifier.entity(outcome),
            None => classifier.reject("empty resource path"),
        }
    }

    /// First page of a list, replacing any list fetch in progress.
    pub fn get_entities(&mut self, resource: &str, parameters: &Parameters) -> Result<Vec<Entity>, ApiError> {
        self.cursor = None;
        let cursor = PageCursor::new(resource, parameters.clone())
            .map_err(|message| Classifier::new(HttpMethod::Get, resource, Suppression::NONE).rejection(message))?;
        let (records, cursor) = self.fetch_page(&cursor)?;
        self.cursor = Some(cursor);
        Ok(records)
    }

    /// Next page of the list fetch in progress; empty once it is complete.
    pub fn get_entities_next_batch(&mut self) -> Result<Vec<Entity>, ApiError> {
        let cursor = self.cursor.as_ref().ok_or(ApiError::NoCursor)?;
        if cursor.is_complete() {
            return Ok(Vec::new());
        }
        let cursor = cursor.clone();
        let (records, cursor) = self.fetch_page(&cursor)?;
        self.cursor = Some(cursor);
        Ok(records)
    }

    /// Fetch the page `cursor` points at without touching the client's own
    /// cursor. A complete cursor yields no records and no request.
    pub fn fetch_page(&mut self, cursor: &PageCursor) -> Result<(Vec<Entity>, PageCursor), ApiError> {
        if cursor.is_complete() {
            return Ok((Vec::new(), cursor.clone()));
        }
        let resource = cursor.resource.as_str();
        let classifier = Classifier::new(HttpMethod::Get, resource, Suppression::NONE);
        let outcome = self
            .call(HttpMethod::Get, resource, &cursor.page_parameters(), None)
            .ok_or_else(|| classifier.rejection("empty resource path"))?;
        let body = classifier.require(classifier.get(outcome)?)?;

        let (records, next) = cursor.advance(&body).map_err(|violation| ApiError::Protocol {
            resource: resource.to_string(),
            violation,
        })?;
        debug!(
            resource,
            start = cursor.next_start,
            count = records.len(),
            total = next.total,
            complete = next.is_complete(),
            "fetched page"
        );
        Ok((records, next))
    }

    /// True when no list fetch is in progress or the current one is exhausted.
    pub fn is_complete(&self) -> bool {
        self.cursor.as_ref().map_or(true, PageCursor::is_complete)
    }

    pub fn export_cursor(&self) -> Option<PageCursor> {
        self.cursor.clone()
    }

    pub fn import_cursor(&mut self, cursor: PageCursor) -> Result<(), ApiError> {
        if let Some(total) = cursor.total {
            if cursor.next_start > total {
                return Err(ApiError::InvalidCursor(format!(
                    "next start {} exceeds total {total}",
                    cursor.next_start
                )));
            }
        }
        info!(resource = %cursor.resource, next_start = cursor.next_start, "resuming list fetch");
        self.cursor = Some(cursor);
        Ok(())
    }

    /// The current cursor as an opaque string for another process.
    pub fn export_cursor_state(&self) -> Result<String, ApiError> {
        let cursor = self.cursor.as_ref().ok_or(ApiError::NoCursor)?;
        cursor
            .to_state()
            .map_err(|err| ApiError::SerializationError(err.to_string()))
    }

    pub fn import_cursor_state(&mut self, state: &str) -> Result<(), ApiError> {
        let cursor = PageCursor::from_state(state).map_err(ApiError::InvalidCursor)?;
        self.import_cursor(cursor)
    }

    /// Fetch `resource` strictly and extract the list embedded under `key`.
    pub fn get_embedded_entities(
        &mut self,
        resource: &str,
        key: &str,
        parameters: &Parameters,
        accept_partial: bool,
    ) -> Result<Vec<Entity>, ApiError> {
        let classifier = Classifier::new(HttpMethod::Get, resource, Suppression::NONE);
        let outcome = self
            .call(HttpMethod::Get, resource, parameters, None)
            .ok_or_else(|| classifier.rejection("empty resource path"))?;
        let entity = classifier.require(classifier.entity(outcome)?)?;
        extract_embedded(&entity, key, accept_partial).map_err(|violation| ApiError::Protocol {
            resource: format!("{resource}#{key}"),
            violation,
        })
    }

    /// Create an entity; yields the identifier from `X-Created`.
    pub fn post<D: Serialize + ?Sized>(
        &mut self,
        resource: &str,
        data: &D,
        suppression: Option<Suppression>,
    ) -> Result<Reply<String>, ApiError> {
        let body = to_json(data)?;
        let classifier = Classifier::new(HttpMethod::Post, resource, suppression.unwrap_or(self.suppression));
        match self.call(HttpMethod::Post, resource, &Parameters::new(), Some(body)) {
            Some(outcome) => classifier.post(outcome),
            None => classifier.reject("empty resource path"),
        }
    }

    /// Update an entity; yields the location of the affected entity when the
    /// server reports one.
    pub fn put<D: Serialize + ?Sized>(
        &mut self,
        resource: &str,
        data: &D,
        parameters: &Parameters,
        suppression: Option<Suppression>,
    ) -> Result<Reply<Option<String>>, ApiError> {
        let body = to_json(data)?;
        let classifier = Classifier::new(HttpMethod::Put, resource, suppression.unwrap_or(self.suppression));
        match self.call(HttpMethod::Put, resource, parameters, Some(body)) {
            Some(outcome) => classifier.put(outcome),
            None => classifier.reject("empty resource path"),
        }
    }

    pub fn delete(&mut self, resource: &str, suppression: Option<Suppression>) -> Result<Reply<()>, ApiError> {
        let classifier = Classifier::new(HttpMethod::Delete, resource, suppression.unwrap_or(self.suppression));
        match self.call(HttpMethod::Delete, resource, &Parameters::new(), None) {
            Some(outcome) => classifier.delete(outcome),
            None => classifier.reject("empty resource path"),
        }
    }

    /// One exchange with the transport; `None` when the resource is empty and
    /// nothing was sent.
    fn call(
        &mut self,
        method: HttpMethod,
        resource: &str,
        parameters: &Parameters,
        body: Option<String>,
    ) -> Option<CallOutcome> {
        if resource.trim().trim_matches('/').is_empty() {
            debug!(%method, "rejecting call without a resource");
            return None;
        }
        let request = self.build_request(method, resource, parameters, body);
        debug!(%method, resource, "sending request");
        let result = self.transport.execute(request);
        Some(CallOutcome::from_exchange(method, result))
    }
}

fn to_json<D: Serialize + ?Sized>(data: &D) -> Result<String, ApiError> {
    serde_json::to_string(data).map_err(|err| ApiError::SerializationError(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use crate::transport::TransportError;
    use serde_json::json;

    /// Records requests and answers each with the same response.
    struct Echo {
        requests: Vec<HttpRequest>,
        response: HttpResponse,
    }

    impl Transport for Echo {
        fn execute(&mut self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.push(request);
            Ok(self.response.clone())
        }
    }

    fn client(response: HttpResponse) -> CrmClient<Echo> {
        CrmClient::new(
            "https://api.example/v3/",
            Echo {
                requests: Vec::new(),
                response,
            },
        )
    }

    #[test]
    fn build_request_encodes_query_and_token() {
        let client = client(HttpResponse::new(200, "{}")).with_access_token("t0k");
        let params = Parameters::new().with("fields[]", "city==Amsterdam").with("limit", "10");
        let req = client.build_request(HttpMethod::Get, "/database/1/profiles", &params, None);
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(
            req.url,
            "https://api.example/v3/database/1/profiles?fields%5B%5D=city%3D%3DAmsterdam&limit=10&access_token=t0k"
        );
        assert!(req.body.is_none());
        assert_eq!(req.headers, vec![("accept".to_string(), "application/json".to_string())]);
    }

    #[test]
    fn build_request_without_query() {
        let client = client(HttpResponse::new(200, "{}"));
        let req = client.build_request(HttpMethod::Delete, "profile/4", &Parameters::new(), None);
        assert_eq!(req.url, "https://api.example/v3/profile/4");
    }

    #[test]
    fn post_sends_json_body() {
        let mut client = client(HttpResponse::new(201, "").with_header("x-created", "55"));
        let reply = client
            .post("database/1/profiles", &json!({"fields": {"email": "a@b.c"}}), None)
            .unwrap();
        assert_eq!(reply.value().as_deref(), Some("55"));

        let sent = &client.transport().requests[0];
        assert_eq!(sent.method, HttpMethod::Post);
        let body: Value = serde_json::from_str(sent.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["fields"]["email"], "a@b.c");
        assert!(sent
            .headers
            .contains(&("content-type".to_string(), "application/json".to_string())));
    }

    #[test]
    fn empty_resource_never_reaches_transport() {
        let mut client = client(HttpResponse::new(200, "{}"));
        let err = client.get("  ", &Parameters::new(), None).unwrap_err();
        assert_eq!(err.category(), Some(crate::suppress::Category::BadRequest));

        let reply = client
            .delete("", Some(Suppression::NONE.with(crate::suppress::Category::BadRequest)))
            .unwrap();
        assert!(reply.is_degraded());
        assert!(client.transport().requests.is_empty());
    }

    #[test]
    fn per_call_override_replaces_default() {
        let mut client = client(HttpResponse::new(201, ""));
        assert!(client.post("r", &json!({}), None).unwrap().is_degraded());
        assert!(client.post("r", &json!({}), Some(Suppression::NONE)).is_err());
        assert_eq!(client.suppression(), Suppression::default());

        client.set_suppression(Suppression::NONE);
        assert!(client.post("r", &json!({}), None).is_err());
    }

    #[test]
    fn next_batch_without_list_fetch() {
        let mut client = client(HttpResponse::new(200, "{}"));
        assert!(client.is_complete());
        assert!(matches!(client.get_entities_next_batch(), Err(ApiError::NoCursor)));
        assert!(matches!(client.export_cursor_state(), Err(ApiError::NoCursor)));
    }

    #[test]
    fn invalid_start_parameter_is_rejected() {
        let mut client = client(HttpResponse::new(200, "{}"));
        let err = client
            .get_entities("database/1/profiles", &Parameters::new().with("start", "abc"))
            .unwrap_err();
        assert_eq!(err.category(), Some(crate::suppress::Category::BadRequest));
        assert!(client.transport().requests.is_empty());
    }

    #[test]
    fn import_rejects_cursor_past_total() {
        let mut client = client(HttpResponse::new(200, "{}"));
        let err = client
            .import_cursor_state(r#"{"resource":"r","parameters":[],"total":2,"next_start":5}"#)
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidCursor(_)));
        assert!(matches!(client.import_cursor_state("not json"), Err(ApiError::InvalidCursor(_))));
    }

    #[test]
    fn embedded_entities() {
        let body = json!({
            "ID": 1,
            "name": "newsletter",
            "collections": {"start": 0, "limit": 1000, "count": 1, "total": 1, "data": [{"ID": 9, "name": "orders"}]},
        });
        let mut client = client(HttpResponse::new(200, body.to_string()));
        let collections = client
            .get_embedded_entities("database/1", "collections", &Parameters::new(), false)
            .unwrap();
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0]["name"], "orders");

        let err = client
            .get_embedded_entities("database/1", "interests", &Parameters::new(), false)
            .unwrap_err();
        assert!(err.is_protocol_violation());
    }
}
