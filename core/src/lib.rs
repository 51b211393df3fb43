//! Synchronous client core for a CRM/marketing REST API.
//!
//! # Overview
//! Three layers sit between a caller and the remote API:
//! - `normalize` predicts how the remote coerces values written to typed
//!   fields, so callers can skip updates that would change nothing.
//! - `classify` turns each raw call outcome into a value, a degraded reply or
//!   a typed error, under a per-client or per-call `Suppression` policy.
//! - `pager` validates list envelopes and advances a serializable
//!   `PageCursor`, which `CrmClient` drives for paginated fetches.
//!
//! # Design
//! - The network sits behind the `Transport` trait; `UreqTransport` is the
//!   blocking implementation.
//! - `CrmClient` methods take `&mut self`: the client owns mutable cursor and
//!   policy state and is meant for one thread at a time.
//! - Entities are open `serde_json` maps; only `id`/`ID` and `removed` are
//!   interpreted.

pub mod classify;
pub mod client;
pub mod config;
mod datetime;
pub mod error;
pub mod http;
pub mod normalize;
pub mod pager;
pub mod suppress;
pub mod transport;
pub mod types;

pub use classify::{CallOutcome, Classifier, Degraded, Reply};
pub use client::CrmClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{ApiError, CallFailure, FieldSpecError, ProtocolViolation};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use normalize::{is_empty, needs_update, normalize, FieldSpec, FieldType, NormalizedValue, Normalizer, ValueOrigin};
pub use pager::{extract_embedded, validate_envelope, PageCursor};
pub use suppress::{Category, Family, Suppression};
pub use transport::{Transport, TransportError, UreqTransport};
pub use types::{entity_id, is_removed, Entity, Parameters};
