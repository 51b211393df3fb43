//! List envelope validation and the resumable page cursor.
//!
//! # Design
//! `PageCursor` is plain serializable data: which resource and parameters a
//! list fetch uses, the last known total and where the next page starts.
//! Advancing a cursor is a pure function of the cursor and one response body,
//! so a cursor exported from one process continues identically in another.
//!
//! Every envelope is checked before its records are trusted. A failed check
//! is a `ProtocolViolation`; no partial page is ever returned.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolViolation;
use crate::types::{entity_id, Entity, Parameters};

/// The paging metadata of one validated envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub start: u64,
    pub limit: u64,
    pub count: u64,
    pub total: Option<u64>,
}

/// A validated list page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub info: PageInfo,
    pub records: Vec<Entity>,
}

/// Check `body` against the envelope invariants and extract its records.
pub fn validate_envelope(body: &Value, expected_start: u64) -> Result<Page, ProtocolViolation> {
    let Value::Object(envelope) = body else {
        return Err(ProtocolViolation::NotAnEnvelope(match body {
            Value::Array(_) => "an array",
            Value::String(_) => "a string",
            Value::Number(_) => "a number",
            Value::Bool(_) => "a boolean",
            _ => "null",
        }));
    };

    let field = |name: &'static str| {
        envelope
            .get(name)
            .and_then(Value::as_u64)
            .ok_or(ProtocolViolation::BadEnvelopeField(name))
    };
    let start = field("start")?;
    let limit = field("limit")?;
    let count = field("count")?;
    let total = match envelope.get("total") {
        None | Some(Value::Null) => None,
        Some(_) => Some(field("total")?),
    };
    let data = envelope
        .get("data")
        .and_then(Value::as_array)
        .ok_or(ProtocolViolation::MissingData)?;

    if count != data.len() as u64 {
        return Err(ProtocolViolation::CountMismatch { count, len: data.len() });
    }
    if start != expected_start {
        return Err(ProtocolViolation::StartMismatch {
            expected: expected_start,
            actual: start,
        });
    }
    if count > limit {
        return Err(ProtocolViolation::CountExceedsLimit { count, limit });
    }
    let end = start
        .checked_add(count)
        .ok_or(ProtocolViolation::OffsetOverflow { start, count })?;
    if let Some(total) = total {
        if end > total {
            return Err(ProtocolViolation::BeyondTotal { start, count, total });
        }
    }

    let records = data
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let Value::Object(entity) = record else {
                return Err(ProtocolViolation::RecordNotObject { index });
            };
            if entity_id(entity).is_none() {
                return Err(ProtocolViolation::MissingIdentifier { index });
            }
            Ok(entity.clone())
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        info: PageInfo {
            start,
            limit,
            count,
            total,
        },
        records,
    })
}

/// Extract a list nested inside an entity, such as a database's collections.
///
/// Embedded lists have no cursor: they must start at 0 and, unless
/// `accept_partial` is set, hold every record in this single page.
pub fn extract_embedded(entity: &Entity, key: &str, accept_partial: bool) -> Result<Vec<Entity>, ProtocolViolation> {
    let body = entity
        .get(key)
        .ok_or_else(|| ProtocolViolation::MissingEmbeddedList(key.to_string()))?;
    let page = validate_envelope(body, 0)?;
    if !accept_partial {
        let PageInfo { count, limit, total, .. } = page.info;
        match total {
            Some(total) if count < total => {
                return Err(ProtocolViolation::IncompleteEmbeddedList { count, total });
            }
            None if count >= limit && count > 0 => {
                return Err(ProtocolViolation::UnboundedEmbeddedList { limit });
            }
            _ => {}
        }
    }
    Ok(page.records)
}

/// Progress through one paginated list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub resource: String,
    /// Parameters of the first request, without the paging `start`.
    pub parameters: Parameters,
    /// Last known total. When the server omits it, a short page fixes it at
    /// the number of records seen.
    pub total: Option<u64>,
    pub next_start: u64,
}

impl PageCursor {
    /// A cursor positioned before the first page. A `start` parameter, if
    /// present, is taken as the first offset.
    pub fn new(resource: impl Into<String>, parameters: Parameters) -> Result<Self, String> {
        let next_start = match parameters.get("start") {
            None => 0,
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| format!("start parameter '{raw}' is not a non-negative integer"))?,
        };
        let parameters = parameters.iter().filter(|(key, _)| *key != "start").collect();
        Ok(Self {
            resource: resource.into(),
            parameters,
            total: None,
            next_start,
        })
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.total, Some(total) if self.next_start >= total)
    }

    /// Parameters for the next page request.
    pub fn page_parameters(&self) -> Parameters {
        let mut parameters = self.parameters.clone();
        parameters.set("start", self.next_start.to_string());
        parameters
    }

    /// Validate the response to `page_parameters()` and move past it.
    pub fn advance(&self, body: &Value) -> Result<(Vec<Entity>, PageCursor), ProtocolViolation> {
        let page = validate_envelope(body, self.next_start)?;
        let PageInfo { start, limit, count, total } = page.info;
        let next_start = start
            .checked_add(count)
            .ok_or(ProtocolViolation::OffsetOverflow { start, count })?;

        // An envelope without a total keeps the one already known.
        let total = match (total, self.total) {
            (Some(total), _) => {
                if count == 0 && next_start < total {
                    return Err(ProtocolViolation::StalledPage { start, total });
                }
                Some(total)
            }
            (None, Some(known)) if next_start > known => {
                return Err(ProtocolViolation::PastKnownTotal { next_start, total: known });
            }
            (None, _) if count < limit || count == 0 => Some(next_start),
            (None, known) => known,
        };

        let cursor = PageCursor {
            resource: self.resource.clone(),
            parameters: self.parameters.clone(),
            total,
            next_start,
        };
        Ok((page.records, cursor))
    }

    /// Opaque form for handing the cursor to another process.
    pub fn to_state(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_state(state: &str) -> Result<Self, String> {
        let cursor: PageCursor = serde_json::from_str(state).map_err(|err| err.to_string())?;
        if let Some(total) = cursor.total {
            if cursor.next_start > total {
                return Err(format!("next start {} exceeds total {total}", cursor.next_start));
            }
        }
        Ok(cursor)
    }
}
