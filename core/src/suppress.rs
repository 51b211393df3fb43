//! Failure categories and the policy deciding which of them are raised.
//!
//! # Design
//! Each category is a named flag on `Suppression`. Callers compose policies by
//! toggling flags individually, e.g. "never hide transport errors but accept a
//! missing created identifier". The client keeps one policy as its default
//! and every call may pass an override that replaces it for that call only.
//!
//! Protocol violations have no flag: they are always raised.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A classified failure of one outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// No response was obtained (connection refused, timeout, ...).
    Transport,
    /// Status 400.
    BadRequest,
    /// Any other status outside 2xx that no other category names.
    HttpStatus,
    /// GET body declared as JSON but not parseable.
    InvalidJson,
    /// GET body parsed but is neither an object nor an array.
    UnexpectedShape,
    /// GET 2xx body carrying `{"error": {"message": ...}}`.
    EmbeddedError,
    /// Entity returned with a non-empty `removed` marker.
    EntityRemoved,
    /// POST succeeded without an `X-Created` header.
    MissingCreatedId,
    /// PUT answered with 303 See Other.
    SeeOther,
    /// DELETE answered 400 because the entity was already removed.
    AlreadyRemoved,
}

/// The broad family a category belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Transport,
    Application,
    AmbiguousSuccess,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Transport,
        Category::BadRequest,
        Category::HttpStatus,
        Category::InvalidJson,
        Category::UnexpectedShape,
        Category::EmbeddedError,
        Category::EntityRemoved,
        Category::MissingCreatedId,
        Category::SeeOther,
        Category::AlreadyRemoved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Transport => "transport",
            Category::BadRequest => "bad_request",
            Category::HttpStatus => "http_status",
            Category::InvalidJson => "invalid_json",
            Category::UnexpectedShape => "unexpected_shape",
            Category::EmbeddedError => "embedded_error",
            Category::EntityRemoved => "entity_removed",
            Category::MissingCreatedId => "missing_created_id",
            Category::SeeOther => "see_other",
            Category::AlreadyRemoved => "already_removed",
        }
    }

    pub fn family(self) -> Family {
        match self {
            Category::Transport => Family::Transport,
            Category::MissingCreatedId | Category::SeeOther => Family::AmbiguousSuccess,
            _ => Family::Application,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which categories are returned as degraded values instead of raised.
///
/// `Default` suppresses only the ambiguous-success categories: a POST without
/// a created identifier and a PUT answered with 303.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Suppression {
    pub transport: bool,
    pub bad_request: bool,
    pub http_status: bool,
    pub invalid_json: bool,
    pub unexpected_shape: bool,
    pub embedded_error: bool,
    pub entity_removed: bool,
    pub missing_created_id: bool,
    pub see_other: bool,
    pub already_removed: bool,
}

impl Suppression {
    /// Raise everything.
    pub const NONE: Suppression = Suppression {
        transport: false,
        bad_request: false,
        http_status: false,
        invalid_json: false,
        unexpected_shape: false,
        embedded_error: false,
        entity_removed: false,
        missing_created_id: false,
        see_other: false,
        already_removed: false,
    };

    /// Degrade everything that can be degraded.
    pub const ALL: Suppression = Suppression {
        transport: true,
        bad_request: true,
        http_status: true,
        invalid_json: true,
        unexpected_shape: true,
        embedded_error: true,
        entity_removed: true,
        missing_created_id: true,
        see_other: true,
        already_removed: true,
    };

    pub fn suppresses(&self, category: Category) -> bool {
        *self.flag(category)
    }

    pub fn with(mut self, category: Category) -> Self {
        *self.flag_mut(category) = true;
        self
    }

    pub fn without(mut self, category: Category) -> Self {
        *self.flag_mut(category) = false;
        self
    }

    pub fn set(&mut self, category: Category, suppressed: bool) {
        *self.flag_mut(category) = suppressed;
    }

    /// The suppressed categories, in declaration order.
    pub fn categories(&self) -> Vec<Category> {
        Category::ALL.into_iter().filter(|c| self.suppresses(*c)).collect()
    }

    fn flag(&self, category: Category) -> &bool {
        match category {
            Category::Transport => &self.transport,
            Category::BadRequest => &self.bad_request,
            Category::HttpStatus => &self.http_status,
            Category::InvalidJson => &self.invalid_json,
            Category::UnexpectedShape => &self.unexpected_shape,
            Category::EmbeddedError => &self.embedded_error,
            Category::EntityRemoved => &self.entity_removed,
            Category::MissingCreatedId => &self.missing_created_id,
            Category::SeeOther => &self.see_other,
            Category::AlreadyRemoved => &self.already_removed,
        }
    }

    fn flag_mut(&mut self, category: Category) -> &mut bool {
        match category {
            Category::Transport => &mut self.transport,
            Category::BadRequest => &mut self.bad_request,
            Category::HttpStatus => &mut self.http_status,
            Category::InvalidJson => &mut self.invalid_json,
            Category::UnexpectedShape => &mut self.unexpected_shape,
            Category::EmbeddedError => &mut self.embedded_error,
            Category::EntityRemoved => &mut self.entity_removed,
            Category::MissingCreatedId => &mut self.missing_created_id,
            Category::SeeOther => &mut self.see_other,
            Category::AlreadyRemoved => &mut self.already_removed,
        }
    }
}

impl Default for Suppression {
    fn default() -> Self {
        Suppression::NONE
            .with(Category::MissingCreatedId)
            .with(Category::SeeOther)
    }
}

impl FromIterator<Category> for Suppression {
    fn from_iter<I: IntoIterator<Item = Category>>(iter: I) -> Self {
        iter.into_iter().fold(Suppression::NONE, Suppression::with)
    }
}
