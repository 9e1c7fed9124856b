//! Related entities linked many-to-many from movies.

use serde::{Deserialize, Serialize};

use crate::ids::PersonId;

/// The link-table families hanging off a movie. Each related row carries a
/// canonical, case-insensitively unique name; orphan cleanup removes rows
/// with zero back-references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Actor,
    Genre,
    Director,
    Writer,
    Studio,
    Country,
    Tag,
}

impl RelationKind {
    pub const ALL: [RelationKind; 7] = [
        RelationKind::Actor,
        RelationKind::Genre,
        RelationKind::Director,
        RelationKind::Writer,
        RelationKind::Studio,
        RelationKind::Country,
        RelationKind::Tag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Actor => "actor",
            RelationKind::Genre => "genre",
            RelationKind::Director => "director",
            RelationKind::Writer => "writer",
            RelationKind::Studio => "studio",
            RelationKind::Country => "country",
            RelationKind::Tag => "tag",
        }
    }
}

/// A named related row (genre, studio, country, tag, director, writer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedEntity {
    pub id: PersonId,
    pub name: String,
}

/// An actor credit on a movie, with billing order and optional thumb.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastMember {
    pub person_id: PersonId,
    pub name: String,
    pub role: Option<String>,
    pub order: i32,
    pub thumb_url: Option<String>,
    pub external_person_id: Option<i64>,
}

/// A crew credit (director or writer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewMember {
    pub person_id: PersonId,
    pub name: String,
    pub kind: RelationKind,
}

/// Canonical normalization used when de-duplicating people by name:
/// lowercase with interior whitespace collapsed.
pub fn normalize_person_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_names_normalize_case_and_whitespace() {
        assert_eq!(normalize_person_name("  Leonardo   DiCaprio "), "leonardo dicaprio");
        assert_eq!(
            normalize_person_name("Leonardo DiCaprio"),
            normalize_person_name("LEONARDO DICAPRIO")
        );
    }
}
