//! Database row types. These map directly to SQLite rows and are kept
//! distinct from the finder-types API models so the DB layer stays
//! independent of the wire format.

use finder_types::models::CaseStatus;

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub created_at: String,
}

pub struct CaseRow {
    pub id: String,
    pub reporter_id: String,
    pub name: String,
    pub age: i64,
    pub gender: String,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub hair_color: String,
    pub eye_color: String,
    pub last_seen_date: String,
    pub last_seen_location: String,
    pub description: String,
    pub photo_url: String,
    pub status: String,
    pub created_at: String,
    /// Joined from `contacts`; `None` when the case has no contact row.
    pub contact: Option<ContactRow>,
}

pub struct ContactRow {
    pub contact_name: String,
    pub relationship: String,
    pub phone: String,
    pub email: String,
}

/// Values for a new `cases` row. Status always starts as `missing`.
pub struct NewCase<'a> {
    pub id: &'a str,
    pub reporter_id: &'a str,
    pub name: &'a str,
    pub age: i64,
    pub gender: &'a str,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub hair_color: &'a str,
    pub eye_color: &'a str,
    pub last_seen_date: &'a str,
    pub last_seen_location: &'a str,
    pub description: &'a str,
    pub photo_url: &'a str,
}

pub struct NewContact<'a> {
    pub id: &'a str,
    pub contact_name: &'a str,
    pub relationship: &'a str,
    pub phone: &'a str,
    pub email: &'a str,
}

/// Predicates for case search. Empty fields skip their predicate.
#[derive(Debug, Clone, Default)]
pub struct CaseFilter {
    pub status: Option<CaseStatus>,
    pub term: Option<String>,
}

impl CaseFilter {
    /// LIKE pattern for the free-text term, with `%`, `_` and the escape
    /// character itself matched literally. `None` for a blank term.
    pub fn like_pattern(&self) -> Option<String> {
        let term = self.term.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
        let mut pattern = String::with_capacity(term.len() + 2);
        pattern.push('%');
        for ch in term.chars() {
            if matches!(ch, '\\' | '%' | '_') {
                pattern.push('\\');
            }
            pattern.push(ch);
        }
        pattern.push('%');
        Some(pattern)
    }
}
