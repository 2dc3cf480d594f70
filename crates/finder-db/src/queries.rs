use crate::Database;
use crate::models::{CaseFilter, CaseRow, ContactRow, NewCase, NewContact, UserRow};
use anyhow::{Result, anyhow};
use finder_types::models::CaseStatus;
use rusqlite::{Connection, Row, ffi};
use tracing::warn;

const CASE_COLUMNS: &str = "
    c.id, c.reporter_id, c.name, c.age, c.gender, c.height_cm, c.weight_kg,
    c.hair_color, c.eye_color, c.last_seen_date, c.last_seen_location,
    c.description, c.photo_url, c.status, c.created_at,
    k.contact_name, k.relationship, k.phone, k.email";

impl Database {
    // -- Users --

    /// Returns `false` when the email is already registered.
    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        full_name: &str,
        password_hash: &str,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            match conn.execute(
                "INSERT INTO users (id, email, full_name, password) VALUES (?1, ?2, ?3, ?4)",
                (id, email, full_name, password_hash),
            ) {
                Ok(_) => Ok(true),
                Err(e) if is_constraint(&e, ffi::SQLITE_CONSTRAINT_UNIQUE) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Cases --

    /// Insert a case and its contact in one transaction and return the
    /// stored case. Neither row is written if either insert fails.
    ///
    /// `Ok(None)` means `reporter_id` names no user.
    pub fn insert_case_with_contact(
        &self,
        case: &NewCase<'_>,
        contact: &NewContact<'_>,
    ) -> Result<Option<CaseRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT INTO cases (
                    id, reporter_id, name, age, gender, height_cm, weight_kg,
                    hair_color, eye_color, last_seen_date, last_seen_location,
                    description, photo_url, status
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 'missing')",
                rusqlite::params![
                    case.id,
                    case.reporter_id,
                    case.name,
                    case.age,
                    case.gender,
                    case.height_cm,
                    case.weight_kg,
                    case.hair_color,
                    case.eye_color,
                    case.last_seen_date,
                    case.last_seen_location,
                    case.description,
                    case.photo_url,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_constraint(&e, ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => {
                    warn!("Case {} names unknown reporter {}", case.id, case.reporter_id);
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
            tx.execute(
                "INSERT INTO contacts (id, case_id, contact_name, relationship, phone, email)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    contact.id,
                    case.id,
                    contact.contact_name,
                    contact.relationship,
                    contact.phone,
                    contact.email,
                ],
            )?;
            tx.commit()?;

            query_case(conn, case.id)?
                .map(Some)
                .ok_or_else(|| anyhow!("Case {} vanished after insert", case.id))
        })
    }

    pub fn get_case(&self, id: &str) -> Result<Option<CaseRow>> {
        self.with_conn(|conn| query_case(conn, id))
    }

    /// Cases matching `filter`, newest first, with their contact joined.
    pub fn search_cases(&self, filter: &CaseFilter) -> Result<Vec<CaseRow>> {
        let status = filter.status.map(CaseStatus::as_str);
        let pattern = filter.like_pattern();

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CASE_COLUMNS}
                 FROM cases c
                 LEFT JOIN contacts k ON k.case_id = c.id
                 WHERE (?1 IS NULL OR c.status = ?1)
                   AND (?2 IS NULL
                        OR c.name LIKE ?2 ESCAPE '\\'
                        OR c.last_seen_location LIKE ?2 ESCAPE '\\'
                        OR c.description LIKE ?2 ESCAPE '\\')
                 ORDER BY c.created_at DESC, c.rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![status, pattern], map_case_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Number of cases per status, as `(missing, found)`.
    pub fn count_cases_by_status(&self) -> Result<(u64, u64)> {
        self.with_conn(|conn| {
            let (missing, found): (i64, i64) = conn.query_row(
                "SELECT
                    COALESCE(SUM(CASE WHEN status = 'missing' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'found' THEN 1 ELSE 0 END), 0)
                 FROM cases",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok((missing as u64, found as u64))
        })
    }

    /// Changes a case's status. Used by tests and tooling; no HTTP route
    /// exposes it.
    pub fn set_case_status(&self, id: &str, status: CaseStatus) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE cases SET status = ?1 WHERE id = ?2",
                (status.as_str(), id),
            )?;
            Ok(changed > 0)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, email, full_name, password, created_at FROM users WHERE {column} = ?1"
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                full_name: row.get(2)?,
                password: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_case(conn: &Connection, id: &str) -> Result<Option<CaseRow>> {
    let sql = format!(
        "SELECT {CASE_COLUMNS}
         FROM cases c
         LEFT JOIN contacts k ON k.case_id = c.id
         WHERE c.id = ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([id], map_case_row).optional()?;
    Ok(row)
}

fn map_case_row(row: &Row<'_>) -> rusqlite::Result<CaseRow> {
    let contact_name: Option<String> = row.get(15)?;
    let contact = match contact_name {
        Some(contact_name) => Some(ContactRow {
            contact_name,
            relationship: row.get(16)?,
            phone: row.get(17)?,
            email: row.get(18)?,
        }),
        None => None,
    };

    Ok(CaseRow {
        id: row.get(0)?,
        reporter_id: row.get(1)?,
        name: row.get(2)?,
        age: row.get(3)?,
        gender: row.get(4)?,
        height_cm: row.get(5)?,
        weight_kg: row.get(6)?,
        hair_color: row.get(7)?,
        eye_color: row.get(8)?,
        last_seen_date: row.get(9)?,
        last_seen_location: row.get(10)?,
        description: row.get(11)?,
        photo_url: row.get(12)?,
        status: row.get(13)?,
        created_at: row.get(14)?,
        contact,
    })
}

fn is_constraint(err: &rusqlite::Error, extended_code: std::os::raw::c_int) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.extended_code == extended_code)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn seed_user(db: &Database) -> String {
        let id = Uuid::new_v4().to_string();
        assert!(db.create_user(&id, &format!("{id}@example.com"), "Reporter", "hash").unwrap());
        id
    }

    fn new_case<'a>(id: &'a str, reporter: &'a str, name: &'a str) -> NewCase<'a> {
        NewCase {
            id,
            reporter_id: reporter,
            name,
            age: 30,
            gender: "female",
            height_cm: 160.0,
            weight_kg: 55.5,
            hair_color: "brown",
            eye_color: "green",
            last_seen_date: "2023-11-02",
            last_seen_location: "Pratapgarh",
            description: "green hoodie",
            photo_url: "http://localhost:3000/photos/x/y.jpg",
        }
    }

    const CONTACT: NewContact<'static> = NewContact {
        id: "contact-1",
        contact_name: "Jane Doe",
        relationship: "Sister",
        phone: "555-123-4567",
        email: "jane@example.com",
    };

    fn insert(
        db: &Database,
        reporter: &str,
        name: &str,
        location: &str,
        description: &str,
    ) -> CaseRow {
        let case_id = Uuid::new_v4().to_string();
        let contact_id = Uuid::new_v4().to_string();
        db.insert_case_with_contact(
            &NewCase {
                last_seen_location: location,
                description,
                ..new_case(&case_id, reporter, name)
            },
            &NewContact {
                id: &contact_id,
                ..CONTACT
            },
        )
        .unwrap()
        .expect("reporter exists")
    }

    #[test]
    fn insert_returns_case_with_contact() {
        let db = Database::open_in_memory().unwrap();
        let reporter = seed_user(&db);
        let row = insert(&db, &reporter, "Emma Stone", "Pratapgarh", "green hoodie");

        assert_eq!(row.status, "missing");
        assert_eq!(row.reporter_id, reporter);
        let contact = row.contact.expect("contact joined");
        assert_eq!(contact.relationship, "Sister");

        let contacts: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM contacts WHERE case_id = ?1",
                    [&row.id],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(contacts, 1);
    }

    #[test]
    fn failed_contact_insert_leaves_no_case() {
        let db = Database::open_in_memory().unwrap();
        let reporter = seed_user(&db);
        let case_id = Uuid::new_v4().to_string();

        let result = db.insert_case_with_contact(
            &NewCase {
                id: &case_id,
                reporter_id: &reporter,
                name: "Orphan",
                age: 40,
                gender: "male",
                height_cm: 180.0,
                weight_kg: 80.0,
                hair_color: "black",
                eye_color: "brown",
                last_seen_date: "2024-01-01",
                last_seen_location: "Delhi",
                description: "none",
                photo_url: "http://localhost/p.jpg",
            },
            &NewContact {
                id: "contact-1",
                contact_name: "Someone",
                relationship: "Friend",
                phone: "555",
                email: "",
            },
        );

        assert!(result.is_err());
        assert!(db.get_case(&case_id).unwrap().is_none());
        assert_eq!(db.count_cases_by_status().unwrap(), (0, 0));
    }

    #[test]
    fn search_filters_by_status() {
        let db = Database::open_in_memory().unwrap();
        let reporter = seed_user(&db);
        let a = insert(&db, &reporter, "Aman", "Varanasi", "blue jacket");
        insert(&db, &reporter, "Ashish", "Pratapgarh", "black backpack");
        assert!(db.set_case_status(&a.id, CaseStatus::Found).unwrap());

        let found = db
            .search_cases(&CaseFilter {
                status: Some(CaseStatus::Found),
                term: None,
            })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.iter().all(|r| r.status == "found"));

        let all = db.search_cases(&CaseFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(db.count_cases_by_status().unwrap(), (1, 1));
    }

    #[test]
    fn search_term_matches_any_text_column_case_insensitively() {
        let db = Database::open_in_memory().unwrap();
        let reporter = seed_user(&db);
        insert(&db, &reporter, "Aman Tiwari", "Varanasi", "blue jacket");
        insert(&db, &reporter, "Ashish Yadav", "Pratapgarh", "black backpack");
        insert(&db, &reporter, "Priya", "Lucknow", "Last seen near VARANASI station");

        let search = |term: &str| {
            db.search_cases(&CaseFilter {
                status: None,
                term: Some(term.into()),
            })
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect::<Vec<_>>()
        };

        let mut varanasi = search("varanasi");
        varanasi.sort();
        assert_eq!(varanasi, vec!["Aman Tiwari", "Priya"]);
        assert_eq!(search("YADAV"), vec!["Ashish Yadav"]);
        assert_eq!(search("backpack"), vec!["Ashish Yadav"]);
        assert!(search("%").is_empty());
        assert_eq!(search("").len(), 3);
    }

    #[test]
    fn search_orders_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let reporter = seed_user(&db);
        insert(&db, &reporter, "First", "A", "a");
        insert(&db, &reporter, "Second", "B", "b");
        insert(&db, &reporter, "Third", "C", "c");

        let names: Vec<String> = db
            .search_cases(&CaseFilter::default())
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["Third", "Second", "First"]);
    }

    #[test]
    fn user_lookup_by_email_ignores_case() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("u1", "Reporter@Example.com", "Reporter", "hash").unwrap();

        let user = db.get_user_by_email("reporter@example.com").unwrap().unwrap();
        assert_eq!(user.id, "u1");
        assert!(db.get_user_by_id("missing").unwrap().is_none());
        assert!(!db.create_user("u2", "REPORTER@example.com", "Dup", "hash").unwrap());
        assert!(db.get_user_by_id("u2").unwrap().is_none());
    }

    #[test]
    fn unknown_reporter_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let case_id = Uuid::new_v4().to_string();
        let stranger = Uuid::new_v4().to_string();

        let inserted = db
            .insert_case_with_contact(&new_case(&case_id, &stranger, "Nobody's Case"), &CONTACT)
            .unwrap();
        assert!(inserted.is_none());
        assert!(db.get_case(&case_id).unwrap().is_none());

        // The same insert succeeds once the reporter exists
        let reporter = seed_user(&db);
        let row = db
            .insert_case_with_contact(&new_case(&case_id, &reporter, "Somebody's Case"), &CONTACT)
            .unwrap()
            .unwrap();
        assert_eq!(row.contact.unwrap().contact_name, "Jane Doe");
    }
}
