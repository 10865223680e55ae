//! List queries built on prefix scans of the composite-key stores.

use std::cmp::Ordering;

use log::{debug, warn};

use crate::connection::{read_json, scan_prefix};
use crate::keys;
use crate::local_db_model::{Exam, Section, User};
use crate::local_db_state::RecordStore;
use crate::store_error::StoreResult;

impl RecordStore {
    /// Exams owned by `user_id`, most recently updated first.
    ///
    /// Engine failures are returned to the caller like every other read.
    pub async fn get_user_exams(&self, user_id: &str) -> StoreResult<Vec<Exam>> {
        if !keys::is_valid_part(user_id) {
            return Ok(Vec::new());
        }
        let user_id = user_id.to_string();

        self.run(move |conn| {
            let stores = conn.stores;
            let txn = conn.env.begin_ro_txn()?;
            let owned = scan_prefix(&txn, stores.exams_by_user, &keys::prefix(&[user_id.as_str()]))?;

            let mut exams = Vec::with_capacity(owned.len());
            for (_, exam_id) in owned {
                match read_json::<Exam, _>(&txn, stores.exams, &exam_id)? {
                    Some(exam) if exam.user_id == user_id => exams.push(exam),
                    Some(_) | None => {
                        warn!(
                            "Owner index of user {user_id} points at a missing or reassigned exam"
                        );
                    }
                }
            }

            sort_newest_first(&mut exams);
            debug!("Found {} exams for user {user_id}", exams.len());
            Ok(exams)
        })
        .await
    }

    /// Every section of `exam_id`, ordered by section name.
    pub async fn get_all_sections(&self, exam_id: &str) -> StoreResult<Vec<Section>> {
        if !keys::is_valid_part(exam_id) {
            return Ok(Vec::new());
        }
        let prefix = keys::prefix(&[exam_id]);

        self.run(move |conn| {
            let txn = conn.env.begin_ro_txn()?;
            scan_prefix(&txn, conn.stores.sections, &prefix)?
                .into_iter()
                .map(|(_, value)| serde_json::from_slice(&value).map_err(Into::into))
                .collect()
        })
        .await
    }

    pub async fn get_all_users(&self) -> StoreResult<Vec<User>> {
        self.run(|conn| {
            let txn = conn.env.begin_ro_txn()?;
            scan_prefix(&txn, conn.stores.users, &[])?
                .into_iter()
                .map(|(_, value)| serde_json::from_slice(&value).map_err(Into::into))
                .collect()
        })
        .await
    }
}

/// Newest `updated_at` first, then newest `created_at`, then id.
pub(crate) fn sort_newest_first(exams: &mut [Exam]) {
    exams.sort_by(compare_newest_first);
}

fn compare_newest_first(a: &Exam, b: &Exam) -> Ordering {
    b.updated_at
        .cmp(&a.updated_at)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn sorts_by_update_then_creation() {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let old = Exam::new("u1").with_id("old").with_timestamps(base);
        let new = Exam::new("u1").with_id("new").with_timestamps(base + Duration::days(2));
        let mut touched = Exam::new("u1").with_id("touched").with_timestamps(base - Duration::days(5));
        touched.updated_at = base + Duration::days(3);

        let mut exams = vec![old, touched, new];
        sort_newest_first(&mut exams);

        let ids: Vec<&str> = exams.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["touched", "new", "old"]);
    }

    #[test]
    fn ties_are_broken_by_id() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut exams = vec![
            Exam::new("u1").with_id("b").with_timestamps(at),
            Exam::new("u1").with_id("a").with_timestamps(at),
        ];
        sort_newest_first(&mut exams);
        assert_eq!(exams[0].id, "a");
    }
}
