//! Exam deletion with best-effort cascade to sections and documents.
//!
//! The three stages run as independent transactions. Only the exam stage
//! propagates its failure; the dependent stages record theirs in the returned
//! [`CascadeReport`] so the caller can see which children were left behind.

use lmdb::Transaction;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::connection::{delete_key, delete_prefix, read_json, Connection};
use crate::keys;
use crate::local_db_model::Exam;
use crate::local_db_state::RecordStore;
use crate::store_error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStage {
    Sections,
    Documents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeFailure {
    pub stage: CascadeStage,
    pub error: StoreError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub exam_id: String,
    /// `false` when the exam did not exist; nothing else is attempted then.
    pub exam_deleted: bool,
    pub sections_deleted: usize,
    pub documents_deleted: usize,
    pub failures: Vec<CascadeFailure>,
}

impl CascadeReport {
    fn absent(exam_id: &str) -> Self {
        Self {
            exam_id: exam_id.to_string(),
            exam_deleted: false,
            sections_deleted: 0,
            documents_deleted: 0,
            failures: Vec::new(),
        }
    }

    /// True when no dependent stage failed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

impl RecordStore {
    /// Delete an exam, then its sections, then the documents of `(user_id, exam_id)`.
    ///
    /// A missing exam is a no-op reported with `exam_deleted == false`.
    pub async fn delete_exam(&self, user_id: &str, exam_id: &str) -> StoreResult<CascadeReport> {
        if !keys::is_valid_part(exam_id) {
            return Ok(CascadeReport::absent(exam_id));
        }
        keys::validate("user id", user_id)?;
        let user_id = user_id.to_string();
        let exam_id = exam_id.to_string();

        self.run(move |conn| cascade(conn, &user_id, &exam_id, &STAGES)).await
    }
}

/// The dependent deletions run after the exam record is gone.
struct CascadeStages {
    sections: fn(&Connection, &str) -> StoreResult<usize>,
    documents: fn(&Connection, &str, &str) -> StoreResult<usize>,
}

const STAGES: CascadeStages = CascadeStages {
    sections: delete_sections,
    documents: delete_documents,
};

fn cascade(
    conn: &Connection,
    user_id: &str,
    exam_id: &str,
    stages: &CascadeStages,
) -> StoreResult<CascadeReport> {
    let mut report = CascadeReport::absent(exam_id);

    if !delete_exam_record(conn, exam_id)? {
        info!("Exam {exam_id} does not exist; nothing to delete");
        return Ok(report);
    }
    report.exam_deleted = true;

    match (stages.sections)(conn, exam_id) {
        Ok(count) => report.sections_deleted = count,
        Err(error) => {
            warn!("Sections of deleted exam {exam_id} were left behind: {error}");
            report.failures.push(CascadeFailure {
                stage: CascadeStage::Sections,
                error,
            });
        }
    }

    match (stages.documents)(conn, user_id, exam_id) {
        Ok(count) => report.documents_deleted = count,
        Err(error) => {
            warn!("Documents of deleted exam {exam_id} were left behind: {error}");
            report.failures.push(CascadeFailure {
                stage: CascadeStage::Documents,
                error,
            });
        }
    }

    info!(
        "Deleted exam {exam_id} ({} sections, {} documents)",
        report.sections_deleted, report.documents_deleted
    );
    Ok(report)
}

fn delete_exam_record(conn: &Connection, exam_id: &str) -> StoreResult<bool> {
    let stores = conn.stores;
    let mut txn = conn.env.begin_rw_txn()?;
    let exam = match read_json::<Exam, _>(&txn, stores.exams, exam_id.as_bytes())? {
        Some(exam) => exam,
        None => return Ok(false),
    };

    delete_key(&mut txn, stores.exams, exam_id.as_bytes())?;
    if keys::is_valid_part(&exam.user_id) {
        delete_key(
            &mut txn,
            stores.exams_by_user,
            &keys::composite(&[exam.user_id.as_str(), exam_id]),
        )?;
    }
    txn.commit()?;
    Ok(true)
}

fn delete_sections(conn: &Connection, exam_id: &str) -> StoreResult<usize> {
    let mut txn = conn.env.begin_rw_txn()?;
    let count = delete_prefix(&mut txn, conn.stores.sections, &keys::prefix(&[exam_id]))?;
    txn.commit()?;
    Ok(count)
}

fn delete_documents(conn: &Connection, user_id: &str, exam_id: &str) -> StoreResult<usize> {
    let mut txn = conn.env.begin_rw_txn()?;
    let count = delete_prefix(
        &mut txn,
        conn.stores.documents,
        &keys::prefix(&[user_id, exam_id]),
    )?;
    txn.commit()?;
    Ok(count)
}
