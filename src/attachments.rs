//! Files attached to an exam, kept as one list in the `utiles-files` section.
//!
//! Each operation reads, edits and rewrites the list inside a single write
//! transaction.

use chrono::Utc;
use lmdb::{RwTransaction, Transaction};
use log::debug;

use crate::connection::{read_json, write_json};
use crate::keys;
use crate::local_db_model::{section_names, Attachment, Section, SectionPayload};
use crate::local_db_state::RecordStore;
use crate::schema::Stores;
use crate::store_error::{StoreError, StoreResult};

impl RecordStore {
    /// Attachments of `exam_id`; empty when the section was never written.
    pub async fn list_attachments(&self, exam_id: &str) -> StoreResult<Vec<Attachment>> {
        if !keys::is_valid_part(exam_id) {
            return Ok(Vec::new());
        }
        let key = attachments_key(exam_id);

        self.run(move |conn| {
            let txn = conn.env.begin_ro_txn()?;
            let section = read_json::<Section, _>(&txn, conn.stores.sections, &key)?;
            attachments_of(section)
        })
        .await
    }

    pub async fn add_attachment(
        &self,
        exam_id: &str,
        attachment: Attachment,
    ) -> StoreResult<Vec<Attachment>> {
        keys::validate("exam id", exam_id)?;
        self.edit_attachments(exam_id, move |files| {
            files.push(attachment);
            Ok(())
        })
        .await
    }

    /// Remove `attachment_id`; unknown ids leave the list unchanged.
    pub async fn remove_attachment(
        &self,
        exam_id: &str,
        attachment_id: &str,
    ) -> StoreResult<Vec<Attachment>> {
        keys::validate("exam id", exam_id)?;
        let attachment_id = attachment_id.to_string();
        self.edit_attachments(exam_id, move |files| {
            files.retain(|file| file.id != attachment_id);
            Ok(())
        })
        .await
    }

    pub async fn rename_attachment(
        &self,
        exam_id: &str,
        attachment_id: &str,
        new_name: &str,
    ) -> StoreResult<Vec<Attachment>> {
        keys::validate("exam id", exam_id)?;
        let attachment_id = attachment_id.to_string();
        let new_name = new_name.to_string();
        self.edit_attachments(exam_id, move |files| {
            let file = files
                .iter_mut()
                .find(|file| file.id == attachment_id)
                .ok_or_else(|| StoreError::NotFound(format!("attachment {attachment_id}")))?;
            file.name = new_name;
            file.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn edit_attachments<F>(&self, exam_id: &str, edit: F) -> StoreResult<Vec<Attachment>>
    where
        F: FnOnce(&mut Vec<Attachment>) -> StoreResult<()> + Send + 'static,
    {
        let exam_id = exam_id.to_string();

        self.run(move |conn| {
            let stores = conn.stores;
            let key = attachments_key(&exam_id);
            let mut txn = conn.env.begin_rw_txn()?;

            let mut files = attachments_of(read_json::<Section, _>(&txn, stores.sections, &key)?)?;
            edit(&mut files)?;
            write_attachments(&mut txn, &stores, &exam_id, &key, &files)?;
            txn.commit()?;

            debug!("Exam {exam_id} now has {} attachments", files.len());
            Ok(files)
        })
        .await
    }
}

fn attachments_key(exam_id: &str) -> Vec<u8> {
    keys::composite(&[exam_id, section_names::ATTACHMENTS])
}

fn attachments_of(section: Option<Section>) -> StoreResult<Vec<Attachment>> {
    match section.map(|s| s.payload) {
        None => Ok(Vec::new()),
        Some(SectionPayload::Attachments(files)) => Ok(files),
        Some(other) => Err(StoreError::Validation(format!(
            "section '{}' holds a {} payload, not attachments",
            section_names::ATTACHMENTS,
            other.kind()
        ))),
    }
}

fn write_attachments(
    txn: &mut RwTransaction<'_>,
    stores: &Stores,
    exam_id: &str,
    key: &[u8],
    files: &[Attachment],
) -> StoreResult<()> {
    let section = Section {
        exam_id: exam_id.to_string(),
        name: section_names::ATTACHMENTS.to_string(),
        payload: SectionPayload::Attachments(files.to_vec()),
        updated_at: Utc::now(),
    };
    write_json(txn, stores.sections, key, &section)
}
