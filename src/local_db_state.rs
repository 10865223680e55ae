use std::sync::Arc;

use chrono::Utc;
use lmdb::Transaction;
use log::{debug, info, warn};

use crate::config::StoreConfig;
use crate::connection::{delete_key, read_json, read_raw, write_json, Connection, ConnectionState, Connector};
use crate::keys;
use crate::local_db_model::{
    new_id, section_names, DocumentRecord, Exam, Section, SectionPayload, SignatureRecord, User,
};
use crate::store_error::{StoreError, StoreResult};

/// Local record store for users, exams, sections, documents and signatures.
///
/// Construct one per process at startup and hand it (or an `Arc` of it) to
/// every collaborator. The LMDB environment is opened lazily by the first
/// operation, or eagerly with [`RecordStore::init`].
///
/// # Examples
///
/// ```no_run
/// use optometry_record_store::{RecordStore, StoreConfig};
/// use optometry_record_store::local_db_model::{Exam, SectionPayload, User};
/// use serde_json::json;
///
/// # async fn run() -> Result<(), optometry_record_store::StoreError> {
/// let store = RecordStore::new(StoreConfig::new("optometry.lmdb"));
///
/// let user = store.save_user(User::new("jdupont", "secret", "Jeanne", "Dupont")?).await?;
/// let exam = store.save_exam(Exam::new(&user.id)).await?;
/// store
///     .save_section(&exam.id, "histoire", SectionPayload::form(json!({"motifConsultation": "headache"}))?)
///     .await?;
///
/// let exams = store.get_user_exams(&user.id).await?;
/// assert_eq!(exams.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct RecordStore {
    connector: Connector,
}

impl RecordStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            connector: Connector::new(config),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        self.connector.config()
    }

    pub fn state(&self) -> ConnectionState {
        self.connector.state()
    }

    /// Number of times an open of the environment was attempted.
    pub fn connection_attempts(&self) -> usize {
        self.connector.attempts()
    }

    /// Open the environment now instead of on the first operation.
    pub async fn init(&self) -> StoreResult<()> {
        self.connector.acquire().await.map(|_| ())
    }

    pub async fn close(&self) {
        self.connector.close().await;
    }

    /// Discard all stored data and reopen an empty store.
    pub async fn reset(&self) -> StoreResult<()> {
        self.connector.reset().await
    }

    /// Run `op` against a live connection on the blocking pool.
    pub(crate) async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let connection: Arc<Connection> = self.connector.acquire().await?;
        tokio::task::spawn_blocking(move || op(&connection)).await?
    }

    // Users

    /// Upsert a user by username.
    ///
    /// If the username is already taken the stored user's id is kept and the
    /// record is replaced. Otherwise an id is assigned when `user.id` is empty.
    pub async fn save_user(&self, mut user: User) -> StoreResult<User> {
        keys::validate("username", &user.username)?;
        if !user.id.is_empty() {
            keys::validate("user id", &user.id)?;
        }

        self.run(move |conn| {
            let stores = conn.stores;
            let mut txn = conn.env.begin_rw_txn()?;

            match read_raw(&txn, stores.users_by_username, user.username.as_bytes())? {
                Some(existing_id) => {
                    user.id = String::from_utf8(existing_id).map_err(|e| {
                        StoreError::Serialization(format!("corrupt username index entry: {e}"))
                    })?;
                    debug!("Updating existing user {}", user.id);
                }
                None => {
                    if user.id.is_empty() {
                        user.id = new_id();
                    }
                    debug!("Creating user {}", user.id);
                }
            }

            // The id may have belonged to a user under another username.
            if let Some(previous) = read_json::<User, _>(&txn, stores.users, user.id.as_bytes())? {
                if previous.username != user.username {
                    delete_key(&mut txn, stores.users_by_username, previous.username.as_bytes())?;
                }
            }

            write_json(&mut txn, stores.users, user.id.as_bytes(), &user)?;
            txn.put(
                stores.users_by_username,
                &user.username.as_bytes(),
                &user.id.as_bytes(),
                lmdb::WriteFlags::empty(),
            )?;
            txn.commit()?;

            info!("Saved user {} ({})", user.username, user.id);
            Ok(user)
        })
        .await
    }

    pub async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        if !keys::is_valid_part(username) {
            return Ok(None);
        }
        let username = username.to_string();

        self.run(move |conn| {
            let txn = conn.env.begin_ro_txn()?;
            let id = match read_raw(&txn, conn.stores.users_by_username, username.as_bytes())? {
                Some(id) => id,
                None => return Ok(None),
            };
            read_json(&txn, conn.stores.users, &id)
        })
        .await
    }

    pub async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        if !keys::is_valid_part(user_id) {
            return Ok(None);
        }
        let user_id = user_id.to_string();

        self.run(move |conn| {
            let txn = conn.env.begin_ro_txn()?;
            read_json(&txn, conn.stores.users, user_id.as_bytes())
        })
        .await
    }

    // Exams

    /// Upsert an exam by id, generating the id when it is empty.
    pub async fn save_exam(&self, mut exam: Exam) -> StoreResult<Exam> {
        if exam.id.is_empty() {
            exam.id = new_id();
        }
        keys::validate("exam id", &exam.id)?;
        keys::validate("user id", &exam.user_id)?;

        self.run(move |conn| {
            let stores = conn.stores;
            let mut txn = conn.env.begin_rw_txn()?;

            if let Some(previous) = read_json::<Exam, _>(&txn, stores.exams, exam.id.as_bytes())? {
                if previous.user_id != exam.user_id && keys::is_valid_part(&previous.user_id) {
                    let stale = keys::composite(&[previous.user_id.as_str(), previous.id.as_str()]);
                    delete_key(&mut txn, stores.exams_by_user, &stale)?;
                }
            }

            write_json(&mut txn, stores.exams, exam.id.as_bytes(), &exam)?;
            let owner_key = keys::composite(&[exam.user_id.as_str(), exam.id.as_str()]);
            txn.put(
                stores.exams_by_user,
                &owner_key,
                &exam.id.as_bytes(),
                lmdb::WriteFlags::empty(),
            )?;
            txn.commit()?;

            debug!("Saved exam {} for user {}", exam.id, exam.user_id);
            Ok(exam)
        })
        .await
    }

    /// `Ok(None)` for unknown ids; never an error for a missing exam.
    pub async fn get_exam(&self, exam_id: &str) -> StoreResult<Option<Exam>> {
        if !keys::is_valid_part(exam_id) {
            return Ok(None);
        }
        let exam_id = exam_id.to_string();

        self.run(move |conn| {
            let txn = conn.env.begin_ro_txn()?;
            read_json(&txn, conn.stores.exams, exam_id.as_bytes())
        })
        .await
    }

    // Sections

    /// Upsert the section `(exam_id, name)`, replacing any previous payload.
    ///
    /// Saving a form under [`section_names::IDENTIFICATION`] also merges its
    /// fields into the exam's patient record and bumps `updated_at`. That
    /// happens in a second transaction after the section is committed.
    pub async fn save_section(
        &self,
        exam_id: &str,
        name: &str,
        payload: SectionPayload,
    ) -> StoreResult<Section> {
        keys::validate("exam id", exam_id)?;
        keys::validate("section name", name)?;

        let section = Section {
            exam_id: exam_id.to_string(),
            name: name.to_string(),
            payload,
            updated_at: Utc::now(),
        };

        self.run(move |conn| {
            let stores = conn.stores;
            let key = keys::composite(&[section.exam_id.as_str(), section.name.as_str()]);

            let mut txn = conn.env.begin_rw_txn()?;
            write_json(&mut txn, stores.sections, &key, &section)?;
            txn.commit()?;
            debug!("Saved section {} of exam {}", section.name, section.exam_id);

            if section.name == section_names::IDENTIFICATION {
                merge_patient(conn, &section)?;
            }
            Ok(section)
        })
        .await
    }

    pub async fn get_section(&self, exam_id: &str, name: &str) -> StoreResult<Option<Section>> {
        if !keys::is_valid_part(exam_id) || !keys::is_valid_part(name) {
            return Ok(None);
        }
        let key = keys::composite(&[exam_id, name]);

        self.run(move |conn| {
            let txn = conn.env.begin_ro_txn()?;
            read_json(&txn, conn.stores.sections, &key)
        })
        .await
    }

    // Documents

    pub async fn save_document(
        &self,
        user_id: &str,
        exam_id: &str,
        section_id: &str,
        payload: Vec<u8>,
    ) -> StoreResult<()> {
        keys::validate("user id", user_id)?;
        keys::validate("exam id", exam_id)?;
        keys::validate("section id", section_id)?;

        let document = DocumentRecord {
            user_id: user_id.to_string(),
            exam_id: exam_id.to_string(),
            section_id: section_id.to_string(),
            payload,
            updated_at: Utc::now(),
        };

        self.run(move |conn| {
            let key = keys::composite(&[document.user_id.as_str(), document.exam_id.as_str(), document.section_id.as_str()]);
            let mut txn = conn.env.begin_rw_txn()?;
            write_json(&mut txn, conn.stores.documents, &key, &document)?;
            txn.commit()?;
            debug!(
                "Saved document {}/{} ({} bytes)",
                document.exam_id,
                document.section_id,
                document.payload.len()
            );
            Ok(())
        })
        .await
    }

    pub async fn get_document(
        &self,
        user_id: &str,
        exam_id: &str,
        section_id: &str,
    ) -> StoreResult<Option<DocumentRecord>> {
        if ![user_id, exam_id, section_id].iter().all(|p| keys::is_valid_part(p)) {
            return Ok(None);
        }
        let key = keys::composite(&[user_id, exam_id, section_id]);

        self.run(move |conn| {
            let txn = conn.env.begin_ro_txn()?;
            read_json(&txn, conn.stores.documents, &key)
        })
        .await
    }

    // Signatures

    pub async fn save_user_signature(
        &self,
        user_id: &str,
        signature_data: impl Into<String>,
    ) -> StoreResult<SignatureRecord> {
        keys::validate("user id", user_id)?;

        let signature = SignatureRecord {
            user_id: user_id.to_string(),
            signature_data: signature_data.into(),
            created_at: Utc::now(),
        };

        self.run(move |conn| {
            let mut txn = conn.env.begin_rw_txn()?;
            write_json(&mut txn, conn.stores.signatures, signature.user_id.as_bytes(), &signature)?;
            txn.commit()?;
            Ok(signature)
        })
        .await
    }

    pub async fn get_user_signature(&self, user_id: &str) -> StoreResult<Option<SignatureRecord>> {
        if !keys::is_valid_part(user_id) {
            return Ok(None);
        }
        let user_id = user_id.to_string();

        self.run(move |conn| {
            let txn = conn.env.begin_ro_txn()?;
            read_json(&txn, conn.stores.signatures, user_id.as_bytes())
        })
        .await
    }
}

fn merge_patient(conn: &Connection, section: &Section) -> StoreResult<()> {
    let fields = match section.payload.as_form() {
        Some(fields) => fields,
        None => {
            warn!(
                "Identification section of exam {} holds a {} payload; patient not updated",
                section.exam_id,
                section.payload.kind()
            );
            return Ok(());
        }
    };

    let stores = conn.stores;
    let mut txn = conn.env.begin_rw_txn()?;
    let mut exam = match read_json::<Exam, _>(&txn, stores.exams, section.exam_id.as_bytes())? {
        Some(exam) => exam,
        None => {
            warn!("Exam {} not found; patient data kept in section only", section.exam_id);
            return Ok(());
        }
    };

    exam.patient.merge(fields);
    exam.updated_at = Utc::now();
    write_json(&mut txn, stores.exams, exam.id.as_bytes(), &exam)?;
    txn.commit()?;

    debug!("Merged identification into patient of exam {}", exam.id);
    Ok(())
}
