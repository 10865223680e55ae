//! # Optometry Record Store
//!
//! A local storage library for optometric exam records. Built on LMDB
//! (Lightning Memory-Mapped Database): every entity kind lives in its own
//! named store inside one environment directory, with no server involved.
//!
//! ## Features
//!
//! - **Five entity kinds**: users, exams, exam sections, generated documents and signatures
//! - **Upsert everywhere**: re-saving a record with the same natural key replaces it
//! - **Composite keys**: `(examId, name)` for sections, `(userId, examId, sectionId)` for documents
//! - **Lazy, single-flight connection**: the first operation opens the environment;
//!   concurrent callers share that one attempt
//! - **Additive schema versions**: missing stores and indexes are created on open
//! - **Cascade delete report**: exam deletion tells you which children could not be removed
//! - **Safe error handling**: no `unwrap()` calls in production code
//!
//! ## Quick Start
//!
//! ```no_run
//! use optometry_record_store::{RecordStore, StoreConfig};
//! use optometry_record_store::local_db_model::{section_names, Exam, SectionPayload, User};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), optometry_record_store::StoreError> {
//! let store = RecordStore::new(StoreConfig::from_env()?);
//! store.init().await?;
//!
//! let user = store.save_user(User::new("jdupont", "secret", "Jeanne", "Dupont")?).await?;
//! let exam = store.save_exam(Exam::new(&user.id)).await?;
//!
//! let identification = SectionPayload::form(json!({"nom": "Martin", "prenom": "Luc"}))?;
//! store.save_section(&exam.id, section_names::IDENTIFICATION, identification).await?;
//!
//! let exam = store.get_exam(&exam.id).await?.expect("exam was just saved");
//! assert_eq!(exam.patient.get_str("nom"), Some("Martin"));
//!
//! let report = store.delete_exam(&user.id, &exam.id).await?;
//! assert!(report.exam_deleted);
//! # Ok(())
//! # }
//! ```
//!
//! ## Operations
//!
//! - Lifecycle: [`RecordStore::init`], [`RecordStore::close`], [`RecordStore::reset`], [`RecordStore::state`]
//! - Users: [`RecordStore::save_user`], [`RecordStore::get_user_by_username`], [`RecordStore::get_all_users`]
//! - Exams: [`RecordStore::save_exam`], [`RecordStore::get_exam`], [`RecordStore::get_user_exams`], [`RecordStore::delete_exam`]
//! - Sections: [`RecordStore::save_section`], [`RecordStore::get_section`], [`RecordStore::get_all_sections`]
//! - Documents: [`RecordStore::save_document`], [`RecordStore::get_document`]
//! - Signatures: [`RecordStore::save_user_signature`], [`RecordStore::get_user_signature`]
//! - Attachments: [`RecordStore::list_attachments`], [`RecordStore::add_attachment`],
//!   [`RecordStore::remove_attachment`], [`RecordStore::rename_attachment`]

mod attachments;
pub mod cascade;
pub mod config;
mod connection;
pub mod credential;
mod keys;
pub mod local_db_model;
pub mod local_db_state;
mod queries;
pub mod schema;
pub mod store_error;

pub use crate::cascade::{CascadeFailure, CascadeReport, CascadeStage};
pub use crate::config::StoreConfig;
pub use crate::connection::ConnectionState;
pub use crate::local_db_state::RecordStore;
pub use crate::schema::SCHEMA_VERSION;
pub use crate::store_error::{StoreError, StoreResult};
