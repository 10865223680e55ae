//! Store layout, schema version and additive migrations.
//!
//! Every named store is created on open if it is missing; nothing is ever
//! dropped. The version recorded in `meta` only decides which backfills
//! still have to run.

use std::fs;

use lmdb::{Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use log::{debug, info};

use crate::config::StoreConfig;
use crate::connection::{scan_prefix, Connection};
use crate::keys;
use crate::local_db_model::{Exam, User};
use crate::store_error::{StoreError, StoreResult};

pub const SCHEMA_VERSION: u32 = 5;

pub(crate) const META: &str = "meta";
pub(crate) const USERS: &str = "users";
pub(crate) const USERS_BY_USERNAME: &str = "users_by_username";
pub(crate) const EXAMS: &str = "exams";
pub(crate) const EXAMS_BY_USER: &str = "exams_by_user";
pub(crate) const SECTIONS: &str = "sections";
pub(crate) const DOCUMENTS: &str = "documents";
pub(crate) const SIGNATURES: &str = "signatures";

pub(crate) const STORE_NAMES: [&str; 8] = [
    META,
    USERS,
    USERS_BY_USERNAME,
    EXAMS,
    EXAMS_BY_USER,
    SECTIONS,
    DOCUMENTS,
    SIGNATURES,
];

pub(crate) const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

/// Handles to every named store of one environment.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Stores {
    pub meta: Database,
    pub users: Database,
    pub users_by_username: Database,
    pub exams: Database,
    pub exams_by_user: Database,
    pub sections: Database,
    pub documents: Database,
    pub signatures: Database,
}

struct Migration {
    version: u32,
    description: &'static str,
    apply: fn(&mut RwTransaction<'_>, &Stores) -> StoreResult<()>,
}

const MIGRATIONS: [Migration; 5] = [
    Migration {
        version: 1,
        description: "users, exams and sections stores",
        apply: no_backfill,
    },
    Migration {
        version: 2,
        description: "username index",
        apply: backfill_username_index,
    },
    Migration {
        version: 3,
        description: "documents store",
        apply: no_backfill,
    },
    Migration {
        version: 4,
        description: "signatures store",
        apply: no_backfill,
    },
    Migration {
        version: 5,
        description: "exam owner index",
        apply: backfill_exam_owner_index,
    },
];

/// Open the environment at `config.path` and bring it to [`SCHEMA_VERSION`].
///
/// Every failure is reported as [`StoreError::Connection`].
pub(crate) fn open(config: &StoreConfig) -> StoreResult<Connection> {
    fs::create_dir_all(&config.path).map_err(|e| {
        StoreError::connection(&format!("cannot create {}", config.path.display()), e)
    })?;

    let env = Environment::new()
        .set_max_dbs(STORE_NAMES.len() as u32)
        .set_map_size(config.map_size)
        .set_max_readers(config.max_readers)
        .open(&config.path)
        .map_err(|e| StoreError::connection("cannot open LMDB environment", e))?;

    let stores = Stores {
        meta: create_store(&env, META)?,
        users: create_store(&env, USERS)?,
        users_by_username: create_store(&env, USERS_BY_USERNAME)?,
        exams: create_store(&env, EXAMS)?,
        exams_by_user: create_store(&env, EXAMS_BY_USER)?,
        sections: create_store(&env, SECTIONS)?,
        documents: create_store(&env, DOCUMENTS)?,
        signatures: create_store(&env, SIGNATURES)?,
    };

    upgrade(&env, &stores).map_err(|e| match e {
        StoreError::Connection(msg) => StoreError::Connection(msg),
        other => StoreError::connection("schema upgrade failed", other),
    })?;

    Ok(Connection::new(env, stores))
}

fn create_store(env: &Environment, name: &str) -> StoreResult<Database> {
    env.create_db(Some(name), DatabaseFlags::empty())
        .map_err(|e| StoreError::connection(&format!("cannot create store '{name}'"), e))
}

pub(crate) fn stored_version<T: Transaction>(txn: &T, stores: &Stores) -> StoreResult<u32> {
    match txn.get(stores.meta, &SCHEMA_VERSION_KEY) {
        Ok(bytes) => {
            let raw: [u8; 4] = bytes.try_into().map_err(|_| {
                StoreError::Connection(format!("malformed schema version ({} bytes)", bytes.len()))
            })?;
            Ok(u32::from_be_bytes(raw))
        }
        Err(lmdb::Error::NotFound) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn upgrade(env: &Environment, stores: &Stores) -> StoreResult<()> {
    let current = {
        let txn = env.begin_ro_txn()?;
        stored_version(&txn, stores)?
    };

    if current > SCHEMA_VERSION {
        return Err(StoreError::Connection(format!(
            "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
        )));
    }
    if current == SCHEMA_VERSION {
        debug!("Schema already at version {current}");
        return Ok(());
    }

    info!("Upgrading schema from version {current} to {SCHEMA_VERSION}");
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut txn = env.begin_rw_txn()?;
        (migration.apply)(&mut txn, stores)?;
        txn.put(
            stores.meta,
            &SCHEMA_VERSION_KEY,
            &migration.version.to_be_bytes(),
            WriteFlags::empty(),
        )?;
        txn.commit()?;
        info!("Applied schema migration {}: {}", migration.version, migration.description);
    }

    Ok(())
}

fn no_backfill(_txn: &mut RwTransaction<'_>, _stores: &Stores) -> StoreResult<()> {
    Ok(())
}

fn backfill_username_index(txn: &mut RwTransaction<'_>, stores: &Stores) -> StoreResult<()> {
    let users = scan_prefix(&*txn, stores.users, &[])?;
    for (_, value) in users {
        let user: User = serde_json::from_slice(&value)?;
        if !keys::is_valid_part(&user.username) {
            continue;
        }
        txn.put(
            stores.users_by_username,
            &user.username.as_bytes(),
            &user.id.as_bytes(),
            WriteFlags::empty(),
        )?;
    }
    Ok(())
}

fn backfill_exam_owner_index(txn: &mut RwTransaction<'_>, stores: &Stores) -> StoreResult<()> {
    let exams = scan_prefix(&*txn, stores.exams, &[])?;
    let mut indexed = 0usize;
    for (_, value) in exams {
        let exam: Exam = serde_json::from_slice(&value)?;
        if !keys::is_valid_part(&exam.user_id) || !keys::is_valid_part(&exam.id) {
            continue;
        }
        let key = keys::composite(&[exam.user_id.as_str(), exam.id.as_str()]);
        txn.put(stores.exams_by_user, &key, &exam.id.as_bytes(), WriteFlags::empty())?;
        indexed += 1;
    }
    debug!("Indexed {indexed} existing exams by owner");
    Ok(())
}
