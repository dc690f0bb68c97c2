use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use kernel::{bytes_to_mb, CommunityFile, Tier};
use rusqlite::blob::ZeroBlob;
use rusqlite::{
    params, Connection, DatabaseName, OpenFlags, OptionalExtension, Row, TransactionBehavior,
};
use uuid::Uuid;

use crate::domain::{
    average_rating, DeleteResult, FileRecord, NewFile, RatingTotals, SharedRecord, Storage,
    TokenKind, UserRecord,
};
use crate::error::ApiError;

const CACHE_SIZE: &str = "4096";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const USER_COLUMNS: &str = "uid, email, display_name, tier, password_hash, salt";
const FILE_COLUMNS: &str = "id, uid, name, size, content_type, blake3_hash, upload_date";
const SHARED_COLUMNS: &str = "id, original_file_id, shared_by_uid, shared_by_name, file_name, file_size, description, downloads, average_rating, rating_count, created_at, is_active";

pub enum Mode {
    ReadWrite,
    ReadOnly,
}

pub struct Sqlite {
    conn: Connection,
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    let tier: String = row.get(3)?;
    Ok(UserRecord {
        uid: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        tier: tier.parse().unwrap_or_default(),
        password_hash: row.get(4)?,
        salt: row.get(5)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        uid: row.get(1)?,
        name: row.get(2)?,
        size: to_u64(row.get(3)?),
        content_type: row.get(4)?,
        blake3_hash: row.get(5)?,
        upload_date: row.get(6)?,
    })
}

fn shared_from_row(row: &Row<'_>) -> rusqlite::Result<SharedRecord> {
    Ok(SharedRecord {
        file: CommunityFile {
            id: row.get(0)?,
            original_file_id: row.get(1)?,
            shared_by_uid: row.get(2)?,
            shared_by: row.get(3)?,
            name: row.get(4)?,
            size: to_u64(row.get(5)?),
            description: row.get(6)?,
            downloads: to_u64(row.get(7)?),
            average_rating: row.get(8)?,
            rating_count: to_u64(row.get(9)?),
            created_at: row.get(10)?,
        },
        is_active: row.get(11)?,
    })
}

impl Storage for Sqlite {
    fn new_database(&self) -> Result<(), ApiError> {
        self.pragma_update("encoding", "UTF-8")?;

        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS user (
                  uid            TEXT PRIMARY KEY,
                  email          TEXT NOT NULL UNIQUE,
                  display_name   TEXT,
                  tier           TEXT NOT NULL DEFAULT 'basic',
                  password_hash  TEXT NOT NULL,
                  salt           TEXT NOT NULL
                  );
             CREATE TABLE IF NOT EXISTS token (
                  token          TEXT PRIMARY KEY,
                  uid            TEXT NOT NULL REFERENCES user(uid) ON DELETE CASCADE,
                  kind           TEXT NOT NULL,
                  expires_at     TEXT NOT NULL
                  );
             CREATE INDEX IF NOT EXISTS token_uid_ix ON token(uid);
             CREATE TABLE IF NOT EXISTS blob (
                  blake3_hash    TEXT PRIMARY KEY,
                  data           BLOB NOT NULL
                  );
             CREATE TABLE IF NOT EXISTS file (
                  id             TEXT PRIMARY KEY,
                  uid            TEXT NOT NULL REFERENCES user(uid) ON DELETE CASCADE,
                  name           TEXT NOT NULL,
                  size           INTEGER NOT NULL,
                  content_type   TEXT NOT NULL,
                  blake3_hash    TEXT NOT NULL REFERENCES blob(blake3_hash) ON DELETE RESTRICT ON UPDATE RESTRICT,
                  upload_date    TEXT NOT NULL
                  );
             CREATE INDEX IF NOT EXISTS file_uid_ix ON file(uid);
             CREATE TABLE IF NOT EXISTS shared_file (
                  id               TEXT PRIMARY KEY,
                  original_file_id TEXT NOT NULL,
                  shared_by_uid    TEXT NOT NULL,
                  shared_by_name   TEXT NOT NULL,
                  file_name        TEXT NOT NULL,
                  file_size        INTEGER NOT NULL,
                  description      TEXT NOT NULL,
                  downloads        INTEGER NOT NULL DEFAULT 0,
                  average_rating   REAL NOT NULL DEFAULT 0,
                  rating_count     INTEGER NOT NULL DEFAULT 0,
                  created_at       TEXT NOT NULL,
                  is_active        INTEGER NOT NULL DEFAULT 1,
                  unshared_at      TEXT
                  );
             CREATE INDEX IF NOT EXISTS shared_file_created_ix ON shared_file(created_at);
             CREATE TABLE IF NOT EXISTS rating (
                  shared_file_id TEXT NOT NULL REFERENCES shared_file(id) ON DELETE CASCADE,
                  uid            TEXT NOT NULL,
                  rating         INTEGER NOT NULL,
                  PRIMARY KEY (shared_file_id, uid)
                  );
             CREATE TABLE IF NOT EXISTS daily_download (
                  uid            TEXT NOT NULL,
                  day            TEXT NOT NULL,
                  count          INTEGER NOT NULL,
                  PRIMARY KEY (uid, day)
                  );",
        )?;

        Ok(())
    }

    fn create_user(&mut self, user: &UserRecord) -> Result<(), ApiError> {
        let inserted = self.conn.execute(
            "INSERT INTO user (uid, email, display_name, tier, password_hash, salt)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(email) DO NOTHING",
            params![
                &user.uid,
                &user.email,
                &user.display_name,
                user.tier.as_str(),
                &user.password_hash,
                &user.salt
            ],
        )?;
        if inserted == 0 {
            return Err(ApiError::BadRequest(
                "The email address is already in use by another account".to_owned(),
            ));
        }
        Ok(())
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, ApiError> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM user WHERE email = ?1"),
                params![email],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn get_user(&self, uid: &str) -> Result<Option<UserRecord>, ApiError> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM user WHERE uid = ?1"),
                params![uid],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn set_tier(&mut self, uid: &str, tier: Tier) -> Result<bool, ApiError> {
        let updated = self.conn.execute(
            "UPDATE user SET tier = ?2 WHERE uid = ?1",
            params![uid, tier.as_str()],
        )?;
        Ok(updated > 0)
    }

    fn usage(&self, uid: &str) -> Result<(u64, usize), ApiError> {
        let (bytes, count): (i64, i64) = self.conn.query_row(
            "SELECT COALESCE(SUM(size), 0), COUNT(*) FROM file WHERE uid = ?1",
            params![uid],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok((to_u64(bytes), usize::try_from(count).unwrap_or_default()))
    }

    fn store_token(
        &mut self,
        token: &str,
        uid: &str,
        kind: TokenKind,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        self.conn
            .prepare_cached(
                "INSERT INTO token (token, uid, kind, expires_at) VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![token, uid, kind.as_str(), expires_at])?;
        Ok(())
    }

    fn token_owner(&self, token: &str, kind: TokenKind) -> Result<Option<String>, ApiError> {
        let owner: Option<(String, DateTime<Utc>)> = self
            .conn
            .query_row(
                "SELECT uid, expires_at FROM token WHERE token = ?1 AND kind = ?2",
                params![token, kind.as_str()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        Ok(owner
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .map(|(uid, _)| uid))
    }

    fn take_refresh_token(&mut self, token: &str) -> Result<Option<String>, ApiError> {
        let tx = self.conn.transaction()?;
        let owner = {
            let owner: Option<(String, DateTime<Utc>)> = tx
                .query_row(
                    "SELECT uid, expires_at FROM token WHERE token = ?1 AND kind = ?2",
                    params![token, TokenKind::Refresh.as_str()],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            owner
                .filter(|(_, expires_at)| *expires_at > Utc::now())
                .map(|(uid, _)| uid)
        };
        tx.execute("DELETE FROM token WHERE token = ?1", params![token])?;
        tx.commit()?;
        Ok(owner)
    }

    fn revoke_tokens(&mut self, uid: &str) -> Result<usize, ApiError> {
        let removed = self
            .conn
            .execute("DELETE FROM token WHERE uid = ?1", params![uid])?;
        Ok(removed)
    }

    fn insert_file(&mut self, file: &NewFile<'_>) -> Result<FileRecord, ApiError> {
        self.assign_cache_size()?;
        self.pragma_update("synchronous", "FULL")?;

        let hash = blake3::hash(file.data).to_string();
        let size = file.data.len() as u64;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let tier: Option<String> = tx
            .query_row(
                "SELECT tier FROM user WHERE uid = ?1",
                params![file.uid],
                |r| r.get(0),
            )
            .optional()?;
        let tier: Tier = tier
            .ok_or_else(|| ApiError::not_found("User"))?
            .parse()
            .unwrap_or_default();

        let (used, count): (i64, i64) = tx.query_row(
            "SELECT COALESCE(SUM(size), 0), COUNT(*) FROM file WHERE uid = ?1",
            params![file.uid],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let used_mb = bytes_to_mb(to_u64(used));
        let limit_mb = tier.storage_limit_mb();
        if used_mb + bytes_to_mb(size) > limit_mb {
            return Err(ApiError::PayloadTooLarge(format!(
                "Storage limit exceeded. {used_mb:.1}MB of {limit_mb:.1}MB used"
            )));
        }
        if let Some(limit) = tier.file_limit() {
            if usize::try_from(count).unwrap_or(usize::MAX) >= limit {
                return Err(ApiError::Forbidden(format!(
                    "File limit reached. Basic users can store up to {limit} files"
                )));
            }
        }

        let exists = tx
            .prepare_cached("SELECT blake3_hash FROM blob WHERE blake3_hash = ?1")?
            .exists(params![&hash])?;
        if !exists {
            let len = i32::try_from(file.data.len())
                .map_err(|_| ApiError::PayloadTooLarge("File is too large".to_owned()))?;
            tx.execute(
                "INSERT INTO blob (blake3_hash, data) VALUES (?1, ?2)",
                params![&hash, &ZeroBlob(len)],
            )?;

            let rowid = tx.last_insert_rowid();

            let mut blob = tx.blob_open(DatabaseName::Main, "blob", "data", rowid, false)?;
            blob.write_all(file.data)
                .map_err(|e| ApiError::Internal(format!("blob write failed: {e}")))?;
            blob.close()?;
        }

        let record = FileRecord {
            id: Uuid::new_v4().to_string(),
            uid: file.uid.to_owned(),
            name: file.name.to_owned(),
            size,
            content_type: file.content_type.to_owned(),
            blake3_hash: hash,
            upload_date: Utc::now(),
        };
        tx.prepare_cached(
            "INSERT INTO file (id, uid, name, size, content_type, blake3_hash, upload_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?
        .execute(params![
            &record.id,
            &record.uid,
            &record.name,
            to_i64(record.size),
            &record.content_type,
            &record.blake3_hash,
            record.upload_date
        ])?;

        tx.commit()?;

        Ok(record)
    }

    fn list_files(&self, uid: &str) -> Result<Vec<FileRecord>, ApiError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {FILE_COLUMNS} FROM file WHERE uid = ?1 ORDER BY upload_date DESC"
        ))?;
        let files = stmt
            .query_map(params![uid], file_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    fn get_file(&self, id: &str) -> Result<Option<FileRecord>, ApiError> {
        let file = self
            .conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM file WHERE id = ?1"),
                params![id],
                file_from_row,
            )
            .optional()?;
        Ok(file)
    }

    fn get_file_data(&self, blake3_hash: &str) -> Result<Box<dyn Read + '_>, ApiError> {
        let rowid: Option<i64> = self
            .conn
            .query_row(
                "SELECT rowid FROM blob WHERE blake3_hash = ?1",
                params![blake3_hash],
                |r| r.get(0),
            )
            .optional()?;
        let rowid = rowid.ok_or_else(|| ApiError::not_found("File content"))?;
        let blob = self
            .conn
            .blob_open(DatabaseName::Main, "blob", "data", rowid, true)?;
        Ok(Box::new(blob))
    }

    fn delete_file(&mut self, id: &str) -> Result<DeleteResult, ApiError> {
        let tx = self.conn.transaction()?;

        let hash: Option<String> = tx
            .query_row(
                "SELECT blake3_hash FROM file WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(hash) = hash else {
            return Ok(DeleteResult::default());
        };

        let files = tx.execute("DELETE FROM file WHERE id = ?1", params![id])?;
        let references: i64 = tx.query_row(
            "SELECT COUNT(*) FROM file WHERE blake3_hash = ?1",
            params![&hash],
            |r| r.get(0),
        )?;
        let blobs = if references == 0 {
            tx.execute("DELETE FROM blob WHERE blake3_hash = ?1", params![&hash])?
        } else {
            0
        };

        tx.commit()?;
        Ok(DeleteResult { files, blobs })
    }

    fn share_file(&mut self, shared: &CommunityFile) -> Result<(), ApiError> {
        self.conn.execute(
            "INSERT INTO shared_file (id, original_file_id, shared_by_uid, shared_by_name, file_name, file_size, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &shared.id,
                &shared.original_file_id,
                &shared.shared_by_uid,
                &shared.shared_by,
                &shared.name,
                to_i64(shared.size),
                &shared.description,
                shared.created_at
            ],
        )?;
        Ok(())
    }

    fn is_shared(&self, original_file_id: &str, uid: &str) -> Result<bool, ApiError> {
        let shared = self
            .conn
            .prepare_cached(
                "SELECT id FROM shared_file WHERE original_file_id = ?1 AND shared_by_uid = ?2 AND is_active = 1",
            )?
            .exists(params![original_file_id, uid])?;
        Ok(shared)
    }

    fn get_shared(&self, id: &str) -> Result<Option<SharedRecord>, ApiError> {
        let shared = self
            .conn
            .query_row(
                &format!("SELECT {SHARED_COLUMNS} FROM shared_file WHERE id = ?1"),
                params![id],
                shared_from_row,
            )
            .optional()?;
        Ok(shared)
    }

    fn community_files(&self, limit: u32, offset: u32) -> Result<Vec<CommunityFile>, ApiError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {SHARED_COLUMNS} FROM shared_file WHERE is_active = 1
                 ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let files = stmt
            .query_map(params![limit, offset], |r| shared_from_row(r).map(|s| s.file))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    fn record_download(
        &mut self,
        shared_id: &str,
        uid: &str,
        day: NaiveDate,
        daily_cap: Option<u32>,
    ) -> Result<(), ApiError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(cap) = daily_cap {
            let today: Option<u32> = tx
                .query_row(
                    "SELECT count FROM daily_download WHERE uid = ?1 AND day = ?2",
                    params![uid, day],
                    |r| r.get(0),
                )
                .optional()?;
            if today.unwrap_or_default() >= cap {
                return Err(ApiError::TooManyRequests(
                    "Daily download limit reached. Upgrade to Premium for unlimited downloads!"
                        .to_owned(),
                ));
            }
            tx.execute(
                "INSERT INTO daily_download (uid, day, count) VALUES (?1, ?2, 1)
                     ON CONFLICT(uid, day) DO UPDATE SET count = count + 1",
                params![uid, day],
            )?;
        }

        let updated = tx.execute(
            "UPDATE shared_file SET downloads = downloads + 1 WHERE id = ?1 AND is_active = 1",
            params![shared_id],
        )?;
        if updated == 0 {
            return Err(ApiError::not_found("Shared file"));
        }

        tx.commit()?;
        Ok(())
    }

    fn rate(&mut self, shared_id: &str, uid: &str, rating: u8) -> Result<RatingTotals, ApiError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous: Option<u8> = tx
            .query_row(
                "SELECT rating FROM rating WHERE shared_file_id = ?1 AND uid = ?2",
                params![shared_id, uid],
                |r| r.get(0),
            )
            .optional()?;
        tx.execute(
            "INSERT INTO rating (shared_file_id, uid, rating) VALUES (?1, ?2, ?3)
                 ON CONFLICT(shared_file_id, uid) DO UPDATE SET rating = excluded.rating",
            params![shared_id, uid, rating],
        )?;
        let (sum, count): (i64, i64) = tx.query_row(
            "SELECT COALESCE(SUM(rating), 0), COUNT(*) FROM rating WHERE shared_file_id = ?1",
            params![shared_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let average = average_rating(to_u64(sum), to_u64(count));
        tx.execute(
            "UPDATE shared_file SET average_rating = ?2, rating_count = ?3 WHERE id = ?1",
            params![shared_id, average, count],
        )?;

        tx.commit()?;
        Ok(RatingTotals {
            average,
            count: to_u64(count),
            previous,
        })
    }

    fn unshare(&mut self, shared_id: &str) -> Result<(), ApiError> {
        self.conn.execute(
            "UPDATE shared_file SET is_active = 0, unshared_at = ?2 WHERE id = ?1",
            params![shared_id, Utc::now()],
        )?;
        Ok(())
    }
}

impl Sqlite {
    pub fn open<P: AsRef<Path>>(path: P, mode: Mode) -> Result<Sqlite, ApiError> {
        let c = match mode {
            Mode::ReadWrite => Connection::open(path),
            Mode::ReadOnly => Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY),
        }?;
        c.busy_timeout(BUSY_TIMEOUT)?;
        let s = Self { conn: c };
        s.enable_foreign_keys()?;
        Ok(s)
    }

    #[cfg(test)]
    pub(crate) fn in_memory() -> Result<Sqlite, ApiError> {
        let s = Self {
            conn: Connection::open_in_memory()?,
        };
        s.enable_foreign_keys()?;
        Ok(s)
    }

    fn enable_foreign_keys(&self) -> Result<(), ApiError> {
        self.pragma_update("foreign_keys", "ON")
    }

    fn assign_cache_size(&self) -> Result<(), ApiError> {
        self.pragma_update("cache_size", CACHE_SIZE)
    }

    fn pragma_update(&self, name: &str, value: &str) -> Result<(), ApiError> {
        self.conn.pragma_update(None, name, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel::BASIC_FILE_LIMIT;

    const MB: usize = 1024 * 1024;

    fn user(uid: &str, tier: Tier) -> UserRecord {
        UserRecord {
            uid: uid.to_owned(),
            email: format!("{uid}@simsync.dev"),
            display_name: Some(uid.to_owned()),
            tier,
            password_hash: "hash".to_owned(),
            salt: "salt".to_owned(),
        }
    }

    fn storage_with(users: &[(&str, Tier)]) -> Sqlite {
        let mut storage = Sqlite::in_memory().unwrap();
        storage.new_database().unwrap();
        for (uid, tier) in users {
            storage.create_user(&user(uid, *tier)).unwrap();
        }
        storage
    }

    fn insert(storage: &mut Sqlite, uid: &str, name: &str, data: &[u8]) -> Result<FileRecord, ApiError> {
        storage.insert_file(&NewFile {
            uid,
            name,
            content_type: "application/octet-stream",
            data,
        })
    }

    fn shared(id: &str, original: &FileRecord) -> CommunityFile {
        CommunityFile {
            id: id.to_owned(),
            original_file_id: original.id.clone(),
            shared_by_uid: original.uid.clone(),
            shared_by: original.uid.clone(),
            name: original.name.clone(),
            size: original.size,
            description: String::new(),
            downloads: 0,
            average_rating: 0.0,
            rating_count: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_email_rejected() {
        // Arrange
        let mut storage = storage_with(&[("u1", Tier::Basic)]);

        // Act
        let result = storage.create_user(&UserRecord {
            uid: "u2".to_owned(),
            ..user("u1", Tier::Basic)
        });

        // Assert
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn same_content_stored_once() {
        // Arrange
        let mut storage = storage_with(&[("u1", Tier::Basic)]);
        let first = insert(&mut storage, "u1", "a.package", b"content").unwrap();
        let second = insert(&mut storage, "u1", "b.package", b"content").unwrap();

        // Act
        let removed_first = storage.delete_file(&first.id).unwrap();
        let removed_second = storage.delete_file(&second.id).unwrap();

        // Assert
        assert_eq!(first.blake3_hash, second.blake3_hash);
        assert_eq!(removed_first, DeleteResult { files: 1, blobs: 0 });
        assert_eq!(removed_second, DeleteResult { files: 1, blobs: 1 });
    }

    #[test]
    fn stored_content_reads_back() {
        // Arrange
        let mut storage = storage_with(&[("u1", Tier::Basic)]);
        let file = insert(&mut storage, "u1", "a.txt", b"hello").unwrap();

        // Act
        let mut content = Vec::new();
        storage
            .get_file_data(&file.blake3_hash)
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();

        // Assert
        assert_eq!(content, b"hello");
        assert_eq!(storage.usage("u1").unwrap(), (5, 1));
    }

    #[test]
    fn storage_quota_enforced() {
        // Arrange
        let mut storage = storage_with(&[("u1", Tier::Basic)]);
        insert(&mut storage, "u1", "big.zip", &vec![1; 45 * MB]).unwrap();

        // Act
        let result = insert(&mut storage, "u1", "more.zip", &vec![2; 6 * MB]);

        // Assert
        assert!(matches!(result, Err(ApiError::PayloadTooLarge(_))));
        assert_eq!(storage.usage("u1").unwrap().1, 1);
    }

    #[test]
    fn basic_file_limit_enforced() {
        // Arrange
        let mut storage = storage_with(&[("u1", Tier::Basic), ("u2", Tier::Premium)]);
        for i in 0..BASIC_FILE_LIMIT {
            insert(&mut storage, "u1", &format!("{i}.md"), format!("{i}").as_bytes()).unwrap();
            insert(&mut storage, "u2", &format!("{i}.md"), format!("{i}").as_bytes()).unwrap();
        }

        // Act
        let basic = insert(&mut storage, "u1", "extra.md", b"extra");
        let premium = insert(&mut storage, "u2", "extra.md", b"extra");

        // Assert
        assert!(matches!(basic, Err(ApiError::Forbidden(_))));
        assert!(premium.is_ok());
    }

    #[test]
    fn expired_token_has_no_owner() {
        // Arrange
        let mut storage = storage_with(&[("u1", Tier::Basic)]);
        let past = Utc::now() - chrono::Duration::seconds(1);
        let future = Utc::now() + chrono::Duration::seconds(60);
        storage.store_token("old", "u1", TokenKind::Id, past).unwrap();
        storage.store_token("new", "u1", TokenKind::Id, future).unwrap();

        // Act
        let old = storage.token_owner("old", TokenKind::Id).unwrap();
        let new = storage.token_owner("new", TokenKind::Id).unwrap();
        let wrong_kind = storage.token_owner("new", TokenKind::Refresh).unwrap();

        // Assert
        assert_eq!(old, None);
        assert_eq!(new.as_deref(), Some("u1"));
        assert_eq!(wrong_kind, None);
    }

    #[test]
    fn refresh_token_is_single_use() {
        // Arrange
        let mut storage = storage_with(&[("u1", Tier::Basic)]);
        let future = Utc::now() + chrono::Duration::seconds(60);
        storage
            .store_token("r1", "u1", TokenKind::Refresh, future)
            .unwrap();

        // Act
        let first = storage.take_refresh_token("r1").unwrap();
        let second = storage.take_refresh_token("r1").unwrap();

        // Assert
        assert_eq!(first.as_deref(), Some("u1"));
        assert_eq!(second, None);
    }

    #[test]
    fn rating_upserts_and_averages() {
        // Arrange
        let mut storage = storage_with(&[("u1", Tier::Premium)]);
        let file = insert(&mut storage, "u1", "lot.trayitem", b"lot").unwrap();
        storage.share_file(&shared("s1", &file)).unwrap();
        storage.rate("s1", "a", 4).unwrap();
        storage.rate("s1", "b", 5).unwrap();

        // Act
        let totals = storage.rate("s1", "c", 2).unwrap();
        let changed = storage.rate("s1", "c", 5).unwrap();

        // Assert
        assert!((totals.average - 3.7).abs() < 1e-9);
        assert_eq!(totals.count, 3);
        assert_eq!(totals.previous, None);
        assert_eq!(changed.previous, Some(2));
        assert!((changed.average - 4.7).abs() < 1e-9);
        let entry = storage.get_shared("s1").unwrap().unwrap();
        assert_eq!(entry.file.rating_count, 3);
    }

    #[test]
    fn daily_cap_applies_per_day() {
        // Arrange
        let mut storage = storage_with(&[("u1", Tier::Premium), ("u2", Tier::Basic)]);
        let file = insert(&mut storage, "u1", "lot.trayitem", b"lot").unwrap();
        storage.share_file(&shared("s1", &file)).unwrap();
        let today = Utc::now().date_naive();
        for _ in 0..2 {
            storage.record_download("s1", "u2", today, Some(2)).unwrap();
        }

        // Act
        let capped = storage.record_download("s1", "u2", today, Some(2));
        let next_day = storage.record_download("s1", "u2", today.succ_opt().unwrap(), Some(2));
        let uncapped = storage.record_download("s1", "u1", today, None);

        // Assert
        assert!(matches!(capped, Err(ApiError::TooManyRequests(_))));
        assert!(next_day.is_ok());
        assert!(uncapped.is_ok());
        assert_eq!(storage.get_shared("s1").unwrap().unwrap().file.downloads, 4);
    }

    #[test]
    fn unshared_entries_leave_listing() {
        // Arrange
        let mut storage = storage_with(&[("u1", Tier::Premium)]);
        let a = insert(&mut storage, "u1", "a.zip", b"a").unwrap();
        let b = insert(&mut storage, "u1", "b.zip", b"b").unwrap();
        storage.share_file(&shared("s1", &a)).unwrap();
        storage.share_file(&shared("s2", &b)).unwrap();

        // Act
        storage.unshare("s1").unwrap();

        // Assert
        let listed: Vec<String> = storage
            .community_files(50, 0)
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(listed, vec!["s2".to_owned()]);
        assert!(!storage.is_shared(&a.id, "u1").unwrap());
        assert!(storage.is_shared(&b.id, "u1").unwrap());
    }
}
