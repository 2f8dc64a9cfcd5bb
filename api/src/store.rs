use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use waitwith_core::countdown::{ContentType, CountdownRecord, NewCountdown, dday_label};
use waitwith_core::store::{CountdownStore, StoreError, UniqueKey};

const SELECT_COLUMNS: &str = r#"
    SELECT id, name, canonical_title, release_date, content_type, source, source_id,
           is_re_release, dday_label, overview, country, poster_url,
           distributor, director, cast_names, genres, last_updated
    FROM countdowns
"#;

/// Postgres-backed record store. Uniqueness is enforced by the table constraints.
#[derive(Clone)]
pub struct PgCountdownStore {
    pool: PgPool,
}

impl PgCountdownStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for sqlx mapping
#[derive(sqlx::FromRow)]
struct CountdownRow {
    id: Uuid,
    name: String,
    canonical_title: String,
    release_date: NaiveDate,
    content_type: String,
    source: String,
    source_id: String,
    is_re_release: bool,
    dday_label: String,
    overview: Option<String>,
    country: Option<String>,
    poster_url: Option<String>,
    distributor: Option<String>,
    director: Option<String>,
    cast_names: Vec<String>,
    genres: Vec<String>,
    last_updated: DateTime<Utc>,
}

impl CountdownRow {
    fn into_record(self) -> Result<CountdownRecord, StoreError> {
        let content_type = ContentType::parse(&self.content_type).ok_or_else(|| {
            StoreError::Unavailable(format!(
                "countdown {} has unknown content_type '{}'",
                self.id, self.content_type
            ))
        })?;
        Ok(CountdownRecord {
            id: self.id,
            name: self.name,
            canonical_title: self.canonical_title,
            release_date: self.release_date,
            content_type,
            source: self.source,
            source_id: self.source_id,
            is_re_release: self.is_re_release,
            dday_label: self.dday_label,
            overview: self.overview,
            country: self.country,
            poster_url: self.poster_url,
            distributor: self.distributor,
            director: self.director,
            cast: self.cast_names,
            genre: self.genres,
            last_updated: self.last_updated,
        })
    }
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            let key = match db_err.constraint() {
                Some("countdowns_source_key") => UniqueKey::Source,
                _ => UniqueKey::Name,
            };
            return StoreError::Duplicate(key);
        }
    }
    tracing::error!("Database error: {:?}", err);
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl CountdownStore for PgCountdownStore {
    async fn get_by_name(&self, name: &str) -> Result<Option<CountdownRecord>, StoreError> {
        let row = sqlx::query_as::<_, CountdownRow>(&format!("{SELECT_COLUMNS} WHERE name = $1"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(CountdownRow::into_record).transpose()
    }

    async fn get_by_source(
        &self,
        source: &str,
        source_id: &str,
    ) -> Result<Option<CountdownRecord>, StoreError> {
        let row = sqlx::query_as::<_, CountdownRow>(&format!(
            "{SELECT_COLUMNS} WHERE source = $1 AND source_id = $2"
        ))
        .bind(source)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.map(CountdownRow::into_record).transpose()
    }

    async fn create(&self, new: NewCountdown) -> Result<CountdownRecord, StoreError> {
        let draft = new.draft;
        let row = sqlx::query_as::<_, CountdownRow>(
            r#"
            INSERT INTO countdowns (
                id, name, canonical_title, release_date, content_type, source, source_id,
                is_re_release, dday_label, overview, country, poster_url,
                distributor, director, cast_names, genres, last_updated
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, NOW())
            RETURNING id, name, canonical_title, release_date, content_type, source, source_id,
                      is_re_release, dday_label, overview, country, poster_url,
                      distributor, director, cast_names, genres, last_updated
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&draft.name)
        .bind(&draft.canonical_title)
        .bind(draft.release_date)
        .bind(draft.content_type.as_str())
        .bind(&draft.source)
        .bind(&draft.source_id)
        .bind(draft.is_re_release)
        .bind(&new.dday_label)
        .bind(&draft.overview)
        .bind(&draft.country)
        .bind(&draft.poster_url)
        .bind(&draft.distributor)
        .bind(&draft.director)
        .bind(&draft.cast)
        .bind(&draft.genre)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.into_record()
    }

    async fn list_upcoming(&self, as_of: NaiveDate) -> Result<Vec<CountdownRecord>, StoreError> {
        let rows = sqlx::query_as::<_, CountdownRow>(&format!(
            "{SELECT_COLUMNS} WHERE release_date >= $1 ORDER BY release_date ASC, id ASC"
        ))
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.into_iter().map(CountdownRow::into_record).collect()
    }

    async fn refresh_labels(&self, as_of: NaiveDate) -> Result<u64, StoreError> {
        let rows: Vec<(Uuid, NaiveDate, String)> =
            sqlx::query_as("SELECT id, release_date, dday_label FROM countdowns")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut changed = 0;
        for (id, release_date, current) in rows {
            let label = dday_label(release_date, as_of);
            if label == current {
                continue;
            }
            sqlx::query("UPDATE countdowns SET dday_label = $1, last_updated = NOW() WHERE id = $2")
                .bind(&label)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            changed += 1;
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(changed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_sqlx)
    }
}
