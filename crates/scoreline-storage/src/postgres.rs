use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scoreline_core::{Competition, CompetitionDetails, CompetitionStatus, Period, PeriodType, Rating, Team};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::Repository;

const COMPETITION_COLUMNS: &str = r#"
    c.id, c.sport, c.external_id, c.season, c.period, c.period_type,
    c.start_time, c.status, c.teams, c.details,
    r.rating_type, r.value AS rating_value, r.rationale, r.generated_at
"#;

const LATEST_RATING_JOIN: &str = r#"
    LEFT JOIN LATERAL (
        SELECT rating_type, value, rationale, generated_at
          FROM competition_ratings
         WHERE competition_id = c.id
         ORDER BY generated_at DESC
         LIMIT 1
    ) r ON TRUE
"#;

/// Postgres-backed repository. Competition writes are `ON CONFLICT` upserts on
/// `(sport, external_id)`, so duplicate inserts from racing ingestion paths
/// collapse onto one row.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("running migrations")?;
        info!("database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn find_by_period(&self, sport: &str, period: &Period) -> anyhow::Result<Vec<Competition>> {
        let sql = format!(
            "SELECT {COMPETITION_COLUMNS} FROM competitions c {LATEST_RATING_JOIN}
              WHERE c.sport = $1 AND c.season = $2 AND c.period = $3 AND c.period_type = $4
              ORDER BY c.start_time NULLS LAST, c.external_id"
        );
        let rows = sqlx::query(&sql)
            .bind(sport)
            .bind(&period.season)
            .bind(&period.period)
            .bind(period.period_type.as_str())
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("loading {sport} competitions for {period}"))?;
        rows.iter().map(competition_from_row).collect()
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Competition>> {
        let sql = format!("SELECT {COMPETITION_COLUMNS} FROM competitions c {LATEST_RATING_JOIN} WHERE c.id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("loading competition {id}"))?;
        row.as_ref().map(competition_from_row).transpose()
    }

    async fn save_competition(&self, competition: &Competition) -> anyhow::Result<()> {
        let teams = serde_json::to_value(&competition.teams).context("serializing teams")?;
        let details = competition
            .details
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("serializing details")?;

        sqlx::query(
            r#"
            INSERT INTO competitions
                (id, sport, external_id, season, period, period_type, start_time, status, teams, details)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (sport, external_id) DO UPDATE SET
                season      = EXCLUDED.season,
                period      = EXCLUDED.period,
                period_type = EXCLUDED.period_type,
                start_time  = COALESCE(EXCLUDED.start_time, competitions.start_time),
                status      = EXCLUDED.status,
                teams       = EXCLUDED.teams,
                details     = COALESCE(EXCLUDED.details, competitions.details),
                updated_at  = now()
            "#,
        )
        .bind(competition.id)
        .bind(&competition.sport)
        .bind(&competition.external_id)
        .bind(&competition.season)
        .bind(&competition.period)
        .bind(competition.period_type.as_str())
        .bind(competition.start_time)
        .bind(competition.status.as_str())
        .bind(teams)
        .bind(details)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting competition {}:{}", competition.sport, competition.external_id))?;
        Ok(())
    }

    async fn available_periods(&self, sport: &str) -> anyhow::Result<Vec<Period>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT season, period, period_type
              FROM competitions
             WHERE sport = $1
            "#,
        )
        .bind(sport)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("listing stored periods for {sport}"))?;

        let mut periods = Vec::with_capacity(rows.len());
        for row in rows {
            let period_type: String = row.try_get("period_type")?;
            periods.push(Period::new(
                row.try_get::<String, _>("season")?,
                row.try_get::<String, _>("period")?,
                parse_period_type(&period_type)?,
            ));
        }
        periods.sort_by(|a, b| a.recency_cmp(b));
        Ok(periods)
    }

    async fn load_rating(&self, competition_id: Uuid, rating_type: &str) -> anyhow::Result<Option<Rating>> {
        let row = sqlx::query(
            r#"
            SELECT value, rationale, generated_at
              FROM competition_ratings
             WHERE competition_id = $1 AND rating_type = $2
            "#,
        )
        .bind(competition_id)
        .bind(rating_type)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("loading {rating_type} rating for {competition_id}"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Rating {
            competition_id,
            rating_type: rating_type.to_string(),
            value: row.try_get("value")?,
            rationale: row.try_get("rationale")?,
            generated_at: row.try_get("generated_at")?,
        }))
    }

    async fn save_rating(&self, rating: &Rating) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO competition_ratings (competition_id, rating_type, value, rationale, generated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (competition_id, rating_type) DO UPDATE SET
                value        = EXCLUDED.value,
                rationale    = EXCLUDED.rationale,
                generated_at = EXCLUDED.generated_at
            "#,
        )
        .bind(rating.competition_id)
        .bind(&rating.rating_type)
        .bind(&rating.value)
        .bind(&rating.rationale)
        .bind(rating.generated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("saving {} rating for {}", rating.rating_type, rating.competition_id))?;
        Ok(())
    }
}

fn parse_period_type(value: &str) -> anyhow::Result<PeriodType> {
    value.parse().map_err(anyhow::Error::msg)
}

fn competition_from_row(row: &PgRow) -> anyhow::Result<Competition> {
    let id: Uuid = row.try_get("id")?;
    let period_type: String = row.try_get("period_type")?;
    let status: String = row.try_get("status")?;
    let teams: serde_json::Value = row.try_get("teams")?;
    let details: Option<serde_json::Value> = row.try_get("details")?;

    let teams: Vec<Team> = serde_json::from_value(teams).context("decoding teams column")?;
    let details: Option<CompetitionDetails> = details
        .map(serde_json::from_value)
        .transpose()
        .context("decoding details column")?;

    let rating_type: Option<String> = row.try_get("rating_type")?;
    let rating = match rating_type {
        Some(rating_type) => Some(Rating {
            competition_id: id,
            rating_type,
            value: row.try_get("rating_value")?,
            rationale: row.try_get("rationale")?,
            generated_at: row.try_get::<DateTime<Utc>, _>("generated_at")?,
        }),
        None => None,
    };

    Ok(Competition {
        id,
        external_id: row.try_get("external_id")?,
        sport: row.try_get("sport")?,
        season: row.try_get("season")?,
        period: row.try_get("period")?,
        period_type: parse_period_type(&period_type)?,
        start_time: row.try_get("start_time")?,
        status: CompetitionStatus::parse_lenient(&status),
        teams,
        details,
        rating,
    })
}
