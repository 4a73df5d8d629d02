//! Reservation repository implementation
//!
//! PostgreSQL-backed storage for reservations, their history and the
//! listing nights they block. Lifecycle updates are conditional on the
//! status read by the caller, so concurrent transitions cannot both commit.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use sublet_core::{
    models::{EventKind, Reservation, ReservationEvent, ReservationStatus},
    traits::{Party, RefundReceipt, ReservationRepository, StatusChange},
    AppError, AppResult,
};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

const RESERVATION_COLUMNS: &str = r#"
    id, listing_id, guest_id, host_id,
    arrival_date, departure_date,
    base_price, platform_fee, tax, total_price, currency,
    refund_50_percent_date, refund_0_percent_date,
    status, host_validation_ok, cancellation_reason,
    payment_reference, refunded_amount, refund_reference,
    created_at, updated_at, canceled_at
"#;

const EVENT_COLUMNS: &str = r#"
    id, reservation_id, actor_id, kind, from_status, to_status,
    refund_amount, refund_percent, refund_reference, reason, created_at
"#;

/// PostgreSQL implementation of ReservationRepository
pub struct PgReservationRepository {
    pool: PgPool,
}

impl PgReservationRepository {
    /// Create a new reservation repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse reservation status from its stored spelling
    fn parse_status(s: &str) -> AppResult<ReservationStatus> {
        ReservationStatus::parse(s)
            .ok_or_else(|| AppError::Database(format!("Unknown reservation status '{}'", s)))
    }

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> AppResult<()> {
        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })
    }

    async fn insert_event(
        tx: &mut Transaction<'static, Postgres>,
        event: &ReservationEvent,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reservation_events (
                id, reservation_id, actor_id, kind, from_status, to_status,
                refund_amount, refund_percent, refund_reference, reason, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event.id)
        .bind(event.reservation_id)
        .bind(event.actor_id)
        .bind(event.kind.as_str())
        .bind(event.from_status.map(|s| s.as_str()))
        .bind(event.to_status.as_str())
        .bind(event.refund_amount)
        .bind(i16::from(event.refund_percent))
        .bind(&event.refund_reference)
        .bind(&event.reason)
        .bind(event.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!(
                "Database error recording event for reservation {}: {}",
                event.reservation_id, e
            );
            AppError::Database(format!("Failed to record reservation event: {}", e))
        })?;

        Ok(())
    }

    fn map_insert_error(e: sqlx::Error) -> AppError {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return match db.constraint() {
                    Some("reservations_payment_reference_key") => AppError::AlreadyExists(
                        "a reservation already exists for this payment".to_string(),
                    ),
                    _ => AppError::AlreadyExists(
                        "the listing is already booked for some of these nights".to_string(),
                    ),
                };
            }
        }

        error!("Database error creating reservation: {}", e);
        AppError::Database(format!("Failed to create reservation: {}", e))
    }
}

#[async_trait]
impl ReservationRepository for PgReservationRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Reservation>> {
        debug!("Finding reservation by id: {}", id);

        let sql = format!("SELECT {} FROM reservations WHERE id = $1", RESERVATION_COLUMNS);
        let row = sqlx::query_as::<Postgres, ReservationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding reservation {}: {}", id, e);
                AppError::Database(format!("Failed to find reservation: {}", e))
            })?;

        row.map(Reservation::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_payment_reference(
        &self,
        payment_reference: &str,
    ) -> AppResult<Option<Reservation>> {
        debug!("Finding reservation by payment: {}", payment_reference);

        let sql = format!(
            "SELECT {} FROM reservations WHERE payment_reference = $1",
            RESERVATION_COLUMNS
        );
        let row = sqlx::query_as::<Postgres, ReservationRow>(&sql)
            .bind(payment_reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding reservation by payment: {}", e);
                AppError::Database(format!("Failed to find reservation: {}", e))
            })?;

        row.map(Reservation::try_from).transpose()
    }

    #[instrument(skip(self, reservation, event), fields(id = %reservation.id))]
    async fn create(
        &self,
        reservation: &Reservation,
        event: &ReservationEvent,
    ) -> AppResult<Reservation> {
        debug!(
            "Creating reservation for listing {} ({} -> {})",
            reservation.listing_id, reservation.arrival_date, reservation.departure_date
        );

        let mut tx = self.begin().await?;

        let sql = format!(
            r#"
            INSERT INTO reservations (
                id, listing_id, guest_id, host_id,
                arrival_date, departure_date,
                base_price, platform_fee, tax, total_price, currency,
                refund_50_percent_date, refund_0_percent_date,
                status, host_validation_ok, cancellation_reason,
                payment_reference, refunded_amount, refund_reference,
                created_at, updated_at, canceled_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21, $22)
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        );

        let row = sqlx::query_as::<Postgres, ReservationRow>(&sql)
            .bind(reservation.id)
            .bind(reservation.listing_id)
            .bind(reservation.guest_id)
            .bind(reservation.host_id)
            .bind(reservation.arrival_date)
            .bind(reservation.departure_date)
            .bind(reservation.base_price)
            .bind(reservation.platform_fee)
            .bind(reservation.tax)
            .bind(reservation.total_price)
            .bind(&reservation.currency)
            .bind(reservation.refund_50_percent_date)
            .bind(reservation.refund_0_percent_date)
            .bind(reservation.status.as_str())
            .bind(reservation.host_validation_ok)
            .bind(&reservation.cancellation_reason)
            .bind(&reservation.payment_reference)
            .bind(reservation.refunded_amount)
            .bind(&reservation.refund_reference)
            .bind(reservation.created_at)
            .bind(reservation.updated_at)
            .bind(reservation.canceled_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(Self::map_insert_error)?;

        sqlx::query(
            r#"
            INSERT INTO listing_blocked_dates (listing_id, night, reservation_id)
            SELECT $1, night::date, $2
            FROM generate_series($3::date, $4::date - 1, INTERVAL '1 day') AS night
            "#,
        )
        .bind(reservation.listing_id)
        .bind(reservation.id)
        .bind(reservation.arrival_date)
        .bind(reservation.departure_date)
        .execute(&mut *tx)
        .await
        .map_err(Self::map_insert_error)?;

        Self::insert_event(&mut tx, event).await?;
        Self::commit(tx).await?;

        Reservation::try_from(row)
    }

    #[instrument(skip(self))]
    async fn list_for_user(
        &self,
        user_id: Uuid,
        party: Party,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Reservation>, i64)> {
        let column = match party {
            Party::Guest => "guest_id",
            Party::Host => "host_id",
        };
        debug!("Listing reservations where {} = {}", column, user_id);

        let sql = format!(
            "SELECT {} FROM reservations WHERE {} = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            RESERVATION_COLUMNS, column
        );
        let rows = sqlx::query_as::<Postgres, ReservationRow>(&sql)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error listing reservations: {}", e);
                AppError::Database(format!("Failed to list reservations: {}", e))
            })?;

        let count_sql = format!("SELECT COUNT(*) FROM reservations WHERE {} = $1", column);
        let total: (i64,) = sqlx::query_as(&count_sql)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error counting reservations: {}", e);
                AppError::Database(format!("Failed to count reservations: {}", e))
            })?;

        let reservations = rows
            .into_iter()
            .map(Reservation::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok((reservations, total.0))
    }

    #[instrument(skip(self))]
    async fn list_all(
        &self,
        status: Option<ReservationStatus>,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Reservation>, i64)> {
        let filter = r#"
            WHERE $1::text IS NULL
               OR status = $1
               OR ($1 = 'canceled' AND status = 'cancelled')
        "#;
        let status = status.map(|s| s.as_str());

        let sql = format!(
            "SELECT {} FROM reservations {} ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            RESERVATION_COLUMNS, filter
        );
        let rows = sqlx::query_as::<Postgres, ReservationRow>(&sql)
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error listing reservations: {}", e);
                AppError::Database(format!("Failed to list reservations: {}", e))
            })?;

        let count_sql = format!("SELECT COUNT(*) FROM reservations {}", filter);
        let total: (i64,) = sqlx::query_as(&count_sql)
            .bind(status)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error counting reservations: {}", e);
                AppError::Database(format!("Failed to count reservations: {}", e))
            })?;

        let reservations = rows
            .into_iter()
            .map(Reservation::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok((reservations, total.0))
    }

    #[instrument(skip(self, change), fields(id = %change.reservation_id))]
    async fn compare_and_set(&self, change: &StatusChange) -> AppResult<Option<Reservation>> {
        debug!(
            "Updating reservation {} from {} to {}",
            change.reservation_id, change.expected_status, change.new_status
        );

        let mut tx = self.begin().await?;

        let sql = format!(
            r#"
            UPDATE reservations
            SET status = $4,
                host_validation_ok = COALESCE($5, host_validation_ok),
                cancellation_reason = COALESCE($6, cancellation_reason),
                refunded_amount = refunded_amount + $7,
                refund_reference = COALESCE($8, refund_reference),
                canceled_at = CASE WHEN $9 THEN $10 ELSE canceled_at END,
                updated_at = $10
            WHERE id = $1
                AND status = $2
                AND ($3::boolean IS NULL OR host_validation_ok = $3)
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        );

        let row = sqlx::query_as::<Postgres, ReservationRow>(&sql)
            .bind(change.reservation_id)
            .bind(change.expected_status.as_str())
            .bind(change.expected_validation)
            .bind(change.new_status.as_str())
            .bind(change.new_validation)
            .bind(&change.cancellation_reason)
            .bind(change.refunded_amount)
            .bind(&change.refund_reference)
            .bind(change.new_status.is_terminal())
            .bind(change.at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                error!(
                    "Database error updating reservation {}: {}",
                    change.reservation_id, e
                );
                AppError::Database(format!("Failed to update reservation: {}", e))
            })?;

        let Some(row) = row else {
            warn!(
                "Reservation {} no longer {} (validated: {:?}), update skipped",
                change.reservation_id, change.expected_status, change.expected_validation
            );
            return Ok(None);
        };

        Self::insert_event(&mut tx, &change.event).await?;
        Self::commit(tx).await?;

        Reservation::try_from(row).map(Some)
    }

    #[instrument(skip(self, event))]
    async fn record_refund(
        &self,
        reservation_id: Uuid,
        receipt: &RefundReceipt,
        event: &ReservationEvent,
    ) -> AppResult<Option<Reservation>> {
        let mut tx = self.begin().await?;

        let sql = format!(
            r#"
            UPDATE reservations
            SET refunded_amount = refunded_amount + $2,
                refund_reference = $3,
                updated_at = $4
            WHERE id = $1
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        );

        let row = sqlx::query_as::<Postgres, ReservationRow>(&sql)
            .bind(reservation_id)
            .bind(receipt.amount)
            .bind(&receipt.provider_id)
            .bind(event.created_at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                error!(
                    "Database error recording refund {} of reservation {}: {}",
                    receipt.provider_id, reservation_id, e
                );
                AppError::Database(format!("Failed to record refund: {}", e))
            })?;

        let Some(row) = row else {
            return Ok(None);
        };

        Self::insert_event(&mut tx, event).await?;
        Self::commit(tx).await?;

        Reservation::try_from(row).map(Some)
    }

    #[instrument(skip(self))]
    async fn events(&self, reservation_id: Uuid) -> AppResult<Vec<ReservationEvent>> {
        let sql = format!(
            "SELECT {} FROM reservation_events WHERE reservation_id = $1 ORDER BY created_at, id",
            EVENT_COLUMNS
        );
        let rows = sqlx::query_as::<Postgres, EventRow>(&sql)
            .bind(reservation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error fetching events: {}", e);
                AppError::Database(format!("Failed to fetch reservation history: {}", e))
            })?;

        rows.into_iter().map(ReservationEvent::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn release_dates(&self, reservation_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM listing_blocked_dates WHERE reservation_id = $1")
            .bind(reservation_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error releasing nights of {}: {}", reservation_id, e);
                AppError::Database(format!("Failed to release listing dates: {}", e))
            })?;

        Ok(result.rows_affected())
    }
}

/// Helper struct for mapping reservation rows
#[derive(Debug, sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    listing_id: Uuid,
    guest_id: Uuid,
    host_id: Uuid,
    arrival_date: NaiveDate,
    departure_date: NaiveDate,
    base_price: Decimal,
    platform_fee: Decimal,
    tax: Decimal,
    total_price: Decimal,
    currency: String,
    refund_50_percent_date: Option<NaiveDate>,
    refund_0_percent_date: Option<NaiveDate>,
    status: String,
    host_validation_ok: bool,
    cancellation_reason: Option<String>,
    payment_reference: String,
    refunded_amount: Decimal,
    refund_reference: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    canceled_at: Option<DateTime<Utc>>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = AppError;

    fn try_from(row: ReservationRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            listing_id: row.listing_id,
            guest_id: row.guest_id,
            host_id: row.host_id,
            arrival_date: row.arrival_date,
            departure_date: row.departure_date,
            base_price: row.base_price,
            platform_fee: row.platform_fee,
            tax: row.tax,
            total_price: row.total_price,
            currency: row.currency,
            refund_50_percent_date: row.refund_50_percent_date,
            refund_0_percent_date: row.refund_0_percent_date,
            status: PgReservationRepository::parse_status(&row.status)?,
            host_validation_ok: row.host_validation_ok,
            cancellation_reason: row.cancellation_reason,
            payment_reference: row.payment_reference,
            refunded_amount: row.refunded_amount,
            refund_reference: row.refund_reference,
            created_at: row.created_at,
            updated_at: row.updated_at,
            canceled_at: row.canceled_at,
        })
    }
}

/// Helper struct for mapping event rows
#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    reservation_id: Uuid,
    actor_id: Uuid,
    kind: String,
    from_status: Option<String>,
    to_status: String,
    refund_amount: Decimal,
    refund_percent: i16,
    refund_reference: Option<String>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for ReservationEvent {
    type Error = AppError;

    fn try_from(row: EventRow) -> AppResult<Self> {
        let kind = EventKind::parse(&row.kind)
            .ok_or_else(|| AppError::Database(format!("Unknown event kind '{}'", row.kind)))?;
        let from_status = row
            .from_status
            .as_deref()
            .map(PgReservationRepository::parse_status)
            .transpose()?;

        Ok(Self {
            id: row.id,
            reservation_id: row.reservation_id,
            actor_id: row.actor_id,
            kind,
            from_status,
            to_status: PgReservationRepository::parse_status(&row.to_status)?,
            refund_amount: row.refund_amount,
            refund_percent: u8::try_from(row.refund_percent).unwrap_or(0),
            refund_reference: row.refund_reference,
            reason: row.reason,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(
            PgReservationRepository::parse_status("confirmed").unwrap(),
            ReservationStatus::Confirmed
        );
        assert_eq!(
            PgReservationRepository::parse_status("cancelled").unwrap(),
            ReservationStatus::Canceled
        );
        assert!(matches!(
            PgReservationRepository::parse_status("archived"),
            Err(AppError::Database(_))
        ));
    }

    #[test]
    fn test_event_row_conversion() {
        let row = EventRow {
            id: Uuid::new_v4(),
            reservation_id: Uuid::new_v4(),
            actor_id: Uuid::new_v4(),
            kind: "guest_canceled".to_string(),
            from_status: Some("confirmed".to_string()),
            to_status: "cancelled".to_string(),
            refund_amount: Decimal::new(5000, 2),
            refund_percent: 50,
            refund_reference: Some("re_1".to_string()),
            reason: None,
            created_at: Utc::now(),
        };

        let event = ReservationEvent::try_from(row).unwrap();
        assert_eq!(event.kind, EventKind::GuestCanceled);
        assert_eq!(event.from_status, Some(ReservationStatus::Confirmed));
        assert_eq!(event.to_status, ReservationStatus::Canceled);
        assert_eq!(event.refund_percent, 50);
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_compare_and_set_round_trip() {
        use sublet_core::lifecycle::{plan, Action};
        use sublet_core::models::NewReservation;
        use sublet_core::refund::RefundPolicy;

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/sublet".to_string());
        let pool = crate::create_pool(&database_url, Some(2)).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        let repo = PgReservationRepository::new(pool);

        let now = Utc::now();
        let arrival = now.date_naive() + chrono::Duration::days(30);
        let reservation = NewReservation {
            listing_id: Uuid::new_v4(),
            guest_id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            arrival_date: arrival,
            departure_date: arrival + chrono::Duration::days(2),
            base_price: Decimal::new(20000, 2),
            platform_fee: Decimal::new(2000, 2),
            tax: Decimal::new(400, 2),
            total_price: Decimal::new(22400, 2),
            currency: "eur".to_string(),
            refund_50_percent_date: None,
            refund_0_percent_date: None,
            payment_reference: format!("pi_{}", Uuid::new_v4().simple()),
        }
        .into_reservation(now);
        let created = repo
            .create(
                &reservation,
                &ReservationEvent::created(reservation.id, reservation.guest_id, now),
            )
            .await
            .unwrap();

        let plan = plan(
            &created,
            Action::HostValidate(true),
            now,
            &RefundPolicy::default(),
        )
        .unwrap();
        let change = StatusChange::from_plan(created.id, created.host_id, &plan, None, None, now);

        let updated = repo.compare_and_set(&change).await.unwrap().unwrap();
        assert_eq!(updated.status, ReservationStatus::Confirmed);
        assert!(updated.host_validation_ok);

        // Same expectation again no longer matches
        assert!(repo.compare_and_set(&change).await.unwrap().is_none());
        assert_eq!(repo.events(created.id).await.unwrap().len(), 2);
        assert_eq!(repo.release_dates(created.id).await.unwrap(), 2);
    }
}
