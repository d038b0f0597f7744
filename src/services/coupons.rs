//! Coupon tracker.
//!
//! Validation runs a fixed check chain and reports the first failed rule as
//! a typed rejection. Redemption is a guarded single-statement increment so
//! a shared-budget coupon can never exceed `max_uses` under concurrency.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use sea_orm::sea_query::Expr;
use sea_orm::Condition;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::entities::coupon::{self, DiscountType, Entity as Coupon};
use crate::entities::coupon_usage::{self, Entity as CouponUsage};
use crate::errors::ServiceError;
use crate::metrics;

/// Why a coupon failed validation. Each variant carries what an actionable
/// message needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CouponRejection {
    UnknownCode { code: String },
    Inactive { code: String },
    NotStarted { code: String },
    Expired { code: String },
    MinOrderNotMet { code: String, minimum: Decimal, subtotal: Decimal },
    Exhausted { code: String },
    CustomerLimitReached { code: String, limit: i32 },
}

impl CouponRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnknownCode { .. } => "unknown_code",
            Self::Inactive { .. } => "inactive",
            Self::NotStarted { .. } => "not_started",
            Self::Expired { .. } => "expired",
            Self::MinOrderNotMet { .. } => "min_order_not_met",
            Self::Exhausted { .. } => "exhausted",
            Self::CustomerLimitReached { .. } => "customer_limit_reached",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::UnknownCode { code } => format!("Coupon '{}' does not exist", code),
            Self::Inactive { code } => format!("Coupon '{}' is disabled", code),
            Self::NotStarted { code } => format!("Coupon '{}' is not yet valid", code),
            Self::Expired { code } => format!("Coupon '{}' has expired", code),
            Self::MinOrderNotMet {
                code,
                minimum,
                subtotal,
            } => format!(
                "Coupon '{}' requires a minimum order of {} (cart subtotal is {})",
                code, minimum, subtotal
            ),
            Self::Exhausted { code } => format!("Coupon '{}' has no uses remaining", code),
            Self::CustomerLimitReached { code, limit } => format!(
                "Coupon '{}' already used the maximum {} time(s) by this customer",
                code, limit
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCouponInput {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    #[serde(default)]
    pub max_discount_amount: Option<Decimal>,
    #[serde(default)]
    pub min_order_amount: Option<Decimal>,
    #[serde(default)]
    pub max_uses: Option<i32>,
    #[serde(default = "default_max_uses_per_customer")]
    pub max_uses_per_customer: i32,
    #[serde(default)]
    pub valid_from: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<chrono::DateTime<Utc>>,
}

fn default_max_uses_per_customer() -> i32 {
    1
}

#[derive(Debug, Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input))]
    pub async fn create_coupon(
        &self,
        input: CreateCouponInput,
    ) -> Result<coupon::Model, ServiceError> {
        input.validate()?;
        if input.discount_value <= Decimal::ZERO {
            return Err(ServiceError::InvalidInput(
                "discount_value must be positive".to_string(),
            ));
        }
        if input.discount_type == DiscountType::Percentage
            && input.discount_value > Decimal::from(100)
        {
            return Err(ServiceError::InvalidInput(
                "percentage discount cannot exceed 100".to_string(),
            ));
        }

        let now = Utc::now();
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(input.code.to_uppercase()),
            discount_type: Set(input.discount_type),
            discount_value: Set(input.discount_value),
            max_discount_amount: Set(input.max_discount_amount),
            min_order_amount: Set(input.min_order_amount),
            max_uses: Set(input.max_uses),
            max_uses_per_customer: Set(input.max_uses_per_customer),
            current_uses: Set(0),
            is_active: Set(true),
            valid_from: Set(input.valid_from.unwrap_or(now)),
            valid_until: Set(input.valid_until),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let created = model.insert(&*self.db).await?;
        info!(coupon_id = %created.id, code = %created.code, "coupon created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn list_coupons(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<coupon::Model>, u64), ServiceError> {
        let paginator = Coupon::find()
            .order_by_asc(coupon::Column::Code)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let coupons = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((coupons, total))
    }

    /// Standalone validation for the API surface; checkout uses
    /// [`validate_on`] inside its transaction instead.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        customer_id: Uuid,
        subtotal: Decimal,
    ) -> Result<Result<(coupon::Model, Decimal), CouponRejection>, ServiceError> {
        validate_on(&*self.db, code, customer_id, subtotal).await
    }
}

/// Runs the validation chain on any connection. The outer Result is an
/// infrastructure failure; the inner one distinguishes a usable coupon
/// (with its computed discount) from a typed rejection.
pub async fn validate_on<C: ConnectionTrait>(
    conn: &C,
    code: &str,
    customer_id: Uuid,
    subtotal: Decimal,
) -> Result<Result<(coupon::Model, Decimal), CouponRejection>, ServiceError> {
    let normalized = code.trim().to_uppercase();
    let coupon = match Coupon::find()
        .filter(coupon::Column::Code.eq(normalized.clone()))
        .one(conn)
        .await?
    {
        Some(c) => c,
        None => {
            return Ok(Err(reject(CouponRejection::UnknownCode { code: normalized })));
        }
    };

    let now = Utc::now();
    if !coupon.is_active {
        return Ok(Err(reject(CouponRejection::Inactive { code: coupon.code })));
    }
    if coupon.valid_from > now {
        return Ok(Err(reject(CouponRejection::NotStarted { code: coupon.code })));
    }
    if let Some(until) = coupon.valid_until {
        if until < now {
            return Ok(Err(reject(CouponRejection::Expired { code: coupon.code })));
        }
    }
    if let Some(minimum) = coupon.min_order_amount {
        if subtotal < minimum {
            return Ok(Err(reject(CouponRejection::MinOrderNotMet {
                code: coupon.code,
                minimum,
                subtotal,
            })));
        }
    }
    if let Some(max_uses) = coupon.max_uses {
        if coupon.current_uses >= max_uses {
            return Ok(Err(reject(CouponRejection::Exhausted { code: coupon.code })));
        }
    }
    let customer_uses = CouponUsage::find()
        .filter(coupon_usage::Column::CouponId.eq(coupon.id))
        .filter(coupon_usage::Column::CustomerId.eq(customer_id))
        .count(conn)
        .await?;
    if customer_uses >= coupon.max_uses_per_customer as u64 {
        let limit = coupon.max_uses_per_customer;
        return Ok(Err(reject(CouponRejection::CustomerLimitReached {
            code: coupon.code,
            limit,
        })));
    }

    let discount = compute_discount(&coupon, subtotal);
    Ok(Ok((coupon, discount)))
}

fn reject(rejection: CouponRejection) -> CouponRejection {
    metrics::COUPON_REJECTIONS
        .with_label_values(&[rejection.reason()])
        .inc();
    rejection
}

/// Discount owed by a validated coupon on the given subtotal.
///
/// Percentage discounts are capped by `max_discount_amount` when present;
/// fixed discounts never exceed the subtotal.
pub fn compute_discount(coupon: &coupon::Model, subtotal: Decimal) -> Decimal {
    let mut discount = match coupon.discount_type {
        DiscountType::Percentage => {
            let raw = (subtotal * coupon.discount_value / Decimal::from(100)).round_dp(2);
            match coupon.max_discount_amount {
                Some(cap) => raw.min(cap),
                None => raw,
            }
        }
        DiscountType::FixedAmount => coupon.discount_value.min(subtotal),
    };
    // Monetary values are 12,2 columns; SQLite's NUMERIC affinity drops the
    // scale on round-trip, so pin the cent scale before the value is
    // serialized or persisted.
    discount.rescale(2);
    discount
}

/// Redeems the coupon inside the caller's transaction.
///
/// The guarded increment is the arbiter for shared budgets: zero rows
/// affected means a concurrent checkout took the last use and this one must
/// abort. The usage row is written in the same transaction.
pub async fn redeem_on<C: ConnectionTrait>(
    conn: &C,
    coupon: &coupon::Model,
    customer_id: Uuid,
    order_id: Uuid,
    discount_amount: Decimal,
) -> Result<bool, ServiceError> {
    let result = Coupon::update_many()
        .col_expr(
            coupon::Column::CurrentUses,
            Expr::col(coupon::Column::CurrentUses).add(1),
        )
        .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(coupon::Column::Id.eq(coupon.id))
        .filter(
            Condition::any()
                .add(coupon::Column::MaxUses.is_null())
                .add(Expr::col(coupon::Column::CurrentUses).lt(Expr::col(coupon::Column::MaxUses))),
        )
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Ok(false);
    }

    coupon_usage::ActiveModel {
        id: Set(Uuid::new_v4()),
        coupon_id: Set(coupon.id),
        customer_id: Set(customer_id),
        order_id: Set(order_id),
        discount_amount: Set(discount_amount),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;

    metrics::COUPON_REDEMPTIONS.inc();
    Ok(true)
}
