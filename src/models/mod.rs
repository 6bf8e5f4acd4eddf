//! Data models for the circulation engine

pub mod book;
pub mod copy;
pub mod date_range;
pub mod event;
pub mod loan;
pub mod reservation;
pub mod user;

// Re-export commonly used types
pub use book::{Book, BookAvailability};
pub use copy::{BookCopy, CopyDisposition};
pub use date_range::{BoundaryPolicy, DateRange, RANGE_BOUNDARY};
pub use event::{EventKind, LifecycleEvent};
pub use loan::{Loan, LoanOrigin, LoanStatus, RequestOutcome};
pub use reservation::{Reservation, ReservationStatus};
pub use user::{AccountTypeSlug, UserClaims};

/// SQLx conversion for enums persisted as their `as_str` slug in TEXT columns
macro_rules! text_column {
    ($ty:ty) => {
        impl sqlx::Type<sqlx::Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s: String = sqlx::Decode::<sqlx::Postgres>::decode(value)?;
                s.parse().map_err(|e: String| e.into())
            }
        }

        impl sqlx::Encode<'_, sqlx::Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> sqlx::encode::IsNull {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }
    };
}

pub(crate) use text_column;
