/// Lock-contention retry policy for hot tables
///
/// Message-secret writes land on a table that sees concurrent bursts
/// from reaction and poll handling; lock-wait timeouts there are
/// retried with a linear backoff instead of being surfaced. Every
/// other error is permanent.
use super::dialect::Dialect;
use std::time::Duration;

/// Retry attempts per chunk before giving up.
pub const MAX_ATTEMPTS: u32 = 3;

const BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Whether an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Transient,
    Permanent,
}

/// Classify a back-end error as a lock-wait timeout or not. Matching
/// is per-dialect on the native error code where one exists.
pub fn classify_lock_error(dialect: Dialect, err: &sqlx::Error) -> Verdict {
    let Some(db_err) = err.as_database_error() else {
        return Verdict::Permanent;
    };
    let transient = match dialect {
        // ER_LOCK_WAIT_TIMEOUT
        Dialect::Mysql => {
            db_err.code().as_deref() == Some("1205")
                || db_err.message().contains("Lock wait timeout exceeded")
        }
        // lock_not_available
        Dialect::Postgres => db_err.code().as_deref() == Some("55P03"),
        // SQLITE_BUSY / SQLITE_LOCKED surface as message text through
        // the unified driver
        Dialect::Sqlite => {
            let message = db_err.message();
            message.contains("database is locked") || message.contains("database table is locked")
        }
        Dialect::Other => false,
    };
    if transient {
        Verdict::Transient
    } else {
        Verdict::Permanent
    }
}

/// Delay before the next attempt; linear in the attempt number.
pub fn backoff(attempt: u32) -> Duration {
    BACKOFF_STEP * attempt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_linear() {
        assert_eq!(backoff(1), Duration::from_millis(100));
        assert_eq!(backoff(2), Duration::from_millis(200));
        assert_eq!(backoff(3), Duration::from_millis(300));
    }

    #[test]
    fn test_non_database_errors_are_permanent() {
        let err = sqlx::Error::RowNotFound;
        assert_eq!(classify_lock_error(Dialect::Sqlite, &err), Verdict::Permanent);
        assert_eq!(classify_lock_error(Dialect::Mysql, &err), Verdict::Permanent);
    }
}
