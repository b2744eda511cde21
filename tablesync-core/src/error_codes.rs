//! Driver error-number classification.
//!
//! Maps SQL Server and MySQL error numbers onto a retry disposition and a
//! uniqueness-violation flag. The tables are static and sorted so lookups
//! use binary search.

use crate::models::DatabaseProviderType;
use serde::{Deserialize, Serialize};

/// What a caller should do after a failed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorDisposition {
    /// Transient server or connection condition; the same statement may succeed later.
    Retry,
    /// The statement itself is at fault; retrying will fail the same way.
    NoRetry,
    /// The failure points at a defect in the calling code.
    Bug,
}

impl ErrorDisposition {
    /// Whether the disposition allows an unchanged retry.
    pub const fn may_retry(self) -> bool {
        matches!(self, Self::Retry)
    }
}

/// Result of classifying one driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub disposition: ErrorDisposition,
    pub uniqueness_violation: bool,
}

/// SQL Server errors raised by resource exhaustion or internal engine faults.
const SQL_SERVER_INTERNAL_ERRORS: &[i64] = &[
    556, 674, 708, 844, 847, 945, 947, 1101, 1102, 1105, 1121, 1122, 1123, 1124, 1125, 1126, 1127,
    1128, 1129, 1130, 1203, 1204, 1221, 1501, 1509, 1510, 1511, 1522, 1523, 1528, 1529, 1532, 1533,
    1534, 1535, 1543, 1814, 2502, 2533, 2534, 2537, 2540, 2556, 3140, 3230, 3257, 3619, 3620, 3635,
    3953, 3957, 3958, 3966, 3967, 3973, 3974, 3984, 5128, 5231, 5245, 5249, 5252, 5904, 6292, 7151,
    7622, 7644, 7695, 7926, 8311, 8914, 8921, 8943, 9002, 17207, 17888, 18812, 18819, 18834, 20041,
    21413, 21414, 21415,
];

/// SQL Server errors caused by timeouts, deadlocks and lock contention.
const SQL_SERVER_TEMPORARY_ERRORS: &[i64] = &[
    601, 847, 1205, 1206, 1220, 1222, 1421, 1807, 3928, 5030, 5061, 7604, 8628, 8645, 14355, 17197,
    17830, 17889, 18486,
];

/// Duplicate key row (2601) and primary key / unique constraint (2627).
const SQL_SERVER_UNIQUENESS_ERRORS: &[i64] = &[2601, 2627];

/// Client-library error numbers at or below this value are connection failures.
const SQL_SERVER_CONNECTION_ERROR_CEILING: i64 = 32;

/// Too many connections, lock wait timeout, deadlock, out of resources,
/// table full and lost/gone server connections.
const MYSQL_TEMPORARY_ERRORS: &[i64] = &[
    1021, 1037, 1038, 1040, 1114, 1205, 1213, 2002, 2003, 2006, 2013,
];

/// ER_DUP_ENTRY and ER_DUP_ENTRY_WITH_KEY_NAME.
const MYSQL_UNIQUENESS_ERRORS: &[i64] = &[1062, 1586];

/// Syntax errors and references to unknown objects indicate generated SQL
/// that does not match the schema it was built for.
const MYSQL_BUG_ERRORS: &[i64] = &[1054, 1064, 1146];
const SQL_SERVER_BUG_ERRORS: &[i64] = &[102, 156, 207, 208];

/// Classifies a driver error number for the given provider.
///
/// A missing number (the driver reported no server error) is treated as a
/// connection-level failure and may be retried.
pub fn classify(provider: DatabaseProviderType, number: Option<i64>) -> Classification {
    let Some(number) = number else {
        return Classification {
            disposition: ErrorDisposition::Retry,
            uniqueness_violation: false,
        };
    };

    match provider {
        DatabaseProviderType::SqlServer => classify_sql_server(number),
        DatabaseProviderType::MySql => classify_mysql(number),
    }
}

fn classify_sql_server(number: i64) -> Classification {
    let disposition = if number <= SQL_SERVER_CONNECTION_ERROR_CEILING
        || SQL_SERVER_INTERNAL_ERRORS.binary_search(&number).is_ok()
        || SQL_SERVER_TEMPORARY_ERRORS.binary_search(&number).is_ok()
    {
        ErrorDisposition::Retry
    } else if SQL_SERVER_BUG_ERRORS.binary_search(&number).is_ok() {
        ErrorDisposition::Bug
    } else {
        ErrorDisposition::NoRetry
    };

    Classification {
        disposition,
        uniqueness_violation: SQL_SERVER_UNIQUENESS_ERRORS.contains(&number),
    }
}

fn classify_mysql(number: i64) -> Classification {
    let disposition = if MYSQL_TEMPORARY_ERRORS.binary_search(&number).is_ok() {
        ErrorDisposition::Retry
    } else if MYSQL_BUG_ERRORS.binary_search(&number).is_ok() {
        ErrorDisposition::Bug
    } else {
        ErrorDisposition::NoRetry
    };

    Classification {
        disposition,
        uniqueness_violation: MYSQL_UNIQUENESS_ERRORS.contains(&number),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_are_sorted() {
        for table in [
            SQL_SERVER_INTERNAL_ERRORS,
            SQL_SERVER_TEMPORARY_ERRORS,
            SQL_SERVER_BUG_ERRORS,
            MYSQL_TEMPORARY_ERRORS,
            MYSQL_BUG_ERRORS,
        ] {
            assert!(table.windows(2).all(|pair| pair[0] < pair[1]));
        }
    }

    #[test]
    fn test_sql_server_deadlock_is_retryable() {
        let result = classify(DatabaseProviderType::SqlServer, Some(1205));
        assert_eq!(result.disposition, ErrorDisposition::Retry);
        assert!(!result.uniqueness_violation);
    }

    #[test]
    fn test_sql_server_low_numbers_are_connection_errors() {
        let result = classify(DatabaseProviderType::SqlServer, Some(11));
        assert!(result.disposition.may_retry());
    }

    #[test]
    fn test_sql_server_primary_key_violation() {
        let result = classify(DatabaseProviderType::SqlServer, Some(2627));
        assert_eq!(result.disposition, ErrorDisposition::NoRetry);
        assert!(result.uniqueness_violation);
    }

    #[test]
    fn test_sql_server_invalid_column_is_bug() {
        let result = classify(DatabaseProviderType::SqlServer, Some(207));
        assert_eq!(result.disposition, ErrorDisposition::Bug);
    }

    #[test]
    fn test_mysql_duplicate_entry() {
        let result = classify(DatabaseProviderType::MySql, Some(1062));
        assert!(result.uniqueness_violation);
        assert!(!result.disposition.may_retry());
    }

    #[test]
    fn test_mysql_lock_wait_timeout_is_retryable() {
        let result = classify(DatabaseProviderType::MySql, Some(1205));
        assert_eq!(result.disposition, ErrorDisposition::Retry);
    }

    #[test]
    fn test_missing_number_is_retryable() {
        let result = classify(DatabaseProviderType::MySql, None);
        assert!(result.disposition.may_retry());
    }
}
