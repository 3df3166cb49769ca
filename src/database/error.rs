use thiserror::Error;

/// Database error classification
#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    /// Row lookup produced nothing where one row was required
    NotFound { entity: String, id: String },
    /// Unique constraint violated (duplicate external reference, replayed event)
    UniqueViolation { constraint: String },
    /// Connection/pool failure; safe to retry
    Connection { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    message: String,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        let message = match &kind {
            DatabaseErrorKind::NotFound { entity, id } => {
                format!("{} {} not found", entity, id)
            }
            DatabaseErrorKind::UniqueViolation { constraint } => {
                format!("unique constraint violated: {}", constraint)
            }
            DatabaseErrorKind::Connection { message } => {
                format!("database connection error: {}", message)
            }
            DatabaseErrorKind::Unknown { message } => format!("database error: {}", message),
        };
        Self { kind, message }
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::new(DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            }),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::new(DatabaseErrorKind::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                })
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::new(DatabaseErrorKind::Connection {
                    message: err.to_string(),
                })
            }
            _ => Self::new(DatabaseErrorKind::Unknown {
                message: err.to_string(),
            }),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Connection { .. })
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_includes_entity_and_id() {
        let err = DatabaseError::new(DatabaseErrorKind::NotFound {
            entity: "PaymentRecord".to_string(),
            id: "17".to_string(),
        });
        assert_eq!(err.to_string(), "PaymentRecord 17 not found");
        assert!(!err.is_retryable());
    }

    #[test]
    fn connection_errors_are_retryable() {
        let err = DatabaseError::new(DatabaseErrorKind::Connection {
            message: "pool timed out".to_string(),
        });
        assert!(err.is_retryable());
    }
}
