//! Read-only access grants for named roles.
//!
//! A grant moves the target role through [`GrantState`]:
//! `UserAbsent -> UserCreated -> Granted`. A role that already exists starts
//! at `UserCreated`. Each statement is committed on its own so a failure
//! part-way leaves the earlier grants visible rather than rolled back.

use std::fmt;

use tracing::{debug, info};

use crate::error::{ProvisionError, Result};
use crate::identifier::{quote_literal, quote_pg};
use crate::session::Session;

/// Pre-flight parameters for creating a missing role.
#[derive(Clone)]
pub struct RoleSpec {
    pub password: String,
}

impl RoleSpec {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

impl fmt::Debug for RoleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleSpec")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Lifecycle of a grant target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantState {
    UserAbsent,
    UserCreated,
    Granted,
}

/// Outcome of [`PrivilegeManager::grant_read_only`].
#[derive(Debug, Clone)]
pub struct GrantReport {
    pub user: String,
    pub state: GrantState,
    pub role_created: bool,
    /// Statements executed, passwords masked.
    pub statements: Vec<String>,
}

/// Grants CONNECT/USAGE/SELECT over a borrowed session.
pub struct PrivilegeManager<'a, S: Session> {
    session: &'a mut S,
    admin_user: String,
    schema: String,
}

impl<'a, S: Session> PrivilegeManager<'a, S> {
    pub fn new(session: &'a mut S, admin_user: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            session,
            admin_user: admin_user.into(),
            schema: schema.into(),
        }
    }

    /// Refuse to touch the administrative role.
    ///
    /// Role names compare ASCII case-insensitively so `DBMasterUser` cannot
    /// slip past a guard for `dbmasteruser`.
    pub fn check_not_admin(&self, user: &str) -> Result<()> {
        if user.trim().eq_ignore_ascii_case(self.admin_user.trim()) {
            return Err(ProvisionError::PrivilegeSafetyViolation {
                user: user.to_string(),
            });
        }
        Ok(())
    }

    /// Whether a login role with this name exists.
    pub async fn role_exists(&mut self, user: &str) -> Result<bool> {
        let users = self
            .session
            .query_column("SELECT usename FROM pg_user", &[])
            .await?;
        Ok(users.iter().any(|u| u == user))
    }

    /// Grant read-only access on `database` to `user`, creating the role
    /// first when it is absent and `role` is supplied.
    ///
    /// Covers the tables that exist in the schema at call time only: no
    /// `ALTER DEFAULT PRIVILEGES` is issued, so tables created later need
    /// another grant.
    pub async fn grant_read_only(
        &mut self,
        database: &str,
        user: &str,
        role: Option<&RoleSpec>,
    ) -> Result<GrantReport> {
        // Every check that can fail runs before the first statement.
        self.check_not_admin(user)?;
        let db_ident = quote_pg(database)?;
        let user_ident = quote_pg(user)?;
        let schema_ident = quote_pg(&self.schema)?;
        let password = match role {
            Some(spec) if spec.password.is_empty() => {
                return Err(ProvisionError::Config(format!(
                    "password for new role '{}' cannot be empty",
                    user
                )))
            }
            Some(spec) => Some(quote_literal(&spec.password)?),
            None => None,
        };

        let mut report = GrantReport {
            user: user.to_string(),
            state: GrantState::UserAbsent,
            role_created: false,
            statements: Vec::new(),
        };

        if self.role_exists(user).await? {
            debug!("Role {} already exists", user);
        } else {
            let password = password.ok_or_else(|| {
                ProvisionError::Config(format!(
                    "role '{}' does not exist and no password was supplied to create it",
                    user
                ))
            })?;
            let create = |pw: &str| {
                format!(
                    "CREATE ROLE {} WITH LOGIN PASSWORD {} NOSUPERUSER INHERIT NOCREATEROLE \
                     NOCREATEDB NOREPLICATION",
                    user_ident, pw
                )
            };
            self.run(&create(&password)).await?;
            let masked = create("'********'");
            info!("{}\tOK", masked);
            report.statements.push(masked);
            report.role_created = true;
        }
        report.state = GrantState::UserCreated;

        let grants = [
            format!("GRANT CONNECT ON DATABASE {} TO {}", db_ident, user_ident),
            format!("GRANT USAGE ON SCHEMA {} TO {}", schema_ident, user_ident),
            format!(
                "GRANT SELECT ON ALL TABLES IN SCHEMA {} TO {}",
                schema_ident, user_ident
            ),
        ];
        for grant in grants {
            self.run(&grant).await?;
            info!("{}\tOK", grant);
            report.statements.push(grant);
        }
        report.state = GrantState::Granted;

        Ok(report)
    }

    /// Execute one statement and commit it.
    async fn run(&mut self, sql: &str) -> Result<()> {
        if let Err(e) = self.session.execute(sql, &[]).await {
            self.session.rollback().await?;
            return Err(e);
        }
        self.session.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::recording::{CallKind, RecordingSession};

    #[tokio::test]
    async fn test_admin_target_rejected_before_any_sql() {
        let mut session = RecordingSession::new("sales");
        let err = PrivilegeManager::new(&mut session, "dbmasteruser", "public")
            .grant_read_only("sales", "dbmasteruser", Some(&RoleSpec::new("pw")))
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::PrivilegeSafetyViolation { .. }));
        assert!(session.calls.is_empty());
    }

    #[tokio::test]
    async fn test_admin_guard_ignores_case() {
        let mut session = RecordingSession::new("sales");
        let err = PrivilegeManager::new(&mut session, "dbmasteruser", "public")
            .grant_read_only("sales", "DBMasterUser", None)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::PrivilegeSafetyViolation { .. }));
        assert!(session.calls.is_empty());
    }

    #[tokio::test]
    async fn test_existing_role_gets_three_committed_grants() {
        let mut session =
            RecordingSession::new("sales").with_response("pg_user", &["dbmasteruser", "analyst"]);
        let report = PrivilegeManager::new(&mut session, "dbmasteruser", "public")
            .grant_read_only("sales", "analyst", None)
            .await
            .unwrap();

        assert_eq!(report.state, GrantState::Granted);
        assert!(!report.role_created);
        assert_eq!(
            report.statements,
            vec![
                "GRANT CONNECT ON DATABASE \"sales\" TO \"analyst\"",
                "GRANT USAGE ON SCHEMA \"public\" TO \"analyst\"",
                "GRANT SELECT ON ALL TABLES IN SCHEMA \"public\" TO \"analyst\"",
            ]
        );
        assert_eq!(session.count(CallKind::Commit), 3);
        assert_eq!(session.committed_matching("GRANT").len(), 3);
        // No default-privileges statement is issued.
        assert!(session.committed_matching("DEFAULT PRIVILEGES").is_empty());
    }

    #[tokio::test]
    async fn test_absent_role_created_with_least_privilege() {
        let mut session = RecordingSession::new("sales").with_response("pg_user", &["dbmasteruser"]);
        let report = PrivilegeManager::new(&mut session, "dbmasteruser", "public")
            .grant_read_only("sales", "analyst", Some(&RoleSpec::new("s3cr'et")))
            .await
            .unwrap();

        assert!(report.role_created);
        assert_eq!(report.state, GrantState::Granted);

        let create = session.committed_matching("CREATE ROLE")[0].sql.clone();
        assert_eq!(
            create,
            "CREATE ROLE \"analyst\" WITH LOGIN PASSWORD 's3cr''et' NOSUPERUSER INHERIT \
             NOCREATEROLE NOCREATEDB NOREPLICATION"
        );
        // The report never carries the password.
        assert!(report.statements.iter().all(|s| !s.contains("s3cr")));
        assert_eq!(session.count(CallKind::Commit), 4);
    }

    #[tokio::test]
    async fn test_absent_role_without_password_fails_before_grants() {
        let mut session = RecordingSession::new("sales").with_response("pg_user", &["dbmasteruser"]);
        let err = PrivilegeManager::new(&mut session, "dbmasteruser", "public")
            .grant_read_only("sales", "analyst", None)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Config(_)));
        assert!(session.executed().is_empty());
    }

    #[tokio::test]
    async fn test_failed_grant_keeps_earlier_grants() {
        let mut session = RecordingSession::new("sales")
            .with_response("pg_user", &["analyst"])
            .failing_on("GRANT USAGE", 1);
        let result = PrivilegeManager::new(&mut session, "dbmasteruser", "public")
            .grant_read_only("sales", "analyst", None)
            .await;

        assert!(result.is_err());
        assert_eq!(session.committed_matching("GRANT CONNECT").len(), 1);
        assert!(session.committed_matching("GRANT SELECT").is_empty());
        assert_eq!(session.count(CallKind::Rollback), 1);
    }

    #[tokio::test]
    async fn test_custom_schema_is_quoted() {
        let mut session = RecordingSession::new("sales").with_response("pg_user", &["analyst"]);
        let report = PrivilegeManager::new(&mut session, "dbmasteruser", "Reporting")
            .grant_read_only("sales", "analyst", None)
            .await
            .unwrap();

        assert!(report.statements[1].contains("SCHEMA \"Reporting\""));
    }

    #[test]
    fn test_role_spec_debug_redacts_password() {
        let debug_output = format!("{:?}", RoleSpec::new("hunter2"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("hunter2"));
    }
}
