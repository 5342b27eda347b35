//! First-run administrator provisioning.
//!
//! Rules, in order of precedence:
//! 1. An operator-supplied password always wins: the administrator account is
//!    created or its credential overwritten, and a password change is forced.
//! 2. With no administrator at all, one is created with a random password
//!    that is logged exactly once and cannot be recovered afterwards.
//! 3. An administrator still using the old insecure default is flagged for
//!    forced rotation; the credential itself is left alone.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::password::{GENERATED_PASSWORD_LEN, generate_password, hash_password, verify_password};

/// Username of the bootstrap administrator.
pub const ADMIN_USERNAME: &str = "admin";

/// Password shipped as the default by early releases.
pub const INSECURE_DEFAULT_PASSWORD: &str = "admin123";

/// What bootstrap did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The operator override was applied to an existing or new account.
    OverrideApplied { created: bool },
    /// A new administrator with a generated password was created.
    Generated,
    /// The administrator was flagged because it still uses the insecure default.
    FlaggedInsecureDefault,
    /// Nothing needed doing.
    Unchanged,
}

/// Applies the bootstrap policy. Expects the `is_admin` and
/// `must_change_password` columns to exist.
pub fn apply(conn: &Connection, admin_password: Option<&str>) -> Result<BootstrapOutcome> {
    let existing: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, password FROM users
             WHERE is_admin = 1 OR username = ?1
             ORDER BY is_admin DESC, id ASC LIMIT 1",
            [ADMIN_USERNAME],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .context("looking up administrator")?;

    if let Some(password) = admin_password.map(str::trim).filter(|p| !p.is_empty()) {
        let hashed = hash_password(password)?;
        return match existing {
            Some((id, _)) => {
                conn.execute(
                    "UPDATE users SET password = ?1, is_admin = 1, must_change_password = 1
                     WHERE id = ?2",
                    params![hashed, id],
                )?;
                info!(user_id = id, "administrator password reset from configuration");
                Ok(BootstrapOutcome::OverrideApplied { created: false })
            }
            None => {
                insert_admin(conn, &hashed)?;
                info!("administrator created from configured password");
                Ok(BootstrapOutcome::OverrideApplied { created: true })
            }
        };
    }

    match existing {
        None => {
            let password = generate_password(GENERATED_PASSWORD_LEN);
            insert_admin(conn, &hash_password(&password)?)?;
            warn!(
                target: "memostore::bootstrap",
                username = ADMIN_USERNAME,
                password = %password,
                "created administrator with a one-time password; it will not be shown again"
            );
            Ok(BootstrapOutcome::Generated)
        }
        Some((id, hash)) if verify_password(INSECURE_DEFAULT_PASSWORD, &hash) => {
            conn.execute(
                "UPDATE users SET must_change_password = 1 WHERE id = ?1",
                [id],
            )?;
            warn!(
                user_id = id,
                "administrator still uses the insecure default password; forcing a change"
            );
            Ok(BootstrapOutcome::FlaggedInsecureDefault)
        }
        Some(_) => Ok(BootstrapOutcome::Unchanged),
    }
}

fn insert_admin(conn: &Connection, hashed: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO users (username, password, email, created_at, is_admin, must_change_password)
         VALUES (?1, ?2, '', ?3, 1, 1)",
        params![
            ADMIN_USERNAME,
            hashed,
            OffsetDateTime::now_utc().unix_timestamp()
        ],
    )
    .context("inserting administrator")?;
    Ok(())
}
