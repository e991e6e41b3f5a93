//! Database lock handshake.
//!
//! The library database is shared with the sysmodule. Normally both sides
//! open it read-only; before writing (for example during a library scan)
//! the application closes its handle, asks the sysmodule to let go, and
//! reopens read-write. Unlocking reverses the steps.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::sysmodule::Sysmodule;

/// The parts of a database handle the lock handshake needs.
pub trait Database {
    fn close(&mut self);
    fn open_read_only(&mut self) -> Result<()>;
    fn open_read_write(&mut self) -> Result<()>;
}

/// Close `db`, take the write lock from the sysmodule, and reopen `db`
/// read-write.
///
/// If the sysmodule does not grant the lock, `db` is reopened read-only and
/// the error is returned.
pub fn lock_database(sysmodule: &Sysmodule, db: &mut dyn Database) -> Result<()> {
    db.close();

    if let Err(e) = sysmodule.wait_request_db_lock() {
        warn!("Database lock not granted: {}", e);
        db.open_read_only()
            .context("Failed to reopen database read-only")?;
        return Err(e).context("Sysmodule did not release the database");
    }

    db.open_read_write()
        .context("Failed to open database read-write")?;
    info!("Database locked for writing");
    Ok(())
}

/// Close `db`, hand the lock back to the sysmodule, and reopen `db`
/// read-only.
pub fn unlock_database(sysmodule: &Sysmodule, db: &mut dyn Database) -> Result<()> {
    db.close();
    if !sysmodule.send_release_db_lock() {
        warn!(
            "Could not queue database release (sysmodule error: {})",
            sysmodule.error()
        );
    }
    db.open_read_only()
        .context("Failed to reopen database read-only")?;
    info!("Database unlocked");
    Ok(())
}

/// Run `job` with the database open for writing, unlocking afterwards
/// whether or not the job succeeded.
pub fn with_database_locked<T, F>(sysmodule: &Sysmodule, db: &mut dyn Database, job: F) -> Result<T>
where
    F: FnOnce(&mut dyn Database) -> Result<T>,
{
    lock_database(sysmodule, db)?;
    let result = job(db);
    let unlocked = unlock_database(sysmodule, db);

    let value = result?;
    unlocked?;
    Ok(value)
}
