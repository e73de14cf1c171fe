//! Authorization store: resource ownership and permission grants.
//!
//! A trusted peer is recorded as the owner of its domain. Deleting the peer
//! drops every grant that names it.

use rusqlite::{params, Connection};
use trellis_types::ApprovalState;

use crate::directory::{find_peer_by_mac, DirectoryError};

/// Subject type recorded for peers.
pub const SUBJECT_PEER: &str = "PEER";

/// Resource type recorded for domain ownership.
pub const RESOURCE_DOMAIN: &str = "domain";

/// Records `mac` as owner of `domain`. Repeated grants are no-ops.
pub fn grant_domain_ownership(conn: &Connection, domain: &str, mac: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO authz_owners (resource_path, resource_type, subject, subject_type)
         VALUES (?1, ?2, ?3, ?4)",
        params![domain, RESOURCE_DOMAIN, mac, SUBJECT_PEER],
    )?;
    Ok(())
}

/// Whether the peer `mac` owns `resource`.
pub fn is_owner(conn: &Connection, resource: &str, mac: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM authz_owners
         WHERE resource_path = ?1 AND subject = ?2 AND subject_type = ?3)",
        params![resource, mac, SUBJECT_PEER],
        |row| row.get(0),
    )
}

/// Removes every ownership and permission grant naming the peer `mac`.
///
/// Returns the number of rows removed.
pub fn revoke_all(conn: &Connection, mac: &str) -> rusqlite::Result<usize> {
    let owners = conn.execute(
        "DELETE FROM authz_owners WHERE subject = ?1 AND subject_type = ?2",
        params![mac, SUBJECT_PEER],
    )?;
    let permissions = conn.execute(
        "DELETE FROM authz_permissions WHERE subject = ?1 AND subject_type = ?2",
        params![mac, SUBJECT_PEER],
    )?;
    Ok(owners + permissions)
}

/// Removes every grant on `resource`, whoever holds it.
pub fn delete_permissions(conn: &Connection, resource: &str) -> rusqlite::Result<usize> {
    let owners = conn.execute(
        "DELETE FROM authz_owners WHERE resource_path = ?1",
        params![resource],
    )?;
    let permissions = conn.execute(
        "DELETE FROM authz_permissions WHERE resource_path = ?1",
        params![resource],
    )?;
    Ok(owners + permissions)
}

/// Whether the peer `mac` may invoke `action` against this node.
///
/// Only accepted peers holding the action in their delegated set qualify.
pub fn peer_may_invoke(conn: &Connection, mac: &str, action: &str) -> Result<bool, DirectoryError> {
    Ok(find_peer_by_mac(conn, mac)?
        .is_some_and(|peer| peer.state == ApprovalState::Accepted && peer.actions.contains(action)))
}
