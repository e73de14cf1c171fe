//! Peer directory: persistent table of peer records.
//!
//! Rows are converted into the typed [`Peer`] exactly once, here. Callers
//! never see raw columns.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use thiserror::Error;
use trellis_types::{peer_id, ActionSet, ApprovalState, Peer, PeerDescriptor};

/// Errors raised by the peer directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A record with the same identity already exists.
    #[error("peer {0} already exists")]
    Conflict(String),

    #[error("failed to encode actions: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Filter criteria for listing peers. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct PeerFilter {
    pub state: Option<ApprovalState>,
    pub domain: Option<String>,
    pub hostname: Option<String>,
    pub mac: Option<String>,
    /// Leaves out the record with this hardware address.
    pub exclude_mac: Option<String>,
}

/// Paging options for listing peers.
#[derive(Debug, Clone, Copy, Default)]
pub struct FindOptions {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

const PEER_COLUMNS: &str = "id, mac, hostname, domain, protocol, port_http, port_https, \
     local_ip_address, external_ip_address, state, actions_json, created_at, updated_at";

fn conversion_error(
    index: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn peer_from_row(row: &Row<'_>) -> rusqlite::Result<Peer> {
    let protocol: String = row.get(4)?;
    let protocol = protocol.parse().map_err(|e: String| {
        conversion_error(4, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;

    let state: String = row.get(9)?;
    let state = state
        .parse::<ApprovalState>()
        .map_err(|e| conversion_error(9, e))?;

    let actions_json: String = row.get(10)?;
    let actions: ActionSet =
        serde_json::from_str(&actions_json).map_err(|e| conversion_error(10, e))?;

    Ok(Peer {
        id: row.get(0)?,
        descriptor: PeerDescriptor {
            mac: row.get(1)?,
            hostname: row.get(2)?,
            domain: row.get(3)?,
            protocol,
            port_http: row.get(5)?,
            port_https: row.get(6)?,
            local_ip_address: row.get(7)?,
            external_ip_address: row.get(8)?,
        },
        state,
        actions,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Inserts a new peer record and returns it as stored.
///
/// # Errors
///
/// Returns `DirectoryError::Conflict` when a record with the same identity
/// already exists; concurrent first registrations for one hardware address
/// therefore cannot both succeed.
pub fn insert_peer(conn: &Connection, peer: &Peer) -> Result<Peer, DirectoryError> {
    let actions_json = serde_json::to_string(&peer.actions)?;
    let d = &peer.descriptor;

    let result = conn.execute(
        "INSERT INTO peers (
            id, mac, hostname, domain, protocol, port_http, port_https,
            local_ip_address, external_ip_address, state, actions_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            peer.id,
            d.mac,
            d.hostname,
            d.domain,
            d.protocol.as_str(),
            d.port_http,
            d.port_https,
            d.local_ip_address,
            d.external_ip_address,
            peer.state.as_str(),
            actions_json,
        ],
    );

    match result {
        Ok(_) => {}
        Err(e) if is_constraint_violation(&e) => {
            return Err(DirectoryError::Conflict(d.mac.clone()));
        }
        Err(e) => return Err(e.into()),
    }

    find_peer_by_id(conn, &peer.id)?.ok_or_else(|| DirectoryError::Conflict(d.mac.clone()))
}

/// Retrieves a peer by its derived identifier.
pub fn find_peer_by_id(conn: &Connection, id: &str) -> Result<Option<Peer>, DirectoryError> {
    let peer = conn
        .query_row(
            &format!("SELECT {PEER_COLUMNS} FROM peers WHERE id = ?1"),
            params![id],
            peer_from_row,
        )
        .optional()?;
    Ok(peer)
}

/// Retrieves a peer by hardware address.
pub fn find_peer_by_mac(conn: &Connection, mac: &str) -> Result<Option<Peer>, DirectoryError> {
    find_peer_by_id(conn, &peer_id(mac))
}

/// Lists peers matching `filter`, oldest first.
pub fn find_peers(
    conn: &Connection,
    filter: &PeerFilter,
    options: FindOptions,
) -> Result<Vec<Peer>, DirectoryError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(state) = filter.state {
        values.push(Box::new(state.as_str()));
        clauses.push(format!("state = ?{}", values.len()));
    }
    if let Some(ref domain) = filter.domain {
        values.push(Box::new(domain.clone()));
        clauses.push(format!("domain = ?{}", values.len()));
    }
    if let Some(ref hostname) = filter.hostname {
        values.push(Box::new(hostname.clone()));
        clauses.push(format!("hostname = ?{}", values.len()));
    }
    if let Some(ref mac) = filter.mac {
        values.push(Box::new(trellis_types::normalize_mac(mac)));
        clauses.push(format!("mac = ?{}", values.len()));
    }
    if let Some(ref mac) = filter.exclude_mac {
        values.push(Box::new(trellis_types::normalize_mac(mac)));
        clauses.push(format!("mac != ?{}", values.len()));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    // SQLite requires a LIMIT before OFFSET; -1 means unbounded.
    values.push(Box::new(options.limit.unwrap_or(-1)));
    let limit_idx = values.len();
    values.push(Box::new(options.offset.unwrap_or(0)));
    let offset_idx = values.len();

    let sql = format!(
        "SELECT {PEER_COLUMNS} FROM peers {where_clause}
         ORDER BY created_at ASC, id ASC
         LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
    );

    let refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| &**v).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(refs.as_slice(), peer_from_row)?;

    let mut peers = Vec::new();
    for row in rows {
        peers.push(row?);
    }
    Ok(peers)
}

/// Sets the approval state. Returns `false` if no record matched.
pub fn set_state(
    conn: &Connection,
    id: &str,
    state: ApprovalState,
) -> Result<bool, DirectoryError> {
    let changed = conn.execute(
        "UPDATE peers SET state = ?2, updated_at = datetime('now') WHERE id = ?1",
        params![id, state.as_str()],
    )?;
    Ok(changed > 0)
}

/// Replaces the delegated action set. Returns `false` if no record matched.
pub fn set_actions(
    conn: &Connection,
    id: &str,
    actions: &ActionSet,
) -> Result<bool, DirectoryError> {
    let actions_json = serde_json::to_string(actions)?;
    let changed = conn.execute(
        "UPDATE peers SET actions_json = ?2, updated_at = datetime('now') WHERE id = ?1",
        params![id, actions_json],
    )?;
    Ok(changed > 0)
}

/// Updates naming and transport fields. Identity, state and actions are kept.
pub fn update_descriptor(
    conn: &Connection,
    id: &str,
    descriptor: &PeerDescriptor,
) -> Result<bool, DirectoryError> {
    let changed = conn.execute(
        "UPDATE peers SET
            hostname = ?2, domain = ?3, protocol = ?4, port_http = ?5, port_https = ?6,
            local_ip_address = ?7, external_ip_address = ?8, updated_at = datetime('now')
         WHERE id = ?1",
        params![
            id,
            descriptor.hostname,
            descriptor.domain,
            descriptor.protocol.as_str(),
            descriptor.port_http,
            descriptor.port_https,
            descriptor.local_ip_address,
            descriptor.external_ip_address,
        ],
    )?;
    Ok(changed > 0)
}

/// Deletes a peer record. Returns `false` if no record matched.
pub fn delete_peer(conn: &Connection, id: &str) -> Result<bool, DirectoryError> {
    let changed = conn.execute("DELETE FROM peers WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}
