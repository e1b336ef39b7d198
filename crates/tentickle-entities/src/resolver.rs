use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use serde_json::json;
use tentickle_core::types::EntityType;
use tentickle_store::types::Entity;
use tracing::{debug, info, instrument};

use crate::error::{EntitiesError, Result};

/// Maximum number of `(channel, identifier) -> entity_id` pairs kept in the
/// in-process cache. Eviction: when full, drop the oldest half.
const CACHE_MAX: usize = 256;

/// Outcome of resolving a `(channel, identifier)` pair.
#[derive(Debug)]
pub enum ResolvedEntity {
    Known(Entity),
    /// Auto-created on first contact.
    NewlyCreated(Entity),
}

impl ResolvedEntity {
    pub fn entity(&self) -> &Entity {
        match self {
            ResolvedEntity::Known(e) => e,
            ResolvedEntity::NewlyCreated(e) => e,
        }
    }
}

/// Translates external channel identities (a Telegram user id, a WS auth
/// subject, a Unix uid) into first-class [`Entity`] rows. Shares the
/// connection with `tentickle-store` — callers MUST run
/// `tentickle_store::schema::ensure_schema` on the same connection before
/// `tentickle_entities::db::ensure_schema`, since `entity_identities` has an
/// FK onto `entities`.
pub struct EntityResolver {
    db: Mutex<Connection>,
    cache: Mutex<HashMap<(String, String), String>>,
    cache_order: Mutex<Vec<(String, String)>>,
}

impl EntityResolver {
    pub fn new(mut conn: Connection) -> Result<Self> {
        crate::db::ensure_schema(&mut conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            cache: Mutex::new(HashMap::new()),
            cache_order: Mutex::new(Vec::new()),
        })
    }

    /// Resolve a `(channel, identifier)` pair to an entity, auto-creating a
    /// `Person` entity on first contact.
    #[instrument(skip(self), fields(channel, identifier))]
    pub fn resolve(&self, channel: &str, identifier: &str) -> Result<ResolvedEntity> {
        let key = (channel.to_string(), identifier.to_string());

        if let Some(entity_id) = self.cache_lookup(&key) {
            debug!(channel, identifier, entity_id, "cache hit");
            let conn = self.db.lock().unwrap();
            if let Some(entity) = get_entity(&conn, &entity_id)? {
                return Ok(ResolvedEntity::Known(entity));
            }
            self.cache_remove(&key);
        }

        let conn = self.db.lock().unwrap();
        if let Some(entity) = find_by_identity(&conn, channel, identifier)? {
            self.cache_insert(key, entity.id.as_str().to_string());
            return Ok(ResolvedEntity::Known(entity));
        }

        info!(channel, identifier, "new identity; creating entity");
        let display_name = format!("{channel}:{identifier}");
        let entity = create_entity(&conn, &display_name, EntityType::Person)?;
        add_identity(&conn, entity.id.as_str(), channel, identifier)?;
        self.cache_insert(key, entity.id.as_str().to_string());

        Ok(ResolvedEntity::NewlyCreated(entity))
    }

    /// Re-assign an existing channel identity to a different target entity
    /// (e.g. an operator manually merging two accounts).
    #[instrument(skip(self), fields(channel, identifier, target_entity_id))]
    pub fn link_identity(
        &self,
        channel: &str,
        identifier: &str,
        target_entity_id: &str,
        linked_by: Option<&str>,
    ) -> Result<()> {
        let conn = self.db.lock().unwrap();
        if get_entity(&conn, target_entity_id)?.is_none() {
            return Err(EntitiesError::NotFound(target_entity_id.to_string()));
        }

        let now = chrono::Utc::now().to_rfc3339();
        let rows = conn.execute(
            "UPDATE entity_identities SET entity_id=?3, linked_by=?4, linked_at=?5
             WHERE channel=?1 AND identifier=?2",
            params![channel, identifier, target_entity_id, linked_by, now],
        )?;
        if rows == 0 {
            add_identity(&conn, target_entity_id, channel, identifier)?;
        }

        drop(conn);
        self.cache_remove(&(channel.to_string(), identifier.to_string()));
        Ok(())
    }

    pub fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>> {
        let conn = self.db.lock().unwrap();
        get_entity(&conn, entity_id)
    }

    /// List every `(channel, identifier)` pair linked to an entity.
    pub fn list_identities(&self, entity_id: &str) -> Result<Vec<(String, String)>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT channel, identifier FROM entity_identities WHERE entity_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![entity_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Drop every cache entry pointing at `entity_id` (call after mutating
    /// the entity row out from under the cache).
    pub fn invalidate_entity(&self, entity_id: &str) {
        let mut cache = self.cache.lock().unwrap();
        let mut order = self.cache_order.lock().unwrap();
        order.retain(|k| {
            if cache.get(k).map(|v| v.as_str()) == Some(entity_id) {
                cache.remove(k);
                false
            } else {
                true
            }
        });
    }

    fn cache_lookup(&self, key: &(String, String)) -> Option<String> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    fn cache_remove(&self, key: &(String, String)) {
        let mut cache = self.cache.lock().unwrap();
        let mut order = self.cache_order.lock().unwrap();
        cache.remove(key);
        order.retain(|k| k != key);
    }

    fn cache_insert(&self, key: (String, String), entity_id: String) {
        let mut cache = self.cache.lock().unwrap();
        let mut order = self.cache_order.lock().unwrap();

        if let std::collections::hash_map::Entry::Occupied(mut e) = cache.entry(key.clone()) {
            e.insert(entity_id);
            return;
        }

        if cache.len() >= CACHE_MAX {
            let evict_count = CACHE_MAX / 2;
            for k in order.drain(..evict_count).collect::<Vec<_>>() {
                cache.remove(&k);
            }
        }

        order.push(key.clone());
        cache.insert(key, entity_id);
    }
}

fn row_to_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    let type_str: String = row.get(1)?;
    let metadata_str: String = row.get(4)?;
    Ok(Entity {
        id: row.get::<_, String>(0)?.into(),
        entity_type: type_str.parse::<EntityType>().unwrap_or_default(),
        name: row.get(2)?,
        summary: row.get(3)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Null),
        is_owner: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn get_entity(conn: &Connection, id: &str) -> Result<Option<Entity>> {
    match conn.query_row(
        "SELECT id, type, name, summary, metadata, is_owner, created_at, updated_at
         FROM entities WHERE id = ?1",
        params![id],
        row_to_entity,
    ) {
        Ok(e) => Ok(Some(e)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn find_by_identity(conn: &Connection, channel: &str, identifier: &str) -> Result<Option<Entity>> {
    match conn.query_row(
        "SELECT e.id, e.type, e.name, e.summary, e.metadata, e.is_owner, e.created_at, e.updated_at
         FROM entities e
         JOIN entity_identities i ON i.entity_id = e.id
         WHERE i.channel = ?1 AND i.identifier = ?2",
        params![channel, identifier],
        row_to_entity,
    ) {
        Ok(e) => Ok(Some(e)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn create_entity(conn: &Connection, name: &str, entity_type: EntityType) -> Result<Entity> {
    let now = chrono::Utc::now().to_rfc3339();
    let entity = Entity {
        id: uuid::Uuid::now_v7().to_string().into(),
        entity_type,
        name: name.to_string(),
        summary: None,
        is_owner: false,
        metadata: json!({}),
        created_at: now.clone(),
        updated_at: now,
    };
    conn.execute(
        "INSERT INTO entities (id, type, name, summary, is_owner, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entity.id.as_str(),
            entity.entity_type.to_string(),
            entity.name,
            entity.summary,
            entity.is_owner as i64,
            entity.metadata.to_string(),
            entity.created_at,
            entity.updated_at,
        ],
    )?;
    Ok(entity)
}

fn add_identity(conn: &Connection, entity_id: &str, channel: &str, identifier: &str) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO entity_identities (id, entity_id, channel, identifier, verified, linked_at, created_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
        params![uuid::Uuid::now_v7().to_string(), entity_id, channel, identifier, now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup() -> EntityResolver {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        tentickle_store::schema::ensure_schema(&mut conn).unwrap();
        EntityResolver::new(conn).unwrap()
    }

    #[test]
    fn resolve_creates_then_finds() {
        let resolver = setup();
        let r1 = resolver.resolve("telegram", "u1").unwrap();
        let id = r1.entity().id.as_str().to_string();
        assert!(matches!(r1, ResolvedEntity::NewlyCreated(_)));

        let r2 = resolver.resolve("telegram", "u1").unwrap();
        assert!(matches!(r2, ResolvedEntity::Known(_)));
        assert_eq!(r2.entity().id.as_str(), id);
    }

    #[test]
    fn link_identity_merges_to_target() {
        let resolver = setup();
        let a = resolver.resolve("telegram", "a").unwrap().entity().id.as_str().to_string();
        resolver.resolve("imessage", "b").unwrap();

        resolver.link_identity("imessage", "b", &a, None).unwrap();
        let merged = resolver.resolve("imessage", "b").unwrap();
        assert_eq!(merged.entity().id.as_str(), a);
    }
}
