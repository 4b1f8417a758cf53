//! Relation catalog for one replication session.
//!
//! The server sends a Relation message before the first change to each table
//! in a session, and again whenever its relation cache is invalidated. Row
//! changes carry only the relation id, so they can only be decoded against
//! the most recent descriptor for that id.

use std::collections::HashMap;

use walrelay_core::RelationRef;

use super::pgoutput::{RelationMessage, ReplicaIdentity};
use crate::error::{PgError, PgResult};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub type_oid: u32,
    pub type_modifier: i32,
    pub is_key: bool,
}

/// Column layout of a relation as last announced by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDescriptor {
    pub id: u32,
    pub namespace: String,
    pub name: String,
    pub replica_identity: ReplicaIdentity,
    pub columns: Vec<ColumnDescriptor>,
}

impl RelationDescriptor {
    pub fn relation_ref(&self) -> RelationRef {
        RelationRef::new(self.namespace.clone(), self.name.clone())
    }
}

impl From<RelationMessage> for RelationDescriptor {
    fn from(msg: RelationMessage) -> Self {
        Self {
            id: msg.relation_id,
            namespace: msg.namespace,
            name: msg.name,
            replica_identity: msg.replica_identity,
            columns: msg
                .columns
                .into_iter()
                .map(|c| ColumnDescriptor {
                    is_key: c.is_key(),
                    name: c.name,
                    type_oid: c.type_oid,
                    type_modifier: c.type_modifier,
                })
                .collect(),
        }
    }
}

/// Relation id to descriptor mapping. Owned by a single decoder.
#[derive(Debug, Default)]
pub struct RelationCatalog {
    relations: HashMap<u32, RelationDescriptor>,
}

impl RelationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the descriptor for its id, returning the previous one.
    pub fn upsert(&mut self, descriptor: RelationDescriptor) -> Option<RelationDescriptor> {
        self.relations.insert(descriptor.id, descriptor)
    }

    /// Look up a relation, failing if it was never announced.
    pub fn get(&self, relation_id: u32) -> PgResult<&RelationDescriptor> {
        self.relations
            .get(&relation_id)
            .ok_or(PgError::RelationNotFound(relation_id))
    }

    pub fn contains(&self, relation_id: u32) -> bool {
        self.relations.contains_key(&relation_id)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}
