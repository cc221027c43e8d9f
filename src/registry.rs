use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Per-process table of local room membership.
///
/// Two mutually consistent indices: room -> member connection ids and
/// connection id -> joined rooms, both scoped by namespace. Rooms exist
/// only implicitly - a room is created by its first join and dropped with
/// its last member, so absence of a key IS the empty state.
///
/// The registry is not internally synchronized; the adapter serializes all
/// mutations behind one lock together with the subscription refcounts.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    // namespace -> room -> member connection ids
    rooms: HashMap<String, HashMap<String, HashSet<String>>>,
    // namespace -> connection id -> joined rooms
    memberships: HashMap<String, HashMap<String, HashSet<String>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to a room. Returns true iff this was a real
    /// membership transition; joining an already-joined room is a no-op.
    pub fn join(&mut self, namespace: &str, connection_id: &str, room: &str) -> bool {
        let members = self
            .rooms
            .entry(namespace.to_string())
            .or_default()
            .entry(room.to_string())
            .or_default();
        if !members.insert(connection_id.to_string()) {
            return false;
        }

        self.memberships
            .entry(namespace.to_string())
            .or_default()
            .entry(connection_id.to_string())
            .or_default()
            .insert(room.to_string());

        debug!(
            namespace = %namespace,
            connection_id = %connection_id,
            room = %room,
            "Connection joined room"
        );
        true
    }

    /// Removes a connection from a room. Returns true iff this was a real
    /// membership transition; leaving a room never joined is a no-op, not
    /// an error. Drops the room entry when its member set empties.
    pub fn leave(&mut self, namespace: &str, connection_id: &str, room: &str) -> bool {
        let Some(in_namespace) = self.rooms.get_mut(namespace) else {
            return false;
        };
        let Some(members) = in_namespace.get_mut(room) else {
            return false;
        };
        if !members.remove(connection_id) {
            return false;
        }
        if members.is_empty() {
            in_namespace.remove(room);
        }
        if in_namespace.is_empty() {
            self.rooms.remove(namespace);
        }

        if let Some(by_connection) = self.memberships.get_mut(namespace) {
            if let Some(rooms) = by_connection.get_mut(connection_id) {
                rooms.remove(room);
                if rooms.is_empty() {
                    by_connection.remove(connection_id);
                }
            }
            if by_connection.is_empty() {
                self.memberships.remove(namespace);
            }
        }

        debug!(
            namespace = %namespace,
            connection_id = %connection_id,
            room = %room,
            "Connection left room"
        );
        true
    }

    /// Leaves every room the connection was in, in ordinary `leave` terms.
    /// Returns the rooms that were actually vacated.
    pub fn remove_connection(&mut self, namespace: &str, connection_id: &str) -> Vec<String> {
        let rooms = self.rooms_of(namespace, connection_id);
        let mut vacated = Vec::with_capacity(rooms.len());
        for room in rooms {
            if self.leave(namespace, connection_id, &room) {
                vacated.push(room);
            }
        }
        vacated
    }

    pub fn members_of(&self, namespace: &str, room: &str) -> Vec<String> {
        self.rooms
            .get(namespace)
            .and_then(|in_namespace| in_namespace.get(room))
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn rooms_of(&self, namespace: &str, connection_id: &str) -> Vec<String> {
        self.memberships
            .get(namespace)
            .and_then(|by_connection| by_connection.get(connection_id))
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }
}
