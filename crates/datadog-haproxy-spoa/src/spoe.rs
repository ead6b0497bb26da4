// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory representation of the SPOE frames exchanged with HAProxy.
//!
//! The agent server that owns the socket decodes `NOTIFY` frames into a
//! [`Request`] and encodes the [`Actions`] collected on it back into an
//! `ACK` frame. Framing itself is not handled here: these types are the
//! transport seen by the dispatch loop.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// A single typed value carried by a SPOE key/value list or an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedData {
    Null,
    Bool(bool),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    String(String),
    Binary(Vec<u8>),
}

impl TypedData {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            Self::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Widens any of the integer variants to an `i64`. `Uint64` values that
    /// do not fit are rejected.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int32(v) => Some(i64::from(v)),
            Self::Uint32(v) => Some(i64::from(v)),
            Self::Int64(v) => Some(v),
            Self::Uint64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for TypedData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Uint32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Uint64(v) => write!(f, "{v}"),
            Self::Ipv4(v) => write!(f, "{v}"),
            Self::Ipv6(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::Binary(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<bool> for TypedData {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for TypedData {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<u64> for TypedData {
    fn from(v: u64) -> Self {
        Self::Uint64(v)
    }
}

impl From<&str> for TypedData {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for TypedData {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for TypedData {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}

impl From<std::net::IpAddr> for TypedData {
    fn from(v: std::net::IpAddr) -> Self {
        match v {
            std::net::IpAddr::V4(ip) => Self::Ipv4(ip),
            std::net::IpAddr::V6(ip) => Self::Ipv6(ip),
        }
    }
}

/// Ordered key/value arguments of a SPOE message. Lookups return the first
/// entry with a matching name, as HAProxy never repeats an argument name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvList {
    entries: Vec<(String, TypedData)>,
}

impl KvList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl Into<TypedData>) -> &mut Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&TypedData> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypedData)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<TypedData>> FromIterator<(K, V)> for KvList {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// One SPOE message as declared by a `spoe-message` section of the HAProxy
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub name: String,
    pub kv: KvList,
}

impl Message {
    pub fn new(name: impl Into<String>, kv: KvList) -> Self {
        Self {
            name: name.into(),
            kv,
        }
    }
}

/// Scope of a variable set by the agent, i.e. the `txn` in
/// `var(txn.dd.blocked)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Process,
    Session,
    Transaction,
    Request,
    Response,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SetVar {
        scope: Scope,
        name: String,
        value: TypedData,
    },
    UnsetVar {
        scope: Scope,
        name: String,
    },
}

/// Append-only sink of the actions sent back to HAProxy in the `ACK` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actions {
    actions: Vec<Action>,
}

impl Actions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_var(&mut self, scope: Scope, name: impl Into<String>, value: impl Into<TypedData>) {
        self.actions.push(Action::SetVar {
            scope,
            name: name.into(),
            value: value.into(),
        });
    }

    pub fn unset_var(&mut self, scope: Scope, name: impl Into<String>) {
        self.actions.push(Action::UnsetVar {
            scope,
            name: name.into(),
        });
    }

    /// Returns the value of the first `set-var` action for `name`, whatever
    /// its scope.
    pub fn find_var(&self, name: &str) -> Option<&TypedData> {
        self.actions.iter().find_map(|action| match action {
            Action::SetVar {
                name: var, value, ..
            } if var == name => Some(value),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.actions.iter()
    }
}

/// A decoded `NOTIFY` frame and the actions that will answer it.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub engine_id: String,
    pub stream_id: u64,
    pub frame_id: u64,
    pub messages: Vec<Message>,
    pub actions: Actions,
}

impl Request {
    pub fn new(engine_id: impl Into<String>, stream_id: u64, frame_id: u64) -> Self {
        Self {
            engine_id: engine_id.into(),
            stream_id,
            frame_id,
            messages: Vec::new(),
            actions: Actions::new(),
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }
}
