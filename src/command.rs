//! Text command parsing and dispatch
//!
//! A request payload is a one-byte message-type code followed by ASCII
//! space-delimited tokens: a verb, then operands. Binary values travel as
//! base-64 tokens; key names travel raw. The dispatcher routes verbs to
//! the store and tag index and renders the reply payload, or nothing for
//! fire-and-forget verbs.

use crate::net::error::NetError;
use crate::store::{CacheStore, ExpirationPolicy};
use crate::tags::{KeyPattern, TagIndex};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::NaiveDateTime;
use std::sync::Arc;
use std::time::Duration;

/// Sole in-band diagnostic; everything else is an empty-body reply.
pub const INVALID_COMMAND: &str = "invalid command";

/// Format of an absolute-expiration operand (`yyMMddHHmmss`), UTC-assumed.
pub const ABSOLUTE_TIMESTAMP_FORMAT: &str = "%y%m%d%H%M%S";

/// Message-type code carried as the first payload byte, describing the
/// structure of the tokens that follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Single-piece body or diagnostic.
    Literal = 0,
    /// Repeating key names, raw UTF-8.
    RepeatingKeys = 1,
    /// Repeating values, base-64.
    RepeatingValues = 2,
    /// Repeating key/value pairs.
    RepeatingKeyValues = 3,
}

impl MessageType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(MessageType::Literal),
            1 => Some(MessageType::RepeatingKeys),
            2 => Some(MessageType::RepeatingValues),
            3 => Some(MessageType::RepeatingKeyValues),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Render a reply payload: type code, then space-joined tokens.
fn build_reply<S: AsRef<str>>(kind: MessageType, tokens: &[S]) -> Vec<u8> {
    let mut out = vec![kind.code()];
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            out.push(b' ');
        }
        out.extend_from_slice(token.as_ref().as_bytes());
    }
    out
}

/// Empty-body reply: just the type byte. Doubles as the response to a
/// known verb with malformed operands.
fn empty_reply(kind: MessageType) -> Vec<u8> {
    vec![kind.code()]
}

fn literal(body: &str) -> Vec<u8> {
    build_reply(MessageType::Literal, &[body])
}

/// Routes parsed commands to the store and tag index.
///
/// Collaborators are injected at construction; the dispatcher itself is
/// stateless and shared across all connections.
pub struct Dispatcher {
    store: Arc<CacheStore>,
    tags: Arc<TagIndex>,
}

impl Dispatcher {
    pub fn new(store: Arc<CacheStore>, tags: Arc<TagIndex>) -> Self {
        Self { store, tags }
    }

    /// Execute one request payload.
    ///
    /// `Ok(None)` means no reply frame at all (fire-and-forget verbs).
    /// `Err` means the frame was not a well-formed request and the
    /// connection must be closed.
    pub fn dispatch(&self, payload: &[u8]) -> Result<Option<Vec<u8>>, NetError> {
        let Some((&code, body)) = payload.split_first() else {
            return Err(NetError::protocol("empty request payload"));
        };
        if MessageType::from_code(code).is_none() {
            return Err(NetError::protocol(format!("unknown message-type code {}", code)));
        }

        let Ok(text) = std::str::from_utf8(body) else {
            return Ok(Some(literal(INVALID_COMMAND)));
        };
        let tokens: Vec<&str> = text.split(' ').filter(|t| !t.is_empty()).collect();
        let Some((verb, operands)) = tokens.split_first() else {
            return Ok(Some(literal(INVALID_COMMAND)));
        };

        match *verb {
            "get" => Ok(Some(self.exec_get(operands))),
            "set" => Ok(Some(self.exec_set(operands))),
            "del" => Ok(self.exec_del(operands)),
            "keys" => Ok(Some(self.exec_keys(operands))),
            "clear" => {
                self.exec_clear();
                Ok(None)
            }
            _ => Ok(Some(literal(INVALID_COMMAND))),
        }
    }

    fn exec_get(&self, operands: &[&str]) -> Vec<u8> {
        if operands.is_empty() {
            return empty_reply(MessageType::RepeatingValues);
        }

        let mut values = Vec::new();
        if let Some((pattern, tag_names)) = split_tagged(operands) {
            for tag in tag_names {
                let Some(keys) = self.tags.get_tagged_keys(tag, pattern) else {
                    continue;
                };
                for key in keys {
                    // Keys the store already dropped are skipped; the tag
                    // index catches up on its own schedule.
                    if let Some(value) = self.store.get(&key) {
                        values.push(BASE64.encode(value));
                    }
                }
            }
        } else {
            for key in operands {
                if let Some(value) = self.store.get(key) {
                    values.push(BASE64.encode(value));
                }
            }
        }
        build_reply(MessageType::RepeatingValues, &values)
    }

    fn exec_set(&self, operands: &[&str]) -> Vec<u8> {
        let mut interned = false;
        let mut notify = false;
        let mut tag: Option<&str> = None;
        let mut absolute = None;
        let mut sliding = None;

        let mut i = 0;
        while i < operands.len() {
            match operands[i] {
                "-i" => {
                    interned = true;
                    i += 1;
                }
                "-c" => {
                    notify = true;
                    i += 1;
                }
                "-t" => {
                    let Some(name) = operands.get(i + 1) else {
                        return empty_reply(MessageType::Literal);
                    };
                    tag = Some(*name);
                    i += 2;
                }
                "-a" => {
                    let Some(stamp) = operands.get(i + 1) else {
                        return empty_reply(MessageType::Literal);
                    };
                    let Ok(naive) = NaiveDateTime::parse_from_str(stamp, ABSOLUTE_TIMESTAMP_FORMAT) else {
                        return empty_reply(MessageType::Literal);
                    };
                    absolute = Some(naive.and_utc());
                    i += 2;
                }
                "-s" => {
                    let Some(secs) = operands.get(i + 1) else {
                        return empty_reply(MessageType::Literal);
                    };
                    let Ok(secs) = secs.parse::<u64>() else {
                        return empty_reply(MessageType::Literal);
                    };
                    sliding = Some(Duration::from_secs(secs));
                    i += 2;
                }
                // First non-flag token starts the key/value pairs.
                _ => break,
            }
        }

        let pairs = &operands[i..];
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return empty_reply(MessageType::Literal);
        }

        // Validate every key and decode every value before touching the
        // store so a malformed token cannot leave a half-applied batch
        // behind.
        let mut decoded = Vec::with_capacity(pairs.len() / 2);
        for pair in pairs.chunks(2) {
            if pair[0].trim().is_empty() {
                return empty_reply(MessageType::Literal);
            }
            let Ok(value) = BASE64.decode(pair[1]) else {
                return empty_reply(MessageType::Literal);
            };
            decoded.push((pair[0], value));
        }

        // -i supersedes the lifetime and notify flags; -a wins over -s.
        let policy = if interned {
            ExpirationPolicy::Interned
        } else if let Some(at) = absolute {
            ExpirationPolicy::Absolute(at)
        } else if let Some(window) = sliding {
            ExpirationPolicy::Sliding(window)
        } else {
            ExpirationPolicy::Default
        };

        for (key, value) in decoded {
            if self.store.set(key, &value, policy.clone(), notify).is_err() {
                return empty_reply(MessageType::Literal);
            }
            if let Some(tag) = tag {
                self.tags.add_or_update(key, tag);
            }
        }
        empty_reply(MessageType::Literal)
    }

    fn exec_del(&self, operands: &[&str]) -> Option<Vec<u8>> {
        if operands.is_empty() {
            return Some(empty_reply(MessageType::Literal));
        }

        if let Some((pattern, tag_names)) = split_tagged(operands) {
            for tag in tag_names {
                let Some(keys) = self.tags.get_tagged_keys(tag, pattern) else {
                    continue;
                };
                for key in keys {
                    self.store.remove(&key);
                    self.tags.remove(&key);
                }
            }
        } else {
            for key in operands {
                self.store.remove(key);
                self.tags.remove(key);
            }
        }
        None
    }

    fn exec_keys(&self, operands: &[&str]) -> Vec<u8> {
        if operands.is_empty() {
            return empty_reply(MessageType::RepeatingKeys);
        }

        if let Some((pattern, tag_names)) = split_tagged(operands) {
            let mut keys = Vec::new();
            for tag in tag_names {
                if let Some(tagged) = self.tags.get_tagged_keys(tag, pattern) {
                    keys.extend(tagged);
                }
            }
            return build_reply(MessageType::RepeatingKeys, &keys);
        }

        if operands.len() != 1 {
            return empty_reply(MessageType::RepeatingKeys);
        }
        let keys = match KeyPattern::compile(operands[0]) {
            Some(pattern) => self.store.keys(&pattern),
            // A pattern that does not compile matches nothing.
            None => Vec::new(),
        };
        build_reply(MessageType::RepeatingKeys, &keys)
    }

    fn exec_clear(&self) {
        for key in self.store.clear() {
            self.tags.remove(&key);
        }
    }
}

/// Recognize the `<pattern> -t <tag>…` operand form shared by the tag
/// variants of get, del, and keys.
fn split_tagged<'a>(operands: &'a [&'a str]) -> Option<(&'a str, &'a [&'a str])> {
    if operands.len() >= 3 && operands[1] == "-t" {
        Some((operands[0], &operands[2..]))
    } else {
        None
    }
}
