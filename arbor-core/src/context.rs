//! Per-request dispatch state.
//!
//! A [`RequestContext`] is created once per inbound call and owned by the
//! task serving it. It is threaded explicitly through routing, authorization,
//! parameter resolution and execution; nothing about a request lives in
//! ambient or global state.

use crate::error::Result;
use crate::form::{self, Attachment, MultipartParser};
use crate::guard::GrantSet;
use crate::latin1;
use crate::node::OwnerKey;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};

/// Separator used when the same parameter arrives more than once
pub const VALUE_SEPARATOR: char = ';';

/// Split a slash-delimited path into case-folded, non-empty segments
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    parameters: HashMap<String, String>,
    actions: VecDeque<String>,
    path: VecDeque<String>,
    attachments: HashMap<String, Attachment>,
    body: Option<Bytes>,
    caller: Option<String>,
    elevated: GrantSet,
    owner: Option<OwnerKey>,
    forward_depth: usize,
}

impl RequestContext {
    /// Create a context whose pending actions are the segments of `path`.
    ///
    /// Anything after a `?` is parsed as a query string.
    pub fn new(path: &str) -> Self {
        let (path, query) = path.split_once('?').unwrap_or((path, ""));
        let ctx = Self {
            actions: split_path(path).into(),
            ..Self::default()
        };
        ctx.with_query(query)
    }

    /// Merge query-string parameters
    pub fn with_query(mut self, query: &str) -> Self {
        for (key, value) in form::parse_pairs(query) {
            self.merge_parameter(&key, value);
        }
        self
    }

    /// Merge an `application/x-www-form-urlencoded` body
    pub fn with_form(mut self, body: &[u8]) -> Self {
        for (key, value) in form::parse_pairs(&latin1::decode(body)) {
            self.merge_parameter(&key, value);
        }
        self
    }

    /// Merge a `multipart/form-data` body.
    ///
    /// Parts with a filename become attachments; all others become parameters.
    pub fn with_multipart(mut self, content_type: &str, body: &[u8]) -> Result<Self> {
        let parser = MultipartParser::from_content_type(content_type)?;
        for part in parser.parse(body)? {
            if part.filename.is_some() {
                if let Some(attachment) = part.into_attachment() {
                    self.attachments
                        .insert(attachment.name.to_lowercase(), attachment);
                }
            } else {
                let value = latin1::decode(&part.data);
                self.merge_parameter(&part.name, value);
            }
        }
        Ok(self)
    }

    /// Merge a body according to its content type.
    ///
    /// Bodies of any other type are kept verbatim and exposed via [`body`](Self::body).
    pub fn with_body(self, content_type: Option<&str>, body: &[u8]) -> Result<Self> {
        let media_type = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase());

        match media_type.as_deref() {
            Some("multipart/form-data") => {
                self.with_multipart(content_type.unwrap_or_default(), body)
            }
            None | Some("application/x-www-form-urlencoded") => Ok(self.with_form(body)),
            Some(_) => {
                let mut ctx = self;
                ctx.body = Some(Bytes::copy_from_slice(body));
                Ok(ctx)
            }
        }
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    // ========== Parameters ==========

    /// Get a parameter by (case-insensitive) name
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(&name.to_lowercase())
            .map(String::as_str)
    }

    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    /// Add a value; an existing value is extended with `;`, never overwritten
    pub fn merge_parameter(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        self.parameters
            .entry(name.to_lowercase())
            .and_modify(|existing| {
                existing.push(VALUE_SEPARATOR);
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    /// Replace a value outright (used when forwarding with substituted values)
    pub fn set_parameter(&mut self, name: &str, value: impl Into<String>) {
        self.parameters.insert(name.to_lowercase(), value.into());
    }

    pub fn remove_parameter(&mut self, name: &str) -> Option<String> {
        self.parameters.remove(&name.to_lowercase())
    }

    pub fn attachment(&self, name: &str) -> Option<&Attachment> {
        self.attachments.get(&name.to_lowercase())
    }

    pub fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.values()
    }

    /// Raw body of a non-form request
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    // ========== Path ==========

    /// Next pending segment, without consuming it
    pub fn peek_action(&self) -> Option<&str> {
        self.actions.front().map(String::as_str)
    }

    /// Segment after the next one
    pub fn peek_action_after(&self) -> Option<&str> {
        self.actions.get(1).map(String::as_str)
    }

    pub fn pending_actions(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(String::as_str)
    }

    /// Move the next pending segment onto the consumed path
    pub fn consume_action(&mut self) -> Option<String> {
        let segment = self.actions.pop_front()?;
        self.path.push_back(segment.clone());
        Some(segment)
    }

    /// Remove the next pending segment without recording it
    pub fn pop_action(&mut self) -> Option<String> {
        self.actions.pop_front()
    }

    /// Record a segment as consumed without taking it from the pending queue
    pub fn push_path(&mut self, segment: &str) {
        self.path.push_back(segment.to_lowercase());
    }

    pub fn consumed_path(&self) -> impl Iterator<Item = &str> {
        self.path.iter().map(String::as_str)
    }

    /// Replace the pending segments with the segments of `path`
    pub fn reseed(&mut self, path: &str) {
        self.actions = split_path(path).into();
    }

    /// Step one level up the consumed path
    pub fn pop_path(&mut self) -> Option<String> {
        self.path.pop_back()
    }

    pub fn reset_path(&mut self) {
        self.path.clear();
    }

    /// Consumed path joined with `/`, with a leading slash
    pub fn path_string(&self) -> String {
        let joined: Vec<&str> = self.consumed_path().collect();
        format!("/{}", joined.join("/"))
    }

    /// Filename derived from the consumed path, e.g. `reports-2024-q1`
    pub fn download_name(&self) -> String {
        let joined: Vec<&str> = self.consumed_path().collect();
        if joined.is_empty() {
            "index".to_string()
        } else {
            joined.join("-")
        }
    }

    // ========== Caller ==========

    /// Opaque caller identity for the authorization collaborator
    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    /// Grants substituted for the rest of this request
    pub fn elevated(&self) -> &GrantSet {
        &self.elevated
    }

    pub fn elevate<I, S>(&mut self, grants: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for grant in grants {
            self.elevated.insert(grant.as_ref());
        }
    }

    /// Owner key of the node currently executing, if it came from a bundle
    pub fn owner(&self) -> Option<&OwnerKey> {
        self.owner.as_ref()
    }

    pub(crate) fn replace_owner(&mut self, owner: Option<OwnerKey>) -> Option<OwnerKey> {
        std::mem::replace(&mut self.owner, owner)
    }

    /// Nesting depth of forwards currently in progress
    pub fn forward_depth(&self) -> usize {
        self.forward_depth
    }

    pub(crate) fn enter_forward(&mut self) -> usize {
        self.forward_depth += 1;
        self.forward_depth
    }

    pub(crate) fn leave_forward(&mut self) {
        self.forward_depth = self.forward_depth.saturating_sub(1);
    }
}
