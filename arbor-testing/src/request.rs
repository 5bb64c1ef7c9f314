// Request builder for tests

use arbor_core::{RequestContext, Result};

/// Fluent construction of a [`RequestContext`]
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    path: String,
    query: Vec<(String, String)>,
    params: Vec<(String, String)>,
    body: Option<(Option<String>, Vec<u8>)>,
    caller: Option<String>,
    elevated: Vec<String>,
}

impl RequestBuilder {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Add a query pair; repeated names merge
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set a parameter directly, replacing whatever the request carried
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// URL-encoded form body
    pub fn form(self, body: impl Into<Vec<u8>>) -> Self {
        self.body(Some("application/x-www-form-urlencoded"), body)
    }

    pub fn multipart(self, boundary: &str, body: impl Into<Vec<u8>>) -> Self {
        let content_type = format!("multipart/form-data; boundary={}", boundary);
        self.body(Some(&content_type), body)
    }

    pub fn body(mut self, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some((content_type.map(str::to_string), body.into()));
        self
    }

    pub fn caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn elevate(mut self, grant: impl Into<String>) -> Self {
        self.elevated.push(grant.into());
        self
    }

    /// Build the context; fails only on a malformed body
    pub fn build(self) -> Result<RequestContext> {
        let mut ctx = RequestContext::new(&self.path);
        for (name, value) in &self.query {
            ctx.merge_parameter(name, value.as_str());
        }
        if let Some((content_type, body)) = &self.body {
            ctx = ctx.with_body(content_type.as_deref(), body)?;
        }
        for (name, value) in &self.params {
            ctx.set_parameter(name, value.as_str());
        }
        if let Some(caller) = self.caller {
            ctx = ctx.with_caller(caller);
        }
        ctx.elevate(self.elevated);
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_layers_parameters() {
        let ctx = RequestBuilder::new("/widgets/select?id=1")
            .query("tag", "a")
            .form("tag=b&name=x")
            .param("name", "override")
            .caller("admin")
            .elevate("widget_select")
            .build()
            .unwrap();

        assert_eq!(ctx.parameter("id"), Some("1"));
        assert_eq!(ctx.parameter("name"), Some("override"));
        assert_eq!(ctx.parameter("tag").map(|t| t.split(';').count()), Some(2));
        assert_eq!(ctx.caller(), Some("admin"));
        assert!(ctx.elevated().contains("WIDGET_SELECT"));
        assert_eq!(ctx.peek_action(), Some("widgets"));
    }

    #[test]
    fn test_raw_body_is_kept() {
        let ctx = RequestBuilder::new("/upload")
            .body(Some("application/octet-stream"), vec![0u8, 255])
            .build()
            .unwrap();
        assert_eq!(ctx.body().map(|b| b.to_vec()), Some(vec![0u8, 255]));
    }
}
