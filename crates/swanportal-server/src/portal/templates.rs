//! Localized template set.
//!
//! Templates live in per-language directories (`en/webui-index.html`,
//! `ka/webui-index.html`, ...) on an overlay filesystem. Lookups walk the
//! negotiated candidate tags in order; the first directory containing the
//! requested template wins. Loaded sources sit in a one-minute TTL cache
//! so site edits show up without a restart.
//!
//! Rendering is placeholder substitution over a JSON context:
//! `{{path.to.field}}` is HTML-escaped, `{{& path}}` is emitted raw
//! (used for the pre-colorized password markup). Arrays join with a
//! space, missing paths render empty.

use std::time::Duration;

use serde_json::Value;

use swanportal_cache::TtlCache;

use super::overlayfs::OverlayFs;

/// Lifetime of cached template sources.
const TEMPLATE_CACHE_TTL: Duration = Duration::from_secs(60);

/// Localized template loader and renderer.
#[derive(Debug)]
pub struct TemplateSet {
    overlay: OverlayFs,
    cache: TtlCache<String, Option<String>>,
}

impl TemplateSet {
    /// Create a set over the per-language template tree.
    pub fn new(overlay: OverlayFs) -> Self {
        Self {
            overlay,
            cache: TtlCache::new(TEMPLATE_CACHE_TTL),
        }
    }

    /// Render `name` for the best candidate tag.
    ///
    /// The resolved tag is written into the context as `bcp47_tag` before
    /// substitution. Returns `None` when no candidate directory has the
    /// template.
    pub fn render(&self, name: &str, tags: &[String], context: &Value) -> Option<String> {
        for tag in tags {
            if let Some(source) = self.load(tag, name) {
                let mut context = context.clone();
                if let Value::Object(ref mut map) = context {
                    map.insert("bcp47_tag".to_string(), Value::String(tag.clone()));
                }
                return Some(substitute(&source, &context));
            }
        }
        None
    }

    /// Load a template source, negative results cached too.
    fn load(&self, tag: &str, name: &str) -> Option<String> {
        let key = format!("{tag}/{name}");
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }

        let source = self.overlay.read_string(&key);
        self.cache.insert(key, source.clone());
        source
    }
}

/// Substitute `{{...}}` placeholders from a JSON context.
pub fn substitute(template: &str, context: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let inner = after[..end].trim();
        let (raw, path) = match inner.strip_prefix('&') {
            Some(path) => (true, path.trim()),
            None => (false, inner),
        };

        let value = display_value(lookup(context, path));
        if raw {
            out.push_str(&value);
        } else {
            out.push_str(&html_escape(&value));
        }

        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| display_value(Some(item)))
            .collect::<Vec<_>>()
            .join(" "),
        Some(Value::Object(_)) => String::new(),
    }
}

fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
