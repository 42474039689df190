//! Named routes and reverse routing.
//!
//! Every route is registered under a name. [`NamedRoutes::reverse`] turns a
//! name plus positional values back into a concrete path, so templates and
//! redirects never hard-code URLs:
//!
//! ```rust
//! use strata::NamedRoutes;
//!
//! let mut routes = NamedRoutes::default();
//! routes.insert("user_post", "/users/:id/posts/:post");
//! assert_eq!(routes.reverse("user_post", &[&42, &"intro"]), "/users/42/posts/intro");
//! ```
//!
//! Reverse routing never fails loudly: it runs while pages render, and a
//! broken link is better than a broken page. Unknown names produce
//! [`FALLBACK_PATH`] and a warning; missing values leave their placeholders
//! in the path untouched.

use std::collections::HashMap;
use std::fmt::Display;

use tracing::warn;

/// Returned by [`NamedRoutes::reverse`] for names nobody registered.
pub const FALLBACK_PATH: &str = "/no_such_named_routes_defined";

/// Reserved name of the static-assets mount.
pub(crate) const ASSETS_ROUTE: &str = "@assets";

/// Route name → path template, plus the static-assets override mapping.
#[derive(Debug, Clone, Default)]
pub struct NamedRoutes {
    routes: HashMap<String, String>,
    assets: HashMap<String, String>,
}

impl NamedRoutes {
    /// Records `name → template`. A second registration of the same name
    /// replaces the first.
    pub fn insert(&mut self, name: impl Into<String>, template: impl Into<String>) {
        let (name, template) = (name.into(), template.into());
        if let Some(previous) = self.routes.get(&name) {
            if *previous != template {
                warn!(name = %name, previous = %previous, template = %template, "route name registered twice, last one wins");
            }
        }
        self.routes.insert(name, template);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.routes.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Builds the path for `name`, filling `:param` and `*wildcard`
    /// segments left to right from `params`.
    pub fn reverse(&self, name: &str, params: &[&dyn Display]) -> String {
        let Some(template) = self.routes.get(name) else {
            warn!(name, "reverse routing failed, no route named {name:?}");
            return FALLBACK_PATH.to_owned();
        };
        if params.is_empty() || template == "/" {
            return template.clone();
        }

        let mut values = params.iter();
        let segments: Vec<String> = template
            .strip_prefix('/')
            .unwrap_or(template)
            .split('/')
            .map(|segment| {
                let placeholder = segment.starts_with(':') || segment.starts_with('*');
                match placeholder.then(|| values.next()).flatten() {
                    Some(value) => value.to_string(),
                    None => segment.to_owned(),
                }
            })
            .collect();
        clean_path(&format!("/{}", segments.join("/")))
    }

    /// Replaces the static-assets override mapping.
    pub fn set_assets_mapping(&mut self, mapping: HashMap<String, String>) {
        self.assets = mapping;
    }

    /// Path of a static asset: `path` goes through the override mapping
    /// first (e.g. to a content-hashed file name), then into the assets mount.
    pub fn assets(&self, path: &str) -> String {
        let path = self.assets.get(path).map_or(path, String::as_str);
        self.reverse(ASSETS_ROUTE, &[&path])
    }
}

/// Canonical form of a URL path.
///
/// Collapses repeated `/`, drops `.` segments, resolves `..` against the
/// preceding segment (never above the root) and keeps a trailing slash.
///
/// ```rust
/// assert_eq!(strata::clean_path("a//b/./c/../d/"), "/a/b/d/");
/// ```
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut out = String::with_capacity(path.len() + 1);
    for segment in &segments {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        return "/".to_owned();
    }
    if path.ends_with('/') {
        out.push('/');
    }
    out
}
