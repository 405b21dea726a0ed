use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::DEFAULT_TAG;
use crate::core::errors::ResourceXError;

/// A parsed resource locator: `[registry/][path/]name[:tag]`.
///
/// * `registry` is a domain or `host:port`.
/// * `path` is zero or more slash-joined segments.
/// * `tag` defaults to `latest` when omitted.
///
/// The same value doubles as the store lookup identifier; all components,
/// including the tag, participate in equality.
///
/// A leading token is only treated as a registry when it could not be a path
/// segment: it contains a `.`, it carries a `:port` suffix, or it is exactly
/// `localhost`. This mirrors the reference heuristics of Docker-style image
/// references.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locator {
    registry: Option<SmolStr>,
    path: Option<SmolStr>,
    name: SmolStr,
    tag: SmolStr,
}

impl Locator {
    /// Parse a locator string.
    ///
    /// The algorithm is deterministic: split at the last `/` into prefix and
    /// tail, split the tail at the last `:` into name and tag, then decide
    /// whether the first prefix segment is a registry.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(ResourceXError::EmptyLocator.into());
        }
        if let Some(ch) = input.chars().find(|ch| *ch == '@' || ch.is_whitespace()) {
            return Err(ResourceXError::InvalidCharacter {
                ch,
                input: input.into(),
            }
            .into());
        }

        let (prefix, tail) = match input.rsplit_once('/') {
            Some((prefix, tail)) => (Some(prefix), tail),
            None => (None, input),
        };

        let (name, tag) = match tail.rsplit_once(':') {
            Some((name, tag)) => {
                if tag.is_empty() {
                    return Err(ResourceXError::EmptyTag {
                        input: input.into(),
                    }
                    .into());
                }
                (name, tag)
            }
            None => (tail, DEFAULT_TAG),
        };

        if name.is_empty() {
            return Err(ResourceXError::EmptyName {
                input: input.into(),
            }
            .into());
        }

        let (registry, path) = match prefix {
            None | Some("") => (None, None),
            Some(prefix) => {
                let head = prefix.split('/').next().expect("split yields one item");
                if looks_like_registry(head) {
                    let rest = &prefix[head.len()..];
                    let path = rest.strip_prefix('/').filter(|p| !p.is_empty());
                    (Some(head), path)
                } else {
                    (None, Some(prefix))
                }
            }
        };

        Ok(Self {
            registry: registry.map(SmolStr::new),
            path: path.map(SmolStr::new),
            name: SmolStr::new(name),
            tag: SmolStr::new(tag),
        })
    }

    pub fn from_parts(
        registry: Option<&str>,
        path: Option<&str>,
        name: &str,
        tag: &str,
    ) -> Self {
        Self {
            registry: registry.map(SmolStr::new),
            path: path.map(SmolStr::new),
            name: SmolStr::new(name),
            tag: SmolStr::new(tag),
        }
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn has_default_tag(&self) -> bool {
        self.tag == DEFAULT_TAG
    }

    /// A locator is local when it has no registry, or when its registry host
    /// is `localhost`. The resolution pipeline never performs network I/O
    /// for local locators.
    pub fn is_local(&self) -> bool {
        match self.registry() {
            None => true,
            Some(registry) => {
                let host = registry.split(':').next().unwrap_or(registry);
                host == "localhost"
            }
        }
    }

    /// Copy with the registry component dropped. Servers store resources
    /// this way: the server itself is the registry.
    pub fn without_registry(&self) -> Self {
        Self {
            registry: None,
            ..self.clone()
        }
    }

    /// Copy with the registry component replaced. Clients re-attach the
    /// registry prefix when caching resources pulled from it.
    pub fn with_registry(&self, registry: &str) -> Self {
        Self {
            registry: Some(SmolStr::new(registry)),
            ..self.clone()
        }
    }

    /// Copy with a concrete tag substituted.
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            tag: SmolStr::new(tag),
            ..self.clone()
        }
    }

    /// Normalized string form: the `:latest` suffix is omitted.
    pub fn to_canonical_string(&self) -> String {
        if self.has_default_tag() {
            let mut out = String::new();
            self.write_prefix(&mut out).expect("writing to String");
            out.push_str(&self.name);
            out
        } else {
            self.to_string()
        }
    }

    fn write_prefix(&self, out: &mut impl fmt::Write) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(out, "{registry}/")?;
        }
        if let Some(path) = &self.path {
            write!(out, "{path}/")?;
        }
        Ok(())
    }
}

fn looks_like_registry(segment: &str) -> bool {
    segment == "localhost" || segment.contains('.') || segment.contains(':')
}

impl FromStr for Locator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Locator::parse(s)
    }
}

impl TryFrom<String> for Locator {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Locator::parse(&value)
    }
}

impl From<Locator> for String {
    fn from(value: Locator) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_prefix(f)?;
        write!(f, "{}:{}", self.name, self.tag)
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Locator({self})")
    }
}
