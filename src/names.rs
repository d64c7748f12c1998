// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Stream name expansion and allow-list matching
//
// Names follow the ROS conventions used by the publishers we record:
// - `/abs/name` is kept as is
// - `rel/name` is resolved against the namespace
// - `~` and `~/x` refer to the recorder's private namespace
// - `{node}`, `{ns}` and `{namespace}` are substituted before resolution
//
// Allow-list entries may also contain `*` (one token) and `**` (any number
// of tokens) wildcards.

use crate::error::{RecorderError, Result};
use regex::Regex;

/// Expand a stream name or pattern to its fully qualified form
pub fn expand_topic_name(name: &str, node_name: &str, namespace: &str) -> Result<String> {
    if name.is_empty() {
        return Err(RecorderError::config("topic name must not be empty"));
    }
    if node_name.is_empty() || node_name.contains('/') {
        return Err(RecorderError::config(format!(
            "invalid node name '{}'",
            node_name
        )));
    }

    let namespace = normalize_namespace(namespace)?;
    let substituted = substitute(name, node_name, &namespace)?;

    let private_ns = if namespace == "/" {
        format!("/{}", node_name)
    } else {
        format!("{}/{}", namespace, node_name)
    };

    let expanded = if substituted == "~" {
        private_ns
    } else if let Some(rest) = substituted.strip_prefix("~/") {
        format!("{}/{}", private_ns, rest)
    } else if substituted.starts_with('~') {
        return Err(RecorderError::config(format!(
            "'~' must be followed by '/' in topic name '{}'",
            name
        )));
    } else if substituted.starts_with('/') {
        substituted
    } else if namespace == "/" {
        format!("/{}", substituted)
    } else {
        format!("{}/{}", namespace, substituted)
    };

    validate_fully_qualified(&expanded, true)?;
    Ok(expanded)
}

fn normalize_namespace(namespace: &str) -> Result<String> {
    let ns = if namespace.is_empty() { "/" } else { namespace };
    let ns = if ns.starts_with('/') {
        ns.to_string()
    } else {
        format!("/{}", ns)
    };
    let ns = if ns.len() > 1 {
        ns.trim_end_matches('/').to_string()
    } else {
        ns
    };
    if ns != "/" {
        validate_fully_qualified(&ns, false)?;
    }
    Ok(ns)
}

fn substitute(name: &str, node_name: &str, namespace: &str) -> Result<String> {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let close = rest[open..].find('}').ok_or_else(|| {
            RecorderError::config(format!("unterminated substitution in '{}'", name))
        })?;
        let key = &rest[open + 1..open + close];
        match key {
            "node" => out.push_str(node_name),
            // the root namespace substitutes to nothing so "{ns}/x" stays valid
            "ns" | "namespace" if namespace == "/" => {}
            "ns" | "namespace" => out.push_str(namespace),
            other => {
                return Err(RecorderError::config(format!(
                    "unknown substitution '{{{}}}' in '{}'",
                    other, name
                )))
            }
        }
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn validate_fully_qualified(name: &str, allow_wildcards: bool) -> Result<()> {
    let invalid = |reason: &str| {
        Err(RecorderError::config(format!(
            "invalid topic name '{}': {}",
            name, reason
        )))
    };

    if !name.starts_with('/') {
        return invalid("must be absolute");
    }
    if name.len() == 1 {
        return invalid("must not be the root namespace");
    }
    if name.ends_with('/') {
        return invalid("must not end with '/'");
    }

    for token in name[1..].split('/') {
        if token.is_empty() {
            return invalid("must not contain '//'");
        }
        if token == "*" || token == "**" {
            if !allow_wildcards {
                return invalid("wildcards are not allowed here");
            }
            continue;
        }
        if token.starts_with(|c: char| c.is_ascii_digit()) {
            return invalid("tokens must not start with a digit");
        }
        if !token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return invalid("only alphanumerics, '_' and '/' are allowed");
        }
    }
    Ok(())
}

/// A single expanded allow-list entry
#[derive(Debug, Clone)]
pub struct TopicPattern {
    expanded: String,
    regex: Option<Regex>,
}

impl TopicPattern {
    pub fn new(pattern: &str, node_name: &str, namespace: &str) -> Result<Self> {
        let expanded = expand_topic_name(pattern, node_name, namespace)?;
        let regex = if is_wildcard(&expanded) {
            Some(compile_wildcard(&expanded)?)
        } else {
            None
        };
        Ok(Self { expanded, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.expanded
    }

    pub fn is_wildcard(&self) -> bool {
        self.regex.is_some()
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(name),
            None => self.expanded == name,
        }
    }
}

fn is_wildcard(expanded: &str) -> bool {
    expanded[1..].split('/').any(|t| t == "*" || t == "**")
}

fn compile_wildcard(expanded: &str) -> Result<Regex> {
    let mut pattern = String::from("^");
    for token in expanded[1..].split('/') {
        match token {
            "**" => pattern.push_str("(?:/[^/]+)*"),
            "*" => pattern.push_str("/[^/]+"),
            literal => {
                pattern.push('/');
                pattern.push_str(&regex::escape(literal));
            }
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
        .map_err(|e| RecorderError::config(format!("invalid topic pattern '{}': {}", expanded, e)))
}

/// Expanded allow-list. Empty means "record everything".
#[derive(Debug, Clone, Default)]
pub struct TopicMatcher {
    patterns: Vec<TopicPattern>,
}

impl TopicMatcher {
    pub fn new<S: AsRef<str>>(topics: &[S], node_name: &str, namespace: &str) -> Result<Self> {
        let mut patterns: Vec<TopicPattern> = Vec::with_capacity(topics.len());
        for topic in topics {
            let pattern = TopicPattern::new(topic.as_ref(), node_name, namespace)?;
            if !patterns.iter().any(|p| p.as_str() == pattern.as_str()) {
                patterns.push(pattern);
            }
        }
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn has_wildcards(&self) -> bool {
        self.patterns.iter().any(TopicPattern::is_wildcard)
    }

    pub fn patterns(&self) -> &[TopicPattern] {
        &self.patterns
    }

    /// Patterns that name exactly one stream
    pub fn exact_names(&self) -> impl Iterator<Item = &str> {
        self.patterns
            .iter()
            .filter(|p| !p.is_wildcard())
            .map(TopicPattern::as_str)
    }

    /// An empty matcher accepts every stream
    pub fn accepts(&self, name: &str) -> bool {
        self.is_empty() || self.patterns.iter().any(|p| p.matches(name))
    }
}
