//! Robots.txt parser implementation
//!
//! Only `User-agent`, `Allow` and `Disallow` are interpreted; every other
//! directive (`Sitemap`, `Crawl-delay`, ...) is read past.

use crate::robots::matcher::best_match;
use std::collections::HashMap;

/// Allow/disallow patterns of one user-agent group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    pub allow: Vec<String>,
    pub disallow: Vec<String>,
}

impl RuleSet {
    /// Checks a path against this group
    ///
    /// The longest matching `Allow` wins ties and beats any shorter
    /// `Disallow`; a path nothing disallows is allowed.
    pub fn is_allowed(&self, path: &str) -> bool {
        match best_match(&self.disallow, path) {
            None => true,
            Some(disallow_len) => {
                best_match(&self.allow, path).is_some_and(|allow_len| allow_len >= disallow_len)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.disallow.is_empty()
    }
}

/// Parsed robots.txt, grouped by lowercased user-agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsRules {
    groups: HashMap<String, RuleSet>,
}

impl RobotsRules {
    /// Rules that restrict nothing (missing robots.txt)
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Selects the group that applies to `user_agent`
    ///
    /// Exact case-insensitive agent match first, then the `*` group, then an
    /// empty rule set.
    pub fn rules_for(&self, user_agent: &str) -> &RuleSet {
        static EMPTY: RuleSet = RuleSet {
            allow: Vec::new(),
            disallow: Vec::new(),
        };

        self.groups
            .get(&user_agent.trim().to_lowercase())
            .or_else(|| self.groups.get("*"))
            .unwrap_or(&EMPTY)
    }

    /// Checks `path` for `user_agent`
    pub fn is_allowed(&self, path: &str, user_agent: &str) -> bool {
        self.rules_for(user_agent).is_allowed(path)
    }

    /// Number of distinct agent groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

/// Parses robots.txt content
///
/// Consecutive `User-agent` lines accumulate into one group; the first
/// non-`User-agent` directive closes the accumulation, so a later
/// `User-agent` starts a new group. `Allow`/`Disallow` with an empty value are
/// ignored rather than read as "allow everything".
///
/// # Example
///
/// ```
/// use feed_refresher::robots::parse_robots;
///
/// let rules = parse_robots("User-agent: *\nDisallow: /\nAllow: /public");
/// assert!(rules.is_allowed("/public/page", "AnyBot"));
/// assert!(!rules.is_allowed("/private", "AnyBot"));
/// ```
pub fn parse_robots(content: &str) -> RobotsRules {
    let mut groups: HashMap<String, RuleSet> = HashMap::new();
    let mut current_agents: Vec<String> = Vec::new();
    let mut accumulating = false;

    for line in content.lines() {
        let line = match line.split_once('#') {
            Some((before, _)) => before,
            None => line,
        }
        .trim();

        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        if key == "user-agent" {
            if !accumulating {
                current_agents.clear();
                accumulating = true;
            }
            if !value.is_empty() {
                let agent = value.to_lowercase();
                groups.entry(agent.clone()).or_default();
                current_agents.push(agent);
            }
            continue;
        }

        accumulating = false;

        let is_allow = match key.as_str() {
            "allow" => true,
            "disallow" => false,
            _ => continue,
        };

        if value.is_empty() {
            continue;
        }

        for agent in &current_agents {
            let rules = groups.entry(agent.clone()).or_default();
            if is_allow {
                rules.allow.push(value.to_string());
            } else {
                rules.disallow.push(value.to_string());
            }
        }
    }

    RobotsRules { groups }
}
