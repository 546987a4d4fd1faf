//! Minimal OpenSSH `ssh_config` reader for resolving host aliases.
//!
//! Only literal `Host` aliases are collected; wildcard and negated patterns
//! are skipped, and reading of a file stops at its first `Match` block
//! since those conditions cannot be evaluated here.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::remote::expand_tilde;

/// One literal alias from a `Host` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshHost {
    pub alias: String,
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct SshConfig {
    hosts: Vec<SshHost>,
}

impl SshConfig {
    /// `~/.ssh/config`, or an empty config when there is none.
    pub fn load_default() -> Self {
        match dirs::home_dir() {
            Some(home) => Self::load(&home.join(".ssh").join("config")),
            None => Self::default(),
        }
    }

    /// Read `path` and everything it includes. Unreadable files are skipped.
    pub fn load(path: &Path) -> Self {
        let mut reader = Reader::default();
        reader.read_file(&expand_tilde(path));
        Self {
            hosts: reader.hosts,
        }
    }

    /// Parse config text; relative `Include` paths resolve against `base_dir`.
    pub fn parse(text: &str, base_dir: &Path) -> Self {
        let mut reader = Reader::default();
        reader.read_text(text, base_dir);
        Self {
            hosts: reader.hosts,
        }
    }

    /// First entry for `alias`, as OpenSSH gives the first value precedence.
    pub fn lookup(&self, alias: &str) -> Option<&SshHost> {
        self.hosts.iter().find(|h| h.alias == alias)
    }

    pub fn hosts(&self) -> &[SshHost] {
        &self.hosts
    }
}

#[derive(Default)]
struct Reader {
    hosts: Vec<SshHost>,
    visited: HashSet<PathBuf>,
}

impl Reader {
    fn read_file(&mut self, path: &Path) {
        let resolved = match path.canonicalize() {
            Ok(p) => p,
            Err(e) => {
                log::debug!("ssh config {} unavailable: {e}", path.display());
                return;
            }
        };
        if !self.visited.insert(resolved.clone()) {
            return;
        }
        let text = match std::fs::read(&resolved) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                log::warn!("could not read ssh config {}: {e}", resolved.display());
                return;
            }
        };
        let dir = resolved.parent().unwrap_or(Path::new("/")).to_path_buf();
        self.read_text(&text, &dir);
    }

    /// A `Match` ends the current file only.
    fn read_text(&mut self, text: &str, dir: &Path) {
        let mut patterns: Vec<String> = Vec::new();
        let mut options: HashMap<String, String> = HashMap::new();

        for line in text.lines() {
            let tokens = tokenize(line);
            let Some((keyword, values)) = tokens.split_first() else {
                continue;
            };
            match keyword.to_ascii_lowercase().as_str() {
                "match" => {
                    self.flush(&patterns, &options);
                    return;
                }
                "host" => {
                    self.flush(&patterns, &options);
                    patterns = values.to_vec();
                    options.clear();
                }
                "include" => {
                    self.flush(&patterns, &options);
                    patterns.clear();
                    options.clear();
                    self.include(values, dir);
                }
                key => {
                    if !patterns.is_empty() && !values.is_empty() {
                        options
                            .entry(key.to_string())
                            .or_insert_with(|| values.join(" "));
                    }
                }
            }
        }
        self.flush(&patterns, &options);
    }

    fn include(&mut self, patterns: &[String], dir: &Path) {
        for pattern in patterns {
            let mut path = expand_tilde(Path::new(pattern));
            if path.is_relative() {
                path = dir.join(path);
            }
            let matches = match glob::glob(&path.to_string_lossy()) {
                Ok(paths) => paths,
                Err(e) => {
                    log::warn!("bad Include pattern '{pattern}': {e}");
                    continue;
                }
            };
            for entry in matches.flatten() {
                self.read_file(&entry);
            }
        }
    }

    fn flush(&mut self, patterns: &[String], options: &HashMap<String, String>) {
        for alias in patterns {
            if alias.is_empty() || alias.contains(['*', '?', '!']) {
                continue;
            }
            let port = options.get("port").and_then(|p| match p.parse::<u16>() {
                Ok(port) if port > 0 => Some(port),
                _ => {
                    log::debug!("ignoring invalid port '{p}' for ssh host '{alias}'");
                    None
                }
            });
            self.hosts.push(SshHost {
                alias: alias.clone(),
                hostname: options.get("hostname").cloned(),
                user: options.get("user").cloned(),
                port,
                identity_file: options.get("identityfile").map(PathBuf::from),
            });
        }
    }
}

/// Split a config line into keyword and arguments. Handles `#` comments,
/// double quotes, and the `Keyword=value` form.
fn tokenize(line: &str) -> Vec<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Vec::new();
    }

    // `Key=value` and `Key = value` are both legal for the keyword.
    let (keyword, rest) = match line.find(|c: char| c.is_whitespace() || c == '=') {
        Some(idx) => {
            let rest = line[idx..].trim_start();
            let rest = rest.strip_prefix('=').unwrap_or(rest);
            (&line[..idx], rest)
        }
        None => (line, ""),
    };

    let mut tokens = vec![keyword.to_string()];
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    for c in rest.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            '#' if !in_quotes => break,
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}
